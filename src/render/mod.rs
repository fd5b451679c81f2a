//! The GPU-facing state this core assembles: the texture unit pool, sampler
//! bindings, render bins and the CPU-side render/shader state model that
//! the render integration consumes.

pub mod bindings;
pub mod render_bin;
pub mod state;
pub mod unit_pool;

pub use bindings::{BindingUsage, RenderBindings, SamplerBinding};
pub use render_bin::{BinSortMode, RenderBinPrototype, RenderBinRegistry};
pub use state::{
    BlendMode, DepthFunc, DepthState, RenderStateSet, ShaderFunction, ShaderSource, ShaderStage,
    UniformValue, VirtualShaderProgram,
};
pub use unit_pool::TextureUnitPool;
