use std::collections::BTreeMap;

pub const SURFACE_VERTEX_MODEL_SHADER: &str =
    "embedded://bevy_map_terrain/shaders/surface_vertex_model.wgsl";
pub const SURFACE_VERTEX_VIEW_SHADER: &str =
    "embedded://bevy_map_terrain/shaders/surface_vertex_view.wgsl";
pub const SURFACE_FRAGMENT_SHADER: &str =
    "embedded://bevy_map_terrain/shaders/surface_fragment.wgsl";
pub const LAND_COVER_VERTEX_MODEL_SHADER: &str =
    "embedded://bevy_map_terrain/shaders/land_cover_vertex_model.wgsl";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DepthFunc {
    Less,
    LessEqual,
    Always,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DepthState {
    pub func: DepthFunc,
    pub write: bool,
}

/// The blend modes the engine cares about: standard alpha mixing for the
/// terrain, and an overriding opaque mode for land cover.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlendMode {
    Alpha,
    Opaque,
}

/// Where a shader function attaches in the program graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    VertexModel,
    VertexView,
    Fragment,
    FragmentColoring,
}

/// Where a shader function's text comes from: a shipped asset, or source
/// generated at state-assembly time (the color filter dispatch).
#[derive(Clone, Debug, PartialEq)]
pub enum ShaderSource {
    Path(&'static str),
    Generated(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShaderFunction {
    pub name: String,
    pub stage: ShaderStage,
    pub source: ShaderSource,
}

/// A composable shader program: preprocessor-style feature flags plus the
/// functions attached per stage. Re-setting a function replaces it by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VirtualShaderProgram {
    pub name: String,
    defines: BTreeMap<String, bool>,
    functions: Vec<ShaderFunction>,
}

impl VirtualShaderProgram {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn define(&mut self, name: impl Into<String>, enabled: bool) {
        self.defines.insert(name.into(), enabled);
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.get(name).copied().unwrap_or(false)
    }

    pub fn set_function(&mut self, function: ShaderFunction) {
        if let Some(slot) = self.functions.iter_mut().find(|f| f.name == function.name) {
            *slot = function;
        } else {
            self.functions.push(function);
        }
    }

    pub fn function(&self, name: &str) -> Option<&ShaderFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn functions(&self) -> &[ShaderFunction] {
        &self.functions
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Bool(bool),
    Vec4([f32; 4]),
}

/// The CPU-side model of one render state: fixed-function settings, the
/// uniform map and the optional shader program. The render integration
/// translates this into pipeline state; this core only assembles it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderStateSet {
    pub depth: Option<DepthState>,
    pub blend: Option<BlendMode>,
    /// Patch control point count, present when the surface is tessellated
    /// on the GPU.
    pub patch_vertices: Option<u32>,
    pub alpha_to_coverage: bool,
    uniforms: BTreeMap<String, UniformValue>,
    program: Option<VirtualShaderProgram>,
}

impl RenderStateSet {
    pub fn set_uniform(&mut self, name: impl Into<String>, value: UniformValue) {
        self.uniforms.insert(name.into(), value);
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    pub fn uniforms(&self) -> impl Iterator<Item = (&String, &UniformValue)> {
        self.uniforms.iter()
    }

    pub fn program_mut(&mut self) -> &mut VirtualShaderProgram {
        self.program.get_or_insert_with(VirtualShaderProgram::default)
    }

    pub fn program(&self) -> Option<&VirtualShaderProgram> {
        self.program.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_overwrite_by_name() {
        let mut state = RenderStateSet::default();
        state.set_uniform("layer_opacity", UniformValue::Float(1.0));
        state.set_uniform("layer_opacity", UniformValue::Float(0.5));

        assert_eq!(
            state.uniform("layer_opacity"),
            Some(&UniformValue::Float(0.5))
        );
        assert_eq!(state.uniforms().count(), 1);
    }

    #[test]
    fn program_functions_replace_by_name() {
        let mut program = VirtualShaderProgram::named("surface");
        program.set_function(ShaderFunction {
            name: "surface_fragment".into(),
            stage: ShaderStage::Fragment,
            source: ShaderSource::Path(SURFACE_FRAGMENT_SHADER),
        });
        program.set_function(ShaderFunction {
            name: "surface_fragment".into(),
            stage: ShaderStage::Fragment,
            source: ShaderSource::Generated("fn surface_fragment() {}".into()),
        });

        assert_eq!(program.functions().len(), 1);
        assert!(matches!(
            program.function("surface_fragment").unwrap().source,
            ShaderSource::Generated(_)
        ));
    }

    #[test]
    fn defines_default_to_off() {
        let mut program = VirtualShaderProgram::default();
        assert!(!program.is_defined("USE_BLENDING"));
        program.define("USE_BLENDING", true);
        assert!(program.is_defined("USE_BLENDING"));
    }
}
