use crate::render::state::{ShaderFunction, ShaderSource, ShaderStage, VirtualShaderProgram};
use derive_more::{Display, From};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Mutex,
};

/// Unique identifier of a layer within the process.
#[derive(Copy, Clone, Debug, Display, From, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct LayerUid(u64);

impl LayerUid {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A per-layer color correction step, applied in declared order by the
/// generated filter dispatch function.
#[derive(Clone, Debug)]
pub struct ColorFilter {
    entry_point: String,
    source: String,
}

impl ColorFilter {
    pub fn new(entry_point: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
            source: source.into(),
        }
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Installs the filter's shader function into the given program.
    pub fn install(&self, program: &mut VirtualShaderProgram) {
        program.set_function(ShaderFunction {
            name: self.entry_point.clone(),
            stage: ShaderStage::FragmentColoring,
            source: ShaderSource::Generated(self.source.clone()),
        });
    }
}

/// An imagery layer of the map.
///
/// A shared layer asks the engine for a dedicated texture image unit, so its
/// texture stays visible to the shaders of every tile. The assigned unit
/// lives on the layer for the layer's enabled lifetime.
#[derive(Debug)]
pub struct ImageLayer {
    uid: LayerUid,
    name: String,
    enabled: bool,
    shared: bool,
    share_sampler_name: Option<String>,
    share_matrix_name: Option<String>,
    share_unit: Mutex<Option<u32>>,
    color_filters: Vec<ColorFilter>,
    opacity: f32,
}

impl ImageLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uid: LayerUid::next(),
            name: name.into(),
            enabled: true,
            shared: false,
            share_sampler_name: None,
            share_matrix_name: None,
            share_unit: Mutex::new(None),
            color_filters: Vec::new(),
            opacity: 1.0,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    /// Declares the uniform names the shared texture is published under.
    /// Without this, names are synthesized from the layer uid.
    pub fn with_share_uniform_names(
        mut self,
        sampler: impl Into<String>,
        matrix: impl Into<String>,
    ) -> Self {
        self.share_sampler_name = Some(sampler.into());
        self.share_matrix_name = Some(matrix.into());
        self
    }

    pub fn with_color_filter(mut self, filter: ColorFilter) -> Self {
        self.color_filters.push(filter);
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn uid(&self) -> LayerUid {
        self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn color_filters(&self) -> &[ColorFilter] {
        &self.color_filters
    }

    pub fn share_sampler_name(&self) -> Option<&str> {
        self.share_sampler_name.as_deref()
    }

    pub fn share_matrix_name(&self) -> Option<&str> {
        self.share_matrix_name.as_deref()
    }

    pub fn share_unit(&self) -> Option<u32> {
        *self.share_unit.lock().unwrap()
    }

    pub(crate) fn set_share_unit(&self, unit: u32) {
        *self.share_unit.lock().unwrap() = Some(unit);
    }

    pub(crate) fn take_share_unit(&self) -> Option<u32> {
        self.share_unit.lock().unwrap().take()
    }
}

/// An elevation layer of the map. Visibility can be toggled at runtime,
/// which reaches the engine as a layer-toggled change.
#[derive(Debug)]
pub struct ElevationLayer {
    uid: LayerUid,
    name: String,
    enabled: bool,
    visible: AtomicBool,
}

impl ElevationLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uid: LayerUid::next(),
            name: name.into(),
            enabled: true,
            visible: AtomicBool::new(true),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn uid(&self) -> LayerUid {
        self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    pub(crate) fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }
}
