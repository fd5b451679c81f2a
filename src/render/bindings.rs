use crate::map::layers::{ImageLayer, LayerUid};
use derive_more::Display;

/// What a bound texture unit feeds into the shaders.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum BindingUsage {
    #[display("color")]
    Color,
    #[display("elevation")]
    Elevation,
    #[display("normal")]
    Normal,
    #[display("shared layer")]
    SharedLayer,
}

/// One texture-unit assignment: a usage role, the reserved unit and the
/// shader-visible sampler and matrix uniform names. Shared-layer bindings
/// remember which layer they belong to, so they can be dropped when the
/// layer goes away.
#[derive(Clone, Debug)]
pub struct SamplerBinding {
    usage: BindingUsage,
    unit: u32,
    sampler_name: String,
    matrix_name: String,
    source_layer: Option<LayerUid>,
}

impl SamplerBinding {
    pub fn new(
        usage: BindingUsage,
        unit: u32,
        sampler_name: impl Into<String>,
        matrix_name: impl Into<String>,
    ) -> Self {
        Self {
            usage,
            unit,
            sampler_name: sampler_name.into(),
            matrix_name: matrix_name.into(),
            source_layer: None,
        }
    }

    /// A binding for a shared image layer, named as the layer declares or
    /// synthesized from its uid.
    pub fn shared(layer: &ImageLayer, unit: u32) -> Self {
        let uid = layer.uid();
        Self {
            usage: BindingUsage::SharedLayer,
            unit,
            sampler_name: layer
                .share_sampler_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("shared_layer_{uid}_sampler")),
            matrix_name: layer
                .share_matrix_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("shared_layer_{uid}_matrix")),
            source_layer: Some(uid),
        }
    }

    pub fn usage(&self) -> BindingUsage {
        self.usage
    }

    pub fn unit(&self) -> u32 {
        self.unit
    }

    pub fn sampler_name(&self) -> &str {
        &self.sampler_name
    }

    pub fn matrix_name(&self) -> &str {
        &self.matrix_name
    }

    pub fn source_layer(&self) -> Option<LayerUid> {
        self.source_layer
    }
}

/// The active sampler bindings of one engine. Unit indices are unique
/// across the set, guaranteed by every unit coming out of the engine's pool.
#[derive(Default)]
pub struct RenderBindings {
    bindings: Vec<SamplerBinding>,
}

impl RenderBindings {
    pub fn push(&mut self, binding: SamplerBinding) {
        debug_assert!(
            !self.bindings.iter().any(|b| b.unit() == binding.unit()),
            "texture unit {} bound twice",
            binding.unit()
        );
        self.bindings.push(binding);
    }

    pub fn remove_layer(&mut self, uid: LayerUid) -> Option<SamplerBinding> {
        let index = self
            .bindings
            .iter()
            .position(|b| b.source_layer() == Some(uid))?;
        Some(self.bindings.remove(index))
    }

    pub fn layer_binding(&self, uid: LayerUid) -> Option<&SamplerBinding> {
        self.bindings.iter().find(|b| b.source_layer() == Some(uid))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SamplerBinding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_binding_synthesizes_names_from_the_layer_uid() {
        let layer = ImageLayer::new("landsat").shared();
        let binding = SamplerBinding::shared(&layer, 5);

        let uid = layer.uid();
        assert_eq!(binding.sampler_name(), format!("shared_layer_{uid}_sampler"));
        assert_eq!(binding.matrix_name(), format!("shared_layer_{uid}_matrix"));
        assert_eq!(binding.source_layer(), Some(uid));
    }

    #[test]
    fn declared_uniform_names_win_over_synthesis() {
        let layer = ImageLayer::new("landsat")
            .shared()
            .with_share_uniform_names("landsat_sampler", "landsat_matrix");
        let binding = SamplerBinding::shared(&layer, 2);

        assert_eq!(binding.sampler_name(), "landsat_sampler");
        assert_eq!(binding.matrix_name(), "landsat_matrix");
    }

    #[test]
    fn bindings_are_removable_by_layer() {
        let mut bindings = RenderBindings::default();
        bindings.push(SamplerBinding::new(BindingUsage::Color, 0, "color", "color_mat"));

        let layer = ImageLayer::new("shared").shared();
        bindings.push(SamplerBinding::shared(&layer, 1));
        assert_eq!(bindings.len(), 2);

        assert!(bindings.remove_layer(layer.uid()).is_some());
        assert!(bindings.remove_layer(layer.uid()).is_none());
        assert_eq!(bindings.len(), 1);
    }
}
