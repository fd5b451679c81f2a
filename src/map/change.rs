use crate::{
    map::layers::{ElevationLayer, ImageLayer},
    terrain_data::coordinates::Profile,
};
use std::sync::Arc;

/// A single change to the map model.
///
/// The engine dispatches over the complete set at one site; model-layer
/// changes are part of the set but carry no terrain content and are handled
/// as explicit no-ops.
#[derive(Clone, Debug)]
pub enum MapChange {
    ProfileEstablished(Profile),
    ImageLayerAdded(Arc<ImageLayer>),
    ImageLayerRemoved(Arc<ImageLayer>),
    ImageLayerMoved {
        layer: Arc<ImageLayer>,
        old_index: usize,
        new_index: usize,
    },
    ElevationLayerAdded(Arc<ElevationLayer>),
    ElevationLayerRemoved(Arc<ElevationLayer>),
    ElevationLayerMoved {
        layer: Arc<ElevationLayer>,
        old_index: usize,
        new_index: usize,
    },
    ElevationLayerToggled(Arc<ElevationLayer>),
    ModelLayerAdded,
    ModelLayerRemoved,
    ModelLayerMoved,
    BeginBatchUpdate,
    EndBatchUpdate,
}
