//! The map/layer model consumed by the engine: a revisioned stack of image
//! and elevation layers plus the tiling profile.
//!
//! The map itself is mutated by the application. Every mutator bumps the
//! revision and returns the corresponding [`MapChange`], which the
//! application forwards to the engine (directly or through the plugin's
//! change event). [`MapFrame`] is the copy-forward snapshot the engine and
//! its worker contexts read: `sync` copies the latest layer stack and
//! revision over, so readers never observe a half-applied change.

pub mod change;
pub mod layers;

pub use change::MapChange;
pub use layers::{ColorFilter, ElevationLayer, ImageLayer, LayerUid};

use crate::terrain_data::coordinates::Profile;
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct MapModel {
    profile: Option<Profile>,
    image_layers: Vec<Arc<ImageLayer>>,
    elevation_layers: Vec<Arc<ElevationLayer>>,
    revision: u64,
}

/// The shared map model. Cheap to clone behind an `Arc`; readers take the
/// inner lock only long enough to copy `Arc` handles out.
#[derive(Default)]
pub struct Map {
    model: RwLock<MapModel>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(profile: Profile) -> Self {
        let map = Self::new();
        map.set_profile(profile);
        map
    }

    pub fn revision(&self) -> u64 {
        self.model.read().unwrap().revision
    }

    pub fn profile(&self) -> Option<Profile> {
        self.model.read().unwrap().profile.clone()
    }

    pub fn image_layers(&self) -> Vec<Arc<ImageLayer>> {
        self.model.read().unwrap().image_layers.clone()
    }

    pub fn elevation_layers(&self) -> Vec<Arc<ElevationLayer>> {
        self.model.read().unwrap().elevation_layers.clone()
    }

    pub fn set_profile(&self, profile: Profile) -> MapChange {
        let mut model = self.model.write().unwrap();
        model.profile = Some(profile.clone());
        model.revision += 1;
        MapChange::ProfileEstablished(profile)
    }

    pub fn add_image_layer(&self, layer: ImageLayer) -> MapChange {
        let layer = Arc::new(layer);
        let mut model = self.model.write().unwrap();
        model.image_layers.push(layer.clone());
        model.revision += 1;
        MapChange::ImageLayerAdded(layer)
    }

    pub fn remove_image_layer(&self, uid: LayerUid) -> Option<MapChange> {
        let mut model = self.model.write().unwrap();
        let index = model.image_layers.iter().position(|l| l.uid() == uid)?;
        let layer = model.image_layers.remove(index);
        model.revision += 1;
        Some(MapChange::ImageLayerRemoved(layer))
    }

    pub fn move_image_layer(&self, old_index: usize, new_index: usize) -> Option<MapChange> {
        let mut model = self.model.write().unwrap();
        if old_index >= model.image_layers.len() {
            return None;
        }
        let layer = model.image_layers.remove(old_index);
        let new_index = new_index.min(model.image_layers.len());
        model.image_layers.insert(new_index, layer.clone());
        model.revision += 1;
        Some(MapChange::ImageLayerMoved {
            layer,
            old_index,
            new_index,
        })
    }

    pub fn add_elevation_layer(&self, layer: ElevationLayer) -> MapChange {
        let layer = Arc::new(layer);
        let mut model = self.model.write().unwrap();
        model.elevation_layers.push(layer.clone());
        model.revision += 1;
        MapChange::ElevationLayerAdded(layer)
    }

    pub fn remove_elevation_layer(&self, uid: LayerUid) -> Option<MapChange> {
        let mut model = self.model.write().unwrap();
        let index = model.elevation_layers.iter().position(|l| l.uid() == uid)?;
        let layer = model.elevation_layers.remove(index);
        model.revision += 1;
        Some(MapChange::ElevationLayerRemoved(layer))
    }

    pub fn move_elevation_layer(&self, old_index: usize, new_index: usize) -> Option<MapChange> {
        let mut model = self.model.write().unwrap();
        if old_index >= model.elevation_layers.len() {
            return None;
        }
        let layer = model.elevation_layers.remove(old_index);
        let new_index = new_index.min(model.elevation_layers.len());
        model.elevation_layers.insert(new_index, layer.clone());
        model.revision += 1;
        Some(MapChange::ElevationLayerMoved {
            layer,
            old_index,
            new_index,
        })
    }

    pub fn set_elevation_layer_visible(&self, uid: LayerUid, visible: bool) -> Option<MapChange> {
        let mut model = self.model.write().unwrap();
        let layer = model
            .elevation_layers
            .iter()
            .find(|l| l.uid() == uid)?
            .clone();
        layer.set_visible(visible);
        model.revision += 1;
        Some(MapChange::ElevationLayerToggled(layer))
    }

    /// Brackets a sequence of changes whose terrain effects should coalesce.
    /// Batch markers do not advance the revision.
    pub fn begin_batch(&self) -> MapChange {
        MapChange::BeginBatchUpdate
    }

    pub fn end_batch(&self) -> MapChange {
        MapChange::EndBatchUpdate
    }
}

/// The state of the map as of one revision.
#[derive(Clone, Default)]
pub struct FrameState {
    pub revision: u64,
    pub profile: Option<Profile>,
    pub image_layers: Vec<Arc<ImageLayer>>,
    pub elevation_layers: Vec<Arc<ElevationLayer>>,
}

/// A copy-forward view of the map, advanced explicitly via [`sync`](Self::sync).
///
/// The engine owns one frame for the update path; each worker-thread context
/// owns another, so tile builds never contend with the update thread.
pub struct MapFrame {
    map: Arc<Map>,
    state: RwLock<FrameState>,
}

impl MapFrame {
    pub fn new(map: Arc<Map>) -> Self {
        let frame = Self {
            map,
            state: RwLock::new(FrameState::default()),
        };
        frame.sync();
        frame
    }

    /// Copies the latest map state forward. Returns whether the revision
    /// advanced.
    pub fn sync(&self) -> bool {
        let revision = self.map.revision();
        let mut state = self.state.write().unwrap();
        let advanced = revision > state.revision;
        *state = FrameState {
            revision,
            profile: self.map.profile(),
            image_layers: self.map.image_layers(),
            elevation_layers: self.map.elevation_layers(),
        };
        advanced
    }

    pub fn read(&self) -> FrameState {
        self.state.read().unwrap().clone()
    }

    pub fn revision(&self) -> u64 {
        self.state.read().unwrap().revision
    }

    pub fn profile(&self) -> Option<Profile> {
        self.state.read().unwrap().profile.clone()
    }
}
