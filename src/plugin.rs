use crate::{
    engine::{
        directory::EngineDirectory, TerrainEngineNode, Traversal, TraversalKind,
    },
    map::MapChange,
    render::render_bin::RenderBinRegistry,
};
use bevy::{core::FrameCount, prelude::*};
use std::sync::Arc;

/// A map model change, forwarded to every engine by the plugin.
#[derive(Event)]
pub struct MapChangeEvent(pub MapChange);

/// The process-scoped engine directory, injected into engines at spawn.
#[derive(Resource, Default, Deref)]
pub struct SharedEngineDirectory(pub Arc<EngineDirectory>);

/// The process-scoped render bin registry, injected into engines at spawn.
#[derive(Resource, Default, Deref)]
pub struct SharedRenderBinRegistry(pub Arc<RenderBinRegistry>);

/// Wires the terrain engine into the app: the shared service resources, the
/// map change event, and the per-frame traversal and attachment systems.
pub struct TerrainEnginePlugin;

impl Plugin for TerrainEnginePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SharedEngineDirectory>()
            .init_resource::<SharedRenderBinRegistry>()
            .add_event::<MapChangeEvent>()
            .add_systems(Update, update_traversal)
            .add_systems(PostUpdate, (dispatch_map_changes, cull_traversal).chain())
            .add_systems(Last, (draw_traversal, attach_completed_tiles).chain());
    }
}

fn dispatch_map_changes(
    mut events: EventReader<MapChangeEvent>,
    mut engines: Query<&mut TerrainEngineNode>,
) {
    for event in events.read() {
        for mut engine in &mut engines {
            engine.on_map_change(&event.0);
        }
    }
}

fn update_traversal(frame: Res<FrameCount>, mut engines: Query<&mut TerrainEngineNode>) {
    for mut engine in &mut engines {
        let mut traversal = Traversal::new(TraversalKind::Update, frame.0 as u64);
        engine.traverse(&mut traversal);
    }
}

fn cull_traversal(frame: Res<FrameCount>, mut engines: Query<&mut TerrainEngineNode>) {
    for mut engine in &mut engines {
        let mut traversal = Traversal::new(TraversalKind::Cull, frame.0 as u64);
        engine.traverse(&mut traversal);
    }
}

fn draw_traversal(frame: Res<FrameCount>, mut engines: Query<&mut TerrainEngineNode>) {
    for mut engine in &mut engines {
        let mut traversal = Traversal::new(TraversalKind::Draw, frame.0 as u64);
        engine.traverse(&mut traversal);
    }
}

fn attach_completed_tiles(mut engines: Query<&mut TerrainEngineNode>) {
    for mut engine in &mut engines {
        engine.attach_completed_tiles();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        map::{ImageLayer, Map},
        options::{Capabilities, TerrainOptions},
        terrain_data::coordinates::Profile,
    };

    #[test]
    fn plugin_drives_traversals_and_map_changes() {
        let mut app = App::new();
        app.add_plugins((MinimalPlugins, TerrainEnginePlugin));

        let map = Arc::new(Map::with_profile(Profile::global_geodetic()));
        let engine = {
            let directory = app.world().resource::<SharedEngineDirectory>().0.clone();
            let bins = app.world().resource::<SharedRenderBinRegistry>().0.clone();
            TerrainEngineNode::new(
                map.clone(),
                TerrainOptions::default(),
                Capabilities::default(),
                directory,
                bins,
            )
        };
        let entity = app.world_mut().spawn(engine).id();

        app.update();

        let change = map.add_image_layer(ImageLayer::new("imagery"));
        app.world_mut().send_event(MapChangeEvent(change));
        app.update();

        let engine = app
            .world()
            .entity(entity)
            .get::<TerrainEngineNode>()
            .unwrap();
        assert_eq!(engine.roots().len(), 2);
        assert!(engine.stats().rebuild_count >= 2);
        assert!(engine.live().traversal_frame() > 0);
    }
}
