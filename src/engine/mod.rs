//! The terrain engine orchestrator: owns the tile tree, reacts to map model
//! changes, assembles the GPU-facing render state and feeds the per-thread
//! engine context into each frame's traversals.

pub mod context;
pub mod directory;

pub use context::EngineContext;
pub use directory::{EngineDirectory, EngineShared, EngineUid};

use crate::{
    geometry_pool::{GeometryPool, NO_POOL_ENV},
    map::{
        layers::{ElevationLayer, ImageLayer, LayerUid},
        Map, MapChange, MapFrame,
    },
    options::{Capabilities, ElevationInterpolation, TerrainOptions},
    render::{
        bindings::{BindingUsage, RenderBindings, SamplerBinding},
        render_bin::{BinSortMode, RenderBinPrototype, RenderBinRegistry},
        state::{
            BlendMode, DepthFunc, DepthState, RenderStateSet, ShaderFunction, ShaderSource,
            ShaderStage, UniformValue, LAND_COVER_VERTEX_MODEL_SHADER, SURFACE_FRAGMENT_SHADER,
            SURFACE_VERTEX_MODEL_SHADER, SURFACE_VERTEX_VIEW_SHADER,
        },
        unit_pool::TextureUnitPool,
    },
    terrain_data::{
        coordinates::GeoExtent,
        tile_loader::{build_tile, AsyncTileLoader, BuiltTile, TileLoader},
        tile_node::TileNode,
        tile_registry::TileNodeRegistry,
        tile_source::TileSource,
    },
};
use bevy::prelude::*;
use context::ContextCache;
use itertools::Itertools;
use std::{
    any::Any,
    collections::HashMap,
    ops::Deref,
    sync::{Arc, RwLock},
};

/// Reserved picking identity marking terrain geometry. Zero means "nothing".
pub const TERRAIN_OBJECT_ID: u32 = 1;

/// Sentinel value of the `layer_uid` uniform meaning "no image layer".
pub const NO_LAYER_UID: i32 = -1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraversalKind {
    Update,
    Cull,
    Draw,
}

/// One per-frame visit by the rendering driver. `user_data` is the
/// traversal's ambient payload; while the engine descends its tiles it
/// temporarily holds the engine context.
pub struct Traversal {
    pub kind: TraversalKind,
    pub frame: u64,
    pub user_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl Traversal {
    pub fn new(kind: TraversalKind, frame: u64) -> Self {
        Self {
            kind,
            frame,
            user_data: None,
        }
    }

    /// The engine context of the traversal, when one is installed.
    pub fn engine_context(&self) -> Option<Arc<EngineContext>> {
        self.user_data.clone()?.downcast::<EngineContext>().ok()
    }
}

/// Swaps the engine context into a traversal's ambient user data and puts
/// the prior value back when dropped, so the swap is undone on every exit
/// path.
struct AmbientContext<'a> {
    traversal: &'a mut Traversal,
    prior: Option<Arc<dyn Any + Send + Sync>>,
}

impl<'a> AmbientContext<'a> {
    fn install(traversal: &'a mut Traversal, context: Arc<EngineContext>) -> Self {
        let context: Arc<dyn Any + Send + Sync> = context;
        let prior = traversal.user_data.replace(context);
        Self { traversal, prior }
    }
}

impl Deref for AmbientContext<'_> {
    type Target = Traversal;

    fn deref(&self) -> &Traversal {
        self.traversal
    }
}

impl Drop for AmbientContext<'_> {
    fn drop(&mut self) {
        self.traversal.user_data = self.prior.take();
    }
}

/// Nodes retired from the scene, released in one go outside the critical
/// frame path.
#[derive(Default)]
struct ReleaseQueue {
    pending: Vec<Arc<TileNode>>,
}

impl ReleaseQueue {
    fn extend(&mut self, nodes: Vec<Arc<TileNode>>) {
        self.pending.extend(nodes);
    }

    fn flush(&mut self) -> usize {
        let released = self.pending.len();
        self.pending.clear();
        released
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct EngineStats {
    pub tile_count: u64,
    /// Cumulative seconds spent building tiles.
    pub tile_creation_time: f64,
    pub rebuild_count: u64,
    pub state_update_count: u64,
}

/// The terrain engine: a quadtree of streamed tiles over a layered map.
///
/// One instance renders one map. Construction registers the engine's render
/// bins and its directory entry; both are withdrawn again on drop.
#[derive(Component)]
pub struct TerrainEngineNode {
    uid: EngineUid,
    options: TerrainOptions,
    capabilities: Capabilities,
    map: Arc<Map>,
    update_frame: MapFrame,
    shared: Arc<EngineShared>,
    bindings: Arc<RwLock<RenderBindings>>,
    unit_pool: TextureUnitPool,
    bin_registry: Arc<RenderBinRegistry>,
    surface_bin: Arc<RenderBinPrototype>,
    land_cover_bin: Arc<RenderBinPrototype>,
    terrain_state: RenderStateSet,
    directory: Arc<EngineDirectory>,
    contexts: ContextCache,
    source: Option<Arc<dyn TileSource>>,
    require_parent_textures: bool,
    roots: Vec<Arc<TileNode>>,
    image_order: Vec<LayerUid>,
    elevation_order: Vec<LayerUid>,
    release_queue: ReleaseQueue,
    batch_in_progress: bool,
    refresh_required: bool,
    state_update_required: bool,
    stats: EngineStats,
}

impl TerrainEngineNode {
    pub fn new(
        map: Arc<Map>,
        options: TerrainOptions,
        capabilities: Capabilities,
        directory: Arc<EngineDirectory>,
        bin_registry: Arc<RenderBinRegistry>,
    ) -> Self {
        let uid = EngineUid::next();

        // uniquely named render bin prototypes for this engine
        let surface_bin = Arc::new(RenderBinPrototype::new(
            format!("surface.{uid}"),
            BinSortMode::FrontToBack,
        ));
        let land_cover_bin = Arc::new(RenderBinPrototype::new(
            format!("land_cover.{uid}"),
            BinSortMode::Unordered,
        ));
        bin_registry.register(surface_bin.clone());
        bin_registry.register(land_cover_bin.clone());

        let update_frame = MapFrame::new(map.clone());

        let live = Arc::new(TileNodeRegistry::live("live"));
        live.set_map_revision(update_frame.revision());
        let dead = options
            .quick_release_gpu_objects
            .then(|| Arc::new(TileNodeRegistry::dead("dead")));

        let geometry_pool = std::env::var_os(NO_POOL_ENV)
            .is_none()
            .then(|| Arc::new(GeometryPool::new()));

        let loader: Arc<dyn TileLoader> = Arc::new(AsyncTileLoader::new());

        let shared = Arc::new(EngineShared {
            uid,
            live,
            dead,
            loader,
            geometry_pool,
        });
        directory.register(&shared);

        // blending between levels needs each tile's parent texture
        let require_parent_textures = options.lod_blending;

        let mut engine = Self {
            uid,
            unit_pool: TextureUnitPool::new(capabilities.max_texture_image_units),
            options,
            capabilities,
            map,
            update_frame,
            shared,
            bindings: Arc::new(RwLock::new(RenderBindings::default())),
            bin_registry,
            surface_bin,
            land_cover_bin,
            terrain_state: RenderStateSet::default(),
            directory,
            contexts: ContextCache::default(),
            source: None,
            require_parent_textures,
            roots: Vec::new(),
            image_order: Vec::new(),
            elevation_order: Vec::new(),
            release_queue: ReleaseQueue::default(),
            batch_in_progress: false,
            refresh_required: false,
            state_update_required: false,
            stats: EngineStats::default(),
        };
        engine.initialize();
        engine
    }

    fn initialize(&mut self) {
        // an already-established profile means the map is ready to tile
        if self.update_frame.profile().is_some() {
            self.dirty_terrain();
        }

        // prime pre-existing layers, suppressing refresh until done
        self.batch_in_progress = true;
        let frame = self.update_frame.read();
        for layer in &frame.elevation_layers {
            self.add_elevation_layer(layer);
        }
        for layer in &frame.image_layers {
            self.add_image_layer(layer);
        }
        self.batch_in_progress = false;
        self.refresh_required = false;
        self.state_update_required = false;

        // terrain-wide uniforms
        self.terrain_state.set_uniform(
            "terrain_min_tile_range_factor",
            UniformValue::Float(self.options.min_tile_range_factor),
        );
        self.terrain_state.set_uniform(
            "terrain_lodblend_delay",
            UniformValue::Float(self.options.lod_blend_delay),
        );
        self.terrain_state.set_uniform(
            "terrain_lodblend_duration",
            UniformValue::Float(self.options.lod_blend_duration),
        );

        self.update_state();
    }

    pub fn uid(&self) -> EngineUid {
        self.uid
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn options(&self) -> &TerrainOptions {
        &self.options
    }

    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    pub fn live(&self) -> &Arc<TileNodeRegistry> {
        &self.shared.live
    }

    pub fn roots(&self) -> &[Arc<TileNode>] {
        &self.roots
    }

    pub fn image_order(&self) -> &[LayerUid] {
        &self.image_order
    }

    pub fn elevation_order(&self) -> &[LayerUid] {
        &self.elevation_order
    }

    pub fn surface_bin(&self) -> &Arc<RenderBinPrototype> {
        &self.surface_bin
    }

    pub fn land_cover_bin(&self) -> &Arc<RenderBinPrototype> {
        &self.land_cover_bin
    }

    pub fn terrain_state(&self) -> &RenderStateSet {
        &self.terrain_state
    }

    pub fn available_texture_units(&self) -> usize {
        self.unit_pool.available()
    }

    pub fn bindings(&self) -> &Arc<RwLock<RenderBindings>> {
        &self.bindings
    }

    /// Whether tiles must keep their parent's textures resident, which
    /// blending between levels of detail requires.
    pub fn requires_parent_textures(&self) -> bool {
        self.require_parent_textures
    }

    /// Installs the elevation source consulted by tile builds. Existing
    /// per-thread contexts are discarded and the terrain rebuilt, so new
    /// data reaches every tile.
    pub fn set_tile_source(&mut self, source: Arc<dyn TileSource>) {
        self.source = Some(source);
        self.contexts = ContextCache::default();
        self.refresh(false);
    }

    /// The calling thread's engine context, created on first use.
    pub fn context(&self) -> Arc<EngineContext> {
        self.contexts.get_or_create(|| {
            let optimize_triangle_orientation =
                self.options.elevation_interpolation != ElevationInterpolation::Triangulate;

            EngineContext::new(
                self.uid,
                MapFrame::new(self.map.clone()),
                self.shared.geometry_pool.clone(),
                self.shared.loader.clone(),
                self.shared.live.clone(),
                self.shared.dead.clone(),
                self.bindings.clone(),
                self.options.clone(),
                self.source.clone(),
                optimize_triangle_orientation,
            )
        })
    }

    /// Marks every resident tile intersecting `extent` within the level
    /// range as needing a refresh, reprojecting into the map's reference
    /// system first. An extent without a usable reference system is a
    /// caller error and marks nothing.
    pub fn invalidate_region(&self, extent: &GeoExtent, min_level: u32, max_level: u32) {
        let Some(profile) = self.update_frame.profile() else {
            return;
        };
        let Some(region) = profile.reproject(extent) else {
            warn!("invalidated extent has no usable reference system, ignored");
            return;
        };

        let marked = self.shared.live.set_dirty(&region, min_level, max_level);
        debug!("invalidated {marked} tiles in levels {min_level}..={max_level}");
    }

    /// Rebuilds the terrain against the latest map state. Inside a batch
    /// the rebuild is deferred to the batch end. A forced refresh
    /// additionally dirty-marks every resident tile, so holders of
    /// in-flight references observe the invalidation too.
    pub fn refresh(&mut self, force_dirty: bool) {
        if self.batch_in_progress {
            self.refresh_required = true;
            return;
        }

        if force_dirty {
            if let Some(profile) = self.update_frame.profile() {
                self.shared
                    .live
                    .set_dirty(&profile.extent(), 0, u32::MAX);
            }
        }

        self.dirty_terrain();
        self.refresh_required = false;
    }

    /// Applies one map model change. This is the single dispatch site over
    /// the complete change set.
    pub fn on_map_change(&mut self, change: &MapChange) {
        match change {
            MapChange::BeginBatchUpdate => {
                self.batch_in_progress = true;
            }
            MapChange::EndBatchUpdate => {
                self.batch_in_progress = false;
                if self.refresh_required {
                    self.refresh(false);
                }
                if self.state_update_required {
                    self.update_state();
                }
            }
            change => {
                // bring the update-side frame forward and publish the
                // revision before reacting to the change itself
                if self.update_frame.sync() {
                    self.shared
                        .live
                        .set_map_revision(self.update_frame.revision());
                }

                match change {
                    MapChange::ProfileEstablished(_) => self.dirty_terrain(),
                    MapChange::ImageLayerAdded(layer) => self.add_image_layer(layer),
                    MapChange::ImageLayerRemoved(layer) => self.remove_image_layer(layer),
                    MapChange::ImageLayerMoved {
                        old_index,
                        new_index,
                        ..
                    } => self.move_image_layer(*old_index, *new_index),
                    MapChange::ElevationLayerAdded(layer) => self.add_elevation_layer(layer),
                    MapChange::ElevationLayerRemoved(layer) => self.remove_elevation_layer(layer),
                    MapChange::ElevationLayerMoved {
                        old_index,
                        new_index,
                        ..
                    } => self.move_elevation_layer(*old_index, *new_index),
                    MapChange::ElevationLayerToggled(_) => self.refresh(true),
                    // model layers carry no terrain content
                    MapChange::ModelLayerAdded
                    | MapChange::ModelLayerRemoved
                    | MapChange::ModelLayerMoved => {}
                    MapChange::BeginBatchUpdate | MapChange::EndBatchUpdate => unreachable!(),
                }
            }
        }
    }

    fn add_image_layer(&mut self, layer: &Arc<ImageLayer>) {
        if layer.is_enabled() && layer.is_shared() {
            // a shared layer needs a dedicated image unit
            if layer.share_unit().is_none() {
                match self.unit_pool.reserve(layer.name()) {
                    Some(unit) => {
                        layer.set_share_unit(unit);
                        info!("image unit {unit} assigned to shared layer {}", layer.name());
                    }
                    None => {
                        warn!(
                            "insufficient texture image units to share layer {}",
                            layer.name()
                        );
                    }
                }
            }

            if let Some(unit) = layer.share_unit() {
                self.bindings
                    .write()
                    .unwrap()
                    .push(SamplerBinding::shared(layer, unit));
            }
        }

        self.image_order.push(layer.uid());
        self.refresh(false);
    }

    fn remove_image_layer(&mut self, layer: &Arc<ImageLayer>) {
        if layer.is_enabled() && layer.is_shared() {
            if let Some(unit) = layer.take_share_unit() {
                self.unit_pool.release(unit);
                self.bindings.write().unwrap().remove_layer(layer.uid());
                // sampler uniforms already installed for the layer go stale
                // and are not scrubbed from existing state sets
            }
        }

        self.image_order.retain(|uid| *uid != layer.uid());
        self.refresh(false);
    }

    fn move_image_layer(&mut self, old_index: usize, new_index: usize) {
        move_within(&mut self.image_order, old_index, new_index);
        self.update_state();
    }

    fn add_elevation_layer(&mut self, layer: &Arc<ElevationLayer>) {
        if !layer.is_enabled() {
            return;
        }
        self.elevation_order.push(layer.uid());
        self.refresh(false);
    }

    fn remove_elevation_layer(&mut self, layer: &Arc<ElevationLayer>) {
        if !layer.is_enabled() {
            return;
        }
        self.elevation_order.retain(|uid| *uid != layer.uid());
        self.refresh(false);
    }

    fn move_elevation_layer(&mut self, old_index: usize, new_index: usize) {
        move_within(&mut self.elevation_order, old_index, new_index);
        self.refresh(false);
    }

    /// Discards the tile tree and regenerates the root tile set against the
    /// latest map snapshot. Without an established profile the terrain
    /// stays un-built.
    fn dirty_terrain(&mut self) {
        self.retire_tree();

        if self.bindings.read().unwrap().is_empty() {
            self.setup_render_bindings();
        }

        let frame = self.update_frame.read();
        let Some(profile) = frame.profile else {
            debug!("terrain rebuild deferred until a profile is established");
            return;
        };

        let keys = profile.keys_at_lod(self.options.first_lod);
        info!("creating {} root tiles", keys.len());

        let context = self.context();
        context.sync_frame();
        for key in keys {
            match build_tile(key, &context) {
                Ok(built) => {
                    let node = Arc::new(built.node);
                    let inserted = self.shared.live.insert(&node);
                    debug_assert!(inserted, "duplicate root tile {key}");
                    if !inserted {
                        warn!("root tile {key} already resident, skipped");
                        continue;
                    }
                    self.roots.push(node);
                    self.stats.tile_count += 1;
                    self.stats.tile_creation_time += built.build_time.as_secs_f64();
                }
                Err(err) => warn!("failed to build root tile {key}: {err:#}"),
            }
        }
        self.stats.rebuild_count += 1;

        self.update_state();
    }

    /// Moves the current tree out of the scene: every node is withdrawn
    /// from the live registry and, with quick release enabled, parked in
    /// the dead registry until the next update traversal releases it.
    fn retire_tree(&mut self) {
        let mut retired = Vec::new();
        for root in self.roots.drain(..) {
            collect_tree(&root, &mut retired);
        }

        for node in retired {
            match &self.shared.dead {
                Some(dead) => {
                    self.shared.live.move_to_dead(node.key(), dead);
                }
                None => {
                    self.shared.live.remove(node.key());
                }
            }
        }
    }

    /// Reserves the fixed color/elevation/normal units and publishes their
    /// bindings. Exhaustion leaves a binding out, which degrades rendering
    /// but does not fail the rebuild.
    fn setup_render_bindings(&mut self) {
        let fixed = [
            (
                BindingUsage::Color,
                "terrain color",
                "terrain_color_sampler",
                "terrain_color_matrix",
            ),
            (
                BindingUsage::Elevation,
                "terrain elevation",
                "terrain_elevation_sampler",
                "terrain_elevation_matrix",
            ),
            (
                BindingUsage::Normal,
                "terrain normals",
                "terrain_normal_sampler",
                "terrain_normal_matrix",
            ),
        ];

        let mut bindings = self.bindings.write().unwrap();
        for (usage, label, sampler, matrix) in fixed {
            match self.unit_pool.reserve(label) {
                Some(unit) => bindings.push(SamplerBinding::new(usage, unit, sampler, matrix)),
                None => warn!("no texture image unit left for {label}"),
            }
        }
    }

    /// Rebuilds the fixed-function and shader program state of the terrain
    /// and its render bins. Deferred while a batch is in progress.
    pub fn update_state(&mut self) {
        if self.batch_in_progress {
            self.state_update_required = true;
            return;
        }

        // required for multipass tile rendering
        self.surface_bin.edit_state(|state| {
            state.depth = Some(DepthState {
                func: DepthFunc::LessEqual,
                write: true,
            });
        });

        // standard mix blending for the whole terrain
        self.terrain_state.blend = Some(BlendMode::Alpha);
        self.terrain_state.patch_vertices = self.options.gpu_tessellation.then_some(3);

        if self.capabilities.supports_shaders {
            let frame = self.update_frame.read();

            let use_terrain_color = self.options.terrain_color.is_some();
            {
                let program = self.terrain_state.program_mut();
                program.name = "terrain".into();
                program.define("USE_TERRAIN_COLOR", use_terrain_color);
                program.define("USE_BLENDING", self.options.enable_blending);
            }
            if let Some(color) = self.options.terrain_color {
                self.surface_bin.edit_state(|state| {
                    state.set_uniform("terrain_color", UniformValue::Vec4(color));
                });
            }

            let ordered = ordered_image_layers(&self.image_order, &frame.image_layers);
            self.surface_bin.edit_state(|state| {
                let program = state.program_mut();
                program.name = "terrain surface".into();
                program.set_function(ShaderFunction {
                    name: "surface_vertex_model".into(),
                    stage: ShaderStage::VertexModel,
                    source: ShaderSource::Path(SURFACE_VERTEX_MODEL_SHADER),
                });
                program.set_function(ShaderFunction {
                    name: "surface_vertex_view".into(),
                    stage: ShaderStage::VertexView,
                    source: ShaderSource::Path(SURFACE_VERTEX_VIEW_SHADER),
                });
                program.set_function(ShaderFunction {
                    name: "surface_fragment".into(),
                    stage: ShaderStage::Fragment,
                    source: ShaderSource::Path(SURFACE_FRAGMENT_SHADER),
                });

                for layer in &ordered {
                    if layer.is_enabled() {
                        for filter in layer.color_filters() {
                            filter.install(program);
                        }
                    }
                }
                if let Some(source) = assemble_color_filter_source(&ordered) {
                    program.set_function(ShaderFunction {
                        name: "terrain_apply_color_filters".into(),
                        stage: ShaderStage::FragmentColoring,
                        source: ShaderSource::Generated(source),
                    });
                }
            });

            self.land_cover_bin.edit_state(|state| {
                let program = state.program_mut();
                program.name = "terrain land cover".into();
                program.set_function(ShaderFunction {
                    name: "land_cover_vertex_model".into(),
                    stage: ShaderStage::VertexModel,
                    source: ShaderSource::Path(LAND_COVER_VERTEX_MODEL_SHADER),
                });

                // alpha-to-coverage multisampling for vegetation
                state.alpha_to_coverage = true;
                state.set_uniform(
                    "terrain_has_multi_samples",
                    UniformValue::Bool(self.capabilities.multisamples > 1),
                );
                state.blend = Some(BlendMode::Opaque);
            });

            // sampler uniforms for every active binding
            {
                let bindings = self.bindings.read().unwrap();
                for binding in bindings.iter() {
                    self.terrain_state.set_uniform(
                        binding.sampler_name(),
                        UniformValue::Int(binding.unit() as i32),
                    );
                }
            }

            self.terrain_state
                .set_uniform("layer_opacity", UniformValue::Float(1.0));
            self.terrain_state
                .set_uniform("layer_uid", UniformValue::Int(NO_LAYER_UID));
            self.terrain_state
                .set_uniform("layer_order", UniformValue::Int(0));
            // max < min means the range filter is disabled
            self.terrain_state
                .set_uniform("layer_min_range", UniformValue::Float(0.0));
            self.terrain_state
                .set_uniform("layer_max_range", UniformValue::Float(-1.0));
            self.terrain_state.set_uniform(
                "terrain_min_tile_range_factor",
                UniformValue::Float(self.options.min_tile_range_factor),
            );
            self.terrain_state
                .set_uniform("object_id", UniformValue::UInt(TERRAIN_OBJECT_ID));
        }

        self.stats.state_update_count += 1;
        self.state_update_required = false;
    }

    /// The per-frame traversal entry point, invoked once per kind by the
    /// rendering driver.
    pub fn traverse(&mut self, traversal: &mut Traversal) {
        match traversal.kind {
            TraversalKind::Update => {
                if let Some(dead) = &self.shared.dead {
                    self.release_queue.extend(dead.drain_for_release());
                }
                let released = self.release_queue.flush();
                if released > 0 {
                    debug!("released {released} retired tiles");
                }
            }
            TraversalKind::Cull => {
                self.shared.live.set_traversal_frame(traversal.frame);
                self.shared.live.sweep();
            }
            TraversalKind::Draw => {}
        }

        if self.shared.loader.is_ready() {
            // pass the tile build context along for the descent; the guard
            // restores the prior ambient data on every exit path
            let context = self.context();
            let guarded = AmbientContext::install(traversal, context);
            self.descend(&guarded);
        } else {
            self.descend(traversal);
        }
    }

    fn descend(&self, traversal: &Traversal) {
        let context = traversal.engine_context();
        for root in &self.roots {
            root.accept(traversal, context.as_ref());
        }
    }

    /// Reconciles every build the loader finished since the last call into
    /// the registry and the tree.
    pub fn attach_completed_tiles(&mut self) -> usize {
        let built = self.shared.loader.take_built();
        let attached = built.len();
        for tile in built {
            self.attach_built(tile);
        }
        attached
    }

    /// "Complete then reconcile": a finished build either replaces a stale
    /// resident, fills a vacant slot under a resident parent, or is
    /// discarded by the at-most-one-per-key rule.
    fn attach_built(&mut self, built: BuiltTile) {
        self.stats.tile_count += 1;
        self.stats.tile_creation_time += built.build_time.as_secs_f64();

        let node = Arc::new(built.node);
        let key = node.key();
        let live = &self.shared.live;

        if let Some(existing) = live.get(key) {
            if !existing.is_stale(live.map_revision()) {
                // the resident tile is current; the late build loses
                self.discard(node);
                return;
            }

            live.remove(key);
            let inserted = live.insert(&node);
            debug_assert!(inserted);

            if let Some(slot) = self.roots.iter_mut().find(|root| root.key() == key) {
                *slot = node;
            } else if let Some(parent) = live.get(key.parent()) {
                parent.replace_child(node);
            }
            self.discard(existing);
        } else if key.lod == self.options.first_lod {
            if live.insert(&node) {
                self.roots.push(node);
            } else {
                self.discard(node);
            }
        } else if let Some(parent) = live.get(key.parent()) {
            if live.insert(&node) {
                parent.replace_child(node);
            } else {
                self.discard(node);
            }
        } else {
            // the tree moved on while the build was in flight
            debug!("discarding orphaned build for {key}");
            self.discard(node);
        }
    }

    fn discard(&self, node: Arc<TileNode>) {
        if let Some(dead) = &self.shared.dead {
            dead.retire(node);
        }
    }
}

impl Drop for TerrainEngineNode {
    fn drop(&mut self) {
        self.directory.unregister(self.uid);
        self.bin_registry.unregister(self.surface_bin.name());
        self.bin_registry.unregister(self.land_cover_bin.name());
    }
}

fn collect_tree(node: &Arc<TileNode>, out: &mut Vec<Arc<TileNode>>) {
    out.push(node.clone());
    for child in node.children() {
        collect_tree(&child, out);
    }
}

fn move_within(order: &mut Vec<LayerUid>, old_index: usize, new_index: usize) {
    if old_index >= order.len() {
        return;
    }
    let uid = order.remove(old_index);
    let new_index = new_index.min(order.len());
    order.insert(new_index, uid);
}

fn ordered_image_layers(
    order: &[LayerUid],
    layers: &[Arc<ImageLayer>],
) -> Vec<Arc<ImageLayer>> {
    let by_uid: HashMap<LayerUid, &Arc<ImageLayer>> =
        layers.iter().map(|layer| (layer.uid(), layer)).collect();

    let mut ordered = order
        .iter()
        .filter_map(|uid| by_uid.get(uid).map(|layer| (*layer).clone()))
        .collect_vec();
    for layer in layers {
        if !order.contains(&layer.uid()) {
            ordered.push(layer.clone());
        }
    }
    ordered
}

/// Generates the per-layer color filter dispatch function: one branch per
/// enabled image layer that declares filters, keyed on the runtime
/// `layer_uid` uniform, invoking each layer's filter entry points in
/// declared order. `None` when no layer declares filters.
pub(crate) fn assemble_color_filter_source(layers: &[Arc<ImageLayer>]) -> Option<String> {
    let branches = layers
        .iter()
        .filter(|layer| layer.is_enabled() && !layer.color_filters().is_empty())
        .map(|layer| {
            let calls = layer
                .color_filters()
                .iter()
                .map(|filter| format!("        {}(color);\n", filter.entry_point()))
                .join("");
            format!("(layer_uid == {}) {{\n{calls}    }}", layer.uid())
        })
        .collect_vec();

    if branches.is_empty() {
        return None;
    }

    let body = branches
        .iter()
        .enumerate()
        .map(|(index, branch)| {
            if index == 0 {
                format!("    if {branch}")
            } else {
                format!(" else if {branch}")
            }
        })
        .join("");

    Some(format!(
        "fn terrain_apply_color_filters(color: ptr<function, vec4<f32>>, layer_uid: i32) {{\n{body}\n}}\n"
    ))
}
