use crate::terrain_data::{
    coordinates::{GeoRegion, TileKey},
    tile_node::TileNode,
};
use bevy::prelude::*;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock, Weak,
    },
};

struct TileEntry {
    weak: Weak<TileNode>,
    /// Present only in owning (dead) registries, keeping retired nodes
    /// alive until their GPU objects are released.
    strong: Option<Arc<TileNode>>,
}

impl TileEntry {
    fn resident(&self) -> Option<Arc<TileNode>> {
        self.strong.clone().or_else(|| self.weak.upgrade())
    }
}

/// An identity-keyed directory of tile nodes, at most one resident node per
/// key.
///
/// The live registry holds weak entries — ownership stays with the spatial
/// tree — while the dead registry owns retired nodes pending deferred GPU
/// release. Entries move from live to dead, never the reverse.
///
/// The entry table sits behind a reader/writer lock; structural mutation is
/// exclusive and must stay short. The published map revision and traversal
/// frame are atomics, so the cull and update paths can publish and query
/// them concurrently with table reads.
pub struct TileNodeRegistry {
    name: &'static str,
    owns_tiles: bool,
    map_revision: AtomicU64,
    traversal_frame: AtomicU64,
    entries: RwLock<HashMap<TileKey, TileEntry>>,
}

impl TileNodeRegistry {
    /// A lookup-only registry of the tiles resident in the scene.
    pub fn live(name: &'static str) -> Self {
        Self::new(name, false)
    }

    /// An owning registry of retired tiles awaiting quick release.
    pub fn dead(name: &'static str) -> Self {
        Self::new(name, true)
    }

    fn new(name: &'static str, owns_tiles: bool) -> Self {
        Self {
            name,
            owns_tiles,
            map_revision: AtomicU64::new(0),
            traversal_frame: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Publishes the latest known map revision. Monotonic: an older revision
    /// never overwrites a newer one.
    pub fn set_map_revision(&self, revision: u64) {
        self.map_revision.fetch_max(revision, Ordering::Relaxed);
    }

    pub fn map_revision(&self) -> u64 {
        self.map_revision.load(Ordering::Relaxed)
    }

    /// Publishes the current render frame, for recency-based decisions.
    pub fn set_traversal_frame(&self, frame: u64) {
        self.traversal_frame.store(frame, Ordering::Relaxed);
    }

    pub fn traversal_frame(&self) -> u64 {
        self.traversal_frame.load(Ordering::Relaxed)
    }

    /// Registers a node under its key. Rejected if a resident node for the
    /// same key exists; an entry whose node is gone counts as vacant.
    pub fn insert(&self, node: &Arc<TileNode>) -> bool {
        let mut entries = self.entries.write().unwrap();
        if let Some(existing) = entries.get(&node.key()) {
            if existing.resident().is_some() {
                return false;
            }
        }

        entries.insert(
            node.key(),
            TileEntry {
                weak: Arc::downgrade(node),
                strong: self.owns_tiles.then(|| node.clone()),
            },
        );
        true
    }

    /// Moves a retired node into this (owning) registry. A previous retiree
    /// under the same key is replaced and thereby released immediately.
    pub fn retire(&self, node: Arc<TileNode>) {
        debug_assert!(self.owns_tiles, "retire targets an owning registry");
        let key = node.key();
        let mut entries = self.entries.write().unwrap();
        let entry = TileEntry {
            weak: Arc::downgrade(&node),
            strong: Some(node),
        };
        if entries.insert(key, entry).is_some() {
            debug!("replacing retired tile {key} in '{}' registry", self.name);
        }
    }

    /// Transfers the resident node for `key` from this (live) table into the
    /// dead table, rather than destroying it inside the frame path.
    pub fn move_to_dead(&self, key: TileKey, dead: &TileNodeRegistry) -> bool {
        match self.remove(key) {
            Some(node) => {
                dead.retire(node);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: TileKey) -> Option<Arc<TileNode>> {
        let mut entries = self.entries.write().unwrap();
        entries.remove(&key).and_then(|entry| entry.resident())
    }

    pub fn get(&self, key: TileKey) -> Option<Arc<TileNode>> {
        let entries = self.entries.read().unwrap();
        entries.get(&key).and_then(|entry| entry.resident())
    }

    pub fn contains(&self, key: TileKey) -> bool {
        self.get(key).is_some()
    }

    /// Marks every resident tile intersecting `region` within the level
    /// range as needing a refresh. Tiles observe the mark cooperatively on
    /// their next evaluation. Returns how many tiles were marked.
    pub fn set_dirty(&self, region: &GeoRegion, min_level: u32, max_level: u32) -> usize {
        let entries = self.entries.write().unwrap();
        let mut marked = 0;
        for (key, entry) in entries.iter() {
            if key.lod < min_level || key.lod > max_level {
                continue;
            }
            if let Some(node) = entry.resident() {
                if node.extent().intersects(region) {
                    node.mark_dirty();
                    marked += 1;
                }
            }
        }
        marked
    }

    /// Drops entries whose node is gone. Per-frame bookkeeping for the live
    /// registry, whose entries do not keep nodes alive.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.resident().is_some());
        before - entries.len()
    }

    /// Takes every owned node out of a dead registry, handing them to the
    /// pending-release queue. The table is left empty.
    pub fn drain_for_release(&self) -> Vec<Arc<TileNode>> {
        debug_assert!(self.owns_tiles, "drain targets an owning registry");
        let mut entries = self.entries.write().unwrap();
        entries
            .drain()
            .filter_map(|(_, entry)| entry.strong)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain_data::tile_node::TileContent;
    use bevy::math::DVec2;

    fn node(key: TileKey, revision: u64) -> Arc<TileNode> {
        let extent = GeoRegion::new(
            DVec2::new(key.x as f64 * 10.0, key.y as f64 * 10.0),
            DVec2::new((key.x + 1) as f64 * 10.0, (key.y + 1) as f64 * 10.0),
        );
        Arc::new(TileNode::new(key, extent, revision, TileContent::default()))
    }

    #[test]
    fn duplicate_insert_is_rejected_until_removal() {
        let registry = TileNodeRegistry::live("live");
        let key = TileKey::new(1, 0, 0);
        let first = node(key, 1);

        assert!(registry.insert(&first));
        assert!(!registry.insert(&node(key, 2)));

        registry.remove(key);
        assert!(registry.insert(&node(key, 2)));
    }

    #[test]
    fn entry_with_dropped_node_counts_as_vacant() {
        let registry = TileNodeRegistry::live("live");
        let key = TileKey::new(2, 1, 1);

        let resident = node(key, 1);
        assert!(registry.insert(&resident));
        drop(resident);

        assert!(registry.get(key).is_none());
        assert!(registry.insert(&node(key, 2)));

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dirty_marks_respect_region_and_level_range() {
        let registry = TileNodeRegistry::live("live");
        let inside = node(TileKey::new(2, 0, 0), 1);
        let outside = node(TileKey::new(2, 5, 5), 1);
        let wrong_level = node(TileKey::new(7, 0, 0), 1);
        for n in [&inside, &outside, &wrong_level] {
            assert!(registry.insert(n));
        }

        let region = GeoRegion::new(DVec2::new(0.0, 0.0), DVec2::new(15.0, 15.0));
        let marked = registry.set_dirty(&region, 0, 4);

        assert_eq!(marked, 1);
        assert!(inside.is_dirty());
        assert!(!outside.is_dirty());
        assert!(!wrong_level.is_dirty());
    }

    #[test]
    fn non_intersecting_region_marks_nothing() {
        let registry = TileNodeRegistry::live("live");
        let resident = node(TileKey::new(0, 0, 0), 1);
        assert!(registry.insert(&resident));

        let far = GeoRegion::new(DVec2::new(500.0, 500.0), DVec2::new(600.0, 600.0));
        assert_eq!(registry.set_dirty(&far, 0, u32::MAX), 0);
        assert!(!resident.is_dirty());
    }

    #[test]
    fn published_revision_is_monotonic() {
        let registry = TileNodeRegistry::live("live");
        registry.set_map_revision(7);
        registry.set_map_revision(3);
        assert_eq!(registry.map_revision(), 7);
    }

    #[test]
    fn dead_registry_owns_until_drained() {
        let dead = TileNodeRegistry::dead("dead");
        let key = TileKey::new(1, 1, 0);

        let retired = node(key, 1);
        let weak = Arc::downgrade(&retired);
        dead.retire(retired);

        // the registry keeps the node alive on its own
        assert!(weak.upgrade().is_some());

        let drained = dead.drain_for_release();
        assert_eq!(drained.len(), 1);
        assert!(dead.is_empty());

        drop(drained);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn move_to_dead_transfers_ownership() {
        let live = TileNodeRegistry::live("live");
        let dead = TileNodeRegistry::dead("dead");
        let key = TileKey::new(3, 2, 1);
        let resident = node(key, 1);
        assert!(live.insert(&resident));

        assert!(live.move_to_dead(key, &dead));
        assert!(!live.contains(key));

        drop(resident);
        // the dead table keeps the node alive on its own
        assert!(dead.get(key).is_some());
        assert!(!live.move_to_dead(key, &dead));
    }

    #[test]
    fn sweep_prunes_dangling_entries() {
        let registry = TileNodeRegistry::live("live");
        let kept = node(TileKey::new(1, 0, 0), 1);
        assert!(registry.insert(&kept));
        assert!(registry.insert(&node(TileKey::new(1, 1, 0), 1)));

        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(kept.key()));
    }
}
