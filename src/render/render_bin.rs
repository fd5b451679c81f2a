use crate::render::state::RenderStateSet;
use bevy::prelude::*;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// How drawables inside a bin are ordered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinSortMode {
    FrontToBack,
    Unordered,
}

/// A named drawable-sorting category. The sort policy is fixed at creation;
/// the attached render state is assembled and re-assembled by the engine.
pub struct RenderBinPrototype {
    name: String,
    sort: BinSortMode,
    state: RwLock<RenderStateSet>,
}

impl RenderBinPrototype {
    pub fn new(name: impl Into<String>, sort: BinSortMode) -> Self {
        Self {
            name: name.into(),
            sort,
            state: RwLock::new(RenderStateSet::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sort(&self) -> BinSortMode {
        self.sort
    }

    pub fn state(&self) -> RenderStateSet {
        self.state.read().unwrap().clone()
    }

    pub fn edit_state<R>(&self, edit: impl FnOnce(&mut RenderStateSet) -> R) -> R {
        edit(&mut self.state.write().unwrap())
    }
}

/// The process-wide registry of render bins, keyed by name.
///
/// Engines derive their bin names from their uid, which keeps instances
/// from colliding. Registering an explicit duplicate name is
/// last-writer-wins and logged; that risk is documented, not eliminated.
#[derive(Default)]
pub struct RenderBinRegistry {
    bins: RwLock<HashMap<String, Arc<RenderBinPrototype>>>,
}

impl RenderBinRegistry {
    pub fn register(&self, bin: Arc<RenderBinPrototype>) {
        let mut bins = self.bins.write().unwrap();
        if bins.insert(bin.name().to_string(), bin.clone()).is_some() {
            warn!(
                "render bin '{}' registered twice, previous prototype replaced",
                bin.name()
            );
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.bins.write().unwrap().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<RenderBinPrototype>> {
        self.bins.read().unwrap().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.bins.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bins_register_and_unregister_by_name() {
        let registry = RenderBinRegistry::default();
        registry.register(Arc::new(RenderBinPrototype::new(
            "surface.1",
            BinSortMode::FrontToBack,
        )));

        let bin = registry.get("surface.1").unwrap();
        assert_eq!(bin.sort(), BinSortMode::FrontToBack);

        assert!(registry.unregister("surface.1"));
        assert!(!registry.unregister("surface.1"));
        assert!(registry.get("surface.1").is_none());
    }

    #[test]
    fn duplicate_names_are_last_writer_wins() {
        let registry = RenderBinRegistry::default();
        registry.register(Arc::new(RenderBinPrototype::new(
            "surface.1",
            BinSortMode::FrontToBack,
        )));
        registry.register(Arc::new(RenderBinPrototype::new(
            "surface.1",
            BinSortMode::Unordered,
        )));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("surface.1").unwrap().sort(), BinSortMode::Unordered);
    }
}
