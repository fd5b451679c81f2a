use bevy::prelude::*;
use std::collections::VecDeque;

/// The engine-wide pool of texture image units shared by the fixed terrain
/// bindings and all shared layers.
///
/// Units are reserved exactly once and must be released exactly once.
/// Releasing a unit that is not reserved is a caller defect: it fires a
/// debug assertion and is otherwise ignored, so the pool never double-frees.
pub struct TextureUnitPool {
    free: VecDeque<u32>,
    in_use: Vec<bool>,
}

impl TextureUnitPool {
    pub fn new(count: u32) -> Self {
        Self {
            free: (0..count).collect(),
            in_use: vec![false; count as usize],
        }
    }

    pub fn capacity(&self) -> usize {
        self.in_use.len()
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Reserves a unit, or reports exhaustion with `None`.
    pub fn reserve(&mut self, label: &str) -> Option<u32> {
        let unit = self.free.pop_front()?;
        self.in_use[unit as usize] = true;
        debug!("texture image unit {unit} reserved for {label}");
        Some(unit)
    }

    pub fn release(&mut self, unit: u32) {
        let Some(in_use) = self.in_use.get_mut(unit as usize) else {
            debug_assert!(false, "released unknown texture image unit {unit}");
            warn!("released unknown texture image unit {unit}");
            return;
        };
        if !*in_use {
            debug_assert!(false, "texture image unit {unit} released twice");
            warn!("texture image unit {unit} released twice");
            return;
        }
        *in_use = false;
        self.free.push_back(unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    #[test]
    fn reserve_then_release_restores_the_pool() {
        let mut pool = TextureUnitPool::new(8);
        let before = pool.available();

        let mut units: Vec<u32> = (0..5).map(|i| pool.reserve(&format!("layer {i}")).unwrap()).collect();
        assert_eq!(pool.available(), before - 5);

        // releases in any order, each exactly once
        units.shuffle(&mut rand::rng());
        for unit in units {
            pool.release(unit);
        }
        assert_eq!(pool.available(), before);
    }

    #[test]
    fn exhaustion_is_reported_not_fatal() {
        let mut pool = TextureUnitPool::new(2);
        assert!(pool.reserve("a").is_some());
        assert!(pool.reserve("b").is_some());
        assert!(pool.reserve("c").is_none());
    }

    #[test]
    fn reserved_units_are_unique() {
        let mut pool = TextureUnitPool::new(4);
        let mut units: Vec<u32> = (0..4).map(|_| pool.reserve("binding").unwrap()).collect();
        units.sort();
        units.dedup();
        assert_eq!(units.len(), 4);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    #[cfg(debug_assertions)]
    fn double_release_is_a_caller_defect() {
        let mut pool = TextureUnitPool::new(2);
        let unit = pool.reserve("binding").unwrap();
        pool.release(unit);
        pool.release(unit);
    }
}
