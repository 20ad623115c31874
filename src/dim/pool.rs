use crate::dim::arena::SurfaceHandle;
use crate::dim::decision::DimDecision;
use crate::dim::surface::{PoolKind, TargetKey};
use std::collections::{HashMap, HashSet};

/// How one pool turns a decision list into surface work.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Surface already bound to the decision's key.
    pub matched: Vec<(SurfaceHandle, usize)>,
    /// Spare surface rebound to a new key.
    pub reused: Vec<(SurfaceHandle, usize)>,
    /// Decisions that need a brand new surface.
    pub created: Vec<usize>,
    /// Spare surfaces nobody asked for.
    pub surplus: Vec<SurfaceHandle>,
    /// Decisions dropped because an earlier one had the same key.
    pub duplicates: usize,
}

/// Open surfaces of one kind, keyed by target and kept in creation order.
#[derive(Debug)]
pub struct SurfacePool {
    kind: PoolKind,
    by_key: HashMap<TargetKey, SurfaceHandle>,
    order: Vec<SurfaceHandle>,
}

impl SurfacePool {
    pub fn new(kind: PoolKind) -> Self {
        Self {
            kind,
            by_key: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn handles(&self) -> &[SurfaceHandle] {
        &self.order
    }

    pub fn get(&self, key: &TargetKey) -> Option<SurfaceHandle> {
        self.by_key.get(key).copied()
    }

    pub fn insert(&mut self, key: TargetKey, handle: SurfaceHandle) {
        if let Some(previous) = self.by_key.insert(key, handle) {
            self.order.retain(|h| *h != previous);
        }
        self.order.push(handle);
    }

    pub fn remove(&mut self, handle: SurfaceHandle) -> bool {
        let before = self.order.len();
        self.order.retain(|h| *h != handle);
        self.by_key.retain(|_, h| *h != handle);
        before != self.order.len()
    }

    /// Moves `handle` from `old` to `new` without changing its position.
    pub fn rekey(&mut self, old: TargetKey, new: TargetKey, handle: SurfaceHandle) {
        if self.by_key.get(&old) == Some(&handle) {
            self.by_key.remove(&old);
        }
        self.by_key.insert(new, handle);
    }

    /// Plans a reconcile. Keys match first; leftover decisions then take
    /// spare surfaces in creation order; anything still left is created and
    /// spare surfaces still left are surplus. `frozen` surfaces are never
    /// reused or reported as surplus.
    pub fn plan<F>(&self, decisions: &[DimDecision], mut frozen: F) -> ReconcilePlan
    where
        F: FnMut(SurfaceHandle) -> bool,
    {
        let mut plan = ReconcilePlan::default();
        let mut seen = HashSet::new();
        let mut claimed = HashSet::new();
        let mut pending = Vec::new();

        for (index, decision) in decisions.iter().enumerate() {
            if !seen.insert(decision.key) {
                plan.duplicates += 1;
                continue;
            }
            match self.by_key.get(&decision.key) {
                Some(handle) => {
                    claimed.insert(*handle);
                    plan.matched.push((*handle, index));
                }
                None => pending.push(index),
            }
        }

        let mut spare = self
            .order
            .iter()
            .copied()
            .filter(|h| !claimed.contains(h))
            .filter(|h| !frozen(*h));

        for index in pending {
            match spare.next() {
                Some(handle) => plan.reused.push((handle, index)),
                None => plan.created.push(index),
            }
        }
        plan.surplus.extend(spare);
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::SurfacePool;
    use crate::dim::arena::SurfaceArena;
    use crate::dim::decision::DimDecision;
    use crate::dim::geometry::Rect;
    use crate::dim::source::WindowId;
    use crate::dim::surface::{PoolKind, TargetKey};

    fn decision(key: TargetKey) -> DimDecision {
        DimDecision {
            key,
            rect: Rect::new(0.0, 0.0, 50.0, 50.0),
            level: 0.3,
            is_frontmost: false,
            brightness: 0.9,
        }
    }

    fn region(window: u64, index: usize) -> TargetKey {
        TargetKey::Region(WindowId(window), index)
    }

    #[test]
    fn keys_match_before_spares_are_reused() {
        let mut arena = SurfaceArena::new();
        let mut pool = SurfacePool::new(PoolKind::Region);
        let a = arena.insert(());
        let b = arena.insert(());
        pool.insert(region(1, 0), a);
        pool.insert(region(1, 1), b);

        let plan = pool.plan(
            &[decision(region(1, 1)), decision(region(2, 0))],
            |_| false,
        );
        assert_eq!(plan.matched, vec![(b, 0)]);
        assert_eq!(plan.reused, vec![(a, 1)]);
        assert!(plan.created.is_empty());
        assert!(plan.surplus.is_empty());
    }

    #[test]
    fn leftovers_are_created_or_surplus() {
        let mut arena = SurfaceArena::new();
        let mut pool = SurfacePool::new(PoolKind::Region);
        let a = arena.insert(());
        pool.insert(region(1, 0), a);

        let plan = pool.plan(
            &[decision(region(2, 0)), decision(region(2, 1))],
            |_| false,
        );
        assert_eq!(plan.reused, vec![(a, 0)]);
        assert_eq!(plan.created, vec![1]);

        let plan = pool.plan(&[], |_| false);
        assert_eq!(plan.surplus, vec![a]);
    }

    #[test]
    fn frozen_surfaces_are_neither_reused_nor_surplus() {
        let mut arena = SurfaceArena::new();
        let mut pool = SurfacePool::new(PoolKind::Region);
        let a = arena.insert(());
        pool.insert(region(1, 0), a);

        let plan = pool.plan(&[decision(region(2, 0))], |h| h == a);
        assert!(plan.reused.is_empty());
        assert_eq!(plan.created, vec![0]);
        assert!(plan.surplus.is_empty());
    }

    #[test]
    fn duplicate_keys_are_dropped() {
        let pool = SurfacePool::new(PoolKind::Window);
        let key = TargetKey::Window(WindowId(4));
        let plan = pool.plan(&[decision(key), decision(key)], |_| false);
        assert_eq!(plan.created, vec![0]);
        assert_eq!(plan.duplicates, 1);
    }

    #[test]
    fn rekey_keeps_creation_order() {
        let mut arena = SurfaceArena::new();
        let mut pool = SurfacePool::new(PoolKind::Decay);
        let a = arena.insert(());
        let b = arena.insert(());
        pool.insert(TargetKey::Decay(WindowId(1)), a);
        pool.insert(TargetKey::Decay(WindowId(2)), b);
        pool.rekey(TargetKey::Decay(WindowId(1)), TargetKey::Decay(WindowId(3)), a);

        assert_eq!(pool.handles(), &[a, b]);
        assert_eq!(pool.get(&TargetKey::Decay(WindowId(3))), Some(a));
        assert_eq!(pool.get(&TargetKey::Decay(WindowId(1))), None);
        assert!(pool.remove(a));
        assert_eq!(pool.len(), 1);
    }
}
