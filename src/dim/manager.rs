use crate::dim::arena::{SurfaceArena, SurfaceHandle};
use crate::dim::compositor::{Compositor, ZPlacement};
use crate::dim::decision::{DecisionBatch, DecisionEngine, DimDecision};
use crate::dim::error::DimFault;
use crate::dim::owner::OwnedState;
use crate::dim::pool::SurfacePool;
use crate::dim::source::WindowId;
use crate::dim::surface::{OverlaySurface, PoolKind, SurfaceId, SurfaceState, TargetKey, ZPolicy};
use crate::settings::DimSettings;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Level changes at or below this are not worth an animation.
pub const LEVEL_EPSILON: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManagerTuning {
    pub rect_tolerance: f64,
    pub level_epsilon: f64,
    pub animation: Duration,
    pub close_grace: Duration,
    pub max_pool_size: usize,
}

impl ManagerTuning {
    pub fn from_settings(settings: &DimSettings) -> Self {
        Self {
            rect_tolerance: settings.rect_tolerance_px,
            level_epsilon: LEVEL_EPSILON,
            animation: settings.animation(),
            close_grace: settings.close_grace(),
            max_pool_size: settings.max_pool_size.max(1),
        }
    }
}

impl Default for ManagerTuning {
    fn default() -> Self {
        Self::from_settings(&DimSettings::default())
    }
}

/// What one apply did. `unchanged` counts surfaces that matched and needed
/// no compositor call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub reused: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub revealed: usize,
    pub hidden: usize,
    pub closed: usize,
    pub failed: usize,
    pub skipped_capacity: usize,
    pub preserved: usize,
    pub duplicates: usize,
    /// The batch belonged to an older run epoch and was not applied.
    pub stale: bool,
}

impl ApplyReport {
    pub fn merge(&mut self, other: ApplyReport) {
        self.created += other.created;
        self.reused += other.reused;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.revealed += other.revealed;
        self.hidden += other.hidden;
        self.closed += other.closed;
        self.failed += other.failed;
        self.skipped_capacity += other.skipped_capacity;
        self.preserved += other.preserved;
        self.duplicates += other.duplicates;
        self.stale |= other.stale;
    }

    pub fn changed(&self) -> bool {
        self.created + self.updated + self.revealed + self.hidden + self.closed > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub created: u64,
    pub destroyed: u64,
    pub failed_creates: u64,
    pub stale_mutations: u64,
}

fn placement(key: TargetKey, policy: ZPolicy) -> ZPlacement {
    match (policy, key.owner()) {
        (ZPolicy::Normal, Some(owner)) => ZPlacement::AboveWindow(owner),
        _ => ZPlacement::Elevated,
    }
}

/// Owns every overlay surface and drives the compositor. Lives on the owner
/// thread; nothing here is shared.
pub struct OverlayManager<C: Compositor> {
    compositor: C,
    tuning: ManagerTuning,
    arena: SurfaceArena<OverlaySurface>,
    pools: [SurfacePool; 4],
    closing: Vec<SurfaceHandle>,
    /// Hidden surfaces still fading to zero; ordered out once the fade ends.
    fading_out: Vec<SurfaceHandle>,
    ids: HashMap<SurfaceId, SurfaceHandle>,
    next_id: u64,
    frontmost: Option<WindowId>,
    epoch: u64,
    stats: ManagerStats,
}

impl<C: Compositor> OverlayManager<C> {
    pub fn new(compositor: C, tuning: ManagerTuning) -> Self {
        Self {
            compositor,
            tuning,
            arena: SurfaceArena::new(),
            pools: PoolKind::ALL.map(SurfacePool::new),
            closing: Vec::new(),
            fading_out: Vec::new(),
            ids: HashMap::new(),
            next_id: 1,
            frontmost: None,
            epoch: 0,
            stats: ManagerStats::default(),
        }
    }

    pub fn compositor(&self) -> &C {
        &self.compositor
    }

    pub fn compositor_mut(&mut self) -> &mut C {
        &mut self.compositor
    }

    pub fn tuning(&self) -> ManagerTuning {
        self.tuning
    }

    pub fn set_tuning(&mut self, tuning: ManagerTuning) {
        self.tuning = tuning;
    }

    pub fn frontmost(&self) -> Option<WindowId> {
        self.frontmost
    }

    pub fn stats(&self) -> ManagerStats {
        self.stats
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Batches computed under any other epoch are dropped from now on.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    fn desired_policy(&self, key: TargetKey) -> ZPolicy {
        match key.owner() {
            Some(owner) if Some(owner) != self.frontmost => ZPolicy::Normal,
            _ => ZPolicy::Elevated,
        }
    }

    fn note(&mut self, result: Result<(), DimFault>) {
        if let Err(fault) = result {
            if matches!(fault, DimFault::StaleTarget { .. }) {
                self.stats.stale_mutations += 1;
            }
            fault.record();
        }
    }

    pub fn apply_batch(&mut self, batch: &DecisionBatch, now: Instant) -> ApplyReport {
        if batch.epoch != self.epoch {
            tracing::debug!(batch = batch.epoch, current = self.epoch, "dropping stale batch");
            return ApplyReport {
                stale: true,
                ..ApplyReport::default()
            };
        }
        self.frontmost = batch.frontmost;
        let mut report = ApplyReport {
            closed: self.close_departed(&batch.live_windows, now),
            ..ApplyReport::default()
        };
        for kind in PoolKind::ALL {
            report.merge(self.reconcile_pool(kind, batch.for_pool(kind), &batch.preserved, now));
        }
        tracing::debug!(
            created = report.created,
            reused = report.reused,
            updated = report.updated,
            hidden = report.hidden,
            closed = report.closed,
            "applied decision batch"
        );
        report
    }

    pub fn apply_display_decisions(&mut self, decisions: &[DimDecision], now: Instant) -> ApplyReport {
        self.reconcile_pool(PoolKind::Display, decisions, &HashSet::new(), now)
    }

    pub fn apply_window_decisions(&mut self, decisions: &[DimDecision], now: Instant) -> ApplyReport {
        self.reconcile_pool(PoolKind::Window, decisions, &HashSet::new(), now)
    }

    pub fn apply_region_decisions(&mut self, decisions: &[DimDecision], now: Instant) -> ApplyReport {
        self.reconcile_pool(PoolKind::Region, decisions, &HashSet::new(), now)
    }

    pub fn apply_decay_decisions(&mut self, decisions: &[DimDecision], now: Instant) -> ApplyReport {
        self.reconcile_pool(PoolKind::Decay, decisions, &HashSet::new(), now)
    }

    fn close_departed(&mut self, live: &HashSet<WindowId>, now: Instant) -> usize {
        let mut departed = Vec::new();
        for kind in PoolKind::ALL {
            for handle in self.pools[kind.index()].handles() {
                let owner = self.arena.get(*handle).and_then(|s| s.owner());
                if owner.is_some_and(|o| !live.contains(&o)) {
                    departed.push((kind, *handle));
                }
            }
        }
        departed
            .into_iter()
            .filter(|(kind, handle)| self.close_surface(*kind, *handle, now))
            .count()
    }

    fn reconcile_pool(
        &mut self,
        kind: PoolKind,
        decisions: &[DimDecision],
        preserved: &HashSet<WindowId>,
        now: Instant,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        let plan = {
            let arena = &self.arena;
            let preserved_count = &mut report.preserved;
            self.pools[kind.index()].plan(decisions, |handle| {
                let frozen = arena
                    .get(handle)
                    .and_then(|s| s.owner())
                    .is_some_and(|owner| preserved.contains(&owner));
                if frozen {
                    *preserved_count += 1;
                }
                frozen
            })
        };
        report.duplicates = plan.duplicates;

        for (handle, index) in plan.matched {
            self.apply_to(handle, &decisions[index], false, now, &mut report);
        }
        for (handle, index) in plan.reused {
            self.apply_to(handle, &decisions[index], true, now, &mut report);
        }
        for handle in plan.surplus {
            if self.hide_surface(handle, false, now) {
                report.hidden += 1;
            }
        }
        for index in plan.created {
            self.create_for(kind, &decisions[index], now, &mut report);
        }
        report
    }

    fn apply_to(
        &mut self,
        handle: SurfaceHandle,
        decision: &DimDecision,
        rebind: bool,
        now: Instant,
        report: &mut ApplyReport,
    ) {
        let result = self.update_surface(handle, decision, rebind, now, report);
        self.note(result);
    }

    fn update_surface(
        &mut self,
        handle: SurfaceHandle,
        decision: &DimDecision,
        rebind: bool,
        now: Instant,
        report: &mut ApplyReport,
    ) -> Result<(), DimFault> {
        let policy = self.desired_policy(decision.key);
        let tuning = self.tuning;
        let Some(surface) = self.arena.get_mut(handle) else {
            return Ok(());
        };
        let id = surface.id();

        let mut restack = false;
        if rebind {
            let old = surface.key();
            surface.rebind(decision.key)?;
            self.pools[decision.key.pool().index()].rekey(old, decision.key, handle);
            restack = old.owner() != decision.key.owner();
            report.reused += 1;
        }

        let mut touched = false;
        if !surface.rect().approx_eq(&decision.rect, tuning.rect_tolerance) {
            self.compositor.set_frame(id, decision.rect);
            surface.set_rect(decision.rect)?;
            touched = true;
        }

        if surface.state() == SurfaceState::Hidden {
            self.compositor.order(id, placement(decision.key, policy));
            self.compositor
                .animate_level(id, 0.0, decision.level, tuning.animation);
            surface.set_z_policy(policy)?;
            surface.set_level(decision.level, decision.brightness)?;
            surface.set_parked(false)?;
            surface.begin_transition(now + tuning.animation)?;
            surface.transition(SurfaceState::Visible)?;
            report.revealed += 1;
            return Ok(());
        }

        if restack || surface.z_policy() != policy {
            self.compositor.order(id, placement(decision.key, policy));
            surface.set_z_policy(policy)?;
            touched = true;
        }

        let current = surface.level();
        if (current - decision.level).abs() > tuning.level_epsilon {
            self.compositor
                .animate_level(id, current, decision.level, tuning.animation);
            surface.set_level(decision.level, decision.brightness)?;
            surface.begin_transition(now + tuning.animation)?;
            touched = true;
        } else {
            surface.set_level(current, decision.brightness)?;
        }

        if touched {
            report.updated += 1;
        } else {
            report.unchanged += 1;
        }
        Ok(())
    }

    fn create_for(
        &mut self,
        kind: PoolKind,
        decision: &DimDecision,
        now: Instant,
        report: &mut ApplyReport,
    ) {
        if self.pools[kind.index()].len() >= self.tuning.max_pool_size
            && !self.evict_hidden(kind, now)
        {
            tracing::debug!(pool = ?kind, key = ?decision.key, "pool full; overlay not created");
            report.skipped_capacity += 1;
            return;
        }

        let id = SurfaceId(self.next_id);
        self.next_id += 1;
        let policy = self.desired_policy(decision.key);
        let mut surface = OverlaySurface::new(id, decision.key, decision.rect, policy);
        if let Err(fault) = surface.transition(SurfaceState::Creating) {
            fault.record();
            return;
        }
        let handle = self.arena.insert(surface);

        if let Err(err) =
            self.compositor
                .create_surface(id, decision.rect, placement(decision.key, policy))
        {
            tracing::warn!(surface = %id, error = %err, "overlay creation failed");
            let result = self
                .arena
                .get_mut(handle)
                .map_or(Ok(()), |s| s.transition(SurfaceState::Destroyed));
            self.note(result);
            if let Err(err) = self.arena.release(handle) {
                tracing::warn!(surface = %id, error = %err, "failed overlay could not be released");
            }
            self.stats.failed_creates += 1;
            report.failed += 1;
            return;
        }

        let animation = self.tuning.animation;
        self.compositor
            .animate_level(id, 0.0, decision.level, animation);
        let result = match self.arena.get_mut(handle) {
            Some(surface) => surface
                .set_level(decision.level, decision.brightness)
                .and_then(|_| surface.begin_transition(now + animation))
                .and_then(|_| surface.transition(SurfaceState::Visible)),
            None => Ok(()),
        };
        self.note(result);

        self.pools[kind.index()].insert(decision.key, handle);
        self.ids.insert(id, handle);
        self.stats.created += 1;
        report.created += 1;
        tracing::trace!(surface = %id, key = ?decision.key, "overlay created");
    }

    /// Closes the oldest hidden, unparked surface of the pool.
    fn evict_hidden(&mut self, kind: PoolKind, now: Instant) -> bool {
        let victim = self.pools[kind.index()].handles().iter().copied().find(|h| {
            self.arena
                .get(*h)
                .is_some_and(|s| s.state() == SurfaceState::Hidden && !s.is_parked())
        });
        match victim {
            Some(handle) => self.close_surface(kind, handle, now),
            None => false,
        }
    }

    /// Fades a visible surface to zero and orders it out when the fade
    /// ends. The stored level is kept for the next reveal.
    fn hide_surface(&mut self, handle: SurfaceHandle, park: bool, now: Instant) -> bool {
        let animation = self.tuning.animation;
        let Some(surface) = self.arena.get_mut(handle) else {
            return false;
        };
        if surface.state() != SurfaceState::Visible {
            return false;
        }
        let id = surface.id();
        self.compositor
            .animate_level(id, surface.level(), 0.0, animation);
        let result = surface
            .begin_transition(now + animation)
            .and_then(|_| surface.transition(SurfaceState::Hidden))
            .and_then(|_| surface.set_parked(park));
        self.note(result);
        if animation.is_zero() {
            self.compositor.order_out(id);
        } else if !self.fading_out.contains(&handle) {
            self.fading_out.push(handle);
        }
        true
    }

    /// Orders out hidden surfaces whose fade has finished. Surfaces revealed
    /// or closed in the meantime are dropped from the list.
    fn finish_fades(&mut self, now: Instant) {
        let mut waiting = Vec::new();
        for handle in std::mem::take(&mut self.fading_out) {
            let Some(surface) = self.arena.get(handle) else {
                continue;
            };
            if surface.state() != SurfaceState::Hidden {
                continue;
            }
            if surface.transition_pending(now) {
                waiting.push(handle);
            } else {
                self.compositor.order_out(surface.id());
            }
        }
        self.fading_out = waiting;
    }

    fn close_surface(&mut self, kind: PoolKind, handle: SurfaceHandle, now: Instant) -> bool {
        self.pools[kind.index()].remove(handle);
        let animation = self.tuning.animation;
        let Some(surface) = self.arena.get_mut(handle) else {
            return false;
        };
        let id = surface.id();
        let mut result = Ok(());
        if surface.state() == SurfaceState::Visible {
            self.compositor
                .animate_level(id, surface.level(), 0.0, animation);
            result = surface.begin_transition(now + animation);
        }
        if surface.state().is_open() {
            self.compositor.order_out(id);
        }
        let result = result.and_then(|_| surface.begin_close(now));
        let closed = result.is_ok();
        self.note(result);
        if closed {
            self.closing.push(handle);
        }
        closed
    }

    /// Destroys closing surfaces whose grace period has elapsed, whose fade
    /// has finished and that nobody pins. Returns how many were destroyed.
    pub fn reap(&mut self, now: Instant) -> usize {
        self.finish_fades(now);
        for handle in self.arena.handles() {
            if let Some(surface) = self.arena.get_mut(handle) {
                surface.settle(now);
            }
        }

        let grace = self.tuning.close_grace;
        let mut destroyed = 0;
        let mut waiting = Vec::new();
        for handle in std::mem::take(&mut self.closing) {
            let Some(surface) = self.arena.get(handle) else {
                continue;
            };
            let ready = !surface.transition_pending(now)
                && surface
                    .closing_since()
                    .is_some_and(|since| now.saturating_duration_since(since) >= grace);
            if !ready || self.arena.pins(handle).unwrap_or(0) > 0 {
                waiting.push(handle);
                continue;
            }
            if self.destroy_closed(handle) {
                destroyed += 1;
            } else {
                waiting.push(handle);
            }
        }
        self.closing = waiting;
        if destroyed > 0 {
            tracing::debug!(destroyed, "reaped closed overlays");
        }
        destroyed
    }

    fn destroy_closed(&mut self, handle: SurfaceHandle) -> bool {
        let Some(surface) = self.arena.get_mut(handle) else {
            return false;
        };
        let id = surface.id();
        let result = surface.transition(SurfaceState::Destroyed);
        if result.is_err() {
            self.note(result);
            return false;
        }
        self.compositor.destroy_surface(id);
        if let Err(err) = self.arena.release(handle) {
            tracing::warn!(surface = %id, error = %err, "destroyed overlay still held");
        }
        self.ids.remove(&id);
        self.stats.destroyed += 1;
        true
    }

    /// Fades out every visible surface and parks it for `reveal_all`.
    /// Nothing is destroyed.
    pub fn hide_all(&mut self, now: Instant) -> usize {
        let handles: Vec<SurfaceHandle> = self
            .pools
            .iter()
            .flat_map(|pool| pool.handles().iter().copied())
            .collect();
        handles
            .into_iter()
            .filter(|handle| self.hide_surface(*handle, true, now))
            .count()
    }

    /// Shows every surface parked by `hide_all` at its last level.
    pub fn reveal_all(&mut self, now: Instant) -> usize {
        let animation = self.tuning.animation;
        let mut revealed = 0;
        for kind in PoolKind::ALL {
            for handle in self.pools[kind.index()].handles().to_vec() {
                let Some(key) = self.arena.get(handle).map(|s| s.key()) else {
                    continue;
                };
                let policy = self.desired_policy(key);
                let Some(surface) = self.arena.get_mut(handle) else {
                    continue;
                };
                if surface.state() != SurfaceState::Hidden || !surface.is_parked() {
                    continue;
                }
                let id = surface.id();
                self.compositor.order(id, placement(key, policy));
                self.compositor
                    .animate_level(id, 0.0, surface.level(), animation);
                let result = surface
                    .set_z_policy(policy)
                    .and_then(|_| surface.set_parked(false))
                    .and_then(|_| surface.begin_transition(now + animation))
                    .and_then(|_| surface.transition(SurfaceState::Visible));
                self.note(result);
                revealed += 1;
            }
        }
        revealed
    }

    /// Closes and destroys every surface without waiting out the grace
    /// period. Pinned surfaces stay in the closing list.
    pub fn destroy_all(&mut self, now: Instant) -> usize {
        for kind in PoolKind::ALL {
            for handle in self.pools[kind.index()].handles().to_vec() {
                self.close_surface(kind, handle, now);
            }
        }
        let mut destroyed = 0;
        let mut pinned = Vec::new();
        for handle in std::mem::take(&mut self.closing) {
            if self.arena.pins(handle).unwrap_or(0) > 0 {
                pinned.push(handle);
            } else if self.destroy_closed(handle) {
                destroyed += 1;
            }
        }
        if !pinned.is_empty() {
            tracing::warn!(pinned = pinned.len(), "pinned overlays survived destroy_all");
        }
        self.closing = pinned;
        destroyed
    }

    /// Re-stacks surfaces for a new frontmost window: its overlays go to the
    /// elevated band, everything else sits directly above its owner.
    pub fn reconcile_z_order(&mut self, frontmost: Option<WindowId>) -> usize {
        let focus_moved = self.frontmost != frontmost;
        self.frontmost = frontmost;
        let mut reordered = 0;
        for kind in [PoolKind::Window, PoolKind::Region, PoolKind::Decay] {
            for handle in self.pools[kind.index()].handles().to_vec() {
                let Some((id, key, current, state)) = self
                    .arena
                    .get(handle)
                    .map(|s| (s.id(), s.key(), s.z_policy(), s.state()))
                else {
                    continue;
                };
                let desired = self.desired_policy(key);
                if current != desired {
                    let result = self
                        .arena
                        .get_mut(handle)
                        .map_or(Ok(()), |s| s.set_z_policy(desired));
                    self.note(result);
                } else if !(focus_moved && desired == ZPolicy::Normal) {
                    continue;
                }
                if state == SurfaceState::Visible {
                    self.compositor.order(id, placement(key, desired));
                    reordered += 1;
                }
            }
        }
        reordered
    }

    /// Recomputes window and region levels from the stored brightness for a
    /// new frontmost window, and drops decay on the newly focused window.
    pub fn refresh_levels_for_frontmost(
        &mut self,
        frontmost: Option<WindowId>,
        engine: &DecisionEngine,
        now: Instant,
    ) -> usize {
        let animation = self.tuning.animation;
        let epsilon = self.tuning.level_epsilon;
        let mut changed = 0;
        for kind in [PoolKind::Window, PoolKind::Region, PoolKind::Decay] {
            for handle in self.pools[kind.index()].handles().to_vec() {
                let Some((id, owner, current, brightness, state)) =
                    self.arena.get(handle).map(|s| {
                        (s.id(), s.owner(), s.level(), s.brightness(), s.state())
                    })
                else {
                    continue;
                };
                if state != SurfaceState::Visible {
                    continue;
                }
                let is_frontmost = frontmost.is_some() && owner == frontmost;
                let target = match kind {
                    PoolKind::Window => engine.window_level(brightness, is_frontmost),
                    PoolKind::Region => engine.region_level(brightness, is_frontmost),
                    _ => (!is_frontmost).then_some(current),
                };
                match target {
                    None => {
                        if self.hide_surface(handle, false, now) {
                            changed += 1;
                        }
                    }
                    Some(level) if (level - current).abs() > epsilon => {
                        self.compositor.animate_level(id, current, level, animation);
                        let result = match self.arena.get_mut(handle) {
                            Some(surface) => surface
                                .set_level(level, brightness)
                                .and_then(|_| surface.begin_transition(now + animation)),
                            None => Ok(()),
                        };
                        self.note(result);
                        changed += 1;
                    }
                    Some(_) => {}
                }
            }
        }
        changed
    }

    pub fn surface_id(&self, key: TargetKey) -> Option<SurfaceId> {
        self.pools[key.pool().index()]
            .get(&key)
            .and_then(|handle| self.arena.get(handle))
            .map(|s| s.id())
    }

    /// Resolves an id to its handle while the surface is open. Closing
    /// surfaces are out of reach for the rest of their grace period.
    pub fn handle_for(&self, id: SurfaceId) -> Option<SurfaceHandle> {
        self.ids
            .get(&id)
            .copied()
            .filter(|handle| self.surface(*handle).is_some())
    }

    pub fn surface(&self, handle: SurfaceHandle) -> Option<&OverlaySurface> {
        self.arena.get(handle).filter(|s| s.state().is_open())
    }

    pub fn surface_by_key(&self, key: TargetKey) -> Option<&OverlaySurface> {
        self.pools[key.pool().index()]
            .get(&key)
            .and_then(|handle| self.arena.get(handle))
    }

    pub fn surfaces(&self, kind: PoolKind) -> impl Iterator<Item = &OverlaySurface> + '_ {
        self.pools[kind.index()]
            .handles()
            .iter()
            .filter_map(|handle| self.arena.get(*handle))
    }

    pub fn pin(&mut self, handle: SurfaceHandle) -> bool {
        self.arena.pin(handle)
    }

    pub fn unpin(&mut self, handle: SurfaceHandle) -> bool {
        self.arena.unpin(handle)
    }

    /// Visible surfaces.
    pub fn live_count(&self) -> usize {
        PoolKind::ALL
            .iter()
            .flat_map(|kind| self.surfaces(*kind))
            .filter(|s| s.state() == SurfaceState::Visible)
            .count()
    }

    /// Visible or hidden surfaces.
    pub fn open_count(&self) -> usize {
        self.pools.iter().map(SurfacePool::len).sum()
    }

    pub fn pool_len(&self, kind: PoolKind) -> usize {
        self.pools[kind.index()].len()
    }

    pub fn closing_count(&self) -> usize {
        self.closing.len()
    }
}

impl<C: Compositor + 'static> OwnedState for OverlayManager<C> {
    fn idle(&mut self, now: Instant) {
        self.compositor.pump();
        self.reap(now);
    }
}

#[cfg(test)]
mod tests {
    use super::{ManagerTuning, OverlayManager};
    use crate::dim::compositor::{CompositorOp, RecordingCompositor};
    use crate::dim::decision::DimDecision;
    use crate::dim::geometry::Rect;
    use crate::dim::source::WindowId;
    use crate::dim::surface::{SurfaceState, TargetKey};
    use std::time::{Duration, Instant};

    fn manager() -> OverlayManager<RecordingCompositor> {
        OverlayManager::new(RecordingCompositor::new(), ManagerTuning::default())
    }

    fn decay(window: u64, level: f64) -> DimDecision {
        DimDecision {
            key: TargetKey::Decay(WindowId(window)),
            rect: Rect::new(0.0, 0.0, 300.0, 200.0),
            level,
            is_frontmost: false,
            brightness: 0.0,
        }
    }

    #[test]
    fn small_level_changes_are_ignored() {
        let now = Instant::now();
        let mut m = manager();
        m.apply_decay_decisions(&[decay(1, 0.3)], now);
        m.compositor_mut().take_ops();

        let report = m.apply_decay_decisions(&[decay(1, 0.302)], now);
        assert_eq!(report.unchanged, 1);
        assert_eq!(m.compositor().mutation_count(), 0);

        let report = m.apply_decay_decisions(&[decay(1, 0.4)], now);
        assert_eq!(report.updated, 1);
        assert!(matches!(
            m.compositor().ops(),
            [CompositorOp::AnimateLevel { to, .. }] if (*to - 0.4).abs() < 1e-9
        ));
    }

    #[test]
    fn pinned_closing_surface_outlives_grace() {
        let now = Instant::now();
        let mut m = manager();
        m.apply_decay_decisions(&[decay(1, 0.3)], now);
        let id = m.surface_id(TargetKey::Decay(WindowId(1))).expect("surface");
        let handle = m.handle_for(id).expect("handle");
        assert!(m.pin(handle));

        m.destroy_all(now);
        assert_eq!(m.closing_count(), 1);
        assert_eq!(m.reap(now + Duration::from_secs(10)), 0);

        assert!(m.unpin(handle));
        assert_eq!(m.reap(now + Duration::from_secs(10)), 1);
        assert_eq!(m.handle_for(id), None);
        assert!(m.surface(handle).is_none());
    }

    #[test]
    fn failed_creation_leaves_nothing_behind() {
        let now = Instant::now();
        let mut m = manager();
        m.compositor_mut().fail_creates(true);
        let report = m.apply_decay_decisions(&[decay(1, 0.3)], now);
        assert_eq!(report.failed, 1);
        assert_eq!(m.open_count(), 0);
        assert_eq!(m.stats().failed_creates, 1);

        m.compositor_mut().fail_creates(false);
        let report = m.apply_decay_decisions(&[decay(1, 0.3)], now);
        assert_eq!(report.created, 1);
        let surface = m
            .surface_by_key(TargetKey::Decay(WindowId(1)))
            .expect("created surface");
        assert_eq!(surface.state(), SurfaceState::Visible);
    }

    #[test]
    fn full_pool_evicts_oldest_hidden_surface() {
        let now = Instant::now();
        let mut m = OverlayManager::new(
            RecordingCompositor::new(),
            ManagerTuning {
                max_pool_size: 2,
                ..ManagerTuning::default()
            },
        );
        m.apply_decay_decisions(&[decay(1, 0.3), decay(2, 0.3)], now);
        let report = m.apply_decay_decisions(&[decay(2, 0.3), decay(3, 0.3), decay(4, 0.3)], now);
        assert_eq!(report.reused, 1);
        assert_eq!(report.skipped_capacity, 1);
        assert_eq!(m.pool_len(crate::dim::surface::PoolKind::Decay), 2);

        let report = m.apply_decay_decisions(&[decay(5, 0.3)], now);
        assert_eq!(report.reused, 1);
        assert_eq!(report.hidden, 1);
        let report = m.apply_decay_decisions(&[decay(5, 0.3), decay(6, 0.3), decay(7, 0.3)], now);
        assert_eq!(report.revealed, 1);
        assert_eq!(report.skipped_capacity, 1);
    }
}
