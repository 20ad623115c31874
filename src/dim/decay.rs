use crate::dim::source::{TrackedWindow, WindowId};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Focus history of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecayState {
    pub last_focused: Instant,
}

impl DecayState {
    pub fn inactivity(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_focused)
    }
}

/// `min(max_level, rate * max(0, inactivity - start_delay))`.
pub fn decay_dim_level(
    inactivity: Duration,
    rate_per_sec: f64,
    start_delay: Duration,
    max_level: f64,
) -> f64 {
    let delayed = inactivity.saturating_sub(start_delay).as_secs_f64();
    (rate_per_sec.max(0.0) * delayed).min(max_level.max(0.0))
}

/// Tracks when each window last held focus. Windows seen for the first time
/// start their inactivity clock at that moment; a window that is merely
/// unlisted (minimised, on another desktop) keeps its clock until it is gone
/// from `live`.
#[derive(Debug, Default)]
pub struct DecayTracker {
    states: HashMap<WindowId, DecayState>,
}

impl DecayTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, windows: &[TrackedWindow], live: &HashSet<WindowId>, now: Instant) {
        self.states.retain(|id, _| live.contains(id));
        for window in windows {
            if window.is_frontmost {
                self.mark_frontmost(window.id, now);
            } else {
                self.states
                    .entry(window.id)
                    .or_insert(DecayState { last_focused: now });
            }
        }
    }

    /// Resets the inactivity clock. Called the instant focus moves.
    pub fn mark_frontmost(&mut self, id: WindowId, now: Instant) {
        self.states.insert(id, DecayState { last_focused: now });
    }

    /// Every window with a clock.
    pub fn tracked(&self) -> impl Iterator<Item = WindowId> + '_ {
        self.states.keys().copied()
    }

    pub fn state(&self, id: WindowId) -> Option<DecayState> {
        self.states.get(&id).copied()
    }

    pub fn inactivity(&self, id: WindowId, now: Instant) -> Duration {
        self.states
            .get(&id)
            .map(|s| s.inactivity(now))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
