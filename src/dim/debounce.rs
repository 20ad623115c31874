use std::time::{Duration, Instant};

/// Quiet period after the last event before an event cycle may run.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(150);
/// Minimum spacing between two analysis cycles.
pub const MIN_CYCLE_GAP: Duration = Duration::from_millis(300);

/// Coalesces bursts of window events into a single trailing cycle.
#[derive(Debug, Clone)]
pub struct EventDebouncer {
    window: Duration,
    min_gap: Duration,
    last_event: Option<Instant>,
    last_cycle: Option<Instant>,
    coalesced: u64,
}

impl Default for EventDebouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_WINDOW, MIN_CYCLE_GAP)
    }
}

impl EventDebouncer {
    pub fn new(window: Duration, min_gap: Duration) -> Self {
        Self {
            window,
            min_gap,
            last_event: None,
            last_cycle: None,
            coalesced: 0,
        }
    }

    pub fn note_event(&mut self, now: Instant) {
        if self.last_event.is_some() {
            self.coalesced += 1;
        }
        self.last_event = Some(now);
    }

    /// Records that a cycle ran, from any trigger.
    pub fn note_cycle(&mut self, now: Instant) {
        self.last_cycle = Some(now);
    }

    pub fn is_pending(&self) -> bool {
        self.last_event.is_some()
    }

    /// Events folded into an already pending cycle.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    pub fn deadline(&self) -> Option<Instant> {
        let event_ready = self.last_event? + self.window;
        Some(match self.last_cycle {
            Some(last) => event_ready.max(last + self.min_gap),
            None => event_ready,
        })
    }

    /// Returns true, and clears the pending event, once the deadline passed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.last_event = None;
                self.last_cycle = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.last_event = None;
    }
}

#[cfg(test)]
mod tests {
    use super::EventDebouncer;
    use std::time::{Duration, Instant};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn burst_collapses_into_one_trailing_cycle() {
        let start = Instant::now();
        let mut debouncer = EventDebouncer::default();
        for step in 0..5 {
            debouncer.note_event(start + ms(step * 40));
        }
        assert_eq!(debouncer.coalesced(), 4);
        assert!(!debouncer.poll(start + ms(200)));
        assert_eq!(debouncer.deadline(), Some(start + ms(310)));
        assert!(debouncer.poll(start + ms(310)));
        assert!(!debouncer.poll(start + ms(400)));
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn min_gap_delays_event_after_recent_cycle() {
        let start = Instant::now();
        let mut debouncer = EventDebouncer::default();
        debouncer.note_cycle(start);
        debouncer.note_event(start + ms(10));
        assert_eq!(debouncer.deadline(), Some(start + ms(300)));
        assert!(!debouncer.poll(start + ms(200)));
        assert!(debouncer.poll(start + ms(300)));
    }

    #[test]
    fn nothing_pending_means_no_deadline() {
        let mut debouncer = EventDebouncer::default();
        assert_eq!(debouncer.deadline(), None);
        assert!(!debouncer.poll(Instant::now()));
        debouncer.note_event(Instant::now());
        debouncer.reset();
        assert!(!debouncer.is_pending());
    }
}
