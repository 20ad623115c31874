use crate::dim::geometry::Rect;
use crate::dim::source::{BrightRegion, WindowId};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

/// Cached outcome of capturing and analysing one window.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub average_luminance: f64,
    /// Window-relative, in points, in analyzer order.
    pub regions: Vec<BrightRegion>,
    pub bounds_hash: u64,
    pub was_frontmost: bool,
    pub analyzed_at: Instant,
}

impl AnalysisResult {
    pub fn new(
        average_luminance: f64,
        regions: Vec<BrightRegion>,
        bounds: &Rect,
        was_frontmost: bool,
        analyzed_at: Instant,
    ) -> Self {
        Self {
            average_luminance,
            regions,
            bounds_hash: bounds.bounds_hash(),
            was_frontmost,
            analyzed_at,
        }
    }
}

/// Why a lookup did not produce a usable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMiss {
    Absent,
    Expired,
    BoundsChanged,
    /// The window gained focus since it was analysed; its content may have
    /// scrolled while it sat in the background.
    FocusGained,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
pub struct AnalysisCache {
    ttl: Duration,
    entries: HashMap<WindowId, AnalysisResult>,
    stats: CacheStats,
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl AnalysisCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Validity check without touching the counters.
    pub fn check(
        &self,
        id: WindowId,
        current_bounds: &Rect,
        is_frontmost_now: bool,
        now: Instant,
    ) -> Result<&AnalysisResult, CacheMiss> {
        let cached = self.entries.get(&id).ok_or(CacheMiss::Absent)?;
        if now.saturating_duration_since(cached.analyzed_at) >= self.ttl {
            return Err(CacheMiss::Expired);
        }
        if current_bounds.bounds_hash() != cached.bounds_hash {
            return Err(CacheMiss::BoundsChanged);
        }
        if is_frontmost_now && !cached.was_frontmost {
            return Err(CacheMiss::FocusGained);
        }
        Ok(cached)
    }

    pub fn lookup(
        &mut self,
        id: WindowId,
        current_bounds: &Rect,
        is_frontmost_now: bool,
        now: Instant,
    ) -> Option<&AnalysisResult> {
        let verdict = self
            .check(id, current_bounds, is_frontmost_now, now)
            .map(|_| ());
        match verdict {
            Ok(()) => {
                self.stats.hits += 1;
                self.entries.get(&id)
            }
            Err(reason) => {
                self.stats.misses += 1;
                tracing::trace!(%id, ?reason, "analysis cache miss");
                None
            }
        }
    }

    pub fn store(&mut self, id: WindowId, result: AnalysisResult) {
        self.entries.insert(id, result);
    }

    /// Drops entries for windows that are no longer visible.
    pub fn evict_missing(&mut self, current: &HashSet<WindowId>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|id, _| current.contains(id));
        let evicted = before - self.entries.len();
        self.stats.evictions += evicted as u64;
        evicted
    }
}
