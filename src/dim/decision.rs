use crate::dim::cache::AnalysisResult;
use crate::dim::decay::{decay_dim_level, DecayTracker};
use crate::dim::geometry::Rect;
use crate::dim::source::{DisplayInfo, TrackedWindow, WindowId};
use crate::dim::surface::{PoolKind, TargetKey};
use crate::settings::{DetectionMode, DimSettings};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Lowest level a dimmed region may have and still be noticeable.
pub const MIN_VISIBLE_LEVEL: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimDecision {
    pub key: TargetKey,
    /// Absolute screen rectangle.
    pub rect: Rect,
    pub level: f64,
    pub is_frontmost: bool,
    /// Brightness the level was derived from; 0 for decay and display.
    pub brightness: f64,
}

/// Every decision produced by one cycle, applied as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionBatch {
    pub display: Vec<DimDecision>,
    pub windows: Vec<DimDecision>,
    pub regions: Vec<DimDecision>,
    pub decay: Vec<DimDecision>,
    pub frontmost: Option<WindowId>,
    /// Windows visible this cycle. Overlays owned by anything else are closed.
    pub live_windows: HashSet<WindowId>,
    /// Windows whose overlays must be left exactly as they are this cycle.
    pub preserved: HashSet<WindowId>,
    /// Run epoch the batch was computed under.
    pub epoch: u64,
}

impl DecisionBatch {
    pub fn for_pool(&self, pool: PoolKind) -> &[DimDecision] {
        match pool {
            PoolKind::Display => &self.display,
            PoolKind::Window => &self.windows,
            PoolKind::Region => &self.regions,
            PoolKind::Decay => &self.decay,
        }
    }

    pub fn len(&self) -> usize {
        self.display.len() + self.windows.len() + self.regions.len() + self.decay.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `base * (0.5 + 0.5 * ratio)` where `ratio` is the overage above the
/// threshold normalised to the remaining headroom. The optional cap applies
/// before the visibility floor of `max(0.15, base / 2)`.
pub fn region_dim_level(brightness: f64, threshold: f64, base: f64, cap: Option<f64>) -> f64 {
    let headroom = (1.0 - threshold).max(f64::EPSILON);
    let ratio = ((brightness - threshold) / headroom).clamp(0.0, 1.0);
    let mut level = base * (0.5 + 0.5 * ratio);
    if let Some(cap) = cap {
        level = level.min(cap);
    }
    level.max(MIN_VISIBLE_LEVEL.max(base * 0.5))
}

pub struct DecisionInput<'a> {
    pub windows: &'a [TrackedWindow],
    pub displays: &'a [DisplayInfo],
    pub analyses: &'a HashMap<WindowId, AnalysisResult>,
    pub decay: &'a DecayTracker,
    pub now: Instant,
}

/// Turns analysis and focus history into dim decisions for one settings
/// snapshot.
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    settings: DimSettings,
}

impl DecisionEngine {
    pub fn new(settings: DimSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &DimSettings {
        &self.settings
    }

    fn clamp(&self, level: f64) -> f64 {
        level.clamp(0.0, self.settings.max_dim_level)
    }

    fn frontmost_suppressed(&self, is_frontmost: bool) -> bool {
        is_frontmost && self.settings.differentiate_active && self.settings.active_dim_level <= 0.0
    }

    /// Whole-window level, or `None` when the window should not be dimmed.
    pub fn window_level(&self, brightness: f64, is_frontmost: bool) -> Option<f64> {
        let s = &self.settings;
        if brightness <= s.brightness_threshold || self.frontmost_suppressed(is_frontmost) {
            return None;
        }
        let base = match (s.differentiate_active, is_frontmost) {
            (true, true) => s.active_dim_level,
            (true, false) => s.inactive_dim_level,
            (false, _) => s.base_dim_level,
        };
        if base <= 0.0 {
            return None;
        }
        Some(self.clamp(region_dim_level(
            brightness,
            s.brightness_threshold,
            base,
            None,
        )))
    }

    pub fn region_level(&self, brightness: f64, is_frontmost: bool) -> Option<f64> {
        let s = &self.settings;
        if brightness <= s.brightness_threshold
            || self.frontmost_suppressed(is_frontmost)
            || s.base_dim_level <= 0.0
        {
            return None;
        }
        let cap = (is_frontmost && s.differentiate_active).then_some(s.active_dim_level);
        Some(self.clamp(region_dim_level(
            brightness,
            s.brightness_threshold,
            s.base_dim_level,
            cap,
        )))
    }

    /// Frontmost windows never decay.
    pub fn decay_level(&self, inactivity: Duration, is_frontmost: bool) -> Option<f64> {
        let s = &self.settings;
        if !s.decay_enabled || is_frontmost {
            return None;
        }
        let level = decay_dim_level(
            inactivity,
            s.decay_rate,
            s.decay_start_delay(),
            s.max_decay_level,
        );
        (level > 0.0).then(|| self.clamp(level))
    }

    pub fn decide(&self, input: DecisionInput<'_>) -> DecisionBatch {
        let s = &self.settings;
        let mut batch = DecisionBatch {
            frontmost: input.windows.iter().find(|w| w.is_frontmost).map(|w| w.id),
            live_windows: input.windows.iter().map(|w| w.id).collect(),
            ..DecisionBatch::default()
        };

        if s.display_dimming_enabled && s.display_dim_level > 0.0 {
            batch.display = input
                .displays
                .iter()
                .map(|display| DimDecision {
                    key: TargetKey::Display(display.id),
                    rect: display.bounds,
                    level: self.clamp(s.display_dim_level),
                    is_frontmost: false,
                    brightness: 0.0,
                })
                .collect();
        }

        for window in input.windows {
            if s.dimming_enabled {
                if let Some(analysis) = input.analyses.get(&window.id) {
                    self.brightness_decisions(window, analysis, &mut batch);
                }
            }

            let inactivity = input.decay.inactivity(window.id, input.now);
            if let Some(level) = self.decay_level(inactivity, window.is_frontmost) {
                batch.decay.push(DimDecision {
                    key: TargetKey::Decay(window.id),
                    rect: window.bounds,
                    level,
                    is_frontmost: false,
                    brightness: 0.0,
                });
            }
        }

        batch
    }

    fn brightness_decisions(
        &self,
        window: &TrackedWindow,
        analysis: &AnalysisResult,
        batch: &mut DecisionBatch,
    ) {
        match self.settings.detection_mode {
            DetectionMode::WholeWindow => {
                let brightness = analysis.average_luminance;
                if let Some(level) = self.window_level(brightness, window.is_frontmost) {
                    batch.windows.push(DimDecision {
                        key: TargetKey::Window(window.id),
                        rect: window.bounds,
                        level,
                        is_frontmost: window.is_frontmost,
                        brightness,
                    });
                }
            }
            DetectionMode::SubRegion => {
                for (index, region) in analysis.regions.iter().enumerate() {
                    let Some(level) = self.region_level(region.brightness, window.is_frontmost)
                    else {
                        continue;
                    };
                    batch.regions.push(DimDecision {
                        key: TargetKey::Region(window.id, index),
                        rect: region.rect.offset(window.bounds.x, window.bounds.y),
                        level,
                        is_frontmost: window.is_frontmost,
                        brightness: region.brightness,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{region_dim_level, DecisionEngine, DecisionInput, MIN_VISIBLE_LEVEL};
    use crate::dim::cache::AnalysisResult;
    use crate::dim::decay::DecayTracker;
    use crate::dim::geometry::Rect;
    use crate::dim::source::{BrightRegion, DisplayInfo, TrackedWindow, WindowId};
    use crate::dim::surface::TargetKey;
    use crate::settings::{DetectionMode, DimSettings};
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    fn window(id: u64, x: f64, frontmost: bool) -> TrackedWindow {
        TrackedWindow {
            id: WindowId(id),
            owner_pid: 100 + id as u32,
            bounds: Rect::new(x, 50.0, 400.0, 300.0),
            is_frontmost: frontmost,
        }
    }

    fn analysis(avg: f64, regions: Vec<BrightRegion>, w: &TrackedWindow) -> AnalysisResult {
        AnalysisResult::new(avg, regions, &w.bounds, w.is_frontmost, Instant::now())
    }

    #[test]
    fn region_level_example() {
        let level = region_dim_level(0.95, 0.85, 0.25, None);
        assert!((level - 0.25 * (0.5 + 0.5 * (0.10 / 0.15))).abs() < 1e-9);
        assert!((level - 0.208).abs() < 0.001);
    }

    #[test]
    fn region_level_is_monotonic_in_overage() {
        let mut previous = 0.0;
        for step in 0..=100 {
            let brightness = 0.85 + 0.15 * step as f64 / 100.0;
            let level = region_dim_level(brightness, 0.85, 0.4, None);
            assert!(level >= previous, "level dropped at {brightness}");
            previous = level;
        }
    }

    #[test]
    fn floor_wins_over_active_cap() {
        let level = region_dim_level(1.0, 0.85, 0.25, Some(0.05));
        assert_eq!(level, MIN_VISIBLE_LEVEL);
        let level = region_dim_level(1.0, 0.85, 0.6, Some(0.1));
        assert_eq!(level, 0.3);
    }

    #[test]
    fn frontmost_region_is_capped_at_active_level() {
        let engine = DecisionEngine::new(DimSettings {
            base_dim_level: 0.5,
            active_dim_level: 0.2,
            ..DimSettings::default()
        });
        assert_eq!(engine.region_level(1.0, false), Some(0.5));
        assert_eq!(engine.region_level(1.0, true), Some(0.25));
        assert_eq!(engine.region_level(0.5, false), None);
    }

    #[test]
    fn zero_active_level_suppresses_frontmost() {
        let engine = DecisionEngine::new(DimSettings {
            active_dim_level: 0.0,
            ..DimSettings::default()
        });
        assert_eq!(engine.region_level(1.0, true), None);
        assert_eq!(engine.window_level(1.0, true), None);
        assert!(engine.region_level(1.0, false).is_some());
    }

    #[test]
    fn levels_are_clamped_to_max() {
        let engine = DecisionEngine::new(DimSettings {
            base_dim_level: 0.8,
            max_dim_level: 0.3,
            ..DimSettings::default()
        });
        assert_eq!(engine.region_level(1.0, false), Some(0.3));
    }

    #[test]
    fn decide_emits_absolute_region_rects_and_decay() {
        let now = Instant::now();
        let background = window(1, 100.0, false);
        let front = window(2, 600.0, true);
        let mut analyses = HashMap::new();
        analyses.insert(
            background.id,
            analysis(
                0.5,
                vec![BrightRegion {
                    rect: Rect::new(10.0, 20.0, 100.0, 50.0),
                    brightness: 0.95,
                }],
                &background,
            ),
        );
        analyses.insert(front.id, analysis(0.2, Vec::new(), &front));

        let mut decay = DecayTracker::new();
        decay.observe(
            &[background.clone(), front.clone()],
            &[background.id, front.id].into_iter().collect(),
            now,
        );

        let engine = DecisionEngine::new(DimSettings {
            decay_enabled: true,
            decay_start_delay_secs: 30.0,
            ..DimSettings::default()
        });
        let windows = [background.clone(), front.clone()];
        let batch = engine.decide(DecisionInput {
            windows: &windows,
            displays: &[],
            analyses: &analyses,
            decay: &decay,
            now: now + Duration::from_secs(40),
        });

        assert_eq!(batch.frontmost, Some(WindowId(2)));
        assert_eq!(batch.regions.len(), 1);
        assert_eq!(batch.regions[0].key, TargetKey::Region(WindowId(1), 0));
        assert_eq!(batch.regions[0].rect, Rect::new(110.0, 70.0, 100.0, 50.0));
        assert_eq!(batch.decay.len(), 1);
        assert_eq!(batch.decay[0].key, TargetKey::Decay(WindowId(1)));
        assert!((batch.decay[0].level - 0.1).abs() < 1e-9);
        assert!(batch.windows.is_empty());
        assert_eq!(batch.live_windows.len(), 2);
    }

    #[test]
    fn whole_window_mode_uses_active_and_inactive_bases() {
        let now = Instant::now();
        let background = window(1, 0.0, false);
        let front = window(2, 500.0, true);
        let mut analyses = HashMap::new();
        analyses.insert(background.id, analysis(1.0, Vec::new(), &background));
        analyses.insert(front.id, analysis(1.0, Vec::new(), &front));

        let engine = DecisionEngine::new(DimSettings {
            detection_mode: DetectionMode::WholeWindow,
            active_dim_level: 0.2,
            inactive_dim_level: 0.4,
            ..DimSettings::default()
        });
        let windows = [background, front];
        let batch = engine.decide(DecisionInput {
            windows: &windows,
            displays: &[],
            analyses: &analyses,
            decay: &DecayTracker::new(),
            now,
        });

        assert_eq!(batch.windows.len(), 2);
        assert_eq!(batch.windows[0].level, 0.4);
        assert_eq!(batch.windows[1].level, 0.2);
        assert!(batch.windows[1].is_frontmost);
        assert!(batch.regions.is_empty());
    }

    #[test]
    fn display_pool_follows_display_setting() {
        let engine = DecisionEngine::new(DimSettings {
            display_dimming_enabled: true,
            display_dim_level: 0.2,
            ..DimSettings::default()
        });
        let displays = [DisplayInfo {
            id: 1,
            bounds: Rect::new(0.0, 0.0, 1920.0, 1080.0),
        }];
        let batch = engine.decide(DecisionInput {
            windows: &[],
            displays: &displays,
            analyses: &HashMap::new(),
            decay: &DecayTracker::new(),
            now: Instant::now(),
        });
        assert_eq!(batch.display.len(), 1);
        assert_eq!(batch.display[0].key, TargetKey::Display(1));
        assert_eq!(batch.display[0].level, 0.2);
    }
}
