use crate::dim::source::RegionParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const MIN_SCAN_INTERVAL_SECS: f64 = 0.5;
pub const MAX_SCAN_INTERVAL_SECS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// One overlay per bright window.
    WholeWindow,
    /// One overlay per bright area inside a window.
    SubRegion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimSettings {
    #[serde(default = "default_true")]
    pub dimming_enabled: bool,
    #[serde(default = "default_detection_mode")]
    pub detection_mode: DetectionMode,
    /// Luminance above which content counts as bright.
    #[serde(default = "default_brightness_threshold")]
    pub brightness_threshold: f64,
    #[serde(default = "default_base_dim_level")]
    pub base_dim_level: f64,
    /// Level used for (and cap applied to) the frontmost window.
    #[serde(default = "default_active_dim_level")]
    pub active_dim_level: f64,
    #[serde(default = "default_inactive_dim_level")]
    pub inactive_dim_level: f64,
    #[serde(default = "default_true")]
    pub differentiate_active: bool,
    /// Hard ceiling for every overlay level.
    #[serde(default = "default_max_dim_level")]
    pub max_dim_level: f64,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: f64,
    #[serde(default = "default_region_grid_size")]
    pub region_grid_size: u32,
    #[serde(default = "default_min_region_size")]
    pub min_region_size: f64,
    #[serde(default)]
    pub decay_enabled: bool,
    /// Level gained per second of inactivity once the start delay passed.
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    #[serde(default = "default_decay_start_delay_secs")]
    pub decay_start_delay_secs: f64,
    #[serde(default = "default_max_decay_level")]
    pub max_decay_level: f64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: f64,
    #[serde(default)]
    pub display_dimming_enabled: bool,
    #[serde(default = "default_display_dim_level")]
    pub display_dim_level: f64,
    #[serde(default = "default_rect_tolerance_px")]
    pub rect_tolerance_px: f64,
    #[serde(default = "default_animation_ms")]
    pub animation_ms: u64,
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    /// When enabled the logger is initialised at debug level.
    #[serde(default)]
    pub debug_logging: bool,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_detection_mode() -> DetectionMode {
    DetectionMode::SubRegion
}

fn default_brightness_threshold() -> f64 {
    0.85
}

fn default_base_dim_level() -> f64 {
    0.25
}

fn default_active_dim_level() -> f64 {
    0.15
}

fn default_inactive_dim_level() -> f64 {
    0.35
}

fn default_max_dim_level() -> f64 {
    0.8
}

fn default_scan_interval_secs() -> f64 {
    2.0
}

fn default_region_grid_size() -> u32 {
    32
}

fn default_min_region_size() -> f64 {
    40.0
}

fn default_decay_rate() -> f64 {
    0.01
}

fn default_decay_start_delay_secs() -> f64 {
    30.0
}

fn default_max_decay_level() -> f64 {
    0.8
}

fn default_cache_ttl_secs() -> f64 {
    10.0
}

fn default_display_dim_level() -> f64 {
    0.1
}

fn default_rect_tolerance_px() -> f64 {
    2.0
}

fn default_animation_ms() -> u64 {
    250
}

fn default_close_grace_ms() -> u64 {
    1500
}

fn default_max_pool_size() -> usize {
    64
}

impl Default for DimSettings {
    fn default() -> Self {
        Self {
            dimming_enabled: true,
            detection_mode: default_detection_mode(),
            brightness_threshold: default_brightness_threshold(),
            base_dim_level: default_base_dim_level(),
            active_dim_level: default_active_dim_level(),
            inactive_dim_level: default_inactive_dim_level(),
            differentiate_active: true,
            max_dim_level: default_max_dim_level(),
            scan_interval_secs: default_scan_interval_secs(),
            region_grid_size: default_region_grid_size(),
            min_region_size: default_min_region_size(),
            decay_enabled: false,
            decay_rate: default_decay_rate(),
            decay_start_delay_secs: default_decay_start_delay_secs(),
            max_decay_level: default_max_decay_level(),
            cache_ttl_secs: default_cache_ttl_secs(),
            display_dimming_enabled: false,
            display_dim_level: default_display_dim_level(),
            rect_tolerance_px: default_rect_tolerance_px(),
            animation_ms: default_animation_ms(),
            close_grace_ms: default_close_grace_ms(),
            max_pool_size: default_max_pool_size(),
            debug_logging: false,
            log_file: None,
        }
    }
}

/// `<config dir>/SuperDimmer/settings.json`, or the working directory when
/// the platform has no config dir.
pub fn default_settings_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("SuperDimmer")
        .join("settings.json")
}

fn clamp_f64(value: &mut f64, min: f64, max: f64) -> bool {
    let next = if value.is_finite() {
        value.clamp(min, max)
    } else {
        min
    };
    let changed = next != *value;
    *value = next;
    changed
}

impl DimSettings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut settings: Self = serde_json::from_str(&content)?;
        if settings.sanitize() {
            tracing::warn!(path = %path.display(), "settings contained out-of-range values; clamped");
        }
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Clamps every numeric field into its supported range. Returns whether
    /// anything changed.
    pub fn sanitize(&mut self) -> bool {
        let mut changed = false;
        changed |= clamp_f64(&mut self.brightness_threshold, 0.0, 0.99);
        changed |= clamp_f64(&mut self.max_dim_level, 0.0, 1.0);
        let max = self.max_dim_level;
        changed |= clamp_f64(&mut self.base_dim_level, 0.0, max);
        changed |= clamp_f64(&mut self.active_dim_level, 0.0, max);
        changed |= clamp_f64(&mut self.inactive_dim_level, 0.0, max);
        changed |= clamp_f64(&mut self.display_dim_level, 0.0, max);
        changed |= clamp_f64(
            &mut self.scan_interval_secs,
            MIN_SCAN_INTERVAL_SECS,
            MAX_SCAN_INTERVAL_SECS,
        );
        changed |= clamp_f64(&mut self.min_region_size, 1.0, 10_000.0);
        changed |= clamp_f64(&mut self.decay_rate, 0.0, 1.0);
        changed |= clamp_f64(&mut self.decay_start_delay_secs, 0.0, 86_400.0);
        changed |= clamp_f64(&mut self.max_decay_level, 0.0, 1.0);
        changed |= clamp_f64(&mut self.cache_ttl_secs, 0.0, 600.0);
        changed |= clamp_f64(&mut self.rect_tolerance_px, 0.0, 64.0);

        let grid = self.region_grid_size.clamp(4, 128);
        changed |= grid != self.region_grid_size;
        self.region_grid_size = grid;

        let pool = self.max_pool_size.max(1);
        changed |= pool != self.max_pool_size;
        self.max_pool_size = pool;

        changed
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs_f64(
            self.scan_interval_secs
                .clamp(MIN_SCAN_INTERVAL_SECS, MAX_SCAN_INTERVAL_SECS),
        )
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.cache_ttl_secs.max(0.0))
    }

    pub fn decay_start_delay(&self) -> Duration {
        Duration::from_secs_f64(self.decay_start_delay_secs.max(0.0))
    }

    pub fn animation(&self) -> Duration {
        Duration::from_millis(self.animation_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn region_params(&self) -> RegionParams {
        RegionParams {
            threshold: self.brightness_threshold,
            grid_size: self.region_grid_size,
            min_size: self.min_region_size,
        }
    }
}

/// Shared settings cell. An external settings store pushes with `replace`;
/// the dimming core pulls one `snapshot` per analysis cycle.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<DimSettings>>,
}

impl SettingsHandle {
    pub fn new(mut settings: DimSettings) -> Self {
        settings.sanitize();
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> DimSettings {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, mut settings: DimSettings) {
        settings.sanitize();
        match self.inner.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut DimSettings),
    {
        let mut next = self.snapshot();
        f(&mut next);
        self.replace(next);
    }
}

#[cfg(test)]
mod tests {
    use super::{DetectionMode, DimSettings, SettingsHandle};
    use std::time::Duration;

    #[test]
    fn serde_roundtrip_dim_settings() {
        let settings = DimSettings::default();
        let json = serde_json::to_string(&settings).expect("serialize settings");
        let decoded: DimSettings = serde_json::from_str(&json).expect("deserialize settings");
        assert_eq!(decoded, settings);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let decoded: DimSettings = serde_json::from_value(serde_json::json!({
            "detection_mode": "whole_window",
            "base_dim_level": 0.4
        }))
        .expect("deserialize partial settings");

        assert_eq!(decoded.detection_mode, DetectionMode::WholeWindow);
        assert_eq!(decoded.base_dim_level, 0.4);
        assert_eq!(decoded.brightness_threshold, 0.85);
        assert_eq!(decoded.scan_interval(), Duration::from_secs(2));
        assert!(decoded.differentiate_active);
    }

    #[test]
    fn sanitize_clamps_scan_interval_and_levels() {
        let mut settings = DimSettings {
            scan_interval_secs: 0.1,
            max_dim_level: 0.5,
            base_dim_level: 0.9,
            region_grid_size: 1000,
            ..DimSettings::default()
        };

        assert!(settings.sanitize());
        assert_eq!(settings.scan_interval_secs, 0.5);
        assert_eq!(settings.base_dim_level, 0.5);
        assert_eq!(settings.region_grid_size, 128);
        assert!(!settings.sanitize());
    }

    #[test]
    fn non_finite_values_are_replaced() {
        let mut settings = DimSettings {
            decay_rate: f64::NAN,
            ..DimSettings::default()
        };
        assert!(settings.sanitize());
        assert_eq!(settings.decay_rate, 0.0);
    }

    #[test]
    fn handle_snapshot_reflects_pushed_settings() {
        let handle = SettingsHandle::default();
        handle.update(|s| s.scan_interval_secs = 9.0);
        assert_eq!(handle.snapshot().scan_interval_secs, 5.0);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let loaded = DimSettings::load(&dir.path().join("absent.json")).expect("load defaults");
        assert_eq!(loaded, DimSettings::default());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("settings.json");
        let settings = DimSettings {
            decay_enabled: true,
            max_pool_size: 8,
            ..DimSettings::default()
        };
        settings.save(&path).expect("save settings");
        assert_eq!(DimSettings::load(&path).expect("load settings"), settings);
    }
}
