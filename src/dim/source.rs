//! Seams to the collaborators that live outside the dimming core: window
//! enumeration, pixel capture and brightness analysis.

use crate::dim::geometry::Rect;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raster snapshot of a window. Pixel space, not points.
pub type Bitmap = image::RgbaImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window#{}", self.0)
    }
}

/// Per-cycle snapshot of a visible window. Read only.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedWindow {
    pub id: WindowId,
    pub owner_pid: u32,
    pub bounds: Rect,
    pub is_frontmost: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayInfo {
    pub id: u32,
    pub bounds: Rect,
}

/// A bright sub-area. `rect` is relative to the analysed bitmap or window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrightRegion {
    pub rect: Rect,
    pub brightness: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionParams {
    pub threshold: f64,
    pub grid_size: u32,
    pub min_size: f64,
}

pub trait WindowSource: Send + Sync {
    fn list_visible_windows(&self) -> Vec<TrackedWindow>;

    fn frontmost_window_id(&self) -> Option<WindowId>;

    fn list_displays(&self) -> Vec<DisplayInfo> {
        Vec::new()
    }

    /// `None` when permission is missing or the window vanished.
    fn capture_window(&self, id: WindowId) -> Option<Bitmap>;

    /// Whether a window missing from `list_visible_windows` still exists,
    /// for example minimised or on another virtual desktop. Sources that
    /// cannot tell report every unlisted window as closed.
    fn window_exists(&self, _id: WindowId) -> bool {
        false
    }
}

pub trait BrightnessAnalyzer: Send + Sync {
    /// Mean luminance in `[0, 1]`.
    fn average_luminance(&self, bitmap: &Bitmap) -> f64;

    /// Bright regions in bitmap pixel coordinates.
    fn detect_bright_regions(&self, bitmap: &Bitmap, params: &RegionParams) -> Vec<BrightRegion>;
}
