#![allow(dead_code)]

use image::{Rgba, RgbaImage};
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use super_dimmer::dim::analysis::luminance;
use super_dimmer::dim::geometry::Rect;
use super_dimmer::dim::source::{
    Bitmap, BrightRegion, BrightnessAnalyzer, DisplayInfo, RegionParams, TrackedWindow, WindowId,
    WindowSource,
};

pub const BRIGHT: u8 = 250;
pub const DARK: u8 = 60;

/// Capture scale: bitmaps are a tenth of the window size.
const CAPTURE_DIVISOR: f64 = 10.0;

#[derive(Default)]
struct Desktop {
    windows: Vec<(WindowId, Rect, u8)>,
    frontmost: Option<WindowId>,
    failing: HashSet<WindowId>,
    minimized: HashSet<WindowId>,
    displays: Vec<DisplayInfo>,
}

#[derive(Default)]
struct Gate {
    closed: bool,
    blocked: usize,
}

/// Scriptable window source. Captures can be held at a gate so a test can
/// observe a cycle while it is in flight.
#[derive(Default)]
pub struct FakeDesktop {
    desktop: Mutex<Desktop>,
    captures: Mutex<HashMap<WindowId, usize>>,
    capture_threads: Mutex<HashSet<String>>,
    gate: Mutex<Gate>,
    gate_changed: Condvar,
}

impl FakeDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_window(&self, id: u64, bounds: Rect, shade: u8) {
        let mut desktop = self.desktop.lock().unwrap();
        desktop.windows.push((WindowId(id), bounds, shade));
    }

    pub fn remove_window(&self, id: u64) {
        let mut desktop = self.desktop.lock().unwrap();
        desktop.windows.retain(|(w, _, _)| *w != WindowId(id));
        if desktop.frontmost == Some(WindowId(id)) {
            desktop.frontmost = None;
        }
    }

    pub fn move_window(&self, id: u64, bounds: Rect) {
        let mut desktop = self.desktop.lock().unwrap();
        for window in desktop.windows.iter_mut() {
            if window.0 == WindowId(id) {
                window.1 = bounds;
            }
        }
    }

    pub fn set_shade(&self, id: u64, shade: u8) {
        let mut desktop = self.desktop.lock().unwrap();
        for window in desktop.windows.iter_mut() {
            if window.0 == WindowId(id) {
                window.2 = shade;
            }
        }
    }

    /// Keeps the window alive but drops it from the visible list.
    pub fn minimize(&self, id: u64) {
        self.desktop.lock().unwrap().minimized.insert(WindowId(id));
    }

    pub fn restore(&self, id: u64) {
        self.desktop.lock().unwrap().minimized.remove(&WindowId(id));
    }

    pub fn set_frontmost(&self, id: Option<u64>) {
        self.desktop.lock().unwrap().frontmost = id.map(WindowId);
    }

    pub fn add_display(&self, id: u32, bounds: Rect) {
        self.desktop
            .lock()
            .unwrap()
            .displays
            .push(DisplayInfo { id, bounds });
    }

    pub fn fail_capture(&self, id: u64, fail: bool) {
        let mut desktop = self.desktop.lock().unwrap();
        if fail {
            desktop.failing.insert(WindowId(id));
        } else {
            desktop.failing.remove(&WindowId(id));
        }
    }

    pub fn captures(&self, id: u64) -> usize {
        self.captures
            .lock()
            .unwrap()
            .get(&WindowId(id))
            .copied()
            .unwrap_or(0)
    }

    /// Names of the threads captures ran on.
    pub fn capture_threads(&self) -> HashSet<String> {
        self.capture_threads.lock().unwrap().clone()
    }

    pub fn close_gate(&self) {
        self.gate.lock().unwrap().closed = true;
    }

    pub fn open_gate(&self) {
        self.gate.lock().unwrap().closed = false;
        self.gate_changed.notify_all();
    }

    /// Waits until some capture is parked at the closed gate.
    pub fn wait_for_blocked_capture(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = self.gate.lock().unwrap();
        while gate.blocked == 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return false;
            }
            gate = self.gate_changed.wait_timeout(gate, left).unwrap().0;
        }
        true
    }

    fn pass_gate(&self) {
        let mut gate = self.gate.lock().unwrap();
        if !gate.closed {
            return;
        }
        gate.blocked += 1;
        self.gate_changed.notify_all();
        while gate.closed {
            gate = self.gate_changed.wait(gate).unwrap();
        }
        gate.blocked -= 1;
    }
}

impl WindowSource for FakeDesktop {
    fn list_visible_windows(&self) -> Vec<TrackedWindow> {
        let desktop = self.desktop.lock().unwrap();
        desktop
            .windows
            .iter()
            .filter(|(id, _, _)| !desktop.minimized.contains(id))
            .map(|(id, bounds, _)| TrackedWindow {
                id: *id,
                owner_pid: 1000 + id.0 as u32,
                bounds: *bounds,
                is_frontmost: desktop.frontmost == Some(*id),
            })
            .collect()
    }

    fn frontmost_window_id(&self) -> Option<WindowId> {
        self.desktop.lock().unwrap().frontmost
    }

    fn list_displays(&self) -> Vec<DisplayInfo> {
        self.desktop.lock().unwrap().displays.clone()
    }

    fn capture_window(&self, id: WindowId) -> Option<Bitmap> {
        let (bounds, shade) = {
            let desktop = self.desktop.lock().unwrap();
            if desktop.failing.contains(&id) {
                return None;
            }
            let (_, bounds, shade) = desktop.windows.iter().find(|(w, _, _)| *w == id)?;
            (*bounds, *shade)
        };
        *self.captures.lock().unwrap().entry(id).or_insert(0) += 1;
        let thread = std::thread::current().name().unwrap_or("unnamed").to_string();
        self.capture_threads.lock().unwrap().insert(thread);
        self.pass_gate();

        let width = (bounds.width / CAPTURE_DIVISOR).max(1.0) as u32;
        let height = (bounds.height / CAPTURE_DIVISOR).max(1.0) as u32;
        Some(RgbaImage::from_pixel(
            width,
            height,
            Rgba([shade, shade, shade, 255]),
        ))
    }

    fn window_exists(&self, id: WindowId) -> bool {
        let desktop = self.desktop.lock().unwrap();
        desktop.windows.iter().any(|(w, _, _)| *w == id)
    }
}

/// Treats every bitmap as uniformly shaded: one bright region covering the
/// whole bitmap when it clears the threshold.
#[derive(Debug, Default)]
pub struct FlatAnalyzer;

impl BrightnessAnalyzer for FlatAnalyzer {
    fn average_luminance(&self, bitmap: &Bitmap) -> f64 {
        bitmap.pixels().next().map(luminance).unwrap_or(0.0)
    }

    fn detect_bright_regions(&self, bitmap: &Bitmap, params: &RegionParams) -> Vec<BrightRegion> {
        let brightness = self.average_luminance(bitmap);
        if brightness <= params.threshold {
            return Vec::new();
        }
        vec![BrightRegion {
            rect: Rect::new(
                0.0,
                0.0,
                f64::from(bitmap.width()),
                f64::from(bitmap.height()),
            ),
            brightness,
        }]
    }
}

pub fn window_rect(index: u64) -> Rect {
    Rect::new(100.0 + index as f64 * 500.0, 100.0, 400.0, 300.0)
}

pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}
