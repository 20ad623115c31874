//! The window-system side of an overlay. Everything here is called on the
//! owner thread only.

use crate::dim::geometry::Rect;
use crate::dim::source::WindowId;
use crate::dim::surface::SurfaceId;
use anyhow::anyhow;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZPlacement {
    /// Floating band above ordinary windows.
    Elevated,
    /// Ordinary band, directly above the given window.
    AboveWindow(WindowId),
}

pub trait Compositor {
    /// Creates a transparent, click-through, capture-excluded surface.
    fn create_surface(&mut self, id: SurfaceId, frame: Rect, z: ZPlacement) -> anyhow::Result<()>;

    fn set_frame(&mut self, id: SurfaceId, frame: Rect);

    fn animate_level(&mut self, id: SurfaceId, from: f64, to: f64, duration: Duration);

    /// Shows the surface at the given position in the stacking order.
    fn order(&mut self, id: SurfaceId, z: ZPlacement);

    fn order_out(&mut self, id: SurfaceId);

    fn destroy_surface(&mut self, id: SurfaceId);

    /// Drains pending window-system events. Called from the owner idle hook.
    fn pump(&mut self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompositorOp {
    Create {
        id: SurfaceId,
        frame: Rect,
        z: ZPlacement,
    },
    SetFrame {
        id: SurfaceId,
        frame: Rect,
    },
    AnimateLevel {
        id: SurfaceId,
        from: f64,
        to: f64,
    },
    Order {
        id: SurfaceId,
        z: ZPlacement,
    },
    OrderOut {
        id: SurfaceId,
    },
    Destroy {
        id: SurfaceId,
    },
}

impl CompositorOp {
    pub fn surface(&self) -> SurfaceId {
        match *self {
            CompositorOp::Create { id, .. }
            | CompositorOp::SetFrame { id, .. }
            | CompositorOp::AnimateLevel { id, .. }
            | CompositorOp::Order { id, .. }
            | CompositorOp::OrderOut { id }
            | CompositorOp::Destroy { id } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedSurface {
    pub frame: Rect,
    pub level: f64,
    pub z: ZPlacement,
    pub ordered_in: bool,
}

/// In-memory compositor that logs every call. Used by tests, benches and on
/// platforms without a native backend.
#[derive(Debug, Default)]
pub struct RecordingCompositor {
    ops: Vec<CompositorOp>,
    surfaces: HashMap<SurfaceId, RecordedSurface>,
    fail_creates: bool,
    pumps: u64,
}

impl RecordingCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `create_surface` fail.
    pub fn fail_creates(&mut self, fail: bool) {
        self.fail_creates = fail;
    }

    pub fn ops(&self) -> &[CompositorOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<CompositorOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn mutation_count(&self) -> usize {
        self.ops.len()
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&RecordedSurface> {
        self.surfaces.get(&id)
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    pub fn ordered_in(&self) -> HashSet<SurfaceId> {
        self.surfaces
            .iter()
            .filter(|(_, s)| s.ordered_in)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn pumps(&self) -> u64 {
        self.pumps
    }
}

impl Compositor for RecordingCompositor {
    fn create_surface(&mut self, id: SurfaceId, frame: Rect, z: ZPlacement) -> anyhow::Result<()> {
        if self.fail_creates {
            return Err(anyhow!("surface creation disabled for {id}"));
        }
        self.ops.push(CompositorOp::Create { id, frame, z });
        self.surfaces.insert(
            id,
            RecordedSurface {
                frame,
                level: 0.0,
                z,
                ordered_in: true,
            },
        );
        Ok(())
    }

    fn set_frame(&mut self, id: SurfaceId, frame: Rect) {
        self.ops.push(CompositorOp::SetFrame { id, frame });
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.frame = frame;
        }
    }

    fn animate_level(&mut self, id: SurfaceId, from: f64, to: f64, _duration: Duration) {
        self.ops.push(CompositorOp::AnimateLevel { id, from, to });
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.level = to;
        }
    }

    fn order(&mut self, id: SurfaceId, z: ZPlacement) {
        self.ops.push(CompositorOp::Order { id, z });
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.z = z;
            surface.ordered_in = true;
        }
    }

    fn order_out(&mut self, id: SurfaceId) {
        self.ops.push(CompositorOp::OrderOut { id });
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.ordered_in = false;
        }
    }

    fn destroy_surface(&mut self, id: SurfaceId) {
        self.ops.push(CompositorOp::Destroy { id });
        self.surfaces.remove(&id);
    }

    fn pump(&mut self) {
        self.pumps += 1;
    }
}
