//! Overlay lifecycle and dimming coordination.
//!
//! Windows are listed and captured through a [`WindowSource`], analysed by a
//! [`BrightnessAnalyzer`], turned into a [`DecisionBatch`] and reconciled into
//! four pools of overlay surfaces by the [`OverlayManager`]. The
//! [`Coordinator`] drives that loop and keeps every surface mutation on a
//! single owner thread.

pub mod analysis;
pub mod arena;
pub mod cache;
pub mod compositor;
pub mod debounce;
pub mod decay;
pub mod decision;
pub mod error;
pub mod geometry;
pub mod manager;
pub mod owner;
#[cfg(windows)]
pub mod platform;
pub mod pool;
pub mod scheduler;
pub mod source;
pub mod surface;

pub use analysis::GridAnalyzer;
pub use compositor::{Compositor, CompositorOp, RecordingCompositor, ZPlacement};
pub use decision::{DecisionBatch, DecisionEngine, DimDecision};
pub use error::DimFault;
pub use geometry::Rect;
pub use manager::{ApplyReport, ManagerTuning, OverlayManager};
pub use scheduler::{
    CoordinatorConfig, Coordinator, CycleOutcome, CycleTrigger, DimContext, DimLifecycle,
    StartOutcome,
};
pub use source::{BrightnessAnalyzer, TrackedWindow, WindowId, WindowSource};
pub use surface::{PoolKind, SurfaceId, SurfaceState, TargetKey, ZPolicy};
