use crate::dim::source::WindowId;
use crate::dim::surface::{SurfaceId, SurfaceState};

/// Faults the dimming core absorbs. None of them reach a caller as a
/// failure: each degrades to "no visual change this cycle".
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DimFault {
    #[error("capture unavailable for {window}")]
    CaptureUnavailable { window: WindowId },
    #[error("{surface} is {state:?} and no longer accepts mutation")]
    StaleTarget {
        surface: SurfaceId,
        state: SurfaceState,
    },
    #[error("owner-thread operation re-entered while the owner state was borrowed")]
    ReentrantDispatch,
    #[error("analysis cycle still in flight; new cycle dropped")]
    OverlappingCycle,
    #[error("owner thread is not running")]
    OwnerUnavailable,
    #[error("{surface} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        surface: SurfaceId,
        from: SurfaceState,
        to: SurfaceState,
    },
}

impl DimFault {
    /// Logs the fault for diagnostics.
    pub fn record(&self) {
        match self {
            DimFault::InvalidTransition { .. } | DimFault::OwnerUnavailable => {
                tracing::warn!(fault = %self, "dimming fault");
            }
            _ => tracing::debug!(fault = %self, "dimming fault"),
        }
    }
}
