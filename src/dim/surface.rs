use crate::dim::error::DimFault;
use crate::dim::geometry::Rect;
use crate::dim::source::WindowId;
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Display,
    Window,
    Region,
    Decay,
}

impl PoolKind {
    pub const ALL: [PoolKind; 4] = [
        PoolKind::Display,
        PoolKind::Window,
        PoolKind::Region,
        PoolKind::Decay,
    ];

    pub fn index(self) -> usize {
        match self {
            PoolKind::Display => 0,
            PoolKind::Window => 1,
            PoolKind::Region => 2,
            PoolKind::Decay => 3,
        }
    }
}

/// What an overlay covers. Unique within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKey {
    Display(u32),
    Window(WindowId),
    Region(WindowId, usize),
    Decay(WindowId),
}

impl TargetKey {
    pub fn pool(&self) -> PoolKind {
        match self {
            TargetKey::Display(_) => PoolKind::Display,
            TargetKey::Window(_) => PoolKind::Window,
            TargetKey::Region(..) => PoolKind::Region,
            TargetKey::Decay(_) => PoolKind::Decay,
        }
    }

    /// The window whose lifetime bounds this target. Displays have none.
    pub fn owner(&self) -> Option<WindowId> {
        match *self {
            TargetKey::Display(_) => None,
            TargetKey::Window(id) | TargetKey::Region(id, _) | TargetKey::Decay(id) => Some(id),
        }
    }
}

/// Stable identity of a surface for its whole life, independent of the
/// arena slot it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZPolicy {
    /// Always-on-top band. Only the frontmost window's overlays use it.
    Elevated,
    /// Directly above the owning window.
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Absent,
    Creating,
    Visible,
    Hidden,
    Closing,
    Destroyed,
}

impl SurfaceState {
    pub fn accepts_mutation(self) -> bool {
        matches!(self, Self::Creating | Self::Visible | Self::Hidden)
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::Visible | Self::Hidden)
    }
}

pub fn can_transition(from: SurfaceState, to: SurfaceState) -> bool {
    matches!(
        (from, to),
        (SurfaceState::Absent, SurfaceState::Creating)
            | (SurfaceState::Creating, SurfaceState::Visible)
            | (SurfaceState::Creating, SurfaceState::Destroyed)
            | (SurfaceState::Visible, SurfaceState::Hidden)
            | (SurfaceState::Hidden, SurfaceState::Visible)
            | (SurfaceState::Visible, SurfaceState::Closing)
            | (SurfaceState::Hidden, SurfaceState::Closing)
            | (SurfaceState::Closing, SurfaceState::Destroyed)
    ) || from == to
}

/// Book-keeping for one overlay. Mutators refuse to touch a surface that is
/// closing or destroyed.
#[derive(Debug, Clone)]
pub struct OverlaySurface {
    id: SurfaceId,
    key: TargetKey,
    rect: Rect,
    level: f64,
    brightness: f64,
    z_policy: ZPolicy,
    state: SurfaceState,
    transition_until: Option<Instant>,
    closing_since: Option<Instant>,
    parked: bool,
}

impl OverlaySurface {
    pub fn new(id: SurfaceId, key: TargetKey, rect: Rect, z_policy: ZPolicy) -> Self {
        Self {
            id,
            key,
            rect,
            level: 0.0,
            brightness: 0.0,
            z_policy,
            state: SurfaceState::Absent,
            transition_until: None,
            closing_since: None,
            parked: false,
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn key(&self) -> TargetKey {
        self.key
    }

    pub fn pool(&self) -> PoolKind {
        self.key.pool()
    }

    pub fn owner(&self) -> Option<WindowId> {
        self.key.owner()
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Last decided level. A hidden surface keeps it so it can come back.
    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn brightness(&self) -> f64 {
        self.brightness
    }

    pub fn z_policy(&self) -> ZPolicy {
        self.z_policy
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn closing_since(&self) -> Option<Instant> {
        self.closing_since
    }

    pub fn is_parked(&self) -> bool {
        self.parked
    }

    pub fn transition_pending(&self, now: Instant) -> bool {
        self.transition_until.is_some_and(|until| now < until)
    }

    pub fn transition(&mut self, next: SurfaceState) -> Result<(), DimFault> {
        if !can_transition(self.state, next) {
            return Err(DimFault::InvalidTransition {
                surface: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    fn guard(&self) -> Result<(), DimFault> {
        if self.state.accepts_mutation() {
            Ok(())
        } else {
            Err(DimFault::StaleTarget {
                surface: self.id,
                state: self.state,
            })
        }
    }

    pub fn rebind(&mut self, key: TargetKey) -> Result<(), DimFault> {
        self.guard()?;
        self.key = key;
        Ok(())
    }

    pub fn set_rect(&mut self, rect: Rect) -> Result<(), DimFault> {
        self.guard()?;
        self.rect = rect;
        Ok(())
    }

    pub fn set_level(&mut self, level: f64, brightness: f64) -> Result<(), DimFault> {
        self.guard()?;
        self.level = level;
        self.brightness = brightness;
        Ok(())
    }

    pub fn set_z_policy(&mut self, z_policy: ZPolicy) -> Result<(), DimFault> {
        self.guard()?;
        self.z_policy = z_policy;
        Ok(())
    }

    pub fn set_parked(&mut self, parked: bool) -> Result<(), DimFault> {
        self.guard()?;
        self.parked = parked;
        Ok(())
    }

    pub fn begin_transition(&mut self, until: Instant) -> Result<(), DimFault> {
        self.guard()?;
        self.transition_until = Some(until);
        Ok(())
    }

    /// Clears a finished transition. Allowed in any state so closing
    /// surfaces can settle before destruction.
    pub fn settle(&mut self, now: Instant) -> bool {
        match self.transition_until {
            Some(until) if now >= until => {
                self.transition_until = None;
                true
            }
            _ => false,
        }
    }

    pub fn begin_close(&mut self, now: Instant) -> Result<(), DimFault> {
        self.transition(SurfaceState::Closing)?;
        self.closing_since = Some(now);
        self.parked = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        can_transition, OverlaySurface, SurfaceId, SurfaceState, TargetKey, ZPolicy,
    };
    use crate::dim::error::DimFault;
    use crate::dim::geometry::Rect;
    use crate::dim::source::WindowId;
    use std::time::{Duration, Instant};

    fn surface() -> OverlaySurface {
        OverlaySurface::new(
            SurfaceId(1),
            TargetKey::Window(WindowId(3)),
            Rect::new(0.0, 0.0, 10.0, 10.0),
            ZPolicy::Normal,
        )
    }

    #[test]
    fn state_machine_rejects_invalid_transitions() {
        let cases = [
            (SurfaceState::Absent, SurfaceState::Visible),
            (SurfaceState::Hidden, SurfaceState::Destroyed),
            (SurfaceState::Visible, SurfaceState::Destroyed),
            (SurfaceState::Closing, SurfaceState::Visible),
            (SurfaceState::Closing, SurfaceState::Hidden),
            (SurfaceState::Destroyed, SurfaceState::Creating),
        ];

        for (from, to) in cases {
            assert!(
                !can_transition(from, to),
                "unexpected transition {from:?} -> {to:?}"
            );
        }
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut s = surface();
        s.transition(SurfaceState::Creating).expect("create");
        s.transition(SurfaceState::Visible).expect("show");
        s.transition(SurfaceState::Hidden).expect("hide");
        s.transition(SurfaceState::Visible).expect("reshow");
        s.begin_close(Instant::now()).expect("close");
        s.transition(SurfaceState::Destroyed).expect("destroy");
    }

    #[test]
    fn closing_surface_refuses_every_mutation() {
        let mut s = surface();
        s.transition(SurfaceState::Creating).expect("create");
        s.transition(SurfaceState::Visible).expect("show");
        s.begin_close(Instant::now()).expect("close");

        assert!(matches!(
            s.set_level(0.5, 0.9),
            Err(DimFault::StaleTarget { .. })
        ));
        assert!(s.set_rect(Rect::new(1.0, 1.0, 1.0, 1.0)).is_err());
        assert!(s.set_z_policy(ZPolicy::Elevated).is_err());
        assert!(s.rebind(TargetKey::Decay(WindowId(3))).is_err());
        assert_eq!(s.level(), 0.0);
        assert_eq!(s.rect(), Rect::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn transition_pending_until_deadline() {
        let now = Instant::now();
        let mut s = surface();
        s.transition(SurfaceState::Creating).expect("create");
        s.begin_transition(now + Duration::from_millis(250))
            .expect("animate");
        assert!(s.transition_pending(now));
        assert!(!s.settle(now));
        assert!(s.settle(now + Duration::from_millis(250)));
        assert!(!s.transition_pending(now + Duration::from_millis(250)));
    }
}
