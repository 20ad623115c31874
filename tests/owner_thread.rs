mod common;

use common::wait_until;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use super_dimmer::dim::compositor::RecordingCompositor;
use super_dimmer::dim::decision::{DecisionBatch, DimDecision};
use super_dimmer::dim::geometry::Rect;
use super_dimmer::dim::manager::{ManagerTuning, OverlayManager};
use super_dimmer::dim::owner::OwnerThread;
use super_dimmer::dim::source::WindowId;
use super_dimmer::dim::surface::TargetKey;

type ManagerThread = OwnerThread<OverlayManager<RecordingCompositor>>;

fn spawn_manager(tuning: ManagerTuning) -> Arc<ManagerThread> {
    Arc::new(
        OwnerThread::spawn("manager-owner", Duration::from_millis(20), move || {
            Ok(OverlayManager::new(RecordingCompositor::new(), tuning))
        })
        .unwrap(),
    )
}

fn window_batch(windows: &[u64]) -> DecisionBatch {
    DecisionBatch {
        windows: windows
            .iter()
            .map(|w| DimDecision {
                key: TargetKey::Window(WindowId(*w)),
                rect: Rect::new(*w as f64 * 300.0, 0.0, 250.0, 200.0),
                level: 0.3,
                is_frontmost: false,
                brightness: 0.95,
            })
            .collect(),
        live_windows: windows.iter().copied().map(WindowId).collect(),
        ..DecisionBatch::default()
    }
}

#[test]
fn idle_hook_pumps_and_reaps_closed_overlays() {
    let owner = spawn_manager(ManagerTuning {
        animation: Duration::ZERO,
        close_grace: Duration::from_millis(50),
        ..ManagerTuning::default()
    });

    let created = owner
        .run_or_post(|m| m.apply_batch(&window_batch(&[1, 2]), Instant::now()).created)
        .unwrap();
    assert_eq!(created, 2);
    let closed = owner
        .run_or_post(|m| m.apply_batch(&window_batch(&[1]), Instant::now()).closed)
        .unwrap();
    assert_eq!(closed, 1);

    assert!(wait_until(Duration::from_secs(2), || {
        owner.run_or_post(|m| m.closing_count()) == Some(0)
    }));
    let (destroyed, live, pumps) = owner
        .run_or_post(|m| {
            (
                m.stats().destroyed,
                m.compositor().live_surfaces(),
                m.compositor().pumps(),
            )
        })
        .unwrap();
    assert_eq!(destroyed, 1);
    assert_eq!(live, 1);
    assert!(pumps > 0);
}

#[test]
fn concurrent_callers_are_serialised_on_the_owner() {
    let owner = spawn_manager(ManagerTuning::default());
    let workers: Vec<_> = (0..4u64)
        .map(|n| {
            let owner = Arc::clone(&owner);
            thread::spawn(move || {
                for _ in 0..25 {
                    owner.run_or_post(move |m| {
                        let mut batch = window_batch(&[1, 2, 3, 4]);
                        batch.windows.truncate(n as usize + 1);
                        m.apply_batch(&batch, Instant::now())
                    });
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let (open, created) = owner
        .run_or_post(|m| (m.open_count(), m.stats().created))
        .unwrap();
    assert_eq!(open, 4);
    assert_eq!(created, 4);
    assert_eq!(owner.stats().panics, 0);
}

#[test]
fn nested_dispatch_from_the_owner_is_deferred() {
    let owner = spawn_manager(ManagerTuning::default());
    let inner = Arc::clone(&owner);
    let nested = owner
        .run_or_post(move |m| {
            m.apply_batch(&window_batch(&[1]), Instant::now());
            inner.run_or_post(|m| m.hide_all(Instant::now()))
        })
        .unwrap();
    assert_eq!(nested, None);
    assert!(owner.stats().reentrant >= 1);
    // the deferred hide_all ran after the outer job
    assert!(wait_until(Duration::from_secs(1), || {
        owner.run_or_post(|m| m.live_count()) == Some(0)
    }));
}
