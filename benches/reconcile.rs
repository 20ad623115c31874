use criterion::{criterion_group, criterion_main, Criterion};
use std::time::Instant;
use super_dimmer::dim::{
    compositor::RecordingCompositor,
    decision::{DecisionBatch, DimDecision},
    geometry::Rect,
    manager::{ManagerTuning, OverlayManager},
    source::WindowId,
    surface::TargetKey,
};

fn region_batch(windows: u64, regions: usize, shift: f64) -> DecisionBatch {
    let mut batch = DecisionBatch {
        frontmost: Some(WindowId(0)),
        live_windows: (0..windows).map(WindowId).collect(),
        ..DecisionBatch::default()
    };
    for w in 0..windows {
        for r in 0..regions {
            batch.regions.push(DimDecision {
                key: TargetKey::Region(WindowId(w), r),
                rect: Rect::new(w as f64 * 100.0 + shift, r as f64 * 40.0, 80.0, 30.0),
                level: 0.3,
                is_frontmost: w == 0,
                brightness: 0.95,
            });
        }
    }
    batch
}

fn bench_reconcile(c: &mut Criterion) {
    let tuning = ManagerTuning {
        max_pool_size: 10_000,
        ..ManagerTuning::default()
    };

    let steady = region_batch(40, 8, 0.0);
    let mut manager = OverlayManager::new(RecordingCompositor::new(), tuning);
    manager.apply_batch(&steady, Instant::now());
    c.bench_function("reconcile_steady_320", |b| {
        b.iter(|| manager.apply_batch(&steady, Instant::now()))
    });

    let moved = region_batch(40, 8, 10.0);
    let mut manager = OverlayManager::new(RecordingCompositor::new(), tuning);
    let mut flip = false;
    c.bench_function("reconcile_moving_320", |b| {
        b.iter(|| {
            flip = !flip;
            let batch = if flip { &moved } else { &steady };
            let report = manager.apply_batch(batch, Instant::now());
            manager.compositor_mut().take_ops();
            report
        })
    });
}

criterion_group!(benches, bench_reconcile);
criterion_main!(benches);
