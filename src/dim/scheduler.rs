use crate::dim::cache::{AnalysisCache, AnalysisResult, CacheStats};
use crate::dim::compositor::Compositor;
use crate::dim::debounce::EventDebouncer;
use crate::dim::decay::DecayTracker;
use crate::dim::decision::{DecisionBatch, DecisionEngine, DecisionInput};
use crate::dim::error::DimFault;
use crate::dim::manager::{ApplyReport, ManagerTuning, OverlayManager};
use crate::dim::owner::OwnerThread;
use crate::dim::source::{BrightRegion, BrightnessAnalyzer, TrackedWindow, WindowId, WindowSource};
use crate::settings::{DimSettings, SettingsHandle};
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const OWNER_IDLE_INTERVAL: Duration = Duration::from_millis(100);
const TRIGGER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything the dimming core consumes from outside.
#[derive(Clone)]
pub struct DimContext {
    pub source: Arc<dyn WindowSource>,
    pub analyzer: Arc<dyn BrightnessAnalyzer>,
    pub settings: SettingsHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimLifecycle {
    Idle,
    Running,
    Stopped,
    ShutDown,
}

pub fn can_transition(from: DimLifecycle, to: DimLifecycle) -> bool {
    matches!(
        (from, to),
        (DimLifecycle::Idle, DimLifecycle::Running)
            | (DimLifecycle::Running, DimLifecycle::Stopped)
            | (DimLifecycle::Stopped, DimLifecycle::Running)
            | (DimLifecycle::Idle, DimLifecycle::ShutDown)
            | (DimLifecycle::Running, DimLifecycle::ShutDown)
            | (DimLifecycle::Stopped, DimLifecycle::ShutDown)
    ) || from == to
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// First start; the initial cycle has been applied.
    Started,
    /// Surfaces parked by `stop` were revealed.
    Resumed,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    Periodic,
    Event,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Applied(ApplyReport),
    /// Another cycle was still in flight.
    SkippedOverlap,
    /// The run epoch changed while the cycle was computing.
    Dropped,
    NotRunning,
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Run full cycles on the scan interval. Pointer events are always
    /// handled.
    pub periodic: bool,
    pub owner_idle: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            periodic: true,
            owner_idle: OWNER_IDLE_INTERVAL,
        }
    }
}

#[derive(Debug, Default)]
struct CycleCounters {
    completed: AtomicU64,
    skipped_overlap: AtomicU64,
    dropped_stale: AtomicU64,
    capture_failures: AtomicU64,
    analyses: AtomicU64,
    pointer_events: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub completed: u64,
    pub skipped_overlap: u64,
    pub dropped_stale: u64,
    pub capture_failures: u64,
    pub analyses: u64,
    pub pointer_events: u64,
    pub cache: CacheStats,
}

#[derive(Debug, Default)]
struct Pipeline {
    cache: AnalysisCache,
    decay: DecayTracker,
}

struct Shared<C: Compositor + 'static> {
    ctx: DimContext,
    owner: OwnerThread<OverlayManager<C>>,
    lifecycle: Mutex<DimLifecycle>,
    epoch: AtomicU64,
    in_flight: AtomicBool,
    pipeline: Mutex<Pipeline>,
    counters: CycleCounters,
}

/// Holds the in-flight flag for one cycle and clears it on drop.
struct CycleClaim<C: Compositor + 'static> {
    shared: Arc<Shared<C>>,
}

impl<C: Compositor + 'static> Drop for CycleClaim<C> {
    fn drop(&mut self) {
        self.shared.in_flight.store(false, Ordering::Release);
    }
}

/// One claimed cycle for the analysis worker. `reply` gets the outcome once
/// the claim has been released.
struct CycleJob<C: Compositor + 'static> {
    trigger: CycleTrigger,
    claim: CycleClaim<C>,
    reply: Option<SyncSender<CycleOutcome>>,
}

enum SchedulerMessage {
    PointerPress(Instant),
    Halt,
}

struct TriggerThreads<C: Compositor + 'static> {
    tx: Option<Sender<SchedulerMessage>>,
    work: Option<Sender<CycleJob<C>>>,
    handles: Vec<JoinHandle<()>>,
}

impl<C: Compositor + 'static> Default for TriggerThreads<C> {
    fn default() -> Self {
        Self {
            tx: None,
            work: None,
            handles: Vec::new(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("dimming state lock poisoned; continuing with inner value");
            poisoned.into_inner()
        }
    }
}

impl<C: Compositor + 'static> Shared<C> {
    fn lifecycle(&self) -> DimLifecycle {
        *lock(&self.lifecycle)
    }

    fn try_claim(self: &Arc<Self>) -> Option<CycleClaim<C>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleClaim {
                shared: Arc::clone(self),
            })
    }

    fn note_overlap(&self) {
        self.counters.skipped_overlap.fetch_add(1, Ordering::Relaxed);
        DimFault::OverlappingCycle.record();
    }

    fn frontmost(&self, windows: &[TrackedWindow]) -> Option<WindowId> {
        windows
            .iter()
            .find(|w| w.is_frontmost)
            .map(|w| w.id)
            .or_else(|| self.ctx.source.frontmost_window_id())
    }

    /// Captures and analyses one window. Region rectangles come back in
    /// window coordinates.
    fn analyze(
        &self,
        window: &TrackedWindow,
        settings: &DimSettings,
        now: Instant,
    ) -> Option<AnalysisResult> {
        let bitmap = self.ctx.source.capture_window(window.id)?;
        if bitmap.width() == 0 || bitmap.height() == 0 {
            return None;
        }
        self.counters.analyses.fetch_add(1, Ordering::Relaxed);

        let sx = window.bounds.width / f64::from(bitmap.width());
        let sy = window.bounds.height / f64::from(bitmap.height());
        let mut params = settings.region_params();
        if sx > 0.0 {
            params.min_size /= sx;
        }

        let average = self.ctx.analyzer.average_luminance(&bitmap);
        let regions = self
            .ctx
            .analyzer
            .detect_bright_regions(&bitmap, &params)
            .into_iter()
            .map(|region| BrightRegion {
                rect: region.rect.scale(sx, sy),
                brightness: region.brightness,
            })
            .collect();
        Some(AnalysisResult::new(
            average,
            regions,
            &window.bounds,
            window.is_frontmost,
            now,
        ))
    }

    fn compute_batch(&self, settings: &DimSettings, epoch: u64, now: Instant) -> DecisionBatch {
        let mut windows = self.ctx.source.list_visible_windows();
        let frontmost = self.frontmost(&windows);
        for window in &mut windows {
            window.is_frontmost = Some(window.id) == frontmost;
        }
        let displays = if settings.display_dimming_enabled {
            self.ctx.source.list_displays()
        } else {
            Vec::new()
        };

        let mut analyses = HashMap::new();
        let mut stale = Vec::new();
        let live = {
            let mut pipeline = lock(&self.pipeline);
            pipeline.cache.set_ttl(settings.cache_ttl());
            let live = self.live_windows(&windows, &pipeline.decay);
            pipeline.cache.evict_missing(&live);
            pipeline.decay.observe(&windows, &live, now);
            if settings.dimming_enabled {
                for window in &windows {
                    match pipeline
                        .cache
                        .lookup(window.id, &window.bounds, window.is_frontmost, now)
                    {
                        Some(hit) => {
                            analyses.insert(window.id, hit.clone());
                        }
                        None => stale.push(window),
                    }
                }
            }
            live
        };

        let mut fresh = Vec::new();
        let mut preserved = HashSet::new();
        for window in stale {
            match self.analyze(window, settings, now) {
                Some(result) => fresh.push((window.id, result)),
                None => {
                    self.counters.capture_failures.fetch_add(1, Ordering::Relaxed);
                    DimFault::CaptureUnavailable { window: window.id }.record();
                    preserved.insert(window.id);
                }
            }
        }

        let engine = DecisionEngine::new(settings.clone());
        let mut guard = lock(&self.pipeline);
        let pipeline = &mut *guard;
        for (id, result) in fresh {
            pipeline.cache.store(id, result.clone());
            analyses.insert(id, result);
        }
        let mut batch = engine.decide(DecisionInput {
            windows: &windows,
            displays: &displays,
            analyses: &analyses,
            decay: &pipeline.decay,
            now,
        });
        batch.preserved = preserved;
        batch.live_windows = live;
        batch.epoch = epoch;
        batch
    }

    /// Listed windows plus known windows the source says still exist.
    fn live_windows(&self, windows: &[TrackedWindow], decay: &DecayTracker) -> HashSet<WindowId> {
        let mut live: HashSet<WindowId> = windows.iter().map(|w| w.id).collect();
        let unlisted: Vec<WindowId> = decay.tracked().filter(|id| !live.contains(id)).collect();
        for id in unlisted {
            if self.ctx.source.window_exists(id) {
                live.insert(id);
            }
        }
        live
    }

    /// Runs one cycle. The caller holds the in-flight claim.
    fn cycle(&self, trigger: CycleTrigger, now: Instant) -> CycleOutcome {
        let epoch = self.epoch.load(Ordering::Acquire);
        let settings = self.ctx.settings.snapshot();
        let batch = self.compute_batch(&settings, epoch, now);

        if self.epoch.load(Ordering::Acquire) != epoch || self.lifecycle() != DimLifecycle::Running
        {
            self.counters.dropped_stale.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(?trigger, epoch, "cycle finished after stop; results dropped");
            return CycleOutcome::Dropped;
        }

        let decisions = batch.len();
        let tuning = ManagerTuning::from_settings(&settings);
        let report = self.owner.run_or_post(move |manager| {
            manager.set_tuning(tuning);
            manager.apply_batch(&batch, now)
        });
        match report {
            Some(report) if !report.stale => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    ?trigger,
                    decisions,
                    created = report.created,
                    updated = report.updated,
                    hidden = report.hidden,
                    "dimming cycle applied"
                );
                CycleOutcome::Applied(report)
            }
            _ => {
                self.counters.dropped_stale.fetch_add(1, Ordering::Relaxed);
                CycleOutcome::Dropped
            }
        }
    }

    fn fire(self: &Arc<Self>, trigger: CycleTrigger, work_tx: &Sender<CycleJob<C>>) {
        if self.lifecycle() != DimLifecycle::Running {
            return;
        }
        match self.try_claim() {
            Some(claim) => {
                let job = CycleJob {
                    trigger,
                    claim,
                    reply: None,
                };
                if work_tx.send(job).is_err() {
                    tracing::warn!(?trigger, "analysis worker gone; cycle not run");
                }
            }
            None => self.note_overlap(),
        }
    }

    fn reconcile_z_order(&self) -> usize {
        let frontmost = self.ctx.source.frontmost_window_id();
        self.owner
            .run_or_post(move |manager| manager.reconcile_z_order(frontmost))
            .unwrap_or(0)
    }

    fn refresh_levels_for_frontmost(&self) -> usize {
        let frontmost = self.ctx.source.frontmost_window_id();
        let engine = DecisionEngine::new(self.ctx.settings.snapshot());
        self.owner
            .run_or_post(move |manager| {
                manager.reconcile_z_order(frontmost);
                manager.refresh_levels_for_frontmost(frontmost, &engine, Instant::now())
            })
            .unwrap_or(0)
    }
}

fn scheduler_loop<C: Compositor + 'static>(
    shared: Arc<Shared<C>>,
    rx: Receiver<SchedulerMessage>,
    work_tx: Sender<CycleJob<C>>,
    periodic: bool,
) {
    let mut debouncer = EventDebouncer::default();
    let mut last_tick = Instant::now();
    loop {
        let interval = shared.ctx.settings.snapshot().scan_interval();
        let next_tick = periodic.then(|| last_tick + interval);
        let deadline = match (next_tick, debouncer.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let message = match deadline {
            Some(deadline) => {
                rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match message {
            Ok(SchedulerMessage::PointerPress(at)) => {
                debouncer.note_event(at);
                continue;
            }
            Ok(SchedulerMessage::Halt) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        if next_tick.is_some_and(|tick| now >= tick) {
            last_tick = now;
            debouncer.note_cycle(now);
            shared.fire(CycleTrigger::Periodic, &work_tx);
        }
        if debouncer.poll(now) {
            shared.fire(CycleTrigger::Event, &work_tx);
        }
    }
    tracing::debug!(coalesced = debouncer.coalesced(), "dimming scheduler stopped");
}

fn worker_loop<C: Compositor + 'static>(work_rx: Receiver<CycleJob<C>>) {
    for CycleJob {
        trigger,
        claim,
        reply,
    } in work_rx
    {
        let outcome = claim.shared.cycle(trigger, Instant::now());
        drop(claim);
        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }
}

/// Drives the dimming pipeline: periodic and pointer-triggered analysis on
/// a worker thread, every surface mutation on the owner thread.
pub struct Coordinator<C: Compositor + 'static> {
    shared: Arc<Shared<C>>,
    config: CoordinatorConfig,
    triggers: Mutex<TriggerThreads<C>>,
}

impl<C: Compositor + 'static> Coordinator<C> {
    pub fn new<F>(ctx: DimContext, make_compositor: F) -> Result<Self>
    where
        F: FnOnce() -> Result<C> + Send + 'static,
    {
        Self::with_config(ctx, make_compositor, CoordinatorConfig::default())
    }

    /// `make_compositor` runs on the owner thread, so the backend never
    /// has to leave it.
    pub fn with_config<F>(ctx: DimContext, make_compositor: F, config: CoordinatorConfig) -> Result<Self>
    where
        F: FnOnce() -> Result<C> + Send + 'static,
    {
        let tuning = ManagerTuning::from_settings(&ctx.settings.snapshot());
        let owner = OwnerThread::spawn("dim-owner", config.owner_idle, move || {
            Ok(OverlayManager::new(make_compositor()?, tuning))
        })?;
        let ttl = ctx.settings.snapshot().cache_ttl();
        Ok(Self {
            shared: Arc::new(Shared {
                ctx,
                owner,
                lifecycle: Mutex::new(DimLifecycle::Idle),
                epoch: AtomicU64::new(0),
                in_flight: AtomicBool::new(false),
                pipeline: Mutex::new(Pipeline {
                    cache: AnalysisCache::new(ttl),
                    decay: DecayTracker::new(),
                }),
                counters: CycleCounters::default(),
            }),
            config,
            triggers: Mutex::new(TriggerThreads::default()),
        })
    }

    pub fn lifecycle(&self) -> DimLifecycle {
        self.shared.lifecycle()
    }

    fn transition_locked(state: &mut DimLifecycle, next: DimLifecycle) -> Result<()> {
        if !can_transition(*state, next) {
            return Err(anyhow!(
                "invalid dimming lifecycle transition: {:?} -> {:?}",
                state,
                next
            ));
        }
        *state = next;
        Ok(())
    }

    /// Reveals surfaces parked by a previous `stop`, or builds them with an
    /// immediate cycle on the analysis worker on first start. Returns once
    /// that cycle has been applied.
    pub fn start(&self) -> Result<StartOutcome> {
        let resumed = {
            let mut lifecycle = lock(&self.shared.lifecycle);
            let previous = *lifecycle;
            match previous {
                DimLifecycle::Running => return Ok(StartOutcome::AlreadyRunning),
                DimLifecycle::ShutDown => return Err(anyhow!("dimming has been shut down")),
                DimLifecycle::Idle | DimLifecycle::Stopped => {}
            }
            let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            let tuning = ManagerTuning::from_settings(&self.shared.ctx.settings.snapshot());
            let revealed = self
                .shared
                .owner
                .run_or_post(move |manager| {
                    manager.set_epoch(epoch);
                    manager.set_tuning(tuning);
                    manager.reveal_all(Instant::now())
                })
                .ok_or_else(|| anyhow!("dimming owner thread unavailable"))?;
            Self::transition_locked(&mut lifecycle, DimLifecycle::Running)?;
            tracing::info!(epoch, revealed, "dimming started");
            previous == DimLifecycle::Stopped && revealed > 0
        };

        self.spawn_triggers()?;
        if !resumed {
            let outcome = self.initial_cycle();
            tracing::debug!(?outcome, "initial dimming cycle");
        }
        Ok(if resumed {
            StartOutcome::Resumed
        } else {
            StartOutcome::Started
        })
    }

    /// Hides every surface and halts the triggers. Idempotent; never
    /// destroys. A cycle still computing drops its results.
    pub fn stop(&self) {
        {
            let mut lifecycle = lock(&self.shared.lifecycle);
            if *lifecycle != DimLifecycle::Running {
                return;
            }
            if let Err(err) = Self::transition_locked(&mut lifecycle, DimLifecycle::Stopped) {
                tracing::warn!(error = %err, "stop refused");
                return;
            }
        }
        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.halt_triggers();
        let hidden = self.shared.owner.run_or_post(move |manager| {
            manager.set_epoch(epoch);
            manager.hide_all(Instant::now())
        });
        tracing::info!(epoch, hidden = hidden.unwrap_or(0), "dimming stopped");
    }

    /// Destroys every surface and stops all threads. Terminal.
    pub fn cleanup(&self) {
        {
            let mut lifecycle = lock(&self.shared.lifecycle);
            if *lifecycle == DimLifecycle::ShutDown {
                return;
            }
            if let Err(err) = Self::transition_locked(&mut lifecycle, DimLifecycle::ShutDown) {
                tracing::warn!(error = %err, "cleanup refused");
                return;
            }
        }
        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let handles = self.halt_triggers();
        let destroyed = self.shared.owner.run_or_post(move |manager| {
            manager.set_epoch(epoch);
            manager.destroy_all(Instant::now())
        });
        join_with_timeout(handles);
        self.shared.owner.shutdown();
        tracing::info!(destroyed = destroyed.unwrap_or(0), "dimming shut down");
    }

    /// Pointer-press hook: resets decay for the new frontmost window,
    /// re-stacks and re-levels surfaces at once, and schedules a debounced
    /// re-analysis.
    pub fn on_pointer_press(&self, now: Instant) {
        if self.lifecycle() != DimLifecycle::Running {
            return;
        }
        self.shared
            .counters
            .pointer_events
            .fetch_add(1, Ordering::Relaxed);
        if let Some(frontmost) = self.shared.ctx.source.frontmost_window_id() {
            lock(&self.shared.pipeline).decay.mark_frontmost(frontmost, now);
        }
        self.refresh_levels_for_frontmost();
        if let Some(tx) = &lock(&self.triggers).tx {
            let _ = tx.send(SchedulerMessage::PointerPress(now));
        }
    }

    pub fn reconcile_z_order(&self) -> usize {
        self.shared.reconcile_z_order()
    }

    pub fn refresh_levels_for_frontmost(&self) -> usize {
        self.shared.refresh_levels_for_frontmost()
    }

    /// Hands a manual cycle to the analysis worker and waits for it.
    fn initial_cycle(&self) -> CycleOutcome {
        let Some(work) = lock(&self.triggers).work.clone() else {
            return CycleOutcome::NotRunning;
        };
        let Some(claim) = self.shared.try_claim() else {
            self.shared.note_overlap();
            return CycleOutcome::SkippedOverlap;
        };
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let job = CycleJob {
            trigger: CycleTrigger::Manual,
            claim,
            reply: Some(reply_tx),
        };
        if work.send(job).is_err() {
            tracing::warn!("analysis worker gone; initial cycle not run");
            return CycleOutcome::NotRunning;
        }
        reply_rx.recv().unwrap_or(CycleOutcome::NotRunning)
    }

    /// Runs a full cycle on the calling thread under the same overlap rule
    /// as the triggers.
    pub fn run_cycle_now(&self, trigger: CycleTrigger, now: Instant) -> CycleOutcome {
        if self.lifecycle() != DimLifecycle::Running {
            return CycleOutcome::NotRunning;
        }
        let Some(_claim) = self.shared.try_claim() else {
            self.shared.note_overlap();
            return CycleOutcome::SkippedOverlap;
        };
        self.shared.cycle(trigger, now)
    }

    /// Runs `f` against the overlay manager on the owner thread. Called from
    /// inside another owner job it is queued instead and yields `None`.
    pub fn with_manager<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut OverlayManager<C>) -> R + Send + 'static,
    {
        self.shared.owner.run_or_post(f)
    }

    pub fn stats(&self) -> CycleStats {
        let counters = &self.shared.counters;
        CycleStats {
            completed: counters.completed.load(Ordering::Relaxed),
            skipped_overlap: counters.skipped_overlap.load(Ordering::Relaxed),
            dropped_stale: counters.dropped_stale.load(Ordering::Relaxed),
            capture_failures: counters.capture_failures.load(Ordering::Relaxed),
            analyses: counters.analyses.load(Ordering::Relaxed),
            pointer_events: counters.pointer_events.load(Ordering::Relaxed),
            cache: lock(&self.shared.pipeline).cache.stats(),
        }
    }

    fn spawn_triggers(&self) -> Result<()> {
        let mut triggers = lock(&self.triggers);
        if triggers.tx.is_some() {
            return Ok(());
        }
        triggers.handles.retain(|handle| !handle.is_finished());

        let (tx, rx) = mpsc::channel();
        let (work_tx, work_rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("dim-analysis".into())
            .spawn(move || worker_loop::<C>(work_rx))?;
        let shared = Arc::clone(&self.shared);
        let periodic = self.config.periodic;
        let scheduler_work = work_tx.clone();
        let scheduler = thread::Builder::new()
            .name("dim-scheduler".into())
            .spawn(move || scheduler_loop(shared, rx, scheduler_work, periodic))?;

        triggers.tx = Some(tx);
        triggers.work = Some(work_tx);
        triggers.handles.push(scheduler);
        triggers.handles.push(worker);
        Ok(())
    }

    /// Tells the trigger threads to exit without waiting for them.
    fn halt_triggers(&self) -> Vec<JoinHandle<()>> {
        let mut triggers = lock(&self.triggers);
        if let Some(tx) = triggers.tx.take() {
            let _ = tx.send(SchedulerMessage::Halt);
        }
        triggers.work = None;
        std::mem::take(&mut triggers.handles)
    }
}

impl<C: Compositor + 'static> Drop for Coordinator<C> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn join_with_timeout(handles: Vec<JoinHandle<()>>) {
    if handles.is_empty() {
        return;
    }
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        let panicked = handles
            .into_iter()
            .map(JoinHandle::join)
            .filter(Result::is_err)
            .count();
        let _ = done_tx.send(panicked);
    });
    match done_rx.recv_timeout(TRIGGER_JOIN_TIMEOUT) {
        Ok(0) => {}
        Ok(panicked) => tracing::error!(panicked, "dimming trigger threads panicked"),
        Err(_) => tracing::error!("dimming trigger threads did not exit in time"),
    }
}
