//! A dedicated thread that owns state which must never be touched from
//! anywhere else. Other threads hand it closures.

use crate::dim::error::DimFault;
use anyhow::{anyhow, Result};
use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

const OWNER_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const OWNER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// State installed on an owner thread.
pub trait OwnedState: 'static {
    /// Runs whenever the thread has been idle for its idle interval.
    fn idle(&mut self, _now: Instant) {}
}

type Job = Box<dyn FnOnce() + Send>;

enum OwnerMessage {
    Run(Job),
    Shutdown,
}

thread_local! {
    static OWNER_STATE: RefCell<Option<Box<dyn Any>>> = RefCell::new(None);
}

fn with_state<S: 'static, R>(f: impl FnOnce(&mut S) -> R) -> Result<R, DimFault> {
    OWNER_STATE.with(|cell| {
        let mut guard = cell
            .try_borrow_mut()
            .map_err(|_| DimFault::ReentrantDispatch)?;
        let state = guard
            .as_mut()
            .and_then(|boxed| boxed.downcast_mut::<S>())
            .ok_or(DimFault::OwnerUnavailable)?;
        Ok(f(state))
    })
}

fn state_borrowed() -> bool {
    OWNER_STATE.with(|cell| cell.try_borrow_mut().is_err())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Debug, Default)]
struct OwnerCounters {
    jobs: AtomicU64,
    panics: AtomicU64,
    reentrant: AtomicU64,
    idle_ticks: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OwnerStats {
    pub jobs: u64,
    pub panics: u64,
    pub reentrant: u64,
    pub idle_ticks: u64,
}

pub struct OwnerThread<S: OwnedState> {
    name: String,
    tx: Sender<OwnerMessage>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<OwnerCounters>,
    _state: PhantomData<fn() -> S>,
}

impl<S: OwnedState> OwnerThread<S> {
    /// Starts the thread and builds the state on it. Returns once `init`
    /// has finished, or with its error.
    pub fn spawn<F>(name: &str, idle_interval: Duration, init: F) -> Result<Self>
    where
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();
        let counters = Arc::new(OwnerCounters::default());
        let thread_counters = Arc::clone(&counters);
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                match init() {
                    Ok(state) => {
                        OWNER_STATE.with(|cell| *cell.borrow_mut() = Some(Box::new(state)));
                        let _ = ready_tx.send(Ok(()));
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(format!("{err:#}")));
                        return;
                    }
                }
                run_loop::<S>(&thread_name, rx, idle_interval, &thread_counters);
                OWNER_STATE.with(|cell| {
                    if let Ok(mut guard) = cell.try_borrow_mut() {
                        guard.take();
                    }
                });
                tracing::debug!(thread = %thread_name, "owner thread exited");
            })?;

        match ready_rx.recv_timeout(OWNER_STARTUP_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                let _ = handle.join();
                return Err(anyhow!("{name} failed to start: {message}"));
            }
            Err(_) => return Err(anyhow!("{name} did not report startup")),
        }

        Ok(Self {
            name: name.to_string(),
            tx,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
            counters,
            _state: PhantomData,
        })
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Runs `f` right here when called on the owner thread with the state
    /// free. Never blocks and never defers.
    pub fn try_inline<R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        if !self.is_owner_thread() {
            return None;
        }
        match with_state(f) {
            Ok(value) => Some(value),
            Err(fault) => {
                self.note_fault(&fault);
                None
            }
        }
    }

    /// Runs `f` on the owner thread and waits for its result. A call made
    /// while the state is already borrowed on the owner thread is deferred
    /// to the queue and yields `None`.
    pub fn run_or_post<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        if self.is_owner_thread() {
            if state_borrowed() {
                self.note_fault(&DimFault::ReentrantDispatch);
                self.post(move |state| {
                    f(state);
                });
                return None;
            }
            return self.try_inline(f);
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move || match with_state::<S, _>(f) {
            Ok(value) => {
                let _ = reply_tx.send(value);
            }
            Err(fault) => fault.record(),
        });
        if self.tx.send(OwnerMessage::Run(job)).is_err() {
            DimFault::OwnerUnavailable.record();
            return None;
        }
        reply_rx.recv().ok()
    }

    /// Queues `f` without waiting. Returns false when the thread is gone.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let job: Job = Box::new(move || {
            if let Err(fault) = with_state::<S, _>(f) {
                fault.record();
            }
        });
        self.tx.send(OwnerMessage::Run(job)).is_ok()
    }

    fn note_fault(&self, fault: &DimFault) {
        if matches!(fault, DimFault::ReentrantDispatch) {
            self.counters.reentrant.fetch_add(1, Ordering::Relaxed);
        }
        fault.record();
    }

    pub fn stats(&self) -> OwnerStats {
        OwnerStats {
            jobs: self.counters.jobs.load(Ordering::Relaxed),
            panics: self.counters.panics.load(Ordering::Relaxed),
            reentrant: self.counters.reentrant.load(Ordering::Relaxed),
            idle_ticks: self.counters.idle_ticks.load(Ordering::Relaxed),
        }
    }

    /// Stops the loop and joins the thread, giving up after a timeout.
    /// Returns whether the thread exited cleanly.
    pub fn shutdown(&self) -> bool {
        let _ = self.tx.send(OwnerMessage::Shutdown);
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return true;
        };
        if self.is_owner_thread() {
            return true;
        }

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = done_tx.send(handle.join());
        });
        match done_rx.recv_timeout(OWNER_JOIN_TIMEOUT) {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                tracing::error!(thread = %self.name, "owner thread panicked while joining");
                false
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!(thread = %self.name, "owner thread join timed out");
                false
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::error!(thread = %self.name, "owner thread join channel disconnected");
                false
            }
        }
    }
}

impl<S: OwnedState> Drop for OwnerThread<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop<S: OwnedState>(
    name: &str,
    rx: Receiver<OwnerMessage>,
    idle_interval: Duration,
    counters: &OwnerCounters,
) {
    let mut last_idle = Instant::now();
    loop {
        let wait = idle_interval.saturating_sub(last_idle.elapsed());
        match rx.recv_timeout(wait) {
            Ok(OwnerMessage::Run(job)) => {
                counters.jobs.fetch_add(1, Ordering::Relaxed);
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    counters.panics.fetch_add(1, Ordering::Relaxed);
                    let panic_message = panic_message(payload.as_ref());
                    tracing::error!(thread = %name, panic_message, "owner job panicked");
                }
            }
            Ok(OwnerMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if last_idle.elapsed() >= idle_interval {
            let now = Instant::now();
            let idle = panic::catch_unwind(AssertUnwindSafe(|| {
                with_state::<S, _>(|state| state.idle(now))
            }));
            match idle {
                Ok(Ok(())) => {}
                Ok(Err(fault)) => fault.record(),
                Err(payload) => {
                    let panic_message = panic_message(payload.as_ref());
                    tracing::error!(thread = %name, panic_message, "owner idle hook panicked");
                }
            }
            counters.idle_ticks.fetch_add(1, Ordering::Relaxed);
            last_idle = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{OwnedState, OwnerThread};
    use anyhow::anyhow;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Counter {
        value: u32,
        idles: u32,
    }

    impl OwnedState for Counter {
        fn idle(&mut self, _now: Instant) {
            self.idles += 1;
        }
    }

    fn spawn_counter(idle: Duration) -> Arc<OwnerThread<Counter>> {
        Arc::new(
            OwnerThread::spawn("test-owner", idle, || Ok(Counter::default()))
                .expect("spawn owner"),
        )
    }

    #[test]
    fn run_from_another_thread_returns_result() {
        let owner = spawn_counter(Duration::from_secs(60));
        let value = owner.run_or_post(|c| {
            c.value += 2;
            c.value
        });
        assert_eq!(value, Some(2));
        assert!(!owner.is_owner_thread());
        assert_eq!(owner.try_inline(|c| c.value), None);
    }

    #[test]
    fn nested_call_is_posted_and_runs_after_the_outer_job() {
        let owner = spawn_counter(Duration::from_secs(60));
        let inner = Arc::clone(&owner);
        let nested = owner.run_or_post(move |c| {
            c.value = 1;
            let deferred = inner.run_or_post(|c| {
                c.value += 10;
                c.value
            });
            (deferred, inner.is_owner_thread())
        });
        assert_eq!(nested, Some((None, true)));

        assert_eq!(owner.run_or_post(|c| c.value), Some(11));
        assert_eq!(owner.stats().reentrant, 1);
    }

    #[test]
    fn posted_jobs_run_in_order() {
        let owner = spawn_counter(Duration::from_secs(60));
        assert!(owner.post(|c| c.value = 5));
        assert!(owner.post(|c| c.value *= 3));
        assert_eq!(owner.run_or_post(|c| c.value), Some(15));
    }

    #[test]
    fn panicking_job_does_not_kill_thread() {
        let owner = spawn_counter(Duration::from_secs(60));
        let result: Option<u32> = owner.run_or_post(|_| panic!("boom"));
        assert_eq!(result, None);
        assert_eq!(owner.run_or_post(|c| c.value + 1), Some(1));
        assert_eq!(owner.stats().panics, 1);
    }

    #[test]
    fn idle_hook_runs_when_queue_is_quiet() {
        let owner = spawn_counter(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(80));
        let idles = owner.run_or_post(|c| c.idles).expect("owner alive");
        assert!(idles > 0);
    }

    #[test]
    fn failed_init_reports_error() {
        let result = OwnerThread::<Counter>::spawn("broken-owner", Duration::from_secs(1), || {
            Err(anyhow!("no display"))
        });
        let err = result.err().expect("init should fail");
        assert!(err.to_string().contains("no display"));
    }

    #[test]
    fn run_after_shutdown_yields_none() {
        let owner = spawn_counter(Duration::from_secs(60));
        assert!(owner.shutdown());
        assert_eq!(owner.run_or_post(|c| c.value), None);
        assert!(!owner.post(|c| c.value += 1));
    }
}
