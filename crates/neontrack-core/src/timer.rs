//! One-shot deferred execution
//!
//! The engine never polls. Its only suspension point is a single deferred
//! re-invocation, scheduled through a [`Timer`]. Handles allow every pending
//! task to be cancelled when the player is torn down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Deferred work
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation handle for a scheduled task
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Clock plus one-shot scheduler
pub trait Timer: Send + Sync {
    fn now(&self) -> Instant;

    /// Run `task` once after `delay`, unless cancelled first
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

/// Timer backed by the tokio runtime
///
/// Uses tokio's clock, so paused-time tests advance it deterministically.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    runtime: Handle,
}

impl TokioTimer {
    /// Must be called from within a tokio runtime
    pub fn new() -> crate::Result<Self> {
        let runtime = Handle::try_current().map_err(|_| crate::Error::NoRuntime("TokioTimer"))?;
        Ok(Self { runtime })
    }
}

impl Timer for TokioTimer {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let mut handle = TimerHandle::new();
        let cancelled = handle.cancelled.clone();
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !cancelled.load(Ordering::SeqCst) {
                task();
            }
        });
        handle.abort = Some(join.abort_handle());
        handle
    }
}

struct ScheduledTask {
    due: Duration,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: TimerTask,
}

/// Virtual clock advanced explicitly by the caller
///
/// Tasks run on the thread calling [`ManualTimer::advance`], in due order.
pub struct ManualTimer {
    origin: Instant,
    elapsed: Mutex<Duration>,
    queue: Mutex<Vec<ScheduledTask>>,
    seq: AtomicU64,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            queue: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    fn elapsed(&self) -> MutexGuard<'_, Duration> {
        self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self) -> MutexGuard<'_, Vec<ScheduledTask>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the clock forward, running every task that falls due
    pub fn advance(&self, by: Duration) {
        let target = *self.elapsed() + by;
        while let Some(next) = self.pop_due(target) {
            *self.elapsed() = next.due;
            if !next.cancelled.load(Ordering::SeqCst) {
                (next.task)();
            }
        }
        *self.elapsed() = target;
    }

    fn pop_due(&self, target: Duration) -> Option<ScheduledTask> {
        let mut queue = self.queue();
        let idx = queue
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= target)
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(idx, _)| idx)?;
        Some(queue.swap_remove(idx))
    }

    /// Scheduled tasks not yet run or cancelled
    pub fn pending(&self) -> usize {
        self.queue()
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Time until the earliest live task falls due
    pub fn next_due_in(&self) -> Option<Duration> {
        let now = *self.elapsed();
        self.queue()
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .map(|t| t.due.saturating_sub(now))
            .min()
    }
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for ManualTimer {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed()
    }

    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle::new();
        let due = *self.elapsed() + delay;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.queue().push(ScheduledTask {
            due,
            seq,
            cancelled: handle.cancelled.clone(),
            task,
        });
        handle
    }
}
