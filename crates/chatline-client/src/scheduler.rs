//! Cancellable scheduled tasks and single-slot request tokens.
//!
//! Every timer in the client (reconnect, typing debounce, typing expiry,
//! delayed list refresh) goes through [`Scheduler::schedule`], and every
//! "only the latest one counts" request goes through a [`RequestSlot`].
//! Deadlines are computed when the task is scheduled, not when it is first
//! polled, so tokio's paused clock drives them deterministically in tests.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Spawns delayed actions on the current tokio runtime.
#[derive(Clone, Debug, Default)]
pub struct Scheduler;

impl Scheduler {
    pub fn new() -> Self {
        Scheduler
    }

    /// Run `action` once `delay` has elapsed unless the handle is cancelled first.
    pub fn schedule<F>(&self, delay: Duration, action: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            flag.store(true, Ordering::SeqCst);
            action.await;
        });
        TaskHandle {
            abort: join.abort_handle(),
            fired,
            deadline,
        }
    }
}

/// Cancellation handle for a scheduled task.
#[derive(Debug)]
pub struct TaskHandle {
    abort: AbortHandle,
    fired: Arc<AtomicBool>,
    deadline: Instant,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// True while the delay has not elapsed and the task was not cancelled.
    pub fn is_pending(&self) -> bool {
        !self.fired.load(Ordering::SeqCst) && !self.abort.is_finished()
    }
}

/// Holds at most one scheduled task; installing a new one cancels the old.
#[derive(Debug, Default)]
pub struct TaskSlot {
    current: Mutex<Option<TaskHandle>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, handle: TaskHandle) {
        if let Some(previous) = self.current.lock().replace(handle) {
            previous.cancel();
        }
    }

    pub fn cancel(&self) -> bool {
        match self.current.lock().take() {
            Some(handle) => {
                let was_pending = handle.is_pending();
                handle.cancel();
                was_pending
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map(TaskHandle::is_pending)
            .unwrap_or(false)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.current
            .lock()
            .as_ref()
            .filter(|h| h.is_pending())
            .map(TaskHandle::deadline)
    }
}

/// Last-request-wins token source for one logical operation.
#[derive(Debug, Default)]
pub struct RequestSlot {
    generation: AtomicU64,
}

/// Proof of which request issued a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestToken(u64);

impl RequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token, invalidating every earlier one.
    pub fn issue(&self) -> RequestToken {
        RequestToken(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        self.generation.load(Ordering::SeqCst) == token.0
    }

    /// Invalidate outstanding tokens without issuing a usable one.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_after_delay() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = Scheduler::new().schedule(Duration::from_millis(100), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(99)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(handle.is_pending());

        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!handle.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_action() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = Scheduler::new().schedule(Duration::from_millis(100), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_keeps_only_latest() {
        let scheduler = Scheduler::new();
        let slot = TaskSlot::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let h = hits.clone();
            slot.replace(scheduler.schedule(Duration::from_millis(50), async move {
                h.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(slot.is_pending());

        tokio::time::advance(Duration::from_millis(60)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!slot.is_pending());
        assert!(!slot.cancel());
    }

    #[test]
    fn test_request_slot_last_wins() {
        let slot = RequestSlot::new();
        let first = slot.issue();
        assert!(slot.is_current(first));
        let second = slot.issue();
        assert!(!slot.is_current(first));
        assert!(slot.is_current(second));
        slot.invalidate();
        assert!(!slot.is_current(second));
    }
}
