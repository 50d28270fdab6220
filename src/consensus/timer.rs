use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Handle to a scheduled timer. `cancel` is idempotent cancel-and-wait: it
/// aborts the sleeping task and awaits its retirement, so the caller can
/// re-arm a fresh timer without a duplicate left in flight.
///
/// Fired callbacks run detached from the timer task. That lets a callback
/// retire its own handle (a candidate's retry rescheduling itself, a monitor
/// tick demoting the monitor) without deadlocking on its own join; callers
/// are expected to re-check their state on entry to absorb a callback that
/// was already in flight when its timer was cancelled.
pub struct TimerHandle {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TimerHandle {
    fn new(task: JoinHandle<()>) -> Self {
        Self {
            task: Mutex::new(Some(task)),
        }
    }

    pub async fn cancel(&self) {
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }
}

/// Run `f` once after `delay`.
pub fn schedule_once<F, Fut>(delay: Duration, f: F) -> TimerHandle
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    TimerHandle::new(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        tokio::spawn(f());
    }))
}

/// Run `f` every `period`, first firing one period from now.
pub fn schedule_periodic<F, Fut>(period: Duration, f: F) -> TimerHandle
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    TimerHandle::new(tokio::spawn(async move {
        let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            ticks.tick().await;
            tokio::spawn(f());
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn one_shot_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let _timer = schedule_once(Duration::from_millis(10), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_before_firing_suppresses_the_callback() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let timer = schedule_once(Duration::from_millis(50), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        timer.cancel().await;
        // A second cancel must be a no-op.
        timer.cancel().await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn periodic_fires_until_cancelled() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let timer = schedule_periodic(Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        timer.cancel().await;
        let at_cancel = fired.load(Ordering::SeqCst);
        assert!(at_cancel >= 3, "expected several ticks, got {at_cancel}");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), at_cancel);
    }
}
