//! One-shot task scheduling for the proactive token refresh.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::AbortHandle;
use tracing::warn;

/// Handle to a scheduled task. Dropping it does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TaskHandle {
    fn new(cancelled: Arc<AtomicBool>, abort: Option<AbortHandle>) -> Self {
        TaskHandle { cancelled, abort }
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

pub trait Scheduler: Send + Sync {
    /// Runs `task` once after `delay`, unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TaskHandle;
}

/// Schedules on the ambient tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TaskHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No tokio runtime available; task was not scheduled");
                cancelled.store(true, Ordering::SeqCst);
                return TaskHandle::new(cancelled, None);
            }
        };
        let flag = Arc::clone(&cancelled);
        let join = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                task.await;
            }
        });
        TaskHandle::new(cancelled, Some(join.abort_handle()))
    }
}

struct ManualTask {
    id: u64,
    delay: Duration,
    cancelled: Arc<AtomicBool>,
    task: BoxFuture<'static, ()>,
}

/// A scheduler that never fires on its own. Tests inspect the armed delays
/// and fire tasks explicitly.
#[derive(Default)]
pub struct ManualScheduler {
    next_id: AtomicU64,
    tasks: Mutex<Vec<ManualTask>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<ManualTask>> {
        match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Delays of every task that is still armed, oldest first.
    pub fn pending_delays(&self) -> Vec<Duration> {
        let mut tasks = self.tasks();
        tasks.retain(|t| !t.cancelled.load(Ordering::SeqCst));
        tasks.iter().map(|t| t.delay).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_delays().len()
    }

    /// Runs the oldest armed task to completion. Returns false if none was armed.
    pub async fn fire_next(&self) -> bool {
        let next = {
            let mut tasks = self.tasks();
            tasks.retain(|t| !t.cancelled.load(Ordering::SeqCst));
            if tasks.is_empty() {
                None
            } else {
                Some(tasks.remove(0))
            }
        };
        match next {
            Some(task) => {
                tracing::debug!(task_id = task.id, "Firing manually scheduled task");
                task.task.await;
                true
            }
            None => false,
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TaskHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.tasks().push(ManualTask {
            id,
            delay,
            cancelled: Arc::clone(&cancelled),
            task,
        });
        TaskHandle::new(cancelled, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn manual_scheduler_skips_cancelled_tasks() {
        let scheduler = ManualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let first = {
            let fired = Arc::clone(&fired);
            scheduler.schedule(
                Duration::from_secs(1),
                async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                }
                .boxed(),
            )
        };
        {
            let fired = Arc::clone(&fired);
            scheduler.schedule(
                Duration::from_secs(2),
                async move {
                    fired.fetch_add(10, Ordering::SeqCst);
                }
                .boxed(),
            );
        }

        first.cancel();
        assert!(first.is_cancelled());
        assert_eq!(scheduler.pending_delays(), vec![Duration::from_secs(2)]);
        assert!(scheduler.fire_next().await);
        assert!(!scheduler.fire_next().await);
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_fires_after_delay_unless_cancelled() {
        let fired = Arc::new(AtomicUsize::new(0));
        let kept = {
            let fired = Arc::clone(&fired);
            TokioScheduler.schedule(
                Duration::from_millis(100),
                async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                }
                .boxed(),
            )
        };
        let dropped = {
            let fired = Arc::clone(&fired);
            TokioScheduler.schedule(
                Duration::from_millis(100),
                async move {
                    fired.fetch_add(100, Ordering::SeqCst);
                }
                .boxed(),
            )
        };
        dropped.cancel();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!kept.is_cancelled());
    }
}
