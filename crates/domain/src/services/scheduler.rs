//! Cancellable delayed tasks.
//!
//! The escalation engine arms one task per pending level. Each task gets a
//! child token of its alert's parent token, so cancelling the parent aborts
//! every pending level of that alert at once.

use futures::future::BoxFuture;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Work to run when a timer fires.
pub type TimerTask = BoxFuture<'static, ()>;

/// Identifies one armed escalation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    pub alert_id: Uuid,
    pub level: u32,
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.alert_id, self.level)
    }
}

/// Handle to an armed timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    pub id: TimerId,
    token: CancellationToken,
}

impl TimerHandle {
    pub fn new(id: TimerId, token: CancellationToken) -> Self {
        Self { id, token }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

pub trait Scheduler: Send + Sync {
    /// Runs `task` after `delay` unless `token` is cancelled first.
    fn schedule(
        &self,
        id: TimerId,
        delay: Duration,
        token: CancellationToken,
        task: TimerTask,
    ) -> TimerHandle;

    fn cancel(&self, handle: &TimerHandle) {
        handle.token.cancel();
    }
}

/// Scheduler backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(
        &self,
        id: TimerId,
        delay: Duration,
        token: CancellationToken,
        task: TimerTask,
    ) -> TimerHandle {
        let handle = TimerHandle::new(id, token.clone());
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(timer = %id, "Escalation timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    if !token.is_cancelled() {
                        task.await;
                    }
                }
            }
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn id() -> TimerId {
        TimerId {
            alert_id: Uuid::new_v4(),
            level: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        TokioScheduler.schedule(
            id(),
            Duration::from_secs(60),
            CancellationToken::new(),
            async move { flag.store(true, Ordering::SeqCst) }.boxed(),
        );

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_task_never_runs() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = TokioScheduler.schedule(
            id(),
            Duration::from_secs(60),
            CancellationToken::new(),
            async move { flag.store(true, Ordering::SeqCst) }.boxed(),
        );

        TokioScheduler.cancel(&handle);
        assert!(handle.is_cancelled());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_reaches_children() {
        let parent = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));
        for level in 2..=3 {
            let flag = Arc::clone(&fired);
            TokioScheduler.schedule(
                TimerId {
                    alert_id: Uuid::new_v4(),
                    level,
                },
                Duration::from_secs(10 * level as u64),
                parent.child_token(),
                async move { flag.store(true, Ordering::SeqCst) }.boxed(),
            );
        }
        parent.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
