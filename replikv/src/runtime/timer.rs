//! Cancellable delayed delivery.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

/// Handle on a delayed self-message.
///
/// The timer is cancelled when the handle is cancelled or dropped, so an
/// actor that overwrites the handle it keeps for a given purpose always
/// cancels the previous timer first.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: AbortHandle,
}

impl ScheduledTask {
    pub(crate) fn spawn<F>(delay: Duration, fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire.await;
        });
        Self {
            handle: task.abort_handle(),
        }
    }

    /// Cancel the timer. Has no effect if it already fired.
    pub fn cancel(self) {
        drop(self);
    }

    /// Whether the timer fired or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let task = ScheduledTask::spawn(Duration::from_secs(1), async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_delivery() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let task = ScheduledTask::spawn(Duration::from_secs(1), async move {
            flag.store(true, Ordering::SeqCst);
        });
        task.cancel();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacing_handle_cancels_previous() {
        struct Owner {
            timer: Option<ScheduledTask>,
        }

        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut owner = Owner { timer: None };

        let first = count.clone();
        owner.timer = Some(ScheduledTask::spawn(Duration::from_secs(1), async move {
            first.fetch_add(1, Ordering::SeqCst);
        }));
        let second = count.clone();
        owner.timer = Some(ScheduledTask::spawn(Duration::from_secs(1), async move {
            second.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(owner.timer.is_some_and(|timer| timer.is_finished()));
    }
}
