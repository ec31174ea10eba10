//! Cancel-and-join wrapper for background tasks.

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// A spawned background task with its own cancellation token.
///
/// `stop()` cancels and then waits for the task to finish, so once it
/// returns the task can no longer have any effect. Dropping the wrapper
/// cancels the task without waiting.
pub(crate) struct BackgroundTask {
    name: &'static str,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn `future`; it must exit promptly once `cancel_token` fires.
    pub(crate) fn spawn<F>(name: &'static str, cancel_token: CancellationToken, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            cancel_token,
            handle: Some(tokio::spawn(future)),
        }
    }

    /// Signal the task to stop. Idempotent.
    pub(crate) fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Cancel the task and wait for it to exit. Idempotent.
    pub(crate) async fn stop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(
                        target: "floor.arbiter",
                        task = self.name,
                        "Background task panicked"
                    );
                }
            }
        }
    }

    #[cfg(test)]
    fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn ticking_task(token: CancellationToken, ticks: Arc<AtomicU32>) -> impl Future<Output = ()> {
        async move {
            let mut interval = tokio::time::interval(Duration::from_millis(100));
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        ticks.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_final() {
        let token = CancellationToken::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let mut task = BackgroundTask::spawn(
            "ticker",
            token.clone(),
            ticking_task(token, Arc::clone(&ticks)),
        );

        tokio::time::sleep(Duration::from_millis(350)).await;
        task.stop().await;
        task.stop().await;
        task.cancel();

        assert!(task.is_finished());
        let after_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_work() {
        let token = CancellationToken::new();
        let done = Arc::new(AtomicU32::new(0));
        let done_in_task = Arc::clone(&done);
        let mut task = BackgroundTask::spawn("slow", token, async move {
            // Work that ignores cancellation until it completes.
            tokio::time::sleep(Duration::from_millis(500)).await;
            done_in_task.store(1, Ordering::SeqCst);
        });

        tokio::task::yield_now().await;
        task.stop().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let token = CancellationToken::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let task = BackgroundTask::spawn(
            "ticker",
            token.clone(),
            ticking_task(token.clone(), Arc::clone(&ticks)),
        );

        drop(task);
        assert!(token.is_cancelled());
    }
}
