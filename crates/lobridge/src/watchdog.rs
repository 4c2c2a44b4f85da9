use std::future::Future;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

/// Single-shot deadline for one task.
///
/// Runs `on_expiry` when the deadline passes before the watchdog is disarmed.
/// Disarming (or dropping) cancels it.
pub struct Watchdog {
    timeout: Duration,
    disarm: CancellationToken,
    fired: CancellationToken,
}

impl Watchdog {
    pub fn arm<F, Fut>(timeout: Duration, on_expiry: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let disarm = CancellationToken::new();
        let fired = CancellationToken::new();

        tokio::spawn({
            let disarm = disarm.clone();
            let fired = fired.clone();
            async move {
                tokio::select! {
                    biased;
                    _ = disarm.cancelled() => {
                        debug!("Watchdog disarmed");
                    }
                    _ = tokio::time::sleep(timeout) => {
                        warn!(timeout = ?timeout, "Task exceeded its deadline, recycling engine");
                        on_expiry().await;
                        fired.cancel();
                    }
                }
            }
        });

        Self {
            timeout,
            disarm,
            fired,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves once the deadline passed and the expiry action completed
    pub fn fired(&self) -> WaitForCancellationFuture<'_> {
        self.fired.cancelled()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.is_cancelled()
    }

    pub fn disarm(self) {
        self.disarm.cancel();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test]
    async fn test_expiry_runs_action() {
        let expired = Arc::new(AtomicUsize::new(0));
        let watchdog = Watchdog::arm(Duration::from_millis(20), counting(&expired));

        tokio::time::timeout(Duration::from_secs(5), watchdog.fired())
            .await
            .unwrap();
        assert!(watchdog.has_fired());
        assert_eq!(expired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disarm_prevents_action() {
        let expired = Arc::new(AtomicUsize::new(0));
        let watchdog = Watchdog::arm(Duration::from_millis(50), counting(&expired));
        watchdog.disarm();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_drop_disarms() {
        let expired = Arc::new(AtomicUsize::new(0));
        drop(Watchdog::arm(Duration::from_millis(50), counting(&expired)));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }
}
