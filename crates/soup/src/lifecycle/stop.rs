//! Cooperative stop token shared between a controller, its run body and
//! whatever long-running work the body starts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// The owning side of a stop token.
#[derive(Debug, Clone)]
pub struct StopHandle {
    sender: Arc<watch::Sender<bool>>,
}

/// The observing side of a stop token. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StopSignal {
    receiver: watch::Receiver<bool>,
}

impl StopHandle {
    pub fn new() -> (StopHandle, StopSignal) {
        let (sender, receiver) = watch::channel(false);
        (
            StopHandle {
                sender: Arc::new(sender),
            },
            StopSignal { receiver },
        )
    }

    /// Requests a stop. Idempotent.
    pub fn stop(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn signal(&self) -> StopSignal {
        StopSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once a stop was requested or every handle was dropped.
    pub async fn stopped(&self) {
        let mut receiver = self.receiver.clone();
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

/// Instant `period` from now, or `None` when that is past the clock's range.
pub(crate) fn deadline_after(period: Duration) -> Option<Instant> {
    Instant::now().checked_add(period)
}

/// Sleeps until `deadline`; never resolves for `None`.
pub(crate) async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_wakes_all_observers() {
        let (handle, signal) = StopHandle::new();
        let other = handle.signal();
        assert!(!signal.is_stopped());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.stopped().await }
        });

        handle.stop();
        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("observer not woken")
            .unwrap();
        assert!(other.is_stopped());
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_dropped_handle_counts_as_stop() {
        let (handle, signal) = StopHandle::new();
        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), signal.stopped())
            .await
            .expect("dropped handle should release observers");
    }

    #[test]
    fn test_unreachable_deadline_is_none() {
        assert!(deadline_after(Duration::MAX).is_none());
        assert!(deadline_after(Duration::from_secs(1)).is_some());
    }

    #[tokio::test]
    async fn test_missing_deadline_never_fires() {
        let fired = tokio::time::timeout(Duration::from_millis(20), sleep_until_deadline(None)).await;
        assert!(fired.is_err());

        tokio::time::timeout(
            Duration::from_secs(1),
            sleep_until_deadline(deadline_after(Duration::from_millis(1))),
        )
        .await
        .expect("near deadline should fire");
    }
}
