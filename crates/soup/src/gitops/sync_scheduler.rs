//! Periodic reconciliation of every branch.

use std::sync::Arc;
use std::time::Duration;

use super::reconciler::{failure_notification, ReconcileReport, Reconciler, Result};
use crate::lifecycle::stop::{deadline_after, sleep_until_deadline};
use crate::lifecycle::StopSignal;
use crate::notification::{AlertSettings, Notifier};

/// Re-runs [`Reconciler::reconcile_all_branches`] on a fixed interval until
/// stopped. A failed run is logged and notified; the loop keeps going.
pub struct SyncScheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    notifier: Arc<dyn Notifier>,
    repo_url: String,
    alert: AlertSettings,
}

impl SyncScheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        interval: Duration,
        notifier: Arc<dyn Notifier>,
        repo_url: impl Into<String>,
        alert: AlertSettings,
    ) -> Self {
        Self {
            reconciler,
            interval: interval.max(Duration::from_millis(1)),
            notifier,
            repo_url: repo_url.into(),
            alert,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One reconciliation of every branch, alerting on failure.
    pub async fn run_once(&self) -> Result<ReconcileReport> {
        match self.reconciler.reconcile_all_branches().await {
            Ok(report) => {
                tracing::info!(
                    branches = report.branches.len(),
                    applied = report.applied_count(),
                    "reconciliation finished"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(url = %self.repo_url, error = %e, "reconciliation failed");
                let notification = failure_notification(&self.repo_url, &e, &self.alert);
                if let Err(notify_err) = self.notifier.notify(notification).await {
                    tracing::warn!(error = %notify_err, "failed to send notification");
                }
                Err(e)
            }
        }
    }

    /// Runs immediately, then one interval after each run finishes until
    /// `stop` fires. An interval too large for the clock runs only once.
    /// Returns the number of runs started.
    pub async fn run(&self, stop: StopSignal) -> u64 {
        let mut next = Some(tokio::time::Instant::now());

        let mut runs = 0;
        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = sleep_until_deadline(next) => {}
            }

            runs += 1;
            // Failures are already reported by run_once.
            let _ = self.run_once().await;
            next = deadline_after(self.interval);
        }

        tracing::info!(runs, "sync scheduler stopped");
        runs
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::audit::NoopAuditSink;
    use crate::cluster::{self, ClusterApplier};
    use crate::gitops::descriptor::FileDescriptorReader;
    use crate::gitops::error::{self, SourceError};
    use crate::gitops::reconciler::ReconcileOptions;
    use crate::gitops::render::{self, OverlayRenderer, RenderedManifest};
    use crate::gitops::source::{RepositoryHandle, SourceRepository};
    use crate::lifecycle::StopHandle;
    use crate::notification::{self, Notification};

    struct UnreachableSource {
        clones: AtomicUsize,
    }

    #[async_trait]
    impl SourceRepository for UnreachableSource {
        async fn clone_to(&self, _handle: &RepositoryHandle) -> error::Result<()> {
            self.clones.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::GitNetworkError("could not resolve host".to_string()))
        }

        async fn list_branches(&self, _handle: &RepositoryHandle) -> error::Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn fetch(&self, _handle: &RepositoryHandle) -> error::Result<()> {
            Ok(())
        }

        async fn checkout(&self, _handle: &RepositoryHandle, _branch: &str) -> error::Result<()> {
            Ok(())
        }

        async fn ls_remote(&self) -> error::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct NothingRenderer;

    #[async_trait]
    impl OverlayRenderer for NothingRenderer {
        async fn render(&self, _root: &Path, _overlay: &str) -> render::Result<Vec<RenderedManifest>> {
            Ok(Vec::new())
        }
    }

    struct NothingApplier;

    #[async_trait]
    impl ClusterApplier for NothingApplier {
        async fn apply(&self, _namespace: &str, _manifest: &str) -> cluster::Result<()> {
            Ok(())
        }

        async fn ping(&self) -> cluster::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: Notification) -> notification::Result<()> {
            self.sent.lock().unwrap().push(notification);
            Ok(())
        }
    }

    fn scheduler(
        clone_root: &Path,
        interval: Duration,
    ) -> (SyncScheduler, Arc<UnreachableSource>, Arc<RecordingNotifier>) {
        let source = Arc::new(UnreachableSource {
            clones: AtomicUsize::new(0),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let reconciler = Reconciler::new(
            source.clone(),
            Arc::new(FileDescriptorReader),
            Arc::new(NothingRenderer),
            Arc::new(NothingApplier),
            Arc::new(NoopAuditSink),
            ReconcileOptions {
                clone_root: clone_root.to_path_buf(),
                ..Default::default()
            },
        );
        let scheduler = SyncScheduler::new(
            Arc::new(reconciler),
            interval,
            notifier.clone(),
            "https://git.example.com/ops.git",
            AlertSettings::default(),
        );
        (scheduler, source, notifier)
    }

    #[tokio::test]
    async fn test_run_once_notifies_failure() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _source, notifier) = scheduler(dir.path(), Duration::from_secs(60));

        let err = scheduler.run_once().await.unwrap_err();
        assert_eq!(err.operation(), "clone");

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message, "error deploying https://git.example.com/ops.git");
        assert_eq!(sent[0].priority, "P3");
    }

    #[tokio::test]
    async fn test_loop_survives_failures_until_stopped() {
        let dir = TempDir::new().unwrap();
        let (scheduler, source, notifier) = scheduler(dir.path(), Duration::from_millis(20));
        let (handle, signal) = StopHandle::new();

        let task = tokio::spawn(async move { scheduler.run(signal).await });
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.stop();

        let runs = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(runs >= 2);
        assert_eq!(source.clones.load(Ordering::SeqCst) as u64, runs);
        assert_eq!(notifier.sent.lock().unwrap().len() as u64, runs);
    }

    #[tokio::test]
    async fn test_stopped_before_start_never_runs() {
        let dir = TempDir::new().unwrap();
        let (scheduler, source, _notifier) = scheduler(dir.path(), Duration::from_millis(20));
        let (handle, signal) = StopHandle::new();
        handle.stop();

        assert_eq!(scheduler.run(signal).await, 0);
        assert_eq!(source.clones.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_huge_interval_runs_once_and_stops() {
        let dir = TempDir::new().unwrap();
        let (scheduler, source, _notifier) = scheduler(dir.path(), Duration::MAX);
        let (handle, signal) = StopHandle::new();

        let task = tokio::spawn(async move { scheduler.run(signal).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();

        let runs = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("scheduler ignored stop")
            .unwrap();
        assert_eq!(runs, 1);
        assert_eq!(source.clones.load(Ordering::SeqCst), 1);
    }
}
