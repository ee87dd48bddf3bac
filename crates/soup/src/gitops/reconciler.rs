//! Reconciliation engine: clone → enumerate → checkout → render → apply.
//!
//! Each run owns exactly one [`RepositoryHandle`]; the working copy is
//! removed when the run ends, whatever the outcome. Branches and the
//! resources inside an entry are processed strictly in order, and runs on
//! the same reconciler are serialized so applies never interleave.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use super::descriptor::{DescriptorReader, KustomizationEntry};
use super::error::SourceError;
use super::render::{OverlayRenderer, RenderError};
use super::source::{normalize_branch_ref, RepositoryHandle, SourceRepository};
use crate::audit::{action, AuditEvent, AuditSink, SYSTEM_ACTOR};
use crate::cluster::{ClusterApplier, ClusterError};
use crate::notification::{AlertSettings, Notification};

/// How an entry's branch selector is compared with a branch name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorRule {
    /// The selector equals the branch name.
    Exact,
    /// The selector is a substring of the branch name.
    Contains,
}

impl SelectorRule {
    /// An empty selector matches no branch.
    pub fn matches(&self, selector: &str, branch: &str) -> bool {
        if selector.is_empty() {
            return false;
        }
        match self {
            SelectorRule::Exact => selector == branch,
            SelectorRule::Contains => branch.contains(selector),
        }
    }
}

/// What the all-branches loop does when a branch fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop at the first failing branch.
    #[default]
    FailFast,
    /// Visit every branch and report all failures together.
    Continue,
}

/// A reconciliation failure, tagged with the operation and branch.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("{operation}{}: {source}", branch_suffix(.branch))]
    Source {
        operation: &'static str,
        branch: Option<String>,
        #[source]
        source: SourceError,
    },

    #[error("render {overlay} for branch {branch}: {source}")]
    Render {
        branch: String,
        overlay: String,
        #[source]
        source: RenderError,
    },

    #[error("apply {resource} to namespace {namespace} for branch {branch}: {source}")]
    Apply {
        branch: String,
        namespace: String,
        resource: String,
        #[source]
        source: ClusterError,
    },

    #[error("{} branch(es) failed: {}", .failures.len(), summarize(.failures))]
    Branches {
        failures: Vec<ReconcileError>,
        report: ReconcileReport,
    },
}

fn branch_suffix(branch: &Option<String>) -> String {
    branch
        .as_ref()
        .map(|b| format!(" {}", b))
        .unwrap_or_default()
}

fn summarize(failures: &[ReconcileError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ReconcileError {
    /// The operation that failed.
    pub fn operation(&self) -> &'static str {
        match self {
            ReconcileError::Source { operation, .. } => operation,
            ReconcileError::Render { .. } => "render",
            ReconcileError::Apply { .. } => "apply",
            ReconcileError::Branches { .. } => "reconcile",
        }
    }

    fn source_op(operation: &'static str, branch: Option<&str>) -> impl FnOnce(SourceError) -> Self {
        let branch = branch.map(str::to_string);
        move |source| ReconcileError::Source {
            operation,
            branch,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// A resource applied during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedResource {
    pub namespace: String,
    pub resource: String,
}

/// Outcome for one branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BranchReport {
    pub branch: String,
    pub matched_entries: usize,
    pub applied: Vec<AppliedResource>,
}

/// Outcome of a run, branches in visiting order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub branches: Vec<BranchReport>,
}

impl ReconcileReport {
    pub fn applied_count(&self) -> usize {
        self.branches.iter().map(|b| b.applied.len()).sum()
    }

    pub fn branch(&self, name: &str) -> Option<&BranchReport> {
        self.branches.iter().find(|b| b.branch == name)
    }
}

/// Tuning for a [`Reconciler`].
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Parent directory of every working copy.
    pub clone_root: PathBuf,
    /// Selector rule for [`Reconciler::reconcile_all_branches`].
    pub all_branches_rule: SelectorRule,
    /// Selector rule for [`Reconciler::reconcile_one_branch`].
    pub one_branch_rule: SelectorRule,
    pub failure_policy: FailurePolicy,
    /// Actor recorded on apply audit events.
    pub actor: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            clone_root: std::env::temp_dir().join("soup"),
            all_branches_rule: SelectorRule::Exact,
            one_branch_rule: SelectorRule::Contains,
            failure_policy: FailurePolicy::FailFast,
            actor: SYSTEM_ACTOR.to_string(),
        }
    }
}

/// Keeps a cluster in step with the branches of one repository.
pub struct Reconciler {
    source: Arc<dyn SourceRepository>,
    reader: Arc<dyn DescriptorReader>,
    renderer: Arc<dyn OverlayRenderer>,
    applier: Arc<dyn ClusterApplier>,
    audit: Arc<dyn AuditSink>,
    options: ReconcileOptions,
    run_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn SourceRepository>,
        reader: Arc<dyn DescriptorReader>,
        renderer: Arc<dyn OverlayRenderer>,
        applier: Arc<dyn ClusterApplier>,
        audit: Arc<dyn AuditSink>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            source,
            reader,
            renderer,
            applier,
            audit,
            options,
            run_lock: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    pub fn source(&self) -> &Arc<dyn SourceRepository> {
        &self.source
    }

    pub fn applier(&self) -> &Arc<dyn ClusterApplier> {
        &self.applier
    }

    /// Reconciles every remote branch, in listing order.
    pub async fn reconcile_all_branches(&self) -> Result<ReconcileReport> {
        let _guard = self.run_lock.lock().await;
        let handle = self.prepare().await?;

        let branches = self
            .source
            .list_branches(&handle)
            .await
            .map_err(ReconcileError::source_op("list branches", None))?;
        self.source
            .fetch(&handle)
            .await
            .map_err(ReconcileError::source_op("fetch", None))?;

        tracing::info!(count = branches.len(), "reconciling all branches");

        let mut report = ReconcileReport::default();
        let mut failures = Vec::new();
        for branch in &branches {
            match self
                .reconcile_branch(&handle, branch, self.options.all_branches_rule)
                .await
            {
                Ok(branch_report) => report.branches.push(branch_report),
                Err(e) => match self.options.failure_policy {
                    FailurePolicy::FailFast => return Err(e),
                    FailurePolicy::Continue => {
                        tracing::warn!(branch = %branch, error = %e, "branch failed, continuing");
                        failures.push(e);
                    }
                },
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(ReconcileError::Branches { failures, report })
        }
    }

    /// Reconciles the branch named by a webhook. `refs/heads/` is stripped.
    pub async fn reconcile_one_branch(&self, branch_ref: &str) -> Result<BranchReport> {
        let branch = normalize_branch_ref(branch_ref);
        let _guard = self.run_lock.lock().await;
        let handle = self.prepare().await?;

        self.source
            .fetch(&handle)
            .await
            .map_err(ReconcileError::source_op("fetch", Some(branch)))?;

        self.reconcile_branch(&handle, branch, self.options.one_branch_rule)
            .await
    }

    async fn prepare(&self) -> Result<RepositoryHandle> {
        let handle = RepositoryHandle::create(&self.options.clone_root)
            .map_err(ReconcileError::source_op("clone", None))?;
        self.source
            .clone_to(&handle)
            .await
            .map_err(ReconcileError::source_op("clone", None))?;
        Ok(handle)
    }

    async fn reconcile_branch(
        &self,
        handle: &RepositoryHandle,
        branch: &str,
        rule: SelectorRule,
    ) -> Result<BranchReport> {
        self.source
            .checkout(handle, branch)
            .await
            .map_err(ReconcileError::source_op("checkout", Some(branch)))?;

        let descriptor = self.reader.read(handle.path()).await;
        let matching: Vec<&KustomizationEntry> = descriptor
            .kustomizations
            .iter()
            .filter(|entry| rule.matches(&entry.branch_selector, branch))
            .collect();

        let mut report = BranchReport {
            branch: branch.to_string(),
            matched_entries: matching.len(),
            applied: Vec::new(),
        };

        if matching.is_empty() {
            tracing::debug!(branch, "no kustomization matches branch");
            return Ok(report);
        }

        for entry in matching {
            self.apply_entry(handle, branch, entry, &mut report).await?;
        }

        tracing::info!(
            branch,
            applied = report.applied.len(),
            "branch reconciled"
        );
        Ok(report)
    }

    async fn apply_entry(
        &self,
        handle: &RepositoryHandle,
        branch: &str,
        entry: &KustomizationEntry,
        report: &mut BranchReport,
    ) -> Result<()> {
        let manifests = self
            .renderer
            .render(handle.path(), &entry.overlay_path)
            .await
            .map_err(|source| ReconcileError::Render {
                branch: branch.to_string(),
                overlay: entry.overlay_path.clone(),
                source,
            })?;

        for manifest in manifests {
            let resource = manifest.identity();
            self.applier
                .apply(&entry.namespace, &manifest.yaml)
                .await
                .map_err(|source| ReconcileError::Apply {
                    branch: branch.to_string(),
                    namespace: entry.namespace.clone(),
                    resource: resource.clone(),
                    source,
                })?;

            tracing::info!(branch, namespace = %entry.namespace, resource = %resource, "applied");
            self.audit
                .record_or_log(AuditEvent::new(
                    action::APPLY,
                    self.options.actor.clone(),
                    format!(
                        "applied {} to namespace {} from branch {}",
                        resource, entry.namespace, branch
                    ),
                ))
                .await;

            report.applied.push(AppliedResource {
                namespace: entry.namespace.clone(),
                resource,
            });
        }

        Ok(())
    }
}

/// The alert raised when a run against `url` fails.
pub fn failure_notification(
    url: &str,
    error: &ReconcileError,
    settings: &AlertSettings,
) -> Notification {
    let mut notification =
        settings.notification(format!("error deploying {}", url), error.to_string());
    notification.tags.push(error.operation().to_string());
    notification
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_rules() {
        assert!(SelectorRule::Exact.matches("develop", "develop"));
        assert!(!SelectorRule::Exact.matches("feature", "feature/login"));
        assert!(SelectorRule::Contains.matches("feature", "feature/login"));
        assert!(!SelectorRule::Contains.matches("main", "develop"));
        assert!(!SelectorRule::Contains.matches("", "develop"));
        assert!(!SelectorRule::Exact.matches("", ""));
    }

    #[test]
    fn test_error_names_operation_and_branch() {
        let err = ReconcileError::source_op("checkout", Some("develop"))(
            SourceError::GitOperation("fatal: bad ref".to_string()),
        );
        assert_eq!(err.operation(), "checkout");
        assert_eq!(
            err.to_string(),
            "checkout develop: Git operation failed: fatal: bad ref"
        );

        let err = ReconcileError::source_op("clone", None)(SourceError::GitNetworkError(
            "could not resolve host".to_string(),
        ));
        assert!(err.to_string().starts_with("clone: "));
    }

    #[test]
    fn test_failure_notification() {
        let err = ReconcileError::Render {
            branch: "main".to_string(),
            overlay: "overlays/prod".to_string(),
            source: RenderError::InvalidOverlay("../x".to_string()),
        };
        let settings = AlertSettings {
            priority: "P2".to_string(),
            tags: vec!["soup".to_string()],
            teams: vec!["platform".to_string()],
        };
        let n = failure_notification("https://git.example.com/ops.git", &err, &settings);
        assert_eq!(n.message, "error deploying https://git.example.com/ops.git");
        assert!(n.description.contains("overlays/prod"));
        assert_eq!(n.tags, vec!["soup", "render"]);
        assert_eq!(n.priority, "P2");
        assert_eq!(n.teams, vec!["platform"]);
    }
}
