//! Source side of the reconciler.
//!
//! - Git working copies scoped to a single run
//! - Branch descriptors (`.soup.yaml`) mapping branches to overlays
//! - Overlay rendering through kustomize
//! - The reconciliation engine and its periodic scheduler

pub mod descriptor;
pub mod error;
pub mod git;
pub mod reconciler;
pub mod render;
pub mod source;
pub mod sync_scheduler;

pub use descriptor::{
    DeploymentDescriptor, DescriptorReader, FileDescriptorReader, KustomizationEntry,
    DESCRIPTOR_FILE,
};
pub use error::{Result, SourceError};
pub use git::{GitAuth, GitSource};
pub use reconciler::{
    failure_notification, AppliedResource, BranchReport, FailurePolicy, ReconcileError,
    ReconcileOptions, ReconcileReport, Reconciler, SelectorRule,
};
pub use render::{KustomizeRenderer, OverlayRenderer, RenderError, RenderedManifest};
pub use source::{normalize_branch_ref, RepositoryHandle, SourceRepository};
pub use sync_scheduler::SyncScheduler;
