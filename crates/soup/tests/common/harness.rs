//! Wires a [`Reconciler`] to fakes inside a temporary clone root.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use soup::audit::{action, MemoryAuditSink};
use soup::gitops::{FailurePolicy, FileDescriptorReader, ReconcileOptions, Reconciler};

use super::fakes::{FakeRenderer, FakeSource, RecordingApplier};

pub struct ReconcileHarness {
    clone_root: TempDir,
    pub source: Arc<FakeSource>,
    pub renderer: Arc<FakeRenderer>,
    pub applier: Arc<RecordingApplier>,
    pub audit: Arc<MemoryAuditSink>,
    pub reconciler: Arc<Reconciler>,
}

impl ReconcileHarness {
    pub fn new(source: FakeSource, renderer: FakeRenderer, applier: RecordingApplier) -> Self {
        Self::with_policy(source, renderer, applier, FailurePolicy::FailFast)
    }

    pub fn with_policy(
        source: FakeSource,
        renderer: FakeRenderer,
        applier: RecordingApplier,
        failure_policy: FailurePolicy,
    ) -> Self {
        let clone_root = TempDir::new().expect("Failed to create clone root");
        let source = Arc::new(source);
        let renderer = Arc::new(renderer);
        let applier = Arc::new(applier);
        let audit = Arc::new(MemoryAuditSink::new());

        let reconciler = Arc::new(Reconciler::new(
            source.clone(),
            Arc::new(FileDescriptorReader),
            renderer.clone(),
            applier.clone(),
            audit.clone(),
            ReconcileOptions {
                clone_root: clone_root.path().to_path_buf(),
                failure_policy,
                ..Default::default()
            },
        ));

        Self {
            clone_root,
            source,
            renderer,
            applier,
            audit,
            reconciler,
        }
    }

    pub fn clone_root(&self) -> &Path {
        self.clone_root.path()
    }

    /// Entries left behind in the clone root.
    pub fn leftover_working_copies(&self) -> usize {
        std::fs::read_dir(self.clone_root.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn apply_events(&self) -> Vec<String> {
        self.audit
            .with_action(action::APPLY)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }
}
