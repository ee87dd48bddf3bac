//! In-memory stand-ins for the reconciler's collaborators.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use soup::cluster::{self, ClusterApplier, ClusterError};
use soup::gitops::error::{self, SourceError};
use soup::gitops::render::{self, OverlayRenderer, RenderError, RenderedManifest};
use soup::gitops::{RepositoryHandle, SourceRepository, DESCRIPTOR_FILE};
use soup::notification::{self, Notification, Notifier};

/// A single-document manifest for `kind`/`name`.
pub fn manifest(kind: &str, name: &str) -> RenderedManifest {
    RenderedManifest {
        api_version: "v1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        yaml: format!("apiVersion: v1\nkind: {}\nmetadata:\n  name: {}\n", kind, name),
    }
}

/// Descriptor YAML with one entry per `(namespace, branch, overlay)`.
pub fn descriptor(entries: &[(&str, &str, &str)]) -> String {
    let mut yaml = String::from("kustomizations:\n");
    for (namespace, branch, overlay) in entries {
        yaml.push_str(&format!(
            "  - namespace: {}\n    branch: {}\n    overlay: {}\n",
            namespace, branch, overlay
        ));
    }
    yaml
}

/// Remote with a fixed branch list. Checking out a branch writes that
/// branch's descriptor into the working copy.
#[derive(Default)]
pub struct FakeSource {
    branches: Vec<String>,
    descriptors: HashMap<String, String>,
    failing_checkouts: HashSet<String>,
    unreachable: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    working_copies: Mutex<Vec<PathBuf>>,
}

impl FakeSource {
    pub fn new(branches: &[&str]) -> Self {
        Self {
            branches: branches.iter().map(|b| b.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_descriptor(mut self, branch: &str, yaml: impl Into<String>) -> Self {
        self.descriptors.insert(branch.to_string(), yaml.into());
        self
    }

    /// Same descriptor on every listed branch.
    pub fn with_shared_descriptor(mut self, yaml: &str) -> Self {
        for branch in self.branches.clone() {
            self.descriptors.insert(branch, yaml.to_string());
        }
        self
    }

    pub fn failing_checkout(mut self, branch: &str) -> Self {
        self.failing_checkouts.insert(branch.to_string());
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Sleeps inside every operation so concurrent runs would interleave.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn checkouts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("checkout ").map(str::to_string))
            .collect()
    }

    pub fn working_copies(&self) -> Vec<PathBuf> {
        self.working_copies.lock().unwrap().clone()
    }

    async fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SourceRepository for FakeSource {
    async fn clone_to(&self, handle: &RepositoryHandle) -> error::Result<()> {
        self.record("clone").await;
        if self.unreachable {
            return Err(SourceError::GitNetworkError(
                "could not resolve host: git.example.com".to_string(),
            ));
        }
        std::fs::create_dir_all(handle.path())?;
        self.working_copies
            .lock()
            .unwrap()
            .push(handle.path().to_path_buf());
        Ok(())
    }

    async fn list_branches(&self, _handle: &RepositoryHandle) -> error::Result<Vec<String>> {
        self.record("list").await;
        Ok(self.branches.clone())
    }

    async fn fetch(&self, _handle: &RepositoryHandle) -> error::Result<()> {
        self.record("fetch").await;
        Ok(())
    }

    async fn checkout(&self, handle: &RepositoryHandle, branch: &str) -> error::Result<()> {
        self.record(format!("checkout {}", branch)).await;
        if self.failing_checkouts.contains(branch) {
            return Err(SourceError::GitOperation(format!(
                "error: pathspec '{}' did not match",
                branch
            )));
        }

        let path = handle.path().join(DESCRIPTOR_FILE);
        match self.descriptors.get(branch) {
            Some(yaml) => std::fs::write(&path, yaml)?,
            None if path.exists() => std::fs::remove_file(&path)?,
            None => {}
        }
        Ok(())
    }

    async fn ls_remote(&self) -> error::Result<Vec<String>> {
        if self.unreachable {
            return Err(SourceError::GitNetworkError("connection refused".to_string()));
        }
        Ok(self.branches.clone())
    }
}

/// Renders overlays from a fixed table.
#[derive(Default)]
pub struct FakeRenderer {
    overlays: HashMap<String, Vec<RenderedManifest>>,
    calls: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overlay(mut self, overlay: &str, manifests: Vec<RenderedManifest>) -> Self {
        self.overlays.insert(overlay.to_string(), manifests);
        self
    }

    pub fn rendered_overlays(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, overlay)| overlay.clone())
            .collect()
    }
}

#[async_trait]
impl OverlayRenderer for FakeRenderer {
    async fn render(&self, root: &Path, overlay: &str) -> render::Result<Vec<RenderedManifest>> {
        self.calls
            .lock()
            .unwrap()
            .push((root.to_path_buf(), overlay.to_string()));
        self.overlays
            .get(overlay)
            .cloned()
            .ok_or_else(|| RenderError::Failed {
                overlay: overlay.to_string(),
                message: "no kustomization.yaml found".to_string(),
            })
    }
}

/// Records every apply; can refuse a named resource or fail pings.
#[derive(Default)]
pub struct RecordingApplier {
    applied: Mutex<Vec<(String, String)>>,
    reject_name: Option<String>,
    unhealthy: bool,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(name: &str) -> Self {
        Self {
            reject_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn unhealthy() -> Self {
        Self {
            unhealthy: true,
            ..Default::default()
        }
    }

    /// `(namespace, manifest)` pairs in apply order.
    pub fn applied(&self) -> Vec<(String, String)> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterApplier for RecordingApplier {
    async fn apply(&self, namespace: &str, manifest: &str) -> cluster::Result<()> {
        if let Some(name) = &self.reject_name {
            if manifest.contains(&format!("name: {}\n", name)) {
                return Err(ClusterError::Manifest(format!("{} is immutable", name)));
            }
        }
        self.applied
            .lock()
            .unwrap()
            .push((namespace.to_string(), manifest.to_string()));
        Ok(())
    }

    async fn ping(&self) -> cluster::Result<()> {
        if self.unhealthy {
            return Err(ClusterError::Unhealthy("connection refused".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> notification::Result<()> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}
