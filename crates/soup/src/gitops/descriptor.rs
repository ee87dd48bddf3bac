//! Per-repository deployment descriptor (`.soup.yaml`).
//!
//! ```yaml
//! kustomizations:
//!   - namespace: staging
//!     branch: develop
//!     overlay: overlays/staging
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Descriptor file name at the root of every checked-out branch.
pub const DESCRIPTOR_FILE: &str = ".soup.yaml";

/// One overlay deployed into one namespace for matching branches.
/// Fields missing from the file read as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KustomizationEntry {
    pub namespace: String,
    /// Branch selector, matched against the checked-out branch name.
    #[serde(rename = "branch")]
    pub branch_selector: String,
    /// Overlay directory relative to the repository root.
    #[serde(rename = "overlay")]
    pub overlay_path: String,
}

#[derive(Debug, Default, Deserialize)]
struct DescriptorFile {
    #[serde(default)]
    kustomizations: Vec<KustomizationEntry>,
}

/// The entries declared by one checkout, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentDescriptor {
    pub root: PathBuf,
    pub kustomizations: Vec<KustomizationEntry>,
}

impl DeploymentDescriptor {
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            kustomizations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kustomizations.is_empty()
    }
}

/// Reads the descriptor of a checked-out working copy. Never fails.
#[async_trait]
pub trait DescriptorReader: Send + Sync {
    async fn read(&self, root: &Path) -> DeploymentDescriptor;
}

/// Reads [`DESCRIPTOR_FILE`] from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDescriptorReader;

#[async_trait]
impl DescriptorReader for FileDescriptorReader {
    async fn read(&self, root: &Path) -> DeploymentDescriptor {
        let path = root.join(DESCRIPTOR_FILE);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no descriptor file, nothing to deploy");
                return DeploymentDescriptor::empty(root);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read descriptor");
                return DeploymentDescriptor::empty(root);
            }
        };

        match parse_descriptor(&content) {
            Ok(kustomizations) => DeploymentDescriptor {
                root: root.to_path_buf(),
                kustomizations,
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "invalid descriptor, ignoring");
                DeploymentDescriptor::empty(root)
            }
        }
    }
}

fn parse_descriptor(content: &str) -> Result<Vec<KustomizationEntry>, serde_yaml::Error> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file: DescriptorFile = serde_yaml::from_str(content)?;
    Ok(file.kustomizations)
}
