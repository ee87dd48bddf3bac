//! Overlay rendering.

use std::path::{Component, Path};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;
use tokio::process::Command;

/// Errors raised while rendering an overlay.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Overlay path '{0}' must be relative and stay inside the repository")]
    InvalidOverlay(String),

    #[error("Failed to run renderer for '{overlay}': {source}")]
    Spawn {
        overlay: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Renderer failed for '{overlay}': {message}")]
    Failed { overlay: String, message: String },

    #[error("Rendered output is not valid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Rendered document {index} is not a resource: {reason}")]
    InvalidManifest { index: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// One fully-resolved resource manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedManifest {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    /// The single-document YAML handed to the cluster applier.
    pub yaml: String,
}

impl RenderedManifest {
    /// `Kind/name`, used in logs and audit messages.
    pub fn identity(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

/// Turns an overlay directory into resource manifests, in render order.
#[async_trait]
pub trait OverlayRenderer: Send + Sync {
    async fn render(&self, root: &Path, overlay: &str) -> Result<Vec<RenderedManifest>>;
}

/// Renders overlays with the `kustomize` binary.
#[derive(Debug, Clone)]
pub struct KustomizeRenderer {
    binary: String,
}

impl Default for KustomizeRenderer {
    fn default() -> Self {
        Self::new("kustomize")
    }
}

impl KustomizeRenderer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl OverlayRenderer for KustomizeRenderer {
    async fn render(&self, root: &Path, overlay: &str) -> Result<Vec<RenderedManifest>> {
        check_overlay(overlay)?;
        let target = root.join(overlay);

        let output = Command::new(&self.binary)
            .arg("build")
            .arg("--load-restrictor=LoadRestrictionsRootOnly")
            .arg(&target)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RenderError::Spawn {
                overlay: overlay.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(RenderError::Failed {
                overlay: overlay.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let manifests = split_documents(&String::from_utf8_lossy(&output.stdout))?;
        tracing::debug!(overlay, count = manifests.len(), "rendered overlay");
        Ok(manifests)
    }
}

fn check_overlay(overlay: &str) -> Result<()> {
    let path = Path::new(overlay);
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
    if overlay.is_empty() || escapes {
        return Err(RenderError::InvalidOverlay(overlay.to_string()));
    }
    Ok(())
}

/// Splits a multi-document YAML stream into one manifest per resource,
/// skipping empty documents.
pub fn split_documents(stream: &str) -> Result<Vec<RenderedManifest>> {
    let mut manifests = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(stream).enumerate() {
        let value = Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }

        let field = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);
        let invalid = |reason: &str| RenderError::InvalidManifest {
            index,
            reason: reason.to_string(),
        };

        let api_version = field(&value, "apiVersion").ok_or_else(|| invalid("missing apiVersion"))?;
        let kind = field(&value, "kind").ok_or_else(|| invalid("missing kind"))?;
        let name = value
            .get("metadata")
            .and_then(|m| field(m, "name"))
            .ok_or_else(|| invalid("missing metadata.name"))?;

        manifests.push(RenderedManifest {
            api_version,
            kind,
            name,
            yaml: serde_yaml::to_string(&value)?,
        });
    }

    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = r#"apiVersion: v1
kind: Service
metadata:
  name: web
spec:
  ports:
  - port: 80
---
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  labels:
    app: web
"#;

    #[test]
    fn test_split_keeps_order_and_skips_empty() {
        let manifests = split_documents(STREAM).unwrap();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0].identity(), "Service/web");
        assert_eq!(manifests[0].api_version, "v1");
        assert_eq!(manifests[1].identity(), "Deployment/web");
        assert_eq!(manifests[1].api_version, "apps/v1");
        assert!(manifests[1].yaml.contains("app: web"));
    }

    #[test]
    fn test_split_empty_stream() {
        assert!(split_documents("").unwrap().is_empty());
    }

    #[test]
    fn test_split_rejects_document_without_kind() {
        let err = split_documents("apiVersion: v1\nmetadata:\n  name: x\n").unwrap_err();
        assert!(matches!(err, RenderError::InvalidManifest { index: 0, .. }));
    }

    #[test]
    fn test_overlay_must_stay_in_root() {
        assert!(check_overlay("overlays/staging").is_ok());
        assert!(check_overlay("./overlays/prod").is_ok());
        assert!(check_overlay("../other").is_err());
        assert!(check_overlay("/etc").is_err());
        assert!(check_overlay("").is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_reports_spawn_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let renderer = KustomizeRenderer::new("soup-test-no-such-kustomize");
        let err = renderer.render(dir.path(), "overlays/dev").await.unwrap_err();
        assert!(matches!(err, RenderError::Spawn { .. }));
    }
}
