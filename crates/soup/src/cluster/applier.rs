//! Server-side apply through kube-rs.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::{self, Scope};
use kube::Client;

use super::{ClusterApplier, ClusterError, Result};

/// Field manager recorded on every applied object.
pub const FIELD_MANAGER: &str = "soup-controller";

/// Applies manifests with server-side apply.
#[derive(Clone)]
pub struct KubeApplier {
    client: Client,
}

impl KubeApplier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Decodes a manifest and extracts its group/version/kind.
fn decode_manifest(manifest: &str) -> Result<(DynamicObject, GroupVersionKind)> {
    let object: DynamicObject = serde_yaml::from_str(manifest)
        .map_err(|e| ClusterError::Manifest(e.to_string()))?;

    let types = object
        .types
        .as_ref()
        .ok_or_else(|| ClusterError::Manifest("missing apiVersion/kind".to_string()))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    let gvk = GroupVersionKind::gvk(group, version, &types.kind);

    if object.metadata.name.as_deref().unwrap_or_default().is_empty() {
        return Err(ClusterError::Manifest(format!(
            "{} without metadata.name",
            types.kind
        )));
    }

    Ok((object, gvk))
}

#[async_trait]
impl ClusterApplier for KubeApplier {
    async fn apply(&self, namespace: &str, manifest: &str) -> Result<()> {
        let (mut object, gvk) = decode_manifest(manifest)?;
        let (resource, capabilities) = discovery::pinned_kind(&self.client, &gvk).await?;

        let api: Api<DynamicObject> = if capabilities.scope == Scope::Namespaced {
            object.metadata.namespace = Some(namespace.to_string());
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        } else {
            object.metadata.namespace = None;
            Api::all_with(self.client.clone(), &resource)
        };

        let name = object.metadata.name.clone().unwrap_or_default();
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&name, &params, &Patch::Apply(&object)).await?;

        tracing::debug!(kind = %gvk.kind, name = %name, namespace, "server-side applied");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let request = http::Request::get("/healthz")
            .body(Vec::new())
            .map_err(|e| ClusterError::Unhealthy(e.to_string()))?;
        let body = self.client.request_text(request).await?;

        if body.trim() == "ok" {
            Ok(())
        } else {
            Err(ClusterError::Unhealthy(format!(
                "/healthz answered '{}'",
                body.trim()
            )))
        }
    }
}
