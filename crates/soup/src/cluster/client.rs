//! Builds a `kube::Client` from a [`ClusterTarget`].

use std::path::PathBuf;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use super::{ClusterError, ClusterTarget, Result};
use crate::secrets::expand_home;

#[derive(Debug, PartialEq)]
enum TargetKind {
    ApiServer(http::Uri),
    Kubeconfig(PathBuf),
    Infer,
}

fn classify(target: &ClusterTarget) -> Result<TargetKind> {
    let path = target.path.trim();
    if path.is_empty() {
        return Ok(TargetKind::Infer);
    }

    if path.starts_with("http://") || path.starts_with("https://") {
        let uri = path
            .parse::<http::Uri>()
            .map_err(|e| ClusterError::InvalidTarget {
                target: path.to_string(),
                reason: e.to_string(),
            })?;
        return Ok(TargetKind::ApiServer(uri));
    }

    Ok(TargetKind::Kubeconfig(PathBuf::from(expand_home(path))))
}

/// Connects to the cluster named by `target`.
///
/// A URL is used as the API server address, any other path is read as a
/// kubeconfig (honouring `context`), and an empty path falls back to the
/// in-cluster or default configuration.
pub async fn build_client(target: &ClusterTarget) -> Result<Client> {
    let config = match classify(target)? {
        TargetKind::ApiServer(uri) => {
            tracing::info!(server = %uri, "using API server URL");
            Config::new(uri)
        }
        TargetKind::Kubeconfig(path) => {
            tracing::info!(kubeconfig = %path.display(), context = ?target.context, "loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(&path)?;
            let options = KubeConfigOptions {
                context: target.context.clone(),
                ..Default::default()
            };
            Config::from_custom_kubeconfig(kubeconfig, &options).await?
        }
        TargetKind::Infer => {
            tracing::info!("inferring cluster configuration");
            Config::infer().await?
        }
    };

    Ok(Client::try_from(config)?)
}
