//! Resource kinds in `group/version/resource` form.

use std::fmt;
use std::str::FromStr;

use kube::core::GroupVersion;
use kube::discovery::{self, verbs, ApiCapabilities, ApiResource};
use kube::Client;
use serde::{Deserialize, Serialize};

use super::{Result, WatchError};

/// A parsed resource kind: `v1/services` or `apps/v1/deployments`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    /// Plural resource name.
    pub resource: String,
}

impl ResourceKind {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Looks the kind up in the cluster's discovery data. Fails if the
    /// cluster does not serve it or it cannot be watched.
    pub async fn resolve(&self, client: &Client) -> Result<(ApiResource, ApiCapabilities)> {
        let gv = GroupVersion::gv(&self.group, &self.version);
        let group = discovery::pinned_group(client, &gv)
            .await
            .map_err(|source| WatchError::Discovery {
                kind: self.to_string(),
                source,
            })?;

        let (resource, capabilities) = group
            .versioned_resources(&self.version)
            .into_iter()
            .find(|(ar, _)| ar.plural == self.resource)
            .ok_or_else(|| WatchError::UnknownKind(self.to_string()))?;

        if !capabilities.supports_operation(verbs::WATCH) {
            return Err(WatchError::NotWatchable(self.to_string()));
        }

        Ok((resource, capabilities))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

impl FromStr for ResourceKind {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        let (group, version, resource) = match parts.as_slice() {
            [version, resource] => ("", *version, *resource),
            [group, version, resource] if !group.is_empty() => (*group, *version, *resource),
            _ => return Err(WatchError::InvalidKind(s.to_string())),
        };

        if version.is_empty() || resource.is_empty() {
            return Err(WatchError::InvalidKind(s.to_string()));
        }

        Ok(Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_lowercase(),
        })
    }
}

impl TryFrom<String> for ResourceKind {
    type Error = WatchError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ResourceKind> for String {
    fn from(kind: ResourceKind) -> Self {
        kind.to_string()
    }
}
