//! Source collaborator backed by the git CLI.

use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use super::auth::{build_auth_env, GitAuth};
use super::parse::{format_git_error, parse_ls_remote_heads};
use crate::audit::{action, AuditEvent, AuditSink, SYSTEM_ACTOR};
use crate::gitops::error::{classify_git_error, Result, SourceError};
use crate::gitops::source::{RepositoryHandle, SourceRepository};

/// Clones and inspects one remote through `git`.
pub struct GitSource {
    url: String,
    auth: GitAuth,
    audit: Arc<dyn AuditSink>,
    actor: String,
}

impl GitSource {
    /// Creates a source for `url`. Accepts URLs with a scheme, scp-style
    /// `user@host:path` remotes and local paths.
    pub fn new(url: impl Into<String>, auth: GitAuth, audit: Arc<dyn AuditSink>) -> Result<Self> {
        let url = url.into();
        validate_remote(&url)?;
        Ok(Self {
            url,
            auth,
            audit,
            actor: SYSTEM_ACTOR.to_string(),
        })
    }

    /// Actor recorded on audit events.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn remote_heads(&self) -> Result<Vec<String>> {
        let output = self
            .run_git(None, &["ls-remote", "--heads", &self.url])
            .await?;
        Ok(parse_ls_remote_heads(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn run_git(&self, cwd: Option<&Path>, args: &[&str]) -> Result<Output> {
        let auth = build_auth_env(&self.auth)?;

        let mut cmd = Command::new("git");
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &auth.env_vars {
            cmd.env(key, value);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| SourceError::GitOperation(format!("Failed to run git: {}", e)))?;
        drop(auth);

        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }

    fn require_clone(handle: &RepositoryHandle) -> Result<&Path> {
        let path = handle.path();
        if path.join(".git").exists() {
            Ok(path)
        } else {
            Err(SourceError::GitNotCloned(path.to_path_buf()))
        }
    }

    async fn audit(&self, action: &str, message: String) {
        self.audit
            .record_or_log(AuditEvent::new(action, self.actor.clone(), message))
            .await;
    }
}

#[async_trait]
impl SourceRepository for GitSource {
    async fn clone_to(&self, handle: &RepositoryHandle) -> Result<()> {
        let location = handle.path().to_string_lossy().into_owned();
        log::info!("Cloning {} into {}", self.url, location);

        self.run_git(None, &["clone", "--quiet", &self.url, &location])
            .await?;

        self.audit(
            action::PLAIN_CLONE,
            format!("cloned {} into {}", self.url, location),
        )
        .await;
        Ok(())
    }

    async fn list_branches(&self, handle: &RepositoryHandle) -> Result<Vec<String>> {
        let path = Self::require_clone(handle)?;
        let output = self
            .run_git(Some(path), &["ls-remote", "--heads", "origin"])
            .await?;
        let branches = parse_ls_remote_heads(&String::from_utf8_lossy(&output.stdout));

        self.audit(
            action::GET_BRANCH_NAMES,
            format!("listed {} branches of {}", branches.len(), self.url),
        )
        .await;
        Ok(branches)
    }

    async fn fetch(&self, handle: &RepositoryHandle) -> Result<()> {
        let path = Self::require_clone(handle)?;
        self.run_git(Some(path), &["fetch", "--prune", "--quiet", "origin"])
            .await?;

        self.audit(action::FETCH, format!("fetched {}", self.url))
            .await;
        Ok(())
    }

    async fn checkout(&self, handle: &RepositoryHandle, branch: &str) -> Result<()> {
        let path = Self::require_clone(handle)?;
        let remote_ref = format!("origin/{}", branch);
        self.run_git(
            Some(path),
            &["checkout", "--quiet", "--force", "-B", branch, &remote_ref],
        )
        .await?;

        log::debug!("Checked out {} in {}", branch, path.display());
        self.audit(
            action::CHECKOUT,
            format!("checked out {} of {}", branch, self.url),
        )
        .await;
        Ok(())
    }

    async fn ls_remote(&self) -> Result<Vec<String>> {
        let branches = self.remote_heads().await?;

        self.audit(action::LS_REMOTE, format!("listed remote {}", self.url))
            .await;
        Ok(branches)
    }

    async fn reachable(&self) -> Result<()> {
        self.remote_heads().await.map(|_| ())
    }
}

fn validate_remote(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(SourceError::InvalidRemote {
            url: url.to_string(),
            reason: "remote URL is empty".to_string(),
        });
    }

    if url.contains("://") {
        let parsed = url::Url::parse(url).map_err(|e| SourceError::InvalidRemote {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https" | "ssh" | "git" | "file") {
            return Err(SourceError::InvalidRemote {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
    }

    Ok(())
}
