//! Credentials handed to the git CLI.

use std::path::PathBuf;

use secrecy::ExposeSecret;

use crate::gitops::error::{Result, SourceError};
use crate::secrets::{expand_home, SecretSource};

/// How git authenticates against the remote.
#[derive(Debug, Clone, Default)]
pub enum GitAuth {
    /// Rely on the URL or the ambient git configuration.
    #[default]
    None,
    /// HTTPS basic auth, answered through a temporary askpass script.
    Token {
        username: String,
        token: SecretSource,
    },
    /// SSH private key. Defaults to `~/.ssh/id_ed25519`.
    SshKey { key_path: Option<String> },
}

/// Escapes a value for safe use in single-quoted shell strings.
pub fn shell_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Deletes the askpass script when dropped so tokens never outlive the
/// git command that needed them.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to clean up askpass script: {}", e);
            }
        }
    }
}

/// Environment for one git invocation.
#[derive(Debug)]
pub struct AuthEnv {
    pub env_vars: Vec<(String, String)>,
    /// Must outlive the git command.
    pub _cleanup: AskpassCleanup,
}

impl AuthEnv {
    fn new(env_vars: Vec<(String, String)>, cleanup: AskpassCleanup) -> Self {
        Self {
            env_vars,
            _cleanup: cleanup,
        }
    }
}

/// Builds the environment for a git command. Interactive prompts are always
/// disabled so a missing credential fails instead of hanging.
pub fn build_auth_env(auth: &GitAuth) -> Result<AuthEnv> {
    let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];

    match auth {
        GitAuth::None => Ok(AuthEnv::new(env, AskpassCleanup::empty())),
        GitAuth::Token { username, token } => {
            let token = token.resolve().map_err(|e| {
                SourceError::GitAuthFailed(format!("Failed to resolve git token: {}", e))
            })?;
            let script = askpass_script(username, token.expose_secret());
            let path = write_askpass_script(&script)?;
            let cleanup = AskpassCleanup::new(path.clone());

            let path = path
                .to_str()
                .ok_or_else(|| {
                    SourceError::GitAuthFailed(
                        "Temp directory path contains non-UTF8 characters".to_string(),
                    )
                })?
                .to_string();
            env.push(("GIT_ASKPASS".to_string(), path));
            Ok(AuthEnv::new(env, cleanup))
        }
        GitAuth::SshKey { key_path } => {
            let key_path = match key_path.as_deref().filter(|p| !p.is_empty()) {
                Some(path) => PathBuf::from(expand_home(path)),
                None => dirs::home_dir()
                    .map(|h| h.join(".ssh").join("id_ed25519"))
                    .unwrap_or_else(|| PathBuf::from(".ssh/id_ed25519")),
            };

            if !key_path.exists() {
                return Err(SourceError::GitAuthFailed(format!(
                    "SSH key file not found: {}",
                    key_path.display()
                )));
            }

            let escaped = shell_escape(&key_path.display().to_string());
            let quoted = if escaped.starts_with('-') {
                format!("'./{}'", escaped)
            } else {
                format!("'{}'", escaped)
            };
            env.push((
                "GIT_SSH_COMMAND".to_string(),
                format!("ssh -i {} -o StrictHostKeyChecking=accept-new", quoted),
            ));
            Ok(AuthEnv::new(env, AskpassCleanup::empty()))
        }
    }
}

/// Git calls the askpass program once for the username and once for the
/// password, passing the prompt as the first argument.
fn askpass_script(username: &str, token: &str) -> String {
    format!(
        "#!/bin/sh\ncase \"$1\" in\n  Username*) echo '{}' ;;\n  *) echo '{}' ;;\nesac\n",
        shell_escape(username),
        shell_escape(token)
    )
}

fn write_askpass_script(script: &str) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!(".soup-askpass-{}.sh", uuid::Uuid::new_v4()));

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&path)?;
        std::io::Write::write_all(&mut file, script.as_bytes())?;
    }

    #[cfg(not(unix))]
    std::fs::write(&path, script)?;

    Ok(path)
}
