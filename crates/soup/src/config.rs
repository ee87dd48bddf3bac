//! Collaborator selection by URI.
//!
//! Each pluggable collaborator is chosen with an opaque URI whose scheme
//! names the concern and whose opaque part names the implementation:
//!
//! ```text
//! audit:noop | audit:log | audit:sqlite[?path=~/.soup/audit.db]
//! notifier:noop | notifier:console | notifier:opsgenie?host=https://api.opsgenie.com&apikey=...
//! informer:k8s?path=~/.kube/config&context=prod&resync=10m&mode=diff
//! svc:git?username=bot&tokenenv=GIT_TOKEN | svc:git?sshkey=~/.ssh/deploy
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::audit::{
    default_audit_path, AuditError, AuditSink, LogAuditSink, NoopAuditSink, SqliteAuditSink,
};
use crate::cluster::ClusterTarget;
use crate::gitops::GitAuth;
use crate::notification::{ConsoleNotifier, NoopNotifier, Notifier, OpsgenieNotifier};
use crate::secrets::{expand_home, SecretError, SecretSource};
use crate::watcher::{WatchError, WatchMode};

pub const DEFAULT_OPSGENIE_HOST: &str = "https://api.opsgenie.com";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("URI '{uri}' has scheme '{found}', expected '{expected}'")]
    UnsupportedScheme {
        uri: String,
        expected: &'static str,
        found: String,
    },

    #[error("Unsupported {concern} implementation '{name}'")]
    UnsupportedImplementation { concern: &'static str, name: String },

    #[error("URI '{uri}' is missing parameter '{name}'")]
    MissingParameter { uri: String, name: &'static str },

    #[error("Invalid duration '{0}', expected e.g. 30s, 10m, 2h, 1d or 1w")]
    InvalidDuration(String),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

struct OpaqueUri {
    raw: String,
    name: String,
    params: Vec<(String, String)>,
}

impl OpaqueUri {
    fn parse(raw: &str, expected: &'static str) -> Result<Self> {
        let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUri {
            uri: raw.to_string(),
            reason: e.to_string(),
        })?;

        if url.scheme() != expected {
            return Err(ConfigError::UnsupportedScheme {
                uri: raw.to_string(),
                expected,
                found: url.scheme().to_string(),
            });
        }
        if !url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUri {
                uri: raw.to_string(),
                reason: format!("expected '{}:<implementation>[?params]'", expected),
            });
        }

        Ok(Self {
            raw: raw.to_string(),
            name: url.path().to_string(),
            params: url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        })
    }

    /// Last non-empty value for `key`.
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    fn required(&self, key: &'static str) -> Result<&str> {
        self.param(key).ok_or_else(|| ConfigError::MissingParameter {
            uri: self.raw.clone(),
            name: key,
        })
    }

    fn unsupported(&self, concern: &'static str) -> ConfigError {
        ConfigError::UnsupportedImplementation {
            concern,
            name: self.name.clone(),
        }
    }
}

/// Parses `30s`, `10m`, `2h`, `1d`, `1w`, `500ms` and sums like `1h30m`.
/// A bare `0` means zero.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let invalid = || ConfigError::InvalidDuration(value.to_string());
    let s = value.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ms" => {
                total = total
                    .checked_add(Duration::from_millis(amount))
                    .ok_or_else(invalid)?;
                rest = &rest[unit_len..];
                continue;
            }
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            "w" => 604_800,
            _ => return Err(invalid()),
        };
        let seconds = amount.checked_mul(seconds_per_unit).ok_or_else(invalid)?;
        total = total
            .checked_add(Duration::from_secs(seconds))
            .ok_or_else(invalid)?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

/// Where audit events go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditTarget {
    Noop,
    Log,
    Sqlite { path: PathBuf },
}

impl AuditTarget {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = OpaqueUri::parse(uri, "audit")?;
        match uri.name.as_str() {
            "noop" => Ok(AuditTarget::Noop),
            "log" => Ok(AuditTarget::Log),
            "sqlite" => {
                let path = match uri.param("path") {
                    Some(path) => PathBuf::from(expand_home(path)),
                    None => default_audit_path().ok_or_else(|| ConfigError::MissingParameter {
                        uri: uri.raw.clone(),
                        name: "path",
                    })?,
                };
                Ok(AuditTarget::Sqlite { path })
            }
            _ => Err(uri.unsupported("audit")),
        }
    }
}

/// A built audit sink, plus the queryable log when the target has one.
pub struct AuditBackend {
    pub sink: Arc<dyn AuditSink>,
    pub log: Option<Arc<SqliteAuditSink>>,
}

/// Builds the sink; opening the SQLite log can fail.
pub fn build_audit(target: &AuditTarget) -> Result<AuditBackend> {
    Ok(match target {
        AuditTarget::Noop => AuditBackend {
            sink: Arc::new(NoopAuditSink),
            log: None,
        },
        AuditTarget::Log => AuditBackend {
            sink: Arc::new(LogAuditSink),
            log: None,
        },
        AuditTarget::Sqlite { path } => {
            let log = Arc::new(SqliteAuditSink::open(path)?);
            AuditBackend {
                sink: log.clone(),
                log: Some(log),
            }
        }
    })
}

/// Where failure alerts go.
#[derive(Debug, Clone)]
pub enum NotifierTarget {
    Noop,
    Console,
    Opsgenie { host: String, api_key: SecretString },
}

impl NotifierTarget {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = OpaqueUri::parse(uri, "notifier")?;
        match uri.name.as_str() {
            "noop" => Ok(NotifierTarget::Noop),
            "console" => Ok(NotifierTarget::Console),
            "opsgenie" => {
                let api_key = SecretSource {
                    value: uri.param("apikey").map(str::to_string),
                    file: uri.param("apikeyfile").map(str::to_string),
                    env_var: uri.param("apikeyenv").map(str::to_string),
                }
                .resolve()?;
                Ok(NotifierTarget::Opsgenie {
                    host: uri
                        .param("host")
                        .unwrap_or(DEFAULT_OPSGENIE_HOST)
                        .trim_end_matches('/')
                        .to_string(),
                    api_key,
                })
            }
            _ => Err(uri.unsupported("notifier")),
        }
    }
}

pub fn build_notifier(target: &NotifierTarget) -> Arc<dyn Notifier> {
    match target {
        NotifierTarget::Noop => Arc::new(NoopNotifier),
        NotifierTarget::Console => Arc::new(ConsoleNotifier),
        NotifierTarget::Opsgenie { host, api_key } => {
            Arc::new(OpsgenieNotifier::new(host.clone(), api_key.clone()))
        }
    }
}

/// Cluster connection and behaviour of the drift watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct InformerTarget {
    pub cluster: ClusterTarget,
    /// `None` disables periodic resync.
    pub resync: Option<Duration>,
    pub mode: WatchMode,
}

impl InformerTarget {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = OpaqueUri::parse(uri, "informer")?;
        if uri.name != "k8s" {
            return Err(uri.unsupported("informer"));
        }

        let resync = match uri.param("resync") {
            Some(raw) => Some(parse_duration(raw)?).filter(|d| !d.is_zero()),
            None => None,
        };
        let mode = match uri.param("mode") {
            Some(raw) => raw.parse::<WatchMode>()?,
            None => WatchMode::default(),
        };

        Ok(Self {
            cluster: ClusterTarget {
                path: uri.param("path").unwrap_or_default().to_string(),
                context: uri.param("context").map(str::to_string),
            },
            resync,
            mode,
        })
    }
}

/// Git credentials from a `svc:git` URI.
pub fn parse_vcs(uri: &str) -> Result<GitAuth> {
    let uri = OpaqueUri::parse(uri, "svc")?;
    if uri.name != "git" {
        return Err(uri.unsupported("svc"));
    }

    if let Some(key) = uri.param("sshkey") {
        return Ok(GitAuth::SshKey {
            key_path: Some(key.to_string()),
        });
    }

    let token = SecretSource {
        value: uri.param("token").map(str::to_string),
        file: uri.param("tokenfile").map(str::to_string),
        env_var: uri.param("tokenenv").map(str::to_string),
    };
    if !token.is_configured() {
        return Ok(GitAuth::None);
    }

    Ok(GitAuth::Token {
        username: uri.required("username")?.to_string(),
        token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7_200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("1w").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for bad in ["", "10", "m", "10y", "1.5h", "-1s", "h10"] {
            assert!(parse_duration(bad).is_err(), "{} should fail", bad);
        }
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        for bad in [
            "18446744073709551615s1s",
            "18446744073709551615ms18446744073709551615s",
            "18446744073709551615w",
            "99999999999999999999s",
        ] {
            assert!(
                matches!(parse_duration(bad), Err(ConfigError::InvalidDuration(_))),
                "{} should fail",
                bad
            );
        }
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_audit_targets() {
        assert_eq!(AuditTarget::parse("audit:noop").unwrap(), AuditTarget::Noop);
        assert_eq!(AuditTarget::parse("audit:log").unwrap(), AuditTarget::Log);
        assert_eq!(
            AuditTarget::parse("audit:sqlite?path=/var/lib/soup/audit.db").unwrap(),
            AuditTarget::Sqlite {
                path: PathBuf::from("/var/lib/soup/audit.db")
            }
        );
        match AuditTarget::parse("audit:sqlite").unwrap() {
            AuditTarget::Sqlite { path } => assert!(path.ends_with(".soup/audit.db")),
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_audit_target_errors() {
        assert!(matches!(
            AuditTarget::parse("notifier:noop"),
            Err(ConfigError::UnsupportedScheme { .. })
        ));
        assert!(matches!(
            AuditTarget::parse("audit:clover"),
            Err(ConfigError::UnsupportedImplementation { .. })
        ));
        assert!(matches!(
            AuditTarget::parse("audit:jsonl?path=/tmp/audit.jsonl"),
            Err(ConfigError::UnsupportedImplementation { .. })
        ));
        assert!(matches!(
            AuditTarget::parse("not a uri"),
            Err(ConfigError::InvalidUri { .. })
        ));
    }

    #[test]
    fn test_build_audit_exposes_sqlite_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = build_audit(&AuditTarget::Sqlite {
            path: dir.path().join("audit.db"),
        })
        .unwrap();
        assert!(backend.log.is_some());
        assert!(build_audit(&AuditTarget::Log).unwrap().log.is_none());
    }

    #[test]
    fn test_notifier_targets() {
        assert!(matches!(
            NotifierTarget::parse("notifier:console").unwrap(),
            NotifierTarget::Console
        ));

        match NotifierTarget::parse("notifier:opsgenie?host=https://api.eu.opsgenie.com/&apikey=k3y")
            .unwrap()
        {
            NotifierTarget::Opsgenie { host, api_key } => {
                assert_eq!(host, "https://api.eu.opsgenie.com");
                assert_eq!(api_key.expose_secret(), "k3y");
            }
            other => panic!("unexpected target {:?}", other),
        }

        assert!(matches!(
            NotifierTarget::parse("notifier:opsgenie"),
            Err(ConfigError::Secret(SecretError::NoSourceProvided))
        ));
    }

    #[test]
    fn test_informer_target() {
        let target =
            InformerTarget::parse("informer:k8s?path=/etc/kube/config&context=prod&resync=10m&mode=diff")
                .unwrap();
        assert_eq!(target.cluster.path, "/etc/kube/config");
        assert_eq!(target.cluster.context.as_deref(), Some("prod"));
        assert_eq!(target.resync, Some(Duration::from_secs(600)));
        assert_eq!(target.mode, WatchMode::Diff);

        let target = InformerTarget::parse("informer:k8s?resync=0").unwrap();
        assert_eq!(target.cluster, ClusterTarget::default());
        assert_eq!(target.resync, None);
        assert_eq!(target.mode, WatchMode::Watch);

        assert!(InformerTarget::parse("informer:k8s?mode=audit").is_err());
        assert!(InformerTarget::parse("informer:k8s?resync=soon").is_err());
        assert!(InformerTarget::parse("informer:noop").is_err());
    }

    #[test]
    fn test_vcs_credentials() {
        assert!(matches!(parse_vcs("svc:git").unwrap(), GitAuth::None));

        match parse_vcs("svc:git?username=bot&token=t0k3n").unwrap() {
            GitAuth::Token { username, token } => {
                assert_eq!(username, "bot");
                assert_eq!(token.resolve().unwrap().expose_secret(), "t0k3n");
            }
            other => panic!("unexpected auth {:?}", other),
        }

        assert!(matches!(
            parse_vcs("svc:git?sshkey=/keys/deploy").unwrap(),
            GitAuth::SshKey { key_path: Some(_) }
        ));
        assert!(matches!(
            parse_vcs("svc:git?token=t0k3n"),
            Err(ConfigError::MissingParameter { name: "username", .. })
        ));
    }
}
