use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// GitOps reconciler: keeps a Kubernetes cluster in sync with the branches
/// of a git repository and audits configuration drift.
#[derive(Parser, Debug)]
#[command(name = "soup")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    /// Audit sink URI (audit:noop, audit:log, audit:sqlite?path=<file>).
    #[arg(long, env = "SOUP_AUDIT_URI", default_value = "audit:log", global = true)]
    pub audit_uri: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    /// Log level, overridden by RUST_LOG.
    #[arg(long, env = "SOUP_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[arg(long, env = "SOUP_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reconcile a repository against the cluster.
    Sync(SyncCmd),
    /// Audit every add, update and delete of the watched resources.
    Kubewatch(WatchCmd),
    /// Audit only changes to the watched resources, as diffs.
    Kubediff(WatchCmd),
    /// Print version information.
    Version(VersionCmd),
}

#[derive(Args, Debug)]
pub struct SyncCmd {
    #[command(flatten)]
    pub alert: AlertArgs,

    #[command(flatten)]
    pub actuator: ActuatorArgs,

    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Parent directory of the temporary working copies.
    #[arg(long, env = "SOUP_CLONE_ROOT", global = true)]
    pub clone_root: Option<PathBuf>,

    /// Keep reconciling the remaining branches after one fails.
    #[arg(long, env = "SOUP_CONTINUE_ON_ERROR", global = true)]
    pub continue_on_error: bool,

    #[command(subcommand)]
    pub command: SyncSubcmd,
}

#[derive(Subcommand, Debug)]
pub enum SyncSubcmd {
    /// Reconcile every branch once, or on an interval.
    Repo(RepoArgs),
    /// Serve the Bitbucket webhook and reconcile pushed branches.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
pub struct RepoArgs {
    /// Repository to sync.
    pub url: String,

    #[command(flatten)]
    pub vcs: VcsArgs,

    /// Re-run every interval (e.g. 10m) instead of once.
    #[arg(long, env = "SOUP_SYNC_INTERVAL")]
    pub interval: Option<String>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Repository to sync.
    pub url: String,

    #[command(flatten)]
    pub vcs: VcsArgs,

    /// Webhook HMAC secret.
    #[arg(long, env = "SOUP_VCS_WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    /// File holding the webhook secret.
    #[arg(long, env = "SOUP_VCS_WEBHOOK_SECRET_FILE")]
    pub webhook_secret_file: Option<String>,

    /// Environment variable holding the webhook secret.
    #[arg(long, env = "SOUP_VCS_WEBHOOK_SECRET_ENV")]
    pub webhook_secret_env: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct VcsArgs {
    /// Version control URI (svc:git?username=<u>&tokenenv=<VAR> or svc:git?sshkey=<path>).
    #[arg(long, env = "SOUP_VCS_URI", default_value = "svc:git", hide_env_values = true)]
    pub vcs_uri: String,
}

#[derive(Args, Debug, Clone)]
pub struct AlertArgs {
    /// Notifier URI (notifier:noop, notifier:console, notifier:opsgenie?host=<url>&apikey=<key>).
    #[arg(long, env = "SOUP_ALERT_URI", default_value = "notifier:console", global = true, hide_env_values = true)]
    pub alert_uri: String,

    #[arg(long, env = "SOUP_ALERT_PRIORITY", default_value = "P3", global = true)]
    pub alert_priority: String,

    #[arg(long = "alert-tag", env = "SOUP_ALERT_TAGS", value_delimiter = ',', global = true)]
    pub alert_tags: Vec<String>,

    #[arg(long = "alert-team", env = "SOUP_ALERT_TEAMS", value_delimiter = ',', global = true)]
    pub alert_teams: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ActuatorArgs {
    /// Listen address of the actuator server.
    #[arg(long, env = "SOUP_ACTUATOR_ADDRESS", default_value = "0.0.0.0:8081", global = true)]
    pub actuator_address: String,

    /// Path prefix of every actuator route.
    #[arg(long, env = "SOUP_ACTUATOR_ROOT", default_value = soup::actuator::DEFAULT_ROOT, global = true)]
    pub actuator_root: String,
}

#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Kubeconfig path or API server URL; in-cluster config when empty.
    #[arg(long, env = "SOUP_K8S_PATH", default_value = "", global = true)]
    pub k8s_path: String,

    /// Kubeconfig context; the current context when unset.
    #[arg(long, env = "SOUP_K8S_CONTEXT", global = true)]
    pub k8s_context: Option<String>,
}

#[derive(Args, Debug)]
pub struct WatchCmd {
    #[command(flatten)]
    pub alert: AlertArgs,

    #[command(flatten)]
    pub actuator: ActuatorArgs,

    /// Informer URI (informer:k8s?path=<kubeconfig>&context=<ctx>&resync=<dur>).
    #[arg(long, env = "SOUP_INFORMER_URI", default_value = "informer:k8s")]
    pub informer_uri: String,

    /// Resource kinds to watch, as version/resource or group/version/resource.
    #[arg(long = "resource", env = "SOUP_INFORMER_RESOURCES", value_delimiter = ',', required = true)]
    pub resources: Vec<String>,

    /// Namespaces to watch; `all` watches every namespace.
    #[arg(long = "namespace", env = "SOUP_INFORMER_NAMESPACES", value_delimiter = ',', default_value = "all")]
    pub namespaces: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionCmd {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = VersionOutput::Pretty)]
    pub format: VersionOutput,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOutput {
    Pretty,
    Json,
}
