use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use soup::actuator::{ClusterCheck, SourceCheck, WebhookConfig};
use soup::audit::AuditEvent;
use soup::cluster::{self, ClusterApplier, ClusterTarget, KubeApplier};
use soup::config;
use soup::gitops::{
    FailurePolicy, FileDescriptorReader, GitSource, KustomizeRenderer, ReconcileOptions,
    Reconciler, SourceRepository, SyncScheduler,
};
use soup::lifecycle::LifecycleController;
use soup::secrets::SecretSource;

use super::{actuator_controller, settle, Services, SHUTDOWN_SIGNALS};
use crate::cli::{ClusterArgs, RepoArgs, ServeArgs, SyncCmd, SyncSubcmd};

pub async fn run(audit_uri: &str, cmd: SyncCmd) -> anyhow::Result<()> {
    let services = Services::build(audit_uri, &cmd.alert)?;
    match &cmd.command {
        SyncSubcmd::Repo(args) => repo(&services, &cmd, args).await,
        SyncSubcmd::Serve(args) => serve(&services, &cmd, args).await,
    }
}

fn cluster_target(args: &ClusterArgs) -> ClusterTarget {
    ClusterTarget {
        path: args.k8s_path.clone(),
        context: args.k8s_context.clone(),
    }
}

async fn build_reconciler(
    services: &Services,
    cmd: &SyncCmd,
    url: &str,
    vcs_uri: &str,
) -> soup::Result<Arc<Reconciler>> {
    let auth = config::parse_vcs(vcs_uri)?;
    let source: Arc<dyn SourceRepository> = Arc::new(GitSource::new(url, auth, services.sink())?);

    let client = cluster::build_client(&cluster_target(&cmd.cluster)).await?;
    let applier: Arc<dyn ClusterApplier> = Arc::new(KubeApplier::new(client));

    let mut options = ReconcileOptions::default();
    if let Some(root) = &cmd.clone_root {
        options.clone_root = root.clone();
    }
    if cmd.continue_on_error {
        options.failure_policy = FailurePolicy::Continue;
    }

    Ok(Arc::new(Reconciler::new(
        source,
        Arc::new(FileDescriptorReader),
        Arc::new(KustomizeRenderer::default()),
        applier,
        services.sink(),
        options,
    )))
}

/// `sync repo`: one reconciliation, or a loop with actuators when an
/// interval is given.
async fn repo(services: &Services, cmd: &SyncCmd, args: &RepoArgs) -> anyhow::Result<()> {
    let interval = args
        .interval
        .as_deref()
        .map(config::parse_duration)
        .transpose()?
        .filter(|d| !d.is_zero());

    services
        .record("SyncRun", &format!("syncing repository {}", args.url))
        .await;

    let reconciler = build_reconciler(services, cmd, &args.url, &args.vcs.vcs_uri).await?;
    let scheduler = Arc::new(SyncScheduler::new(
        Arc::clone(&reconciler),
        interval.unwrap_or(Duration::ZERO),
        Arc::clone(&services.notifier),
        args.url.clone(),
        services.alert.clone(),
    ));

    let mut sync = LifecycleController::new("sync", SHUTDOWN_SIGNALS);
    let sink = services.sink();
    sync.set_shutdown_func(move |signal| async move {
        sink.record_or_log(AuditEvent::system(
            "SyncShutdown",
            format!("stopping sync on {}", signal),
        ))
        .await;
        Ok::<(), Infallible>(())
    });

    let Some(interval) = interval else {
        sync.set_run_func(move |_stop| async move { scheduler.run_once().await.map(|_| ()) });
        sync.run().await?;
        return Ok(());
    };

    tracing::info!(url = %args.url, interval = ?interval, "starting sync loop");
    sync.set_run_func(move |stop| async move {
        let runs = scheduler.run(stop).await;
        tracing::info!(runs, "sync loop stopped");
        Ok::<(), Infallible>(())
    });

    let actuator = services
        .actuator(&cmd.actuator)
        .with_check(Arc::new(SourceCheck::new(Arc::clone(reconciler.source()))))
        .with_check(Arc::new(ClusterCheck::new(Arc::clone(reconciler.applier()))));
    let mut actuators = actuator_controller(&cmd.actuator, actuator).await?;

    let (synced, served) = tokio::join!(sync.run(), actuators.run());
    settle([synced, served])
}

/// `sync serve`: actuators plus the push webhook.
async fn serve(services: &Services, cmd: &SyncCmd, args: &ServeArgs) -> anyhow::Result<()> {
    let secret = SecretSource {
        value: args.webhook_secret.clone(),
        file: args.webhook_secret_file.clone(),
        env_var: args.webhook_secret_env.clone(),
    }
    .resolve_optional()?;
    if secret.is_none() {
        tracing::warn!("no webhook secret configured, signatures are not verified");
    }

    services
        .record("ServeRun", &format!("serving webhook for repository {}", args.url))
        .await;

    let reconciler = build_reconciler(services, cmd, &args.url, &args.vcs.vcs_uri).await?;
    let actuator = services
        .actuator(&cmd.actuator)
        .with_check(Arc::new(SourceCheck::new(Arc::clone(reconciler.source()))))
        .with_check(Arc::new(ClusterCheck::new(Arc::clone(reconciler.applier()))))
        .with_webhook(WebhookConfig {
            reconciler,
            secret,
            notifier: Arc::clone(&services.notifier),
            repo_url: args.url.clone(),
            alert: services.alert.clone(),
        });

    let mut actuators = actuator_controller(&cmd.actuator, actuator).await?;
    let result = actuators.run().await;
    services
        .record("ServeShutdown", &format!("stopped serving repository {}", args.url))
        .await;
    settle([result])
}
