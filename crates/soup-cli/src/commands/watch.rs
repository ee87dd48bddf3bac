use std::convert::Infallible;
use std::sync::Arc;

use soup::actuator::{ClusterCheck, WatcherCheck};
use soup::audit::AuditEvent;
use soup::cluster::{self, KubeApplier};
use soup::config::InformerTarget;
use soup::lifecycle::LifecycleController;
use soup::watcher::{DriftWatcher, ResourceKind, WatchMode, WatchSpec};

use super::{actuator_controller, settle, Services, SHUTDOWN_SIGNALS};
use crate::cli::WatchCmd;

/// Audit labels of one watcher flavour.
struct Flavour {
    name: &'static str,
    run_action: &'static str,
    shutdown_action: &'static str,
}

const KUBEWATCH: Flavour = Flavour {
    name: "kubewatch",
    run_action: "KubeWatchRun",
    shutdown_action: "KubeWatchShutdown",
};

const KUBEDIFF: Flavour = Flavour {
    name: "kubediff",
    run_action: "KubeDiffRun",
    shutdown_action: "KubeDiffShutdown",
};

/// `kubewatch`: the informer URI picks the mode, watch by default.
pub async fn kubewatch(audit_uri: &str, cmd: WatchCmd) -> anyhow::Result<()> {
    let target = InformerTarget::parse(&cmd.informer_uri)?;
    let mode = target.mode;
    run(audit_uri, cmd, target, mode, KUBEWATCH).await
}

/// `kubediff`: always diff mode.
pub async fn kubediff(audit_uri: &str, cmd: WatchCmd) -> anyhow::Result<()> {
    let target = InformerTarget::parse(&cmd.informer_uri)?;
    run(audit_uri, cmd, target, WatchMode::Diff, KUBEDIFF).await
}

fn watch_spec(cmd: &WatchCmd) -> soup::Result<WatchSpec> {
    let kinds = cmd
        .resources
        .iter()
        .map(|r| r.parse::<ResourceKind>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(WatchSpec::new(kinds, cmd.namespaces.iter().map(|ns| ns.trim())))
}

async fn run(
    audit_uri: &str,
    cmd: WatchCmd,
    target: InformerTarget,
    mode: WatchMode,
    flavour: Flavour,
) -> anyhow::Result<()> {
    let services = Services::build(audit_uri, &cmd.alert)?;
    let spec = watch_spec(&cmd)?;

    services
        .record(
            flavour.run_action,
            &format!(
                "watching {} kinds in {} namespaces",
                spec.resource_kinds.len(),
                spec.namespaces.len()
            ),
        )
        .await;

    let client = cluster::build_client(&target.cluster).await?;
    let mut watcher =
        DriftWatcher::new(client.clone(), spec, target.resync, services.sink()).await?;
    watcher.add_event_handler(mode);
    let sync_state = watcher.sync_state();

    let mut controller = LifecycleController::new(flavour.name, SHUTDOWN_SIGNALS);
    controller.set_run_func(move |stop| async move {
        watcher.start(stop.clone());
        stop.stopped().await;
        watcher.join().await;
        Ok::<(), Infallible>(())
    });
    let sink = services.sink();
    let shutdown_action = flavour.shutdown_action;
    controller.set_shutdown_func(move |signal| async move {
        sink.record_or_log(AuditEvent::system(
            shutdown_action,
            format!("stopping watcher on {}", signal),
        ))
        .await;
        Ok::<(), Infallible>(())
    });

    let actuator = services
        .actuator(&cmd.actuator)
        .with_check(Arc::new(WatcherCheck::new(sync_state)))
        .with_check(Arc::new(ClusterCheck::new(Arc::new(KubeApplier::new(client)))));
    let mut actuators = actuator_controller(&cmd.actuator, actuator).await?;

    tracing::info!(mode = ?mode, "starting {}", flavour.name);
    let (watched, served) = tokio::join!(controller.run(), actuators.run());
    settle([watched, served])
}
