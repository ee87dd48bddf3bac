//! Command implementations and the wiring they share.

pub mod sync;
pub mod version;
pub mod watch;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use soup::actuator::{self, Actuator};
use soup::audit::{AuditEvent, AuditSink};
use soup::config::{self, AuditBackend, AuditTarget, NotifierTarget};
use soup::lifecycle::{LifecycleController, LifecycleError, TerminationSignal};
use soup::notification::{AlertSettings, Notifier};

use crate::cli::{ActuatorArgs, AlertArgs};

/// Signals that stop every supervised task.
pub const SHUTDOWN_SIGNALS: [TerminationSignal; 3] = [
    TerminationSignal::Interrupt,
    TerminationSignal::Terminate,
    TerminationSignal::Hangup,
];

/// Collaborators every long-running command needs.
pub struct Services {
    pub audit: AuditBackend,
    pub notifier: Arc<dyn Notifier>,
    pub alert: AlertSettings,
}

impl Services {
    pub fn build(audit_uri: &str, alert: &AlertArgs) -> anyhow::Result<Self> {
        let audit = config::build_audit(&AuditTarget::parse(audit_uri)?)?;
        let notifier = config::build_notifier(&NotifierTarget::parse(&alert.alert_uri)?);
        Ok(Self {
            audit,
            notifier,
            alert: alert_settings(alert),
        })
    }

    pub fn sink(&self) -> Arc<dyn AuditSink> {
        Arc::clone(&self.audit.sink)
    }

    /// Records a lifecycle event attributed to the process.
    pub async fn record(&self, action: &str, message: &str) {
        self.audit
            .sink
            .record_or_log(AuditEvent::system(action, message))
            .await;
    }

    /// Actuator builder with the audit query route enabled when possible.
    pub fn actuator(&self, args: &ActuatorArgs) -> Actuator {
        let actuator = Actuator::new(&args.actuator_root);
        match &self.audit.log {
            Some(log) => actuator.with_audit_log(Arc::clone(log)),
            None => actuator,
        }
    }
}

pub fn alert_settings(args: &AlertArgs) -> AlertSettings {
    AlertSettings {
        priority: args.alert_priority.clone(),
        tags: args.alert_tags.clone(),
        teams: args.alert_teams.clone(),
    }
}

/// Binds the actuator address and supervises the server.
pub async fn actuator_controller(
    args: &ActuatorArgs,
    actuator: Actuator,
) -> anyhow::Result<LifecycleController> {
    let listener = TcpListener::bind(&args.actuator_address)
        .await
        .with_context(|| format!("failed to bind actuators on {}", args.actuator_address))?;
    let router = actuator.router();

    let mut controller = LifecycleController::new("actuators", SHUTDOWN_SIGNALS);
    controller.set_run_func(move |stop| actuator::serve(listener, router, stop));
    controller.set_shutdown_func(|signal| async move {
        tracing::info!(signal = %signal, "stopping actuators");
        Ok::<(), std::convert::Infallible>(())
    });
    Ok(controller)
}

/// Reduces the outcomes of concurrently supervised tasks to one result.
pub fn settle(
    outcomes: impl IntoIterator<Item = Result<(), LifecycleError>>,
) -> anyhow::Result<()> {
    let mut first = None;
    for outcome in outcomes {
        if let Err(e) = outcome {
            tracing::error!(error = %e, "task failed");
            first.get_or_insert(e);
        }
    }
    match first {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
