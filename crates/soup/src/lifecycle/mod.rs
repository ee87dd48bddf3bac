//! Race-free run/shutdown coordination for long-running tasks.
//!
//! One [`LifecycleController`] supervises one task (the reconciliation loop,
//! the drift watcher, the actuator server). The run body executes on the
//! caller's task while a listener task waits for the first termination
//! signal. Exactly one of the two wins the transition out of `Running`:
//!
//! - run finishes first: the shutdown function never runs and the run
//!   function's error is reported;
//! - a signal arrives first: the stop token handed to the run body is
//!   cancelled, the shutdown function runs once, and its error (even `Ok`)
//!   is reported instead of whatever the run function returns.
//!
//! Many run bodies (an HTTP serve loop, for example) fail on every exit
//! path, so their error is only meaningful when shutdown was not requested.

pub mod signals;
pub mod stop;

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;

pub use signals::{SignalSource, SignalTrigger, TerminationSignal, DEFAULT_SIGNALS};
pub use stop::{StopHandle, StopSignal};

/// Boxed error returned by run and shutdown functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

type RunFn = Box<dyn FnOnce(StopSignal) -> BoxFuture<'static, Result<(), BoxError>> + Send>;
type ShutdownFn =
    Box<dyn FnOnce(TerminationSignal) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// Errors reported by [`LifecycleController::run`].
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("run function not set")]
    MissingRunFunc,

    #[error("shutdown function not set")]
    MissingShutdownFunc,

    #[error("controller already started")]
    AlreadyStarted,

    #[error("failed to listen for termination signals: {0}")]
    Signals(#[source] std::io::Error),

    #[error("run: {0}")]
    Run(#[source] BoxError),

    #[error("shutdown: {0}")]
    Shutdown(#[source] BoxError),

    #[error("shutdown handler panicked: {0}")]
    ShutdownPanicked(String),
}

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Completed,
    ShuttingDown,
    ShutdownComplete,
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const COMPLETED: u8 = 2;
const SHUTTING_DOWN: u8 = 3;
const SHUTDOWN_COMPLETE: u8 = 4;

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            RUNNING => LifecycleState::Running,
            COMPLETED => LifecycleState::Completed,
            SHUTTING_DOWN => LifecycleState::ShuttingDown,
            SHUTDOWN_COMPLETE => LifecycleState::ShutdownComplete,
            _ => LifecycleState::Idle,
        }
    }
}

/// Runs one task until it finishes or a termination signal asks it to stop.
pub struct LifecycleController {
    name: String,
    source: Option<SignalSource>,
    run_fn: Option<RunFn>,
    shutdown_fn: Option<ShutdownFn>,
    state: Arc<AtomicU8>,
}

impl LifecycleController {
    /// Creates a controller observing the given OS signals.
    pub fn new(
        name: impl Into<String>,
        signals: impl IntoIterator<Item = TerminationSignal>,
    ) -> Self {
        Self::with_source(name, SignalSource::os(signals))
    }

    pub fn with_source(name: impl Into<String>, source: SignalSource) -> Self {
        Self {
            name: name.into(),
            source: Some(source),
            run_fn: None,
            shutdown_fn: None,
            state: Arc::new(AtomicU8::new(IDLE)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Registers the task body. It receives a stop token that is cancelled
    /// when a termination signal wins the race.
    pub fn set_run_func<F, Fut, E>(&mut self, f: F)
    where
        F: FnOnce(StopSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.run_fn = Some(Box::new(move |stop| {
            let fut = f(stop);
            Box::pin(async move { fut.await.map_err(Into::into) })
        }));
    }

    /// Registers the cleanup invoked on the first termination signal.
    pub fn set_shutdown_func<F, Fut, E>(&mut self, f: F)
    where
        F: FnOnce(TerminationSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.shutdown_fn = Some(Box::new(move |signal| {
            let fut = f(signal);
            Box::pin(async move { fut.await.map_err(Into::into) })
        }));
    }

    /// Runs the task to termination. See the module docs for the outcome rules.
    pub async fn run(&mut self) -> Result<(), LifecycleError> {
        let run_fn = self.run_fn.take().ok_or(LifecycleError::MissingRunFunc)?;
        let shutdown_fn = self
            .shutdown_fn
            .take()
            .ok_or(LifecycleError::MissingShutdownFunc)?;
        let source = self.source.take().ok_or(LifecycleError::AlreadyStarted)?;

        let mut listener = source.listen().map_err(LifecycleError::Signals)?;
        let (stop_handle, stop_signal) = StopHandle::new();

        self.state.store(RUNNING, Ordering::Release);

        let state = Arc::clone(&self.state);
        let name = self.name.clone();
        let shutdown_task = tokio::spawn(async move {
            let signal = listener.recv().await?;
            tracing::debug!(task = %name, signal = %signal, "signal received");

            if state
                .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                tracing::debug!(task = %name, "run completed, not running shutdown handler");
                return None;
            }

            stop_handle.stop();
            Some(shutdown_fn(signal).await)
        });

        let run_result = run_fn(stop_signal).await;

        if self
            .state
            .compare_exchange(RUNNING, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            shutdown_task.abort();
            return match run_result {
                Ok(()) => Ok(()),
                Err(e) => {
                    tracing::error!(task = %self.name, error = %e, "run failed");
                    Err(LifecycleError::Run(e))
                }
            };
        }

        if let Err(e) = &run_result {
            tracing::debug!(task = %self.name, error = %e, "run returned during shutdown");
        }

        let outcome = shutdown_task.await;
        self.state.store(SHUTDOWN_COMPLETE, Ordering::Release);

        match outcome {
            Ok(Some(Ok(()))) | Ok(None) => Ok(()),
            Ok(Some(Err(e))) => {
                tracing::error!(task = %self.name, error = %e, "shutdown failed");
                Err(LifecycleError::Shutdown(e))
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    join_error.to_string()
                };
                tracing::error!(task = %self.name, error = %message, "shutdown handler panicked");
                Err(LifecycleError::ShutdownPanicked(message))
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
