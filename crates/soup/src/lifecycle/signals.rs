//! Termination signal sources.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use tokio::sync::mpsc;

/// Signals that ask a supervised task to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
    Hangup,
    Quit,
}

/// Used when a controller is built with an empty signal set.
pub const DEFAULT_SIGNALS: [TerminationSignal; 2] =
    [TerminationSignal::Hangup, TerminationSignal::Terminate];

impl TerminationSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationSignal::Interrupt => "SIGINT",
            TerminationSignal::Terminate => "SIGTERM",
            TerminationSignal::Hangup => "SIGHUP",
            TerminationSignal::Quit => "SIGQUIT",
        }
    }

    #[cfg(unix)]
    fn kind(&self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            TerminationSignal::Interrupt => SignalKind::interrupt(),
            TerminationSignal::Terminate => SignalKind::terminate(),
            TerminationSignal::Hangup => SignalKind::hangup(),
            TerminationSignal::Quit => SignalKind::quit(),
        }
    }
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerminationSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        match name {
            "INT" => Ok(TerminationSignal::Interrupt),
            "TERM" => Ok(TerminationSignal::Terminate),
            "HUP" => Ok(TerminationSignal::Hangup),
            "QUIT" => Ok(TerminationSignal::Quit),
            _ => Err(format!("unsupported termination signal '{}'", s)),
        }
    }
}

/// Sends signals into a [`SignalSource::manual`] source.
#[derive(Debug, Clone)]
pub struct SignalTrigger {
    sender: mpsc::UnboundedSender<TerminationSignal>,
}

impl SignalTrigger {
    /// Delivers a signal. Returns false once the listener is gone.
    pub fn send(&self, signal: TerminationSignal) -> bool {
        self.sender.send(signal).is_ok()
    }
}

/// Where a controller learns about termination requests.
#[derive(Debug)]
pub enum SignalSource {
    /// Operating-system signals.
    Os(Vec<TerminationSignal>),
    /// Signals delivered through a [`SignalTrigger`].
    Manual(mpsc::UnboundedReceiver<TerminationSignal>),
}

impl SignalSource {
    /// OS signals, falling back to [`DEFAULT_SIGNALS`] when the set is empty.
    pub fn os(signals: impl IntoIterator<Item = TerminationSignal>) -> Self {
        let mut signals: Vec<_> = signals.into_iter().collect();
        if signals.is_empty() {
            tracing::info!("No signals set, using defaults of SIGHUP and SIGTERM");
            signals = DEFAULT_SIGNALS.to_vec();
        }
        let mut seen = HashSet::new();
        signals.retain(|signal| seen.insert(*signal));
        SignalSource::Os(signals)
    }

    pub fn manual() -> (SignalTrigger, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (SignalTrigger { sender }, SignalSource::Manual(receiver))
    }

    /// Registers the handlers. Signals arriving after this call are not lost.
    pub(crate) fn listen(self) -> std::io::Result<SignalListener> {
        match self {
            SignalSource::Manual(receiver) => Ok(SignalListener::Manual(receiver)),
            #[cfg(unix)]
            SignalSource::Os(signals) => {
                let mut streams = Vec::with_capacity(signals.len());
                for signal in signals {
                    streams.push((signal, tokio::signal::unix::signal(signal.kind())?));
                }
                Ok(SignalListener::Os(streams))
            }
            #[cfg(not(unix))]
            SignalSource::Os(_) => Ok(SignalListener::CtrlC),
        }
    }
}

pub(crate) enum SignalListener {
    #[cfg(unix)]
    Os(Vec<(TerminationSignal, tokio::signal::unix::Signal)>),
    #[cfg(not(unix))]
    CtrlC,
    Manual(mpsc::UnboundedReceiver<TerminationSignal>),
}

impl SignalListener {
    /// Waits for the first signal. `None` means no signal can arrive anymore.
    pub(crate) async fn recv(&mut self) -> Option<TerminationSignal> {
        match self {
            SignalListener::Manual(receiver) => receiver.recv().await,
            #[cfg(unix)]
            SignalListener::Os(streams) => {
                if streams.is_empty() {
                    return None;
                }
                let waits = streams.iter_mut().map(|(signal, stream)| {
                    let signal = *signal;
                    Box::pin(async move {
                        stream.recv().await;
                        signal
                    })
                });
                let (signal, _, _) = futures_util::future::select_all(waits).await;
                Some(signal)
            }
            #[cfg(not(unix))]
            SignalListener::CtrlC => tokio::signal::ctrl_c()
                .await
                .ok()
                .map(|_| TerminationSignal::Interrupt),
        }
    }
}
