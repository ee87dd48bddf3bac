use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::cli::{LogFormat, LoggingArgs};

/// Installs the global subscriber and routes `log` records into it.
pub fn init(args: &LoggingArgs) -> anyhow::Result<()> {
    tracing_log::LogTracer::init().context("failed to bridge log records")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .with_context(|| format!("invalid log level '{}'", args.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().json()),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer()),
        ),
    }
    .context("failed to install tracing subscriber")
}
