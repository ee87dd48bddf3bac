mod cli;
mod commands;
mod logging;

use clap::Parser;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Version(cmd) = &cli.command {
        return commands::version::run(cmd);
    }

    logging::init(&cli.logging)?;
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting soup");

    match cli.command {
        Command::Sync(cmd) => commands::sync::run(&cli.audit_uri, cmd).await,
        Command::Kubewatch(cmd) => commands::watch::kubewatch(&cli.audit_uri, cmd).await,
        Command::Kubediff(cmd) => commands::watch::kubediff(&cli.audit_uri, cmd).await,
        Command::Version(_) => Ok(()),
    }
}
