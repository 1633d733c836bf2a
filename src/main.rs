//! ezchat-server
//!
//! # Startup Sequence
//!
//! ```text
//!   parse CLI (--config/-c)
//!        │
//!        ▼
//!   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!   │ load config  │──▶│ build logger │──▶│ connect store│──┐
//!   └──────────────┘   └──────────────┘   └──────────────┘  │
//!          any failure: print to stderr, exit 1             │
//!                                                           ▼
//!   ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐
//!   │ HTTP serving │──▶│ SIGINT/TERM  │──▶│ drain (5s) → stopped │
//!   └──────────────┘   └──────────────┘   └──────────────────────┘
//! ```

use std::process::ExitCode;

use clap::Parser;

use ezchat_server::cli::Cli;
use ezchat_server::config::ConfigProvider;
use ezchat_server::lifecycle::Orchestrator;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut orchestrator = Orchestrator::new(ConfigProvider::new(cli.config));

    if let Err(e) = orchestrator.bootstrap().await {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    // Route third-party events (hyper, sqlx, per-connection tasks) to the same sinks.
    if let Some(logger) = orchestrator.logger() {
        if let Err(e) = logger.install_global() {
            eprintln!("failed to install global logger: {e}");
        }
    }

    match orchestrator.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
