//! fieldsync - command line front end for the operations dashboard.
//!
//! Logs in, fetches named views, and follows live updates over the
//! realtime channel.

mod args;
mod commands;

use std::io;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::{Cli, Command};
use commands::Context;

/// File name prefix for daily log files
const LOG_FILE_PREFIX: &str = "fieldsync.log";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; with a log directory they are also written to a
/// daily-rotated file. The returned guard must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());
    info!("fieldsync starting");

    let ctx = Context::open(&cli)?;
    match cli.command {
        Command::Login { username } => commands::login(&ctx, username).await,
        Command::Logout => commands::logout(&ctx).await,
        Command::Status => commands::status(&ctx),
        Command::Fetch { view } => commands::fetch(&ctx, &view).await,
        Command::Watch { views } => commands::watch(&ctx, views).await,
    }
}
