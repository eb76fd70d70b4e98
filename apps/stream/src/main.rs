//! `stream`: resumable chunked directory transfer over multiplexed SSH.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sshx_control::{ControlChannel, ControlOptions, TargetSpec};
use sshx_engine::EngineOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "stream",
    about = "Push or pull a directory over a multiplexed SSH connection, \
             in verified, resumable chunks"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push a local directory to a remote path
    Push {
        /// Remote target as user@host:port
        target: String,
        /// Local source directory
        local_dir: PathBuf,
        /// Remote destination directory
        remote_path: String,
    },
    /// Pull a remote path into a local directory
    Pull {
        /// Remote target as user@host:port
        target: String,
        /// Remote source directory
        remote_path: String,
        /// Local destination directory
        local_dir: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Any argument error exits 1, like every other failure.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("❌ Config: {err}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("❌ Runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: Config) -> ExitCode {
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let (op, target_str) = match &cli.command {
        Command::Push { target, .. } => ("Push", target.clone()),
        Command::Pull { target, .. } => ("Pull", target.clone()),
    };

    let target = match TargetSpec::parse(&target_str) {
        Ok(target) => target,
        Err(err) => {
            eprintln!("❌ {op}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let channel = Arc::new(ControlChannel::new(
        target,
        ControlOptions {
            ssh_binary: config.ssh_binary.clone(),
            control_persist_secs: config.control_persist_secs,
        },
        cancel.clone(),
    ));
    if let Err(err) = channel.establish().await {
        eprintln!("❌ {op}: {err}");
        return ExitCode::FAILURE;
    }

    let opts = EngineOptions {
        workers: config.workers.max(1),
        max_retry: config.max_retry.max(1),
    };

    let result = match &cli.command {
        Command::Push {
            local_dir,
            remote_path,
            ..
        } => {
            sshx_engine::push(
                Arc::clone(&channel),
                opts,
                local_dir,
                remote_path,
                cancel.clone(),
            )
            .await
        }
        Command::Pull {
            remote_path,
            local_dir,
            ..
        } => {
            sshx_engine::pull(
                Arc::clone(&channel),
                opts,
                remote_path,
                local_dir,
                cancel.clone(),
            )
            .await
        }
    };

    // The master is torn down on every path, including cancellation.
    channel.close().await;

    match result {
        Ok(()) => {
            println!("✅ {op} completed");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("\n❌ {op}: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Cancels the token on SIGINT or SIGTERM. In-flight ssh children are bound
/// to the token, so cancellation kills them rather than waiting them out.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        println!("\n⚠ Interrupted. Cancelling...");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal;
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    match unix_signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            tracing::warn!(%err, "cannot install SIGTERM handler");
            let _ = signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
