//! d2vm - build bootable virtual machine disk images from Dockerfiles.
//!
//! On a Linux host running as root the image is built and converted in
//! place. Anywhere else the same command is relaunched inside a privileged
//! helper container that has access to the host's engine socket.

use clap::{Parser, Subcommand};
use std::path::Path;
use std::process::ExitCode;

use d2vm::commands::{self, BuildOpts};
use d2vm::config::Config;
use d2vm::error::{Error, FAILURE_EXIT_CODE};

/// Exit code reported when interrupted by a signal.
const INTERRUPTED_EXIT_CODE: u8 = 130;

#[derive(Parser)]
#[command(name = "d2vm", version)]
#[command(about = "Build bootable virtual machine disk images from Dockerfiles")]
#[command(
    after_help = "QUICK START:\n  d2vm preflight                    Check the host\n  d2vm build -o vm.qcow2 .          Build ./Dockerfile into vm.qcow2"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a vm image from Dockerfile
    Build(BuildOpts),

    /// Check that builds can run on this host
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

fn install_tracing(verbose: u8) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let format = fmt::format().without_time().with_target(false).compact();
    let fmt_layer = fmt::layer()
        .event_format(format)
        .with_writer(std::io::stderr);
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

/// Resolves on SIGINT or SIGTERM with the signal's name.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

async fn run(command: Commands, config: &Config, verbose: u8) -> anyhow::Result<()> {
    match command {
        Commands::Build(opts) => commands::cmd_build(opts, config, verbose).await,
        Commands::Preflight { strict } => commands::cmd_preflight(config, strict),
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    let code = err
        .downcast_ref::<Error>()
        .map_or(FAILURE_EXIT_CODE, Error::exit_code);
    u8::try_from(code).unwrap_or(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    install_tracing(cli.verbose);

    let config = Config::load(Path::new("."));
    tracing::debug!(?config, "loaded configuration");

    // Dropping the command future kills whatever child is running and
    // removes a helper container that is still up.
    tokio::select! {
        result = run(cli.command, &config, cli.verbose) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                ExitCode::from(exit_code(&e))
            }
        },
        signal = shutdown_signal() => {
            eprintln!("\nInterrupted by {}", signal);
            ExitCode::from(INTERRUPTED_EXIT_CODE)
        }
    }
}
