//! gould - minimal X display manager
//!
//! Entry point for the daemon binary.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gould::config::{Config, LoggingConfig};
use gould::lifecycle::{self, ExitReason, RestartDecision, RestartPolicy, Runlevel};
use gould::utils::{format_uptime, format_user_error, log_startup_diagnostics};
use gould::Daemon;

/// Command-line arguments for gould
#[derive(Parser, Debug)]
#[command(name = "gould")]
#[command(
    version = concat!(env!("CARGO_PKG_VERSION"), ", licensed under ", env!("CARGO_PKG_LICENSE")),
    about = "Minimal X display manager",
    long_about = None,
    disable_version_flag = true
)]
pub struct Args {
    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long = "daemonize")]
    pub daemonize: bool,

    /// Print version and license
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    pub version: Option<bool>,
}

fn main() {
    let args = Args::parse();

    let config_path = Config::default_path();
    let config = match Config::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_user_error(&e));
            std::process::exit(255);
        }
    };

    // A respawned image is already detached, and must keep its PID
    let respawns = lifecycle::respawn_count();
    if args.daemonize && respawns == 0 {
        if let Err(e) = nix::unistd::daemon(false, false) {
            eprintln!("Failed to daemonize: {}", e);
            std::process::exit(255);
        }
    }

    let guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", format_user_error(&e));
            std::process::exit(255);
        }
    };

    if !config_path.exists() {
        warn!("Config file {} not found, using defaults", config_path.display());
    }
    log_startup_diagnostics();
    if let Some(sig) = lifecycle::crash::previous_crash() {
        warn!("Previous instance crashed with signal {}, restarted", sig);
    }
    tracing::debug!("Config: {:?}", config);

    let max_respawns = config.core.max_respawns;
    let started = Instant::now();

    let (reason, policy) = match run_daemon(config) {
        Ok(result) => result,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{}", format_user_error(&e));
            (ExitReason::Fatal, RestartPolicy::from_env(max_respawns))
        }
    };

    let uptime = started.elapsed();
    info!("Ran for {} ({})", format_uptime(uptime), reason);

    match policy.decide(reason, &Runlevel::current(), uptime) {
        RestartDecision::Respawn { count } => {
            drop(guard);
            let e = lifecycle::respawn(count);
            eprintln!("{:#}", e);
            std::process::exit(255);
        }
        RestartDecision::Terminate(code) => {
            info!("Exiting with code {}", code);
            drop(guard);
            std::process::exit(code);
        }
    }
}

fn run_daemon(config: Config) -> Result<(ExitReason, RestartPolicy)> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(async {
        let mut daemon = Daemon::new(config)?;
        let reason = daemon.run().await;
        Ok::<_, anyhow::Error>((reason, *daemon.policy()))
    })
}

fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("gould={},warn", logging.level))
    });

    // If a log file is configured, write to both stderr and the file
    let (file_writer, guard) = match logging.file().map(open_log_file) {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        Some(Err(e)) => {
            eprintln!("{:#}, logging to stderr only", e);
            (None, None)
        }
        None => (None, None),
    };

    match logging.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .with(file_writer.map(|writer| {
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_ansi(false)
                }))
                .init();
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr),
                )
                .with(file_writer.map(|writer| {
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                }))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_writer(std::io::stderr),
                )
                .with(file_writer.map(|writer| {
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_writer(writer)
                        .with_ansi(false)
                }))
                .init();
        }
    }

    if let (Some(path), Some(_)) = (logging.file(), &guard) {
        info!("Logging to file: {}", path.display());
    }
    Ok(guard)
}

fn open_log_file(path: &Path) -> Result<RollingFileAppender> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .with_context(|| format!("Invalid log file path: {}", path.display()))?;

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name.to_string_lossy())
        .build(dir)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}
