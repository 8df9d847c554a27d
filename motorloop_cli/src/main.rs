//! `motorloop` command-line entry point.

mod cli;
mod error_fmt;
mod rt;
mod run;

use std::path::Path;

use clap::Parser;
use eyre::WrapErr;
use motorloop_config::{Config, Logging};
use motorloop_core::{CancelToken, ControlError, Report, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{Cli, Commands, JSON_MODE, RtLock, duration_arg};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::rt::RtOpts;
use crate::run::RunOpts;

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    // Held here so the file writer flushes before exit.
    let mut log_guard: Option<WorkerGuard> = None;
    let code = match real_main(cli, &mut log_guard) {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "exiting with error");
            if JSON_MODE.get().copied().unwrap_or(false) {
                println!("{}", format_error_json(&err));
            } else {
                eprintln!("{}", humanize(&err));
            }
            exit_code_for_error(&err)
        }
    };
    drop(log_guard);
    std::process::exit(code);
}

fn real_main(cli: Cli, log_guard: &mut Option<WorkerGuard>) -> Result<()> {
    let cfg = load_config(&cli.config)?;
    *log_guard = init_tracing(cli.json, cli.log_level.as_deref(), &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), motors = cfg.motors.len(), "config loaded");

    let root = CancelToken::new();
    {
        let root = root.clone();
        ctrlc::set_handler(move || root.cancel()).wrap_err("install Ctrl-C handler")?;
    }

    match cli.cmd {
        Commands::Run {
            duration_s,
            sim,
            rt,
            rt_prio,
            rt_lock,
            rt_cpu,
        } => {
            let rt = (rt || cfg.rt.enabled).then(|| RtOpts {
                priority: rt_prio.unwrap_or(cfg.rt.priority),
                lock: rt_lock.unwrap_or_else(RtLock::os_default),
                cpu: rt_cpu,
            });
            let opts = RunOpts {
                duration: duration_arg(duration_s)?,
                sim,
                rt,
            };
            let summary = run::run(&cfg, &opts, &root)?;
            if cli.json {
                println!("{}", summary.to_json());
            } else {
                println!("{}", summary.to_text());
            }
        }
        Commands::Encoder {
            motor,
            duration_s,
            sim,
        } => {
            let duration = duration_arg(duration_s)?;
            let count = run::encoder(&cfg, &motor, duration, sim, cli.json, &root)?;
            tracing::info!(motor = %motor, count, "encoder bring-up finished");
        }
        Commands::SelfCheck => {
            let motors = run::self_check(&cfg, &root)?;
            if cli.json {
                println!("{}", serde_json::json!({ "status": "ok", "motors": motors }));
            } else {
                println!("self-check ok: {motors} motor(s)");
            }
        }
    }
    Ok(())
}

fn config_error(msg: String) -> Report {
    Report::new(ControlError::Config(msg))
}

/// Read, parse and validate the config file. Every failure is a config error.
fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| config_error(format!("read {}: {e}", path.display())))?;
    let cfg = motorloop_config::load_toml(&text)
        .map_err(|e| config_error(format!("parse {}: {e}", path.display())))?;
    cfg.validate().map_err(|e| config_error(e.to_string()))?;
    Ok(cfg)
}

/// Console logs go to stderr so stdout only carries reports. RUST_LOG wins
/// over `--log-level`, which wins over `[logging].level`.
fn init_tracing(
    json: bool,
    cli_level: Option<&str>,
    logging: &Logging,
) -> Result<Option<WorkerGuard>> {
    let level = cli_level
        .or(logging.level.as_deref())
        .unwrap_or("info")
        .to_string();
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(&level)
            .map_err(|e| config_error(format!("invalid log level '{level}': {e}")))?,
    };

    let console = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let mut guard = None;
    let file_layer = match logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| config_error(format!("logging.file '{file}' has no file name")))?;
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                "never" => tracing_appender::rolling::never(dir, name),
                other => {
                    return Err(config_error(format!(
                        "logging.rotation must be never, daily or hourly, got '{other}'"
                    )));
                }
            };
            let (writer, g) = tracing_appender::non_blocking(appender);
            guard = Some(g);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| eyre::eyre!("install tracing subscriber: {e}"))?;
    Ok(guard)
}
