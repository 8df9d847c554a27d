//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "motorloop", version, about = "Closed-loop motor position control")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/motorloop.toml")]
    pub config: PathBuf,

    /// Log and report as JSON lines instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG wins when set
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        #[cfg(target_os = "linux")]
        {
            return RtLock::Current;
        }
        #[allow(unreachable_code)]
        RtLock::None
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every configured motor until Ctrl-C or the duration elapses
    Run {
        /// Stop after this many seconds
        #[arg(long = "duration-s", value_name = "SECS")]
        duration_s: Option<f64>,
        /// Use the simulated driver and encoders
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
        /// Enable real-time mode for the control thread (SCHED_FIFO, affinity, mlockall)
        #[arg(
            long,
            action = ArgAction::SetTrue,
            long_help = "Enable real-time mode for the control thread.\n\nLinux: Attempts SCHED_FIFO priority and CPU pinning on the control thread, and calls mlockall to lock the process address space into RAM. Needs CAP_SYS_NICE / CAP_IPC_LOCK (or root). Each step is best-effort; failures are logged as warnings.\n\nOther OSes: only mlockall (macOS) or nothing is applied."
        )]
        rt: bool,
        /// SCHED_FIFO priority (clamped to the system range); defaults to rt.priority
        #[arg(long, value_name = "PRIO")]
        rt_prio: Option<i32>,
        /// Memory locking mode for --rt: none, current, or all
        #[arg(long, value_enum, value_name = "MODE")]
        rt_lock: Option<RtLock>,
        /// CPU index to pin the control thread to (Linux only)
        #[arg(long, value_name = "CPU")]
        rt_cpu: Option<usize>,
    },
    /// Encoder bring-up: decode one motor's encoder and print its count
    Encoder {
        /// Motor name from the config
        #[arg(long, value_name = "NAME")]
        motor: String,
        /// Stop after this many seconds
        #[arg(long = "duration-s", value_name = "SECS")]
        duration_s: Option<f64>,
        /// Decode a simulated shaft turning at a slow constant speed
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
    },
    /// Validate config, build the simulated stack and tick it once
    SelfCheck,
}

/// Seconds from the command line as a `Duration`; negative or NaN is rejected.
pub fn duration_arg(secs: Option<f64>) -> eyre::Result<Option<std::time::Duration>> {
    match secs {
        None => Ok(None),
        Some(s) if s.is_finite() && s >= 0.0 => Ok(Some(std::time::Duration::from_secs_f64(s))),
        Some(s) => eyre::bail!("--duration-s must be a non-negative number, got {s}"),
    }
}
