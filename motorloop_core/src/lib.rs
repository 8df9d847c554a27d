#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core motor control logic (hardware-agnostic).
//!
//! All hardware interactions go through `motorloop_traits::EdgeSource` and
//! `motorloop_traits::ActuatorDriver`.
//!
//! ## Architecture
//!
//! - **Decoding**: one thread per encoder turns edges into a signed count (`decoder`)
//! - **Control**: discrete PID with anti-windup (`pid`)
//! - **Motors**: position loop per motor, shared driver, lock-free handles (`motor`)
//! - **Timing**: fixed-period scheduling with deadline-miss accounting (`monitor`, `runner`)
//! - **Shutdown**: hierarchical cancellation tokens (`cancel`)

pub mod atomic;
pub mod builder;
pub mod cancel;
pub mod config;
pub mod conversions;
pub mod decoder;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod monitor;
pub mod motor;
pub mod pid;
pub mod runner;
pub mod status;
pub mod util;

pub use builder::{Missing, MotorLoopBuilder, Set};
pub use cancel::CancelToken;
pub use config::{DecoderCfg, LoopCfg, MotorCfg, PidCfg};
pub use decoder::{CountSource, EdgePump, EncoderCounters, QuadratureDecoder, Transition};
pub use error::{BuildError, ControlError, Report, Result};
pub use hw_error::map_hw_error;
pub use monitor::{DeadlineMonitor, LoopScheduler, LoopStats, StatsHandle};
pub use motor::{MotorGroup, MotorHandle, MotorLoop, Retune};
pub use pid::{AntiWindup, Limits, PidController, PidGains};
pub use runner::{ControlThread, spawn_control_loop};
pub use status::MotorReport;
