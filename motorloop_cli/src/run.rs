//! `run`, `encoder` and `self-check` subcommands: stack construction,
//! the control thread, and housekeeping on the main thread.

use std::time::{Duration, Instant};

use eyre::WrapErr;
use motorloop_config::Config;
use motorloop_core::conversions::decoder_cfg;
use motorloop_core::{
    CancelToken, ControlThread, LoopCfg, LoopStats, MotorCfg, MotorGroup, MotorLoop, MotorReport,
    QuadratureDecoder, Report, Result, map_hw_error, spawn_control_loop,
};
use motorloop_hardware::{SimShaft, SimulatedDriver, SimulatedEncoder};
use motorloop_traits::ActuatorDriver;
use serde_json::json;

use crate::rt::{RtOpts, setup_rt_once};

/// Full command turns a simulated shaft this many motor revolutions per second.
pub const SIM_FULL_SPEED_RPS: f64 = 2.0;
/// Speed the `encoder --sim` shaft is held at.
const ENCODER_SIM_SPEED: i16 = 100;
const ENCODER_REPORT: Duration = Duration::from_millis(100);
/// Granularity of cancellation checks on the main thread.
const POLL: Duration = Duration::from_millis(20);

pub type BoxDriver = Box<dyn ActuatorDriver + Send>;

#[derive(Debug, Clone, Copy)]
pub struct RunOpts {
    pub duration: Option<Duration>,
    pub sim: bool,
    /// `None` runs at normal priority.
    pub rt: Option<RtOpts>,
}

/// Loop counters accumulated over every housekeeping window.
#[derive(Debug, Clone, Copy, Default)]
pub struct Totals {
    pub iterations: u64,
    pub misses: u64,
    pub worst_overrun: Duration,
    pub busy: Duration,
}

impl Totals {
    fn add(&mut self, s: &LoopStats) {
        self.iterations += s.iterations;
        self.misses += s.misses;
        self.worst_overrun = self.worst_overrun.max(s.worst_overrun);
        self.busy += s.busy;
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub totals: Totals,
    pub motors: Vec<MotorReport>,
}

impl RunSummary {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "elapsed_s": self.elapsed.as_secs_f64(),
            "iterations": self.totals.iterations,
            "misses": self.totals.misses,
            "worst_overrun_us": micros(self.totals.worst_overrun),
            "busy_us": micros(self.totals.busy),
            "motors": self.motors.iter().map(report_json).collect::<Vec<_>>(),
        })
    }

    pub fn to_text(&self) -> String {
        let mut out = format!(
            "run complete: {:.2} s, {} iterations, {} misses, worst overrun {} us",
            self.elapsed.as_secs_f64(),
            self.totals.iterations,
            self.totals.misses,
            micros(self.totals.worst_overrun),
        );
        for r in &self.motors {
            out.push_str(&format!(
                "\n  {}: position {:.4} rev (ref {:.4}), command {}, illegal {}, driver faults {}{}",
                r.name,
                r.position,
                r.reference,
                r.command,
                r.illegal_transitions,
                r.driver_faults,
                if r.encoder_faulted { ", ENCODER FAULTED" } else { "" },
            ));
        }
        out
    }
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

fn report_json(r: &MotorReport) -> serde_json::Value {
    json!({
        "name": r.name,
        "position": r.position,
        "reference": r.reference,
        "error": r.error(),
        "command": r.command,
        "enabled": r.enabled,
        "illegal_transitions": r.illegal_transitions,
        "driver_faults": r.driver_faults,
        "encoder_faulted": r.encoder_faulted,
    })
}

/// Run every configured motor until `root` is cancelled or the duration
/// elapses, then stop the control thread and coast the driver.
pub fn run(cfg: &Config, opts: &RunOpts, root: &CancelToken) -> Result<RunSummary> {
    let loop_cfg = LoopCfg::from(cfg);
    let group = build_group(cfg, opts.sim, root)?;
    let rt = opts.rt;
    let ctl = spawn_control_loop(group, loop_cfg.period, root, move || match rt {
        Some(o) => setup_rt_once(o),
        None => Ok(()),
    })?;

    let started = Instant::now();
    let deadline = opts.duration.map(|d| started + d);
    let mut totals = Totals::default();
    let mut next_report = started + loop_cfg.housekeeping;

    while !root.is_cancelled() && !ctl.is_finished() {
        let now = Instant::now();
        if deadline.is_some_and(|d| now >= d) {
            break;
        }
        if now >= next_report {
            housekeeping(&ctl, &mut totals);
            next_report += loop_cfg.housekeeping;
        }
        let mut wake = next_report;
        if let Some(d) = deadline {
            wake = wake.min(d);
        }
        std::thread::sleep(wake.saturating_duration_since(now).min(POLL));
    }

    let handles = ctl.handles().to_vec();
    let stats = ctl.stats().clone();
    // Dropping the group joins every decoder thread.
    drop(ctl.stop()?);
    totals.add(&stats.snapshot_and_reset());

    Ok(RunSummary {
        elapsed: started.elapsed(),
        totals,
        motors: handles.iter().map(|h| h.report()).collect(),
    })
}

/// Log one window of loop statistics and every motor's state.
fn housekeeping<D>(ctl: &ControlThread<D>, totals: &mut Totals) {
    let stats = ctl.stats().snapshot_and_reset();
    totals.add(&stats);
    tracing::info!(
        target: "motorloop::housekeeping",
        name = ctl.stats().name(),
        iterations = stats.iterations,
        misses = stats.misses,
        worst_overrun_us = micros(stats.worst_overrun),
        busy_us = micros(stats.busy),
        "loop stats"
    );
    for h in ctl.handles() {
        let r = h.report();
        tracing::info!(
            target: "motorloop::housekeeping",
            motor = %r.name,
            position = r.position,
            reference = r.reference,
            command = r.command,
            enabled = r.enabled,
            illegal = r.illegal_transitions,
            driver_faults = r.driver_faults,
            "motor"
        );
        if r.encoder_faulted {
            tracing::warn!(motor = %r.name, "encoder decoder is faulted; position is frozen");
        }
    }
}

/// Encoder bring-up: decode one motor's encoder and print count and illegal
/// transitions every 100 ms. Returns the final count.
pub fn encoder(
    cfg: &Config,
    motor: &str,
    duration: Option<Duration>,
    sim: bool,
    json_out: bool,
    root: &CancelToken,
) -> Result<i64> {
    let m = cfg
        .motor(motor)
        .ok_or_else(|| config_error(format!("no motor named '{motor}' in config")))?;
    let dcfg = decoder_cfg(m, &cfg.gpio);

    let decoder = if use_sim(sim) {
        let shaft = SimShaft::new(m.counts_per_rev * SIM_FULL_SPEED_RPS);
        shaft.set_speed(ENCODER_SIM_SPEED);
        QuadratureDecoder::spawn(
            m.name.clone(),
            SimulatedEncoder::new(shaft),
            &dcfg,
            root,
        )?
    } else {
        open_hardware_decoder(m, &dcfg, root)?
    };

    let started = Instant::now();
    let deadline = duration.map(|d| started + d);
    let mut next = started + ENCODER_REPORT;
    while !root.is_cancelled() {
        let now = Instant::now();
        if deadline.is_some_and(|d| now >= d) {
            break;
        }
        if now >= next {
            print_encoder_line(&decoder, started.elapsed(), json_out);
            next += ENCODER_REPORT;
        }
        std::thread::sleep(next.saturating_duration_since(now).min(POLL));
    }
    print_encoder_line(&decoder, started.elapsed(), json_out);
    if decoder.is_faulted() {
        return Err(Report::new(motorloop_core::ControlError::HardwareFault(format!(
            "encoder '{}' stopped after an edge source failure",
            decoder.name()
        ))));
    }
    Ok(decoder.count())
}

fn print_encoder_line(d: &QuadratureDecoder, t: Duration, json_out: bool) {
    if json_out {
        println!(
            "{}",
            json!({
                "t_ms": u64::try_from(t.as_millis()).unwrap_or(u64::MAX),
                "motor": d.name(),
                "count": d.count(),
                "illegal": d.illegal_count(),
                "faulted": d.is_faulted(),
            })
        );
    } else {
        println!(
            "{:>8.3}s {}: count {} illegal {}",
            t.as_secs_f64(),
            d.name(),
            d.count(),
            d.illegal_count()
        );
    }
}

/// Build the simulated stack, tick it once and coast. Returns the number of
/// motors checked.
pub fn self_check(cfg: &Config, root: &CancelToken) -> Result<usize> {
    let period = LoopCfg::from(cfg).period;
    let mut group = build_sim_group(cfg, root)?;
    group.tick(period.as_secs_f64());
    group.shutdown()?;
    let faults: u64 = group.handles().iter().map(|h| h.driver_faults()).sum();
    if faults > 0 {
        return Err(Report::new(motorloop_core::ControlError::Driver(format!(
            "{faults} driver command(s) failed during the check tick"
        ))));
    }
    Ok(group.len())
}

fn config_error(msg: String) -> Report {
    Report::new(motorloop_core::ControlError::Config(msg))
}

fn build_motor(decoder: QuadratureDecoder, m: &motorloop_config::MotorCfg) -> Result<MotorLoop> {
    MotorLoop::builder()
        .with_decoder(decoder)
        .with_config(&MotorCfg::from(m))
        .build()
        .wrap_err_with(|| format!("build motor '{}'", m.name))
}

fn use_sim(requested: bool) -> bool {
    if requested {
        return true;
    }
    let hardware = cfg!(all(feature = "hardware", target_os = "linux"));
    if !hardware {
        tracing::warn!("built without hardware support; using simulation");
    }
    !hardware
}

/// Any construction failure drops what was built so far, joining decoders.
fn build_group(cfg: &Config, sim: bool, root: &CancelToken) -> Result<MotorGroup<BoxDriver>> {
    if use_sim(sim) {
        build_sim_group(cfg, root)
    } else {
        build_hardware_group(cfg, root)
    }
}

fn build_sim_group(cfg: &Config, root: &CancelToken) -> Result<MotorGroup<BoxDriver>> {
    let mut driver = SimulatedDriver::new();
    let mut motors = Vec::with_capacity(cfg.motors.len());
    for m in &cfg.motors {
        let shaft = SimShaft::new(m.counts_per_rev * SIM_FULL_SPEED_RPS);
        driver.attach(m.channel, shaft.clone());
        let decoder = QuadratureDecoder::spawn(
            m.name.clone(),
            SimulatedEncoder::new(shaft),
            &decoder_cfg(m, &cfg.gpio),
            root,
        )
        .wrap_err_with(|| format!("start encoder for motor '{}'", m.name))?;
        motors.push(build_motor(decoder, m)?);
    }
    driver
        .init()
        .map_err(|e| Report::new(map_hw_error(&*e)))
        .wrap_err("init simulated driver")?;
    let mut group = MotorGroup::new(Box::new(driver) as BoxDriver);
    for m in motors {
        group.push(m);
    }
    tracing::info!(motors = group.len(), "simulated stack ready");
    Ok(group)
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn build_hardware_group(cfg: &Config, root: &CancelToken) -> Result<MotorGroup<BoxDriver>> {
    use motorloop_hardware::Motoron;

    let mut motors = Vec::with_capacity(cfg.motors.len());
    for m in &cfg.motors {
        let decoder = open_hardware_decoder(m, &decoder_cfg(m, &cfg.gpio), root)?;
        motors.push(build_motor(decoder, m)?);
    }
    let mut driver = Motoron::open(cfg.driver.i2c_bus, cfg.driver.address)
        .map_err(|e| Report::new(map_hw_error(&e)))
        .wrap_err("open motor driver")?;
    driver
        .init()
        .map_err(|e| Report::new(map_hw_error(&*e)))
        .wrap_err("init motor driver")?;
    let mut group = MotorGroup::new(Box::new(driver) as BoxDriver);
    for m in motors {
        group.push(m);
    }
    tracing::info!(
        motors = group.len(),
        bus = cfg.driver.i2c_bus,
        address = cfg.driver.address,
        "hardware stack ready"
    );
    Ok(group)
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn build_hardware_group(_cfg: &Config, _root: &CancelToken) -> Result<MotorGroup<BoxDriver>> {
    Err(Report::new(motorloop_core::ControlError::Hardware(
        "built without the hardware feature".into(),
    )))
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn open_hardware_decoder(
    m: &motorloop_config::MotorCfg,
    dcfg: &motorloop_core::DecoderCfg,
    root: &CancelToken,
) -> Result<QuadratureDecoder> {
    let source = motorloop_hardware::GpioEdgeSource::open(m.encoder_a, m.encoder_b)
        .map_err(|e| Report::new(map_hw_error(&e)))
        .wrap_err_with(|| format!("open encoder lines for motor '{}'", m.name))?;
    QuadratureDecoder::spawn(m.name.clone(), source, dcfg, root)
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn open_hardware_decoder(
    _m: &motorloop_config::MotorCfg,
    _dcfg: &motorloop_core::DecoderCfg,
    _root: &CancelToken,
) -> Result<QuadratureDecoder> {
    Err(Report::new(motorloop_core::ControlError::Hardware(
        "built without the hardware feature".into(),
    )))
}
