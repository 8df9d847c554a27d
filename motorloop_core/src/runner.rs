//! Control thread: owns the motor group and runs it at a fixed period.
use std::time::Duration;

use eyre::WrapErr;
use motorloop_traits::ActuatorDriver;

use crate::cancel::CancelToken;
use crate::error::{ControlError, Result};
use crate::monitor::{DeadlineMonitor, LoopScheduler, StatsHandle};
use crate::motor::{MotorGroup, MotorHandle};

/// Name of the control thread (also the monitor's name in reports).
pub const CONTROL_THREAD: &str = "control";

pub struct ControlThread<D> {
    cancel: CancelToken,
    stats: StatsHandle,
    handles: Vec<MotorHandle>,
    join_handle: Option<std::thread::JoinHandle<MotorGroup<D>>>,
}

/// Start the control loop on its own thread.
///
/// `rt_setup` runs first on the new thread. Its failure is logged and the
/// loop continues at normal priority. Each tick uses `period` as its time
/// step. All channels are coasted when the loop exits. The thread stops when
/// `parent` is cancelled or the returned `ControlThread` is stopped/dropped.
pub fn spawn_control_loop<D, F>(
    mut group: MotorGroup<D>,
    period: Duration,
    parent: &CancelToken,
    rt_setup: F,
) -> Result<ControlThread<D>>
where
    D: ActuatorDriver + Send + 'static,
    F: FnOnce() -> Result<()> + Send + 'static,
{
    if period.is_zero() {
        return Err(eyre::Report::new(ControlError::Config(
            "control period must be > 0".into(),
        )));
    }
    let cancel = parent.child();
    let monitor = DeadlineMonitor::new(CONTROL_THREAD);
    let stats = monitor.stats_handle();
    let handles = group.handles();
    let thread_cancel = cancel.clone();
    let dt = period.as_secs_f64();

    let join_handle = std::thread::Builder::new()
        .name(CONTROL_THREAD.into())
        .spawn(move || {
            if let Err(e) = rt_setup() {
                tracing::warn!(error = %e, "real-time setup failed; running at normal priority");
            }
            tracing::info!(
                period_us = u64::try_from(period.as_micros()).unwrap_or(u64::MAX),
                motors = group.len(),
                "control loop started"
            );
            let mut scheduler = LoopScheduler::new(monitor, period);
            let iterations = scheduler.run(&thread_cancel, || group.tick(dt));
            if let Err(e) = group.shutdown() {
                tracing::error!(error = %e, "coast on exit failed");
            }
            tracing::info!(iterations, "control loop stopped");
            group
        })
        .map_err(|e| eyre::Report::new(ControlError::Io(e.to_string())))
        .wrap_err("spawn control thread")?;

    Ok(ControlThread {
        cancel,
        stats,
        handles,
        join_handle: Some(join_handle),
    })
}

impl<D> ControlThread<D> {
    pub fn stats(&self) -> &StatsHandle {
        &self.stats
    }

    pub fn handles(&self) -> &[MotorHandle] {
        &self.handles
    }

    pub fn handle(&self, name: &str) -> Option<&MotorHandle> {
        self.handles.iter().find(|h| h.name() == name)
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Cancel and join, handing back the group (driver included).
    pub fn stop(mut self) -> Result<MotorGroup<D>> {
        self.cancel.cancel();
        let handle = self
            .join_handle
            .take()
            .ok_or_else(|| eyre::eyre!("control thread already joined"))?;
        handle
            .join()
            .map_err(|_| eyre::Report::new(ControlError::Io("control thread panicked".into())))
    }
}

impl<D> Drop for ControlThread<D> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("control thread panicked during shutdown");
        }
    }
}
