//! Real-time helpers for the control thread (Linux SCHED_FIFO / affinity /
//! mlockall; macOS mlockall only).
//!
//! `setup_rt_once` is meant to run on the control thread itself: priority and
//! affinity apply to the calling thread, memory locking to the process.

use crate::cli::RtLock;

/// Real-time knobs resolved from flags and config.
#[derive(Debug, Clone, Copy)]
pub struct RtOpts {
    pub priority: i32,
    pub lock: RtLock,
    pub cpu: Option<usize>,
}

#[cfg(target_os = "linux")]
/// Capacity of cpu_set_t in CPU indices (bits).
const MAX_CPUSET_BITS: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;

/// Apply real-time settings once per process.
///
/// Memory locking and affinity failures are logged and dropped. A failed
/// SCHED_FIFO request is returned so the caller knows it runs at normal
/// priority.
#[cfg(target_os = "linux")]
pub fn setup_rt_once(opts: RtOpts) -> eyre::Result<()> {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<Result<(), String>> = OnceLock::new();

    let outcome = RT_ONCE.get_or_init(|| {
        match try_apply_mem_lock(opts.lock) {
            Ok(()) => tracing::info!(lock = ?opts.lock, "memory lock applied"),
            Err(err) => tracing::warn!(error = %err, "mlockall failed"),
        }
        if let Some(cpu) = opts.cpu
            && let Err(err) = try_apply_affinity(cpu)
        {
            tracing::warn!(cpu, error = %err, "affinity not applied");
        }
        match try_apply_fifo_priority(opts.priority) {
            Ok(prio) => {
                tracing::info!(prio, "SCHED_FIFO applied");
                Ok(())
            }
            Err(err) => Err(format!(
                "sched_setscheduler(SCHED_FIFO, prio={}) failed: {err}",
                opts.priority
            )),
        }
    });
    outcome.clone().map_err(|msg| eyre::eyre!(msg))
}

#[cfg(target_os = "linux")]
fn try_apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
    use libc::{MCL_CURRENT, MCL_FUTURE, mlockall};

    fn is_retryable_memlock_error(err: &std::io::Error) -> bool {
        matches!(err.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM)
    }

    fn memlock_limit_hint() -> Option<String> {
        let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
        // SAFETY: getrlimit writes a full rlimit on success.
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
        if rc != 0 {
            return None;
        }
        // SAFETY: rc == 0 means the struct was initialized.
        let cur = unsafe { rlim.assume_init() }.rlim_cur;
        if cur == libc::RLIM_INFINITY {
            Some("memlock limit: unlimited".to_string())
        } else {
            Some(format!("memlock limit: {} KiB", cur / 1024))
        }
    }

    fn lock_with(flags: libc::c_int) -> std::io::Result<()> {
        // SAFETY: mlockall takes only flags and has no memory-safety preconditions.
        let rc = unsafe { mlockall(flags) };
        if rc != 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    let err = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => match lock_with(MCL_CURRENT) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        },
        RtLock::All => match lock_with(MCL_CURRENT | MCL_FUTURE) {
            Ok(()) => return Ok(()),
            // Fall back to current pages only.
            Err(e) if is_retryable_memlock_error(&e) && lock_with(MCL_CURRENT).is_ok() => {
                tracing::warn!(error = %e, "mlockall(current|future) failed; locked current pages only");
                return Ok(());
            }
            Err(e) => e,
        },
    };

    let mut msg = format!("mlockall({lock:?}) failed: {err}");
    if is_retryable_memlock_error(&err) {
        if let Some(h) = memlock_limit_hint() {
            msg.push_str(&format!("; {h}"));
        }
        msg.push_str("; hint: needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'");
    }
    Err(eyre::eyre!(msg))
}

/// Returns the priority actually applied.
#[cfg(target_os = "linux")]
fn try_apply_fifo_priority(prio: i32) -> eyre::Result<i32> {
    use libc::{SCHED_FIFO, sched_get_priority_max, sched_get_priority_min, sched_param};

    // SAFETY: plain queries on a valid policy constant.
    let (min, max) = unsafe {
        let min = sched_get_priority_min(SCHED_FIFO);
        let max = sched_get_priority_max(SCHED_FIFO);
        if min < 0 || max < 0 { (1, 99) } else { (min, max) }
    };
    let prio_val = prio.clamp(min, max);
    let param = sched_param {
        sched_priority: prio_val,
    };
    // SAFETY: pid 0 targets the calling thread; param outlives the call.
    let rc = unsafe { libc::sched_setscheduler(0, SCHED_FIFO, &param) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            eyre::bail!("{err}; hint: needs CAP_SYS_NICE or root");
        }
        return Err(eyre::eyre!(err));
    }
    Ok(prio_val)
}

/// Pin the calling thread to `target` if the current mask allows it.
#[cfg(target_os = "linux")]
fn try_apply_affinity(target: usize) -> eyre::Result<()> {
    use libc::{CPU_ISSET, CPU_SET, CPU_ZERO};

    if target >= MAX_CPUSET_BITS {
        eyre::bail!("requested CPU {target} exceeds cpu_set_t capacity {MAX_CPUSET_BITS}");
    }
    // SAFETY: sysconf has no preconditions.
    let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if online < 1 {
        eyre::bail!("_SC_NPROCESSORS_ONLN < 1");
    }
    if target as libc::c_long >= online {
        eyre::bail!("requested CPU {target} >= online {online}");
    }

    // SAFETY: cpu_set_t is plain data; zeroed is a valid empty set and the
    // CPU_* helpers stay inside its bounds (target < MAX_CPUSET_BITS).
    unsafe {
        let mut allowed: libc::cpu_set_t = std::mem::zeroed();
        CPU_ZERO(&mut allowed);
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut allowed) != 0 {
            return Err(eyre::eyre!(std::io::Error::last_os_error()));
        }
        if !CPU_ISSET(target, &allowed) {
            eyre::bail!("CPU {target} not permitted by current affinity mask");
        }
        let mut desired: libc::cpu_set_t = std::mem::zeroed();
        CPU_ZERO(&mut desired);
        CPU_SET(target, &mut desired);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &desired) != 0 {
            return Err(eyre::eyre!(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

#[cfg(target_os = "macos")]
pub fn setup_rt_once(opts: RtOpts) -> eyre::Result<()> {
    use libc::{MCL_CURRENT, MCL_FUTURE, mlockall};
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    RT_ONCE.get_or_init(|| {
        let flags = match opts.lock {
            RtLock::None => None,
            RtLock::Current => Some(MCL_CURRENT),
            RtLock::All => Some(MCL_CURRENT | MCL_FUTURE),
        };
        if let Some(flags) = flags {
            // SAFETY: mlockall takes only flags.
            if unsafe { mlockall(flags) } != 0 {
                let err = std::io::Error::last_os_error();
                tracing::warn!(error = %err, "mlockall failed");
            }
        }
    });
    eyre::bail!("SCHED_FIFO and affinity are not supported on macOS")
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn setup_rt_once(_opts: RtOpts) -> eyre::Result<()> {
    eyre::bail!("real-time scheduling is not supported on this OS")
}
