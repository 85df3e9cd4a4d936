//! Scoped resource limits for one execution.
//!
//! [`ResourceLimiter::arm`] is the only way in and dropping the returned
//! [`ArmedLimits`] is the only way out, so limits are entered and left in a
//! strictly nested fashion:
//!
//! ```text
//! idle -> armed -> running -> { completed | violated } -> (drop) -> idle
//! ```
//!
//! Only soft limits are lowered. Hard limits are left alone so restoring the
//! previous soft values always succeeds for an unprivileged process.

use crate::config::types::{ResourceBudget, Result, SandboxError};
use crate::kernel::memory;
use crate::kernel::signal::{self, LimitSignals};
use crate::kernel::watchdog::Watchdog;
use nix::sys::resource::{getrlimit, getrusage, setrlimit, Resource, UsageWho};
use std::time::{Duration, Instant};

/// Address-space headroom never drops below this, so the runtime can still
/// map thread stacks and allocator arenas under a tiny memory budget.
const ADDRESS_SPACE_FLOOR: u64 = 64 * 1024 * 1024;

/// Where limits are enforced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enforcement {
    /// Worker process: soft rlimits, limit signals and the wall timer, plus
    /// the in-process watchdog.
    Os,
    /// Watchdog polling only; touches no process-wide state. Used when the
    /// executor shares its process with other work (tests, `check`).
    InProcess,
}

pub struct ResourceLimiter;

impl ResourceLimiter {
    /// Lower limits to `budget` until the returned guard is dropped.
    pub fn arm(budget: &ResourceBudget, enforcement: Enforcement) -> Result<ArmedLimits> {
        let mut armed = ArmedLimits {
            budget: budget.clone(),
            enforcement,
            started: Instant::now(),
            baseline_rss: memory::resident_bytes(),
            saved_cpu: None,
            saved_address_space: None,
            timer_armed: false,
            signals: None,
        };

        if enforcement == Enforcement::Os {
            // a failure here drops `armed`, which undoes the partial setup
            armed.signals = Some(LimitSignals::install().map_err(SandboxError::ResourceLimit)?);
            armed.lower_cpu()?;
            armed.lower_address_space()?;
            set_wall_timer(budget.wall_limit().max(Duration::from_micros(1)))
                .map_err(|e| SandboxError::ResourceLimit(format!("setitimer failed: {}", e)))?;
            armed.timer_armed = true;
        }

        log::debug!(
            "limits armed ({:?}): cpu={}s wall={}s memory={}B",
            enforcement,
            budget.max_cpu_seconds,
            budget.max_wall_seconds,
            budget.max_memory_bytes
        );
        Ok(armed)
    }
}

/// Limits in force. Dropping restores the previous state on every path.
pub struct ArmedLimits {
    budget: ResourceBudget,
    enforcement: Enforcement,
    started: Instant,
    baseline_rss: Option<u64>,
    saved_cpu: Option<(u64, u64)>,
    saved_address_space: Option<(u64, u64)>,
    timer_armed: bool,
    signals: Option<LimitSignals>,
}

impl ArmedLimits {
    /// Governor for an interpreter running under these limits. Create it on
    /// the thread that runs the guest; CPU time is measured per thread.
    pub fn watchdog(&self) -> Watchdog {
        Watchdog::new(
            &self.budget,
            self.started,
            self.baseline_rss,
            self.enforcement == Enforcement::Os,
        )
    }

    pub fn enforcement(&self) -> Enforcement {
        self.enforcement
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn lower_cpu(&mut self) -> Result<()> {
        let (soft, hard) = getrlimit(Resource::RLIMIT_CPU)
            .map_err(|e| SandboxError::ResourceLimit(format!("getrlimit(RLIMIT_CPU): {}", e)))?;
        let used = process_cpu_time().as_secs_f64().ceil() as u64;
        let target = clamp_soft(used + self.budget.max_cpu_seconds.ceil() as u64, hard);
        setrlimit(Resource::RLIMIT_CPU, target, hard)
            .map_err(|e| SandboxError::ResourceLimit(format!("setrlimit(RLIMIT_CPU): {}", e)))?;
        self.saved_cpu = Some((soft, hard));
        Ok(())
    }

    fn lower_address_space(&mut self) -> Result<()> {
        let (soft, hard) = getrlimit(Resource::RLIMIT_AS)
            .map_err(|e| SandboxError::ResourceLimit(format!("getrlimit(RLIMIT_AS): {}", e)))?;
        let current = match memory::snapshot() {
            Some(snap) => snap.virtual_bytes,
            // without procfs there is no safe baseline to lower from
            None => return Ok(()),
        };
        let headroom = self
            .budget
            .max_memory_bytes
            .saturating_mul(2)
            .max(ADDRESS_SPACE_FLOOR);
        let target = clamp_soft(current.saturating_add(headroom), hard);
        if target < soft {
            setrlimit(Resource::RLIMIT_AS, target, hard)
                .map_err(|e| SandboxError::ResourceLimit(format!("setrlimit(RLIMIT_AS): {}", e)))?;
            self.saved_address_space = Some((soft, hard));
        }
        Ok(())
    }
}

impl Drop for ArmedLimits {
    fn drop(&mut self) {
        if self.timer_armed {
            if let Err(e) = set_wall_timer(Duration::ZERO) {
                log::warn!("Failed to disarm wall timer: {}", e);
            }
        }
        if let Some((soft, hard)) = self.saved_address_space.take() {
            if let Err(e) = setrlimit(Resource::RLIMIT_AS, soft, hard) {
                log::warn!("Failed to restore RLIMIT_AS: {}", e);
            }
        }
        if let Some((soft, hard)) = self.saved_cpu.take() {
            if let Err(e) = setrlimit(Resource::RLIMIT_CPU, soft, hard) {
                log::warn!("Failed to restore RLIMIT_CPU: {}", e);
            }
        }
        if self.signals.take().is_some() {
            signal::clear();
        }
        log::debug!("limits restored after {:?}", self.started.elapsed());
    }
}

fn clamp_soft(value: u64, hard: u64) -> u64 {
    if hard == libc::RLIM_INFINITY as u64 {
        value
    } else {
        value.min(hard)
    }
}

/// User plus system CPU consumed by the whole process so far.
pub fn process_cpu_time() -> Duration {
    match getrusage(UsageWho::RUSAGE_SELF) {
        Ok(usage) => {
            let user = usage.user_time();
            let system = usage.system_time();
            let micros = (user.tv_sec() + system.tv_sec()) as i128 * 1_000_000
                + (user.tv_usec() + system.tv_usec()) as i128;
            Duration::from_micros(micros.max(0) as u64)
        }
        Err(_) => Duration::ZERO,
    }
}

/// Arm (or with zero, disarm) the one-shot ITIMER_REAL.
fn set_wall_timer(after: Duration) -> std::io::Result<()> {
    let value = libc::itimerval {
        it_interval: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        it_value: libc::timeval {
            tv_sec: after.as_secs() as libc::time_t,
            tv_usec: after.subsec_micros() as libc::suseconds_t,
        },
    };
    // SAFETY: `value` is a valid itimerval and the old value is not requested.
    let rc = unsafe { libc::setitimer(libc::ITIMER_REAL, &value, std::ptr::null_mut()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::signal::TEST_LOCK;

    #[test]
    fn test_os_limits_are_restored_on_drop() {
        let _serial = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let cpu_before = getrlimit(Resource::RLIMIT_CPU).unwrap();
        let as_before = getrlimit(Resource::RLIMIT_AS).unwrap();

        let budget = ResourceBudget {
            max_cpu_seconds: 30.0,
            max_wall_seconds: 30.0,
            // generous, so parallel tests keep room to map thread stacks
            max_memory_bytes: 64 * 1024 * 1024 * 1024,
            ..Default::default()
        };
        let armed = ResourceLimiter::arm(&budget, Enforcement::Os).unwrap();
        let cpu_during = getrlimit(Resource::RLIMIT_CPU).unwrap();
        assert_eq!(cpu_during.1, cpu_before.1, "hard limit untouched");
        assert!(cpu_during.0 <= cpu_before.0);
        drop(armed);

        assert_eq!(getrlimit(Resource::RLIMIT_CPU).unwrap(), cpu_before);
        assert_eq!(getrlimit(Resource::RLIMIT_AS).unwrap(), as_before);
        assert_eq!(signal::pending(), None);
    }

    #[test]
    fn test_in_process_arming_touches_nothing() {
        let _serial = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let cpu_before = getrlimit(Resource::RLIMIT_CPU).unwrap();
        let armed = ResourceLimiter::arm(&ResourceBudget::default(), Enforcement::InProcess).unwrap();
        assert_eq!(getrlimit(Resource::RLIMIT_CPU).unwrap(), cpu_before);
        assert_eq!(armed.enforcement(), Enforcement::InProcess);
    }

    #[test]
    fn test_clamp_respects_hard_limit() {
        assert_eq!(clamp_soft(10, 5), 5);
        assert_eq!(clamp_soft(10, libc::RLIM_INFINITY as u64), 10);
    }
}
