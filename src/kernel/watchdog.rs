//! In-process budget enforcement polled by the interpreter.

use crate::config::types::{ResourceBudget, ResourceKind, ResourceViolation};
use crate::kernel::{memory, signal};
use crate::lang::Governor;
use nix::sys::signal::Signal;
use nix::time::{clock_gettime, ClockId};
use std::time::{Duration, Instant};

/// Clock reads happen every this many polls.
const TIME_POLL_INTERVAL: u64 = 64;
/// `/proc` reads happen every this many polls.
const MEMORY_POLL_INTERVAL: u64 = 4096;
/// Longest uninterrupted stretch of a guest sleep.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

pub struct Watchdog {
    budget: ResourceBudget,
    deadline: Instant,
    baseline_rss: Option<u64>,
    cpu_start: Option<Duration>,
    watch_signals: bool,
    polls: u64,
}

impl Watchdog {
    pub fn new(
        budget: &ResourceBudget,
        started: Instant,
        baseline_rss: Option<u64>,
        watch_signals: bool,
    ) -> Self {
        Self {
            budget: budget.clone(),
            deadline: started + budget.wall_limit(),
            baseline_rss,
            cpu_start: thread_cpu_time(),
            watch_signals,
            polls: 0,
        }
    }

    fn wall_exceeded(&self) -> ResourceViolation {
        ResourceViolation::new(
            ResourceKind::WallClock,
            format!("wall clock limit of {}s exceeded", self.budget.max_wall_seconds),
        )
    }

    fn cpu_exceeded(&self) -> ResourceViolation {
        ResourceViolation::new(
            ResourceKind::CpuTime,
            format!("CPU time limit of {}s exceeded", self.budget.max_cpu_seconds),
        )
    }

    fn memory_exceeded(&self) -> ResourceViolation {
        ResourceViolation::new(
            ResourceKind::Memory,
            format!("memory limit of {} bytes exceeded", self.budget.max_memory_bytes),
        )
    }

    /// Resident growth since arming.
    fn memory_used(&self) -> Option<u64> {
        let baseline = self.baseline_rss?;
        Some(memory::resident_bytes()?.saturating_sub(baseline))
    }

    fn check_signals(&self) -> Result<(), ResourceViolation> {
        if !self.watch_signals {
            return Ok(());
        }
        match signal::pending() {
            Some(Signal::SIGXCPU) => Err(self.cpu_exceeded()),
            Some(Signal::SIGALRM) => Err(self.wall_exceeded()),
            _ => Ok(()),
        }
    }

    fn check_clocks(&self) -> Result<(), ResourceViolation> {
        if Instant::now() >= self.deadline {
            return Err(self.wall_exceeded());
        }
        if let (Some(start), Some(now)) = (self.cpu_start, thread_cpu_time()) {
            if now.saturating_sub(start) > self.budget.cpu_limit() {
                return Err(self.cpu_exceeded());
            }
        }
        Ok(())
    }

    fn check_memory(&self) -> Result<(), ResourceViolation> {
        match self.memory_used() {
            Some(used) if used > self.budget.max_memory_bytes => Err(self.memory_exceeded()),
            _ => Ok(()),
        }
    }
}

impl Governor for Watchdog {
    fn check(&mut self) -> Result<(), ResourceViolation> {
        self.polls = self.polls.wrapping_add(1);
        self.check_signals()?;
        if self.polls % TIME_POLL_INTERVAL == 0 {
            self.check_clocks()?;
        }
        if self.polls % MEMORY_POLL_INTERVAL == 0 {
            self.check_memory()?;
        }
        Ok(())
    }

    fn reserve(&mut self, bytes: u64) -> Result<(), ResourceViolation> {
        let used = self.memory_used().unwrap_or(0);
        if used.saturating_add(bytes) > self.budget.max_memory_bytes {
            log::debug!("refusing reservation of {} bytes ({} in use)", bytes, used);
            return Err(self.memory_exceeded());
        }
        Ok(())
    }

    fn sleep(&mut self, duration: Duration) -> Result<(), ResourceViolation> {
        let wake = Instant::now() + duration;
        loop {
            self.check_signals()?;
            let now = Instant::now();
            if now >= self.deadline {
                return Err(self.wall_exceeded());
            }
            if now >= wake {
                return Ok(());
            }
            let slice = (wake - now).min(self.deadline - now).min(SLEEP_SLICE);
            std::thread::sleep(slice);
        }
    }
}

/// CPU consumed by the calling thread.
pub fn thread_cpu_time() -> Option<Duration> {
    let ts = clock_gettime(ClockId::CLOCK_THREAD_CPUTIME_ID).ok()?;
    Some(Duration::new(ts.tv_sec().max(0) as u64, ts.tv_nsec().max(0) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(wall: f64, cpu: f64, memory: u64) -> ResourceBudget {
        ResourceBudget {
            max_wall_seconds: wall,
            max_cpu_seconds: cpu,
            max_memory_bytes: memory,
            ..Default::default()
        }
    }

    #[test]
    fn test_sleep_past_deadline_is_wall_violation() {
        let mut dog = Watchdog::new(&budget(0.1, 10.0, 1 << 30), Instant::now(), None, false);
        let started = Instant::now();
        let err = dog.sleep(Duration::from_secs(10)).unwrap_err();
        assert_eq!(err.kind, ResourceKind::WallClock);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_short_sleep_completes() {
        let mut dog = Watchdog::new(&budget(5.0, 5.0, 1 << 30), Instant::now(), None, false);
        assert!(dog.sleep(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_busy_loop_trips_a_clock() {
        let mut dog = Watchdog::new(&budget(0.2, 0.1, 1 << 30), Instant::now(), None, false);
        let started = Instant::now();
        let err = loop {
            if let Err(e) = dog.check() {
                break e;
            }
        };
        assert!(matches!(err.kind, ResourceKind::CpuTime | ResourceKind::WallClock));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_oversized_reservation_is_memory_violation() {
        let mut dog = Watchdog::new(&budget(5.0, 5.0, 1024), Instant::now(), None, false);
        assert!(dog.reserve(512).is_ok());
        let err = dog.reserve(4096).unwrap_err();
        assert_eq!(err.kind, ResourceKind::Memory);
        assert_eq!(err.to_string(), "MemoryError: memory limit of 1024 bytes exceeded");
    }

    #[test]
    fn test_delivered_sigxcpu_is_cpu_violation() {
        let _serial = signal::TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let guard = signal::LimitSignals::install().unwrap();
        let mut dog = Watchdog::new(&budget(30.0, 0.5, 1 << 30), Instant::now(), None, true);
        assert!(dog.check().is_ok());

        nix::sys::signal::raise(Signal::SIGXCPU).unwrap();
        let err = dog.check().unwrap_err();
        assert_eq!(err.kind, ResourceKind::CpuTime);
        assert_eq!(err.to_string(), "TimeoutError: CPU time limit of 0.5s exceeded");

        drop(guard);
        signal::clear();
    }
}
