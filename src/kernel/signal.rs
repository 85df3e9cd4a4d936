use log::debug;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
/// Async-safe limit signal handling
/// SIGXCPU (soft RLIMIT_CPU crossed) and SIGALRM (wall timer fired) only set
/// an atomic; the interpreter's watchdog polls it and turns it into a
/// catchable resource violation.
use std::sync::atomic::{AtomicI32, Ordering};

/// Signal number most recently received, 0 when none is pending
static LIMIT_SIGNAL: AtomicI32 = AtomicI32::new(0);

const LIMIT_SIGNALS: [Signal; 2] = [Signal::SIGXCPU, Signal::SIGALRM];

/// Installed handlers; dropping restores whatever was there before.
pub struct LimitSignals {
    previous: Vec<(Signal, SigAction)>,
}

impl LimitSignals {
    /// Install handlers for SIGXCPU and SIGALRM
    pub fn install() -> Result<Self, String> {
        clear();
        let action = SigAction::new(
            SigHandler::Handler(Self::signal_handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        let mut previous = Vec::with_capacity(LIMIT_SIGNALS.len());
        for sig in LIMIT_SIGNALS {
            // SAFETY: the handler only performs an atomic store.
            match unsafe { signal::sigaction(sig, &action) } {
                Ok(old) => previous.push((sig, old)),
                Err(e) => {
                    let partial = Self { previous };
                    drop(partial);
                    return Err(format!("Failed to install {} handler: {}", sig, e));
                }
            }
        }

        debug!("limit signal handlers installed (SIGXCPU, SIGALRM)");
        Ok(Self { previous })
    }

    /// Async-safe signal handler
    /// Only performs atomic operations - no allocations, no locks, no I/O
    extern "C" fn signal_handler(signal: libc::c_int) {
        LIMIT_SIGNAL.store(signal, Ordering::SeqCst);
    }
}

impl Drop for LimitSignals {
    fn drop(&mut self) {
        for (sig, old) in self.previous.drain(..).rev() {
            // SAFETY: restores the action that was installed before ours.
            if let Err(e) = unsafe { signal::sigaction(sig, &old) } {
                log::warn!("Failed to restore {} handler: {}", sig, e);
            }
        }
    }
}

/// The pending limit signal, if any
pub fn pending() -> Option<Signal> {
    match LIMIT_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        n => Signal::try_from(n).ok(),
    }
}

/// Forget any pending limit signal
pub fn clear() {
    LIMIT_SIGNAL.store(0, Ordering::SeqCst);
}

/// Serialises tests that install process-wide handlers.
#[cfg(test)]
pub(crate) static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_sets_flag_and_drop_restores() {
        let _serial = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let guard = LimitSignals::install().unwrap();
        assert_eq!(pending(), None);
        signal::raise(Signal::SIGALRM).unwrap();
        assert_eq!(pending(), Some(Signal::SIGALRM));
        drop(guard);
        clear();

        // SAFETY: querying by re-installing and restoring the current action.
        let current = unsafe {
            let query = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
            let old = signal::sigaction(Signal::SIGALRM, &query).unwrap();
            signal::sigaction(Signal::SIGALRM, &old).unwrap();
            old
        };
        assert!(!matches!(current.handler(), SigHandler::Handler(_)));
    }
}
