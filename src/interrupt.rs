//! Deferral of operator interrupts around hardware transactions.
//!
//! Killing the process halfway through a USB transfer leaves the scope armed or
//! half-read, and it stays that way until it is power-cycled. While a
//! [`DeferredInterrupt`] is alive, `SIGINT` and `SIGTERM` are only recorded.
//! Dropping the guard puts the previous dispositions back and re-raises every
//! signal that arrived in between, so the process still terminates promptly,
//! just at a transaction boundary.

pub use imp::DeferredInterrupt;

#[cfg(unix)]
mod imp {
    use anyhow::Result;
    use libc::{c_int, SA_RESTART, SIGINT, SIGTERM};
    use log::{debug, warn};
    use std::io;
    use std::mem;
    use std::ptr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, MutexGuard};

    const DEFERRED: [c_int; 2] = [SIGINT, SIGTERM];

    static PENDING: [AtomicBool; 2] = [AtomicBool::new(false), AtomicBool::new(false)];

    // Dispositions are process-wide, so only one guard may be installed at a time.
    static ACTIVE: Mutex<()> = Mutex::new(());

    extern "C" fn record(signal: c_int) {
        // async-signal context: atomics only
        for (slot, deferred) in PENDING.iter().zip(DEFERRED) {
            if deferred == signal {
                slot.store(true, Ordering::SeqCst);
            }
        }
    }

    pub struct DeferredInterrupt {
        previous: Vec<(c_int, libc::sigaction)>,
        _active: MutexGuard<'static, ()>,
    }

    impl DeferredInterrupt {
        pub fn acquire() -> Result<Self> {
            let active = ACTIVE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            for slot in &PENDING {
                slot.store(false, Ordering::SeqCst);
            }

            let mut guard = Self {
                previous: Vec::with_capacity(DEFERRED.len()),
                _active: active,
            };

            let mut action: libc::sigaction = unsafe { mem::zeroed() };
            action.sa_sigaction = record as extern "C" fn(c_int) as libc::sighandler_t;
            action.sa_flags = SA_RESTART;
            unsafe { libc::sigemptyset(&mut action.sa_mask) };

            for signal in DEFERRED {
                let mut previous: libc::sigaction = unsafe { mem::zeroed() };
                // On failure the guard drops here and restores what was already swapped.
                if unsafe { libc::sigaction(signal, &action, &mut previous) } != 0 {
                    return Err(io::Error::last_os_error().into());
                }
                guard.previous.push((signal, previous));
            }
            Ok(guard)
        }

        /// Whether an interrupt has been held back so far.
        pub fn pending(&self) -> bool {
            PENDING.iter().any(|slot| slot.load(Ordering::SeqCst))
        }
    }

    impl Drop for DeferredInterrupt {
        fn drop(&mut self) {
            for (signal, previous) in &self.previous {
                if unsafe { libc::sigaction(*signal, previous, ptr::null_mut()) } != 0 {
                    warn!(
                        "Failed to restore handler for signal {signal}: {}",
                        io::Error::last_os_error()
                    );
                }
            }

            for (slot, signal) in PENDING.iter().zip(DEFERRED) {
                if slot.swap(false, Ordering::SeqCst) {
                    warn!("Delivering signal {signal} deferred during capture");
                    unsafe { libc::raise(signal) };
                }
            }
            debug!("Interrupt deferral released");
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use anyhow::Result;

    /// No signal dispositions to manage on this platform.
    pub struct DeferredInterrupt;

    impl DeferredInterrupt {
        pub fn acquire() -> Result<Self> {
            Ok(Self)
        }

        pub fn pending(&self) -> bool {
            false
        }
    }
}
