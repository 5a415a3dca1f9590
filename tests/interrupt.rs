#![cfg(unix)]

use anyhow::{bail, Result};
use libc::{c_int, SIGINT, SIGTERM};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use trace_capture::{
    Bench, CaptureDevice, CaptureOutcome, CapturePolicy, CaptureRequest, Rejection,
    ScopeSettings, TargetChannel,
};

static DELIVERED: AtomicUsize = AtomicUsize::new(0);
static SERIAL: Mutex<()> = Mutex::new(());

extern "C" fn count(_signal: c_int) {
    DELIVERED.fetch_add(1, Ordering::SeqCst);
}

fn handler_of(signal: c_int) -> libc::sighandler_t {
    let mut current: libc::sigaction = unsafe { std::mem::zeroed() };
    unsafe { libc::sigaction(signal, std::ptr::null(), &mut current) };
    current.sa_sigaction
}

/// Route `signal` to the counting handler so a replayed signal does not kill the test binary.
fn install_counter(signal: c_int) -> MutexGuard<'static, ()> {
    let serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = count as extern "C" fn(c_int) as libc::sighandler_t;
    unsafe {
        libc::sigemptyset(&mut action.sa_mask);
        assert_eq!(libc::sigaction(signal, &action, std::ptr::null_mut()), 0);
    }
    serial
}

#[derive(Default)]
struct InterruptingScope {
    signal: Option<c_int>,
    timed_out: bool,
    fail: bool,
    observed_during_capture: Option<usize>,
}

impl CaptureDevice for InterruptingScope {
    fn configure(&mut self, _settings: &ScopeSettings) -> Result<()> {
        Ok(())
    }

    fn arm(&mut self) -> Result<()> {
        Ok(())
    }

    fn capture(&mut self) -> Result<bool> {
        if let Some(signal) = self.signal {
            unsafe { libc::raise(signal) };
            self.observed_during_capture = Some(DELIVERED.load(Ordering::SeqCst));
        }
        if self.fail {
            bail!("USB transfer failed");
        }
        Ok(self.timed_out)
    }

    fn last_waveform(&mut self) -> Result<Vec<f64>> {
        Ok(vec![0.5; 64])
    }

    fn trigger_count(&mut self) -> Result<usize> {
        Ok(0)
    }

    fn program(&mut self, _firmware: &Path) -> Result<()> {
        Ok(())
    }
}

struct QuietTarget;

impl TargetChannel for QuietTarget {
    fn set_output_len(&mut self, _len: usize) -> Result<()> {
        Ok(())
    }

    fn output_len(&self) -> usize {
        4
    }

    fn write(&mut self, _command: u8, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    fn read(
        &mut self,
        _command: u8,
        len: usize,
        _timeout: Duration,
        _ack: bool,
    ) -> Result<Option<Vec<u8>>> {
        Ok(Some(vec![0; len]))
    }

    fn is_done(&mut self) -> Result<bool> {
        Ok(true)
    }

    fn set_key(&mut self, _key: &[u8], _ack: bool) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn bench(scope: InterruptingScope) -> Bench<InterruptingScope, QuietTarget> {
    Bench::new(scope, QuietTarget, CapturePolicy::default())
}

#[test]
fn test_interrupt_waits_for_successful_capture() {
    let _serial = install_counter(SIGINT);
    let before = DELIVERED.load(Ordering::SeqCst);
    let mut bench = bench(InterruptingScope {
        signal: Some(SIGINT),
        ..Default::default()
    });

    let outcome = bench.capture(&CaptureRequest::default()).unwrap();

    assert!(matches!(outcome, CaptureOutcome::Captured(_)));
    assert_eq!(bench.device.observed_during_capture, Some(before));
    assert_eq!(DELIVERED.load(Ordering::SeqCst), before + 1);
}

#[test]
fn test_interrupt_delivered_after_capture_timeout() {
    let _serial = install_counter(SIGINT);
    let before = DELIVERED.load(Ordering::SeqCst);
    let mut bench = bench(InterruptingScope {
        signal: Some(SIGINT),
        timed_out: true,
        ..Default::default()
    });

    let outcome = bench.capture(&CaptureRequest::default()).unwrap();

    assert_eq!(outcome, CaptureOutcome::Rejected(Rejection::CaptureTimeout));
    assert_eq!(bench.device.observed_during_capture, Some(before));
    assert_eq!(DELIVERED.load(Ordering::SeqCst), before + 1);
}

#[test]
fn test_interrupt_delivered_after_hardware_error() {
    let _serial = install_counter(SIGTERM);
    let before = DELIVERED.load(Ordering::SeqCst);
    let mut bench = bench(InterruptingScope {
        signal: Some(SIGTERM),
        fail: true,
        ..Default::default()
    });

    assert!(bench.capture(&CaptureRequest::default()).is_err());
    assert_eq!(bench.device.observed_during_capture, Some(before));
    assert_eq!(DELIVERED.load(Ordering::SeqCst), before + 1);
}

#[test]
fn test_previous_handler_restored_without_interrupt() {
    let _serial = install_counter(SIGINT);
    let before = DELIVERED.load(Ordering::SeqCst);
    let mut bench = bench(InterruptingScope::default());

    bench.capture(&CaptureRequest::default()).unwrap();

    assert_eq!(DELIVERED.load(Ordering::SeqCst), before);
    assert_eq!(
        handler_of(SIGINT),
        count as extern "C" fn(c_int) as libc::sighandler_t
    );
}
