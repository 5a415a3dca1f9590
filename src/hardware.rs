use crate::{log_setup, AcquisitionSettings, AdcClockSource, Profile};
use anyhow::{Context, Result};
use log::info;
use std::path::Path;
use std::time::Duration;

/// Ask the target to draw a fresh randomized stimulus.
pub const GENERATE: u8 = b'e';
/// Send an explicit plaintext; the target raises the trigger when it starts.
pub const PLAINTEXT: u8 = b'p';
/// Read back the operation's output.
pub const RESPONSE: u8 = b'r';

/// Payload carried by [`GENERATE`]; the target only looks at the command byte.
pub const GENERATE_PAYLOAD: [u8; 1] = [1];

/// Acquisition parameters pushed to the capture device before the first run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeSettings {
    pub samples: usize,
    pub decimate: u32,
    pub presamples: usize,
    pub adc_src: AdcClockSource,
    pub clock_hz: u64,
}

impl ScopeSettings {
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            samples: profile.num_samples,
            decimate: profile.decimate,
            presamples: profile.presamples,
            adc_src: profile.adc_src,
            clock_hz: profile.clock_hz * profile.supersampling,
        }
    }

    pub fn adc_hz(&self) -> u64 {
        self.clock_hz * self.adc_src.multiplier()
    }
}

/// The oscilloscope side of the bench.
pub trait CaptureDevice {
    fn configure(&mut self, settings: &ScopeSettings) -> Result<()>;
    /// Start waiting for the trigger condition.
    fn arm(&mut self) -> Result<()>;
    /// Block until the configured number of samples is in, or the device gives up.
    /// Returns `true` when the device timed out.
    fn capture(&mut self) -> Result<bool>;
    fn last_waveform(&mut self) -> Result<Vec<f64>>;
    /// Samples counted between arming and the trigger of the last capture.
    fn trigger_count(&mut self) -> Result<usize>;
    fn program(&mut self, firmware: &Path) -> Result<()>;
}

/// The framed serial link to the device under test.
pub trait TargetChannel {
    fn set_output_len(&mut self, len: usize) -> Result<()>;
    fn output_len(&self) -> usize;
    fn write(&mut self, command: u8, payload: &[u8]) -> Result<()>;
    /// `Ok(None)` when no complete frame arrived within `timeout`.
    fn read(
        &mut self,
        command: u8,
        len: usize,
        timeout: Duration,
        ack: bool,
    ) -> Result<Option<Vec<u8>>>;
    fn is_done(&mut self) -> Result<bool>;
    fn set_key(&mut self, key: &[u8], ack: bool) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Knobs of a single capture transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePolicy {
    pub done_poll_interval: Duration,
    pub done_poll_limit: u32,
    pub response_timeout: Duration,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            done_poll_interval: Duration::from_millis(50),
            done_poll_limit: 100,
            response_timeout: Duration::from_millis(1000),
        }
    }
}

impl CapturePolicy {
    pub fn from_settings(settings: &AcquisitionSettings) -> Self {
        Self {
            done_poll_interval: Duration::from_millis(settings.done_poll_interval_ms),
            done_poll_limit: settings.done_poll_limit,
            response_timeout: Duration::from_millis(settings.response_timeout_ms),
        }
    }
}

/// Owns the scope and the target link for the lifetime of an acquisition.
///
/// Nothing else may drive either handle while a `Bench` exists; sessions borrow
/// it mutably.
pub struct Bench<D, T> {
    pub device: D,
    pub target: T,
    pub policy: CapturePolicy,
}

impl<D: CaptureDevice, T: TargetChannel> Bench<D, T> {
    pub fn new(device: D, target: T, policy: CapturePolicy) -> Self {
        Self {
            device,
            target,
            policy,
        }
    }

    /// Configure the scope, optionally reflash the target and set the response length.
    pub fn prepare(&mut self, profile: &Profile) -> Result<()> {
        let scope = ScopeSettings::from_profile(profile);
        self.device
            .configure(&scope)
            .context("configuring capture device")?;

        if profile.reprogram {
            info!("Programming target with {}", profile.firmware_path.display());
            self.device
                .program(&profile.firmware_path)
                .with_context(|| format!("programming {}", profile.firmware_path.display()))?;
        }

        self.target.set_output_len(profile.output_bytes)?;
        log_setup(profile, &scope, &self.policy);
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.target.close().context("closing target channel")
    }
}
