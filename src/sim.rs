//! Software stand-ins for the scope and the target, for rehearsing a run
//! without hardware attached.

use crate::{Bench, CaptureDevice, CapturePolicy, Profile, ScopeSettings, TargetChannel};
use anyhow::{bail, Result};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::time::Duration;

/// Trigger position the simulated target hits when everything goes to plan.
pub const NOMINAL_TRIGGER: usize = 13000;

/// How often each glitch shows up, as probabilities per capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glitches {
    pub in_band_trigger: f64,
    pub capture_timeout: f64,
    pub missing_response: f64,
}

impl Default for Glitches {
    fn default() -> Self {
        Self {
            in_band_trigger: 0.1,
            capture_timeout: 0.01,
            missing_response: 0.01,
        }
    }
}

pub struct SimScope {
    rng: StdRng,
    glitches: Glitches,
    settings: Option<ScopeSettings>,
    armed: bool,
    trigger_count: usize,
    wave: Vec<f64>,
}

impl SimScope {
    pub fn new(seed: u64, glitches: Glitches) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            glitches,
            settings: None,
            armed: false,
            trigger_count: 0,
            wave: Vec::new(),
        }
    }
}

impl CaptureDevice for SimScope {
    fn configure(&mut self, settings: &ScopeSettings) -> Result<()> {
        self.settings = Some(*settings);
        Ok(())
    }

    fn arm(&mut self) -> Result<()> {
        if self.settings.is_none() {
            bail!("scope armed before it was configured");
        }
        self.armed = true;
        self.wave.clear();
        Ok(())
    }

    fn capture(&mut self) -> Result<bool> {
        let Some(settings) = self.settings else {
            bail!("scope captured before it was configured");
        };
        if !self.armed {
            bail!("capture without arm");
        }
        self.armed = false;

        if self.rng.random_bool(self.glitches.capture_timeout) {
            return Ok(true);
        }

        self.trigger_count = if self.rng.random_bool(self.glitches.in_band_trigger) {
            13600 + self.rng.random_range(0..10)
        } else {
            NOMINAL_TRIGGER + self.rng.random_range(0..20)
        };

        let trigger = self.trigger_count;
        self.wave = (0..settings.samples)
            .map(|i| {
                let noise = self.rng.random_range(-0.02..0.02);
                // square activity after the trigger, idle before it
                let activity = if i >= trigger && (i / 16) % 2 == 0 { 0.1 } else { 0.0 };
                activity + noise
            })
            .collect();
        Ok(false)
    }

    fn last_waveform(&mut self) -> Result<Vec<f64>> {
        Ok(self.wave.clone())
    }

    fn trigger_count(&mut self) -> Result<usize> {
        Ok(self.trigger_count)
    }

    fn program(&mut self, firmware: &Path) -> Result<()> {
        info!("Simulated programming of {}", firmware.display());
        Ok(())
    }
}

pub struct SimTarget {
    rng: StdRng,
    glitches: Glitches,
    output_len: usize,
    key: Vec<u8>,
    open: bool,
}

impl SimTarget {
    pub fn new(seed: u64, glitches: Glitches) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            glitches,
            output_len: 0,
            key: Vec::new(),
            open: true,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.open {
            bail!("target channel is closed");
        }
        Ok(())
    }
}

impl TargetChannel for SimTarget {
    fn set_output_len(&mut self, len: usize) -> Result<()> {
        self.output_len = len;
        Ok(())
    }

    fn output_len(&self) -> usize {
        self.output_len
    }

    fn write(&mut self, command: u8, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        debug!("-> {} {:02x?}", command as char, payload);
        Ok(())
    }

    fn read(
        &mut self,
        _command: u8,
        len: usize,
        _timeout: Duration,
        _ack: bool,
    ) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        if self.rng.random_bool(self.glitches.missing_response) {
            return Ok(None);
        }
        let mut response = vec![0u8; len];
        self.rng.fill(&mut response[..]);
        Ok(Some(response))
    }

    fn is_done(&mut self) -> Result<bool> {
        self.ensure_open()?;
        Ok(true)
    }

    fn set_key(&mut self, key: &[u8], _ack: bool) -> Result<()> {
        self.ensure_open()?;
        self.key = key.to_vec();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}

/// A bench wired to simulated hardware, seeded for reproducible runs.
pub fn bench(seed: u64, glitches: Glitches, policy: CapturePolicy) -> Bench<SimScope, SimTarget> {
    Bench::new(
        SimScope::new(seed, glitches),
        SimTarget::new(seed.wrapping_add(1), glitches),
        policy,
    )
}

/// Prepared simulated bench for `profile`.
pub fn prepared_bench(
    seed: u64,
    profile: &Profile,
    policy: CapturePolicy,
) -> Result<Bench<SimScope, SimTarget>> {
    let mut bench = bench(seed, Glitches::default(), policy);
    bench.prepare(profile)?;
    Ok(bench)
}
