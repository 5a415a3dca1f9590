use crate::{CapturePolicy, Profile, Rejection, ScopeSettings};
use log::info;
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Acquisition statistics, with all-time counters and a sliding 1 s window of
/// accepted traces.
#[derive(Debug)]
pub struct Counter {
    /// Capture transactions issued
    pub attempts: usize,
    /// Rows committed
    pub accepted: usize,
    /// Time when this counter was created or last reset
    pub t_begin: Instant,
    rejections: [usize; Rejection::ALL.len()],

    // --- sliding window fields ---
    window: Duration,
    recent: VecDeque<Instant>,
}

impl Default for Counter {
    fn default() -> Self {
        Counter {
            attempts: 0,
            accepted: 0,
            t_begin: Instant::now(),
            rejections: [0; Rejection::ALL.len()],
            window: Duration::from_secs(1),
            recent: VecDeque::new(),
        }
    }
}

impl Counter {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn reject(&mut self, rejection: Rejection) {
        self.rejections[rejection.index()] += 1;
    }

    pub fn accept(&mut self) {
        let now = Instant::now();
        self.accepted += 1;
        self.recent.push_back(now);
        while let Some(&ts) = self.recent.front() {
            if now.duration_since(ts) > self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn rejections(&self, rejection: Rejection) -> usize {
        self.rejections[rejection.index()]
    }

    pub fn total_rejections(&self) -> usize {
        self.rejections.iter().sum()
    }

    /// Accepted traces per second since `t_begin`.
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        self.accepted as f64 / secs
    }

    /// Accepted traces per second over the last window.
    pub fn rate(&self) -> f64 {
        self.recent.len() as f64 / self.window.as_secs_f64()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn log_summary(&self) {
        let mut breakdown = String::new();
        for rejection in Rejection::ALL {
            let n = self.rejections(rejection);
            if n > 0 {
                breakdown.push_str(&format!("\n  {rejection}: {n}"));
            }
        }
        info!(
            "Accepted {} traces in {} captures ({:.2} traces/s){}",
            self.accepted,
            self.attempts,
            self.average_rate(),
            breakdown
        );
    }
}

/// Dump the bench configuration in one log record.
pub fn log_setup(profile: &Profile, scope: &ScopeSettings, policy: &CapturePolicy) {
    let params: [(&str, String); 12] = [
        ("Profile", profile.name.clone()),
        ("Firmware", profile.firmware_path.display().to_string()),
        ("Clock", format!("{} MHz", scope.clock_hz as f64 / 1e6)),
        ("ADC clock", format!("{} MHz", scope.adc_hz() as f64 / 1e6)),
        (
            "Sampling factor",
            format!("{}", scope.adc_hz() as f64 / profile.clock_hz as f64),
        ),
        ("ADC source", format!("{:?}", scope.adc_src)),
        ("ADC capture samples", scope.samples.to_string()),
        ("ADC decimate", scope.decimate.to_string()),
        ("ADC presamples", scope.presamples.to_string()),
        ("Output bytes", profile.output_bytes.to_string()),
        (
            "Done poll",
            format!(
                "{} x {} ms",
                policy.done_poll_limit,
                policy.done_poll_interval.as_millis()
            ),
        ),
        (
            "Response timeout",
            format!("{} ms", policy.response_timeout.as_millis()),
        ),
    ];

    let mut param_log = String::new();
    for (name, value) in params {
        param_log.push_str(&format!("{name}: {value}\n"));
    }
    if param_log.ends_with('\n') {
        param_log.pop();
    }
    info!("Bench parameters:\n{}", param_log);
}
