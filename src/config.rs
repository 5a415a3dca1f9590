use crate::AcquisitionError;
use confique::Config;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub profile: Profile,
    #[config(nested)]
    pub acquisition: AcquisitionSettings,
    #[config(nested)]
    pub output: OutputSettings,
}

impl Conf {
    pub fn validate(&self) -> Result<(), AcquisitionError> {
        if self.output.compression_level > 9 {
            return Err(AcquisitionError::InvalidSettings(format!(
                "compression_level {} is above 9",
                self.output.compression_level
            )));
        }
        self.acquisition.validate(&self.profile)
    }
}

/// Hardware/firmware profile: everything fixed by the scope and the target build.
#[derive(Config, Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub firmware_path: PathBuf,
    #[config(default = true)]
    pub reprogram: bool,
    #[config(default = 96000)]
    pub num_samples: usize,
    #[config(default = 1)]
    pub decimate: u32,
    #[config(default = 200)]
    pub presamples: usize,
    pub adc_src: AdcClockSource,
    #[config(default = 24000000)]
    pub clock_hz: u64,
    #[config(default = 1)]
    pub supersampling: u64,
    #[config(default = 320)]
    pub output_bytes: usize,
}

#[derive(Config, Debug, Clone)]
pub struct AcquisitionSettings {
    #[config(env = "TRACE_CAPTURE_REPEAT", default = 2000)]
    pub repeat_traces: usize,
    /// Seconds to wait after asking the target for a new stimulus.
    #[config(default = 0.3)]
    pub short_delay: f64,
    /// Seconds to wait after each capture before the next command.
    #[config(default = 0.2)]
    pub long_delay: f64,
    #[config(default = 14000)]
    pub shuffle_window: usize,
    #[config(default = 59000)]
    pub message_window: usize,
    /// Start of the message window, relative to the trigger sample count.
    #[config(default = 7500)]
    pub message_offset: usize,
    #[config(default = 13595)]
    pub trigger_low: usize,
    #[config(default = 13615)]
    pub trigger_high: usize,
    #[config(default = 256)]
    pub shuffle_label_len: usize,
    #[config(default = 64)]
    pub message_label_len: usize,
    #[config(default = 50)]
    pub done_poll_interval_ms: u64,
    #[config(default = 100)]
    pub done_poll_limit: u32,
    #[config(default = 1000)]
    pub response_timeout_ms: u64,
    /// Unset means a row is retried until it is accepted.
    pub max_attempts_per_row: Option<u64>,
}

impl AcquisitionSettings {
    pub fn short_delay(&self) -> Duration {
        Duration::from_secs_f64(self.short_delay)
    }

    pub fn long_delay(&self) -> Duration {
        Duration::from_secs_f64(self.long_delay)
    }

    pub fn validate(&self, profile: &Profile) -> Result<(), AcquisitionError> {
        let invalid = |msg: String| Err(AcquisitionError::InvalidSettings(msg));

        if self.repeat_traces == 0 {
            return invalid("repeat_traces must be at least 1".into());
        }
        if self.shuffle_window == 0 || self.message_window == 0 {
            return invalid("shuffle and message windows must be non-empty".into());
        }
        if self.trigger_low >= self.trigger_high {
            return invalid(format!(
                "trigger band ({}, {}) is empty",
                self.trigger_low, self.trigger_high
            ));
        }
        if self.shuffle_window > profile.num_samples || self.message_window > profile.num_samples
        {
            return invalid(format!(
                "windows ({}, {}) exceed the {} captured samples",
                self.shuffle_window, self.message_window, profile.num_samples
            ));
        }
        if self.shuffle_label_len + self.message_label_len != profile.output_bytes {
            return invalid(format!(
                "label lengths {} + {} do not cover the {}-byte response",
                self.shuffle_label_len, self.message_label_len, profile.output_bytes
            ));
        }
        if !(self.short_delay >= 0.0 && self.long_delay >= 0.0) {
            return invalid("delays must be non-negative".into());
        }
        if self.max_attempts_per_row == Some(0) {
            return invalid("max_attempts_per_row must be at least 1 when set".into());
        }
        Ok(())
    }
}

#[derive(Config, Debug, Clone)]
pub struct OutputSettings {
    #[config(env = "TRACE_CAPTURE_OUTPUT_DIR")]
    pub output_dir: String,
    #[config(default = 2)]
    pub compression_level: u8,
    #[config(default = 5)]
    pub blosc_threads: u8,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdcClockSource {
    ClkgenX1,
    ClkgenX4,
}

impl AdcClockSource {
    pub fn multiplier(self) -> u64 {
        match self {
            AdcClockSource::ClkgenX1 => 1,
            AdcClockSource::ClkgenX4 => 4,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn profile() -> Profile {
        Profile {
            name: "Masked Shuffled Kyber".into(),
            firmware_path: PathBuf::from("hexes/bit_shuffled_masked_kyber_shares.hex"),
            reprogram: false,
            num_samples: 96000,
            decimate: 1,
            presamples: 200,
            adc_src: AdcClockSource::ClkgenX1,
            clock_hz: 24_000_000,
            supersampling: 1,
            output_bytes: 320,
        }
    }

    pub(crate) fn settings() -> AcquisitionSettings {
        AcquisitionSettings {
            repeat_traces: 3,
            short_delay: 0.0,
            long_delay: 0.0,
            shuffle_window: 14000,
            message_window: 59000,
            message_offset: 7500,
            trigger_low: 13595,
            trigger_high: 13615,
            shuffle_label_len: 256,
            message_label_len: 64,
            done_poll_interval_ms: 0,
            done_poll_limit: 100,
            response_timeout_ms: 1000,
            max_attempts_per_row: None,
        }
    }

    #[test]
    fn test_loads_profile_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.toml");
        std::fs::write(
            &path,
            r#"
[profile]
name = "Masked Shuffled Kyber"
firmware_path = "hexes/kyber.hex"
adc_src = "clkgen_x4"

[acquisition]
repeat_traces = 10
max_attempts_per_row = 500

[output]
output_dir = "traces/shares"
"#,
        )
        .unwrap();

        let conf = Conf::builder().file(&path).load().unwrap();
        assert_eq!(conf.profile.num_samples, 96000);
        assert_eq!(conf.profile.adc_src, AdcClockSource::ClkgenX4);
        assert_eq!(conf.acquisition.repeat_traces, 10);
        assert_eq!(conf.acquisition.trigger_low, 13595);
        assert_eq!(conf.acquisition.max_attempts_per_row, Some(500));
        assert_eq!(conf.acquisition.short_delay, 0.3);
        assert_eq!(conf.acquisition.long_delay(), Duration::from_secs_f64(0.2));
        assert_eq!(conf.output.compression_level, 2);
        conf.validate().unwrap();
    }

    #[test]
    fn test_default_settings_are_valid() {
        settings().validate(&profile()).unwrap();
    }

    #[test]
    fn test_rejects_empty_trigger_band() {
        let mut s = settings();
        s.trigger_low = s.trigger_high;
        assert!(matches!(
            s.validate(&profile()),
            Err(AcquisitionError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_rejects_labels_not_covering_response() {
        let mut s = settings();
        s.message_label_len = 32;
        assert!(s.validate(&profile()).is_err());
    }

    #[test]
    fn test_rejects_window_longer_than_capture() {
        let mut s = settings();
        s.message_window = 100_000;
        assert!(s.validate(&profile()).is_err());
    }
}
