use thiserror::Error;

/// Failures that end an acquisition session.
///
/// Per-capture rejections (timeouts, empty buffers, bad trigger counts) are not
/// errors; see [`crate::Rejection`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("row {row} committed out of order, expected row {expected}")]
    RowOutOfOrder { row: usize, expected: usize },

    #[error("shuffle window of {window} samples exceeds waveform of {len} samples")]
    ShortWaveform { window: usize, len: usize },

    #[error("message window [{start}, {end}) exceeds waveform of {len} samples")]
    WindowOutOfRange { start: usize, end: usize, len: usize },

    #[error("response carried {actual} bytes, expected {expected}")]
    ResponseLength { actual: usize, expected: usize },

    #[error("row {row} still rejected after {attempts} captures")]
    Stalled { row: usize, attempts: u64 },

    #[error("batch holds {filled} of {rows} rows")]
    IncompleteBatch { filled: usize, rows: usize },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}
