use crate::{Bench, CaptureDevice, DeferredInterrupt, TargetChannel, Trace, PLAINTEXT, RESPONSE};
use anyhow::Result;
use log::{debug, warn};
use std::fmt;
use std::thread;

/// Why a capture attempt did not produce a usable row. All of these are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// The target never reported completion within the poll budget.
    OperationTimeout,
    /// The scope gave up before collecting its samples.
    CaptureTimeout,
    /// The scope returned an empty buffer.
    NoData,
    /// Trigger count fell inside the rejection band.
    InvalidTrigger,
    /// The capture succeeded but no response frame was read back.
    MissingResponse,
}

impl Rejection {
    pub const ALL: [Rejection; 5] = [
        Rejection::OperationTimeout,
        Rejection::CaptureTimeout,
        Rejection::NoData,
        Rejection::InvalidTrigger,
        Rejection::MissingResponse,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Rejection::OperationTimeout => "target did not finish operation",
            Rejection::CaptureTimeout => "timeout happened during capture",
            Rejection::NoData => "empty waveform",
            Rejection::InvalidTrigger => "trigger count inside rejection band",
            Rejection::MissingResponse => "no response from target",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureRequest<'a> {
    pub key: Option<&'a [u8]>,
    pub plaintext: Option<&'a [u8]>,
    pub ack: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Captured(Trace),
    Rejected(Rejection),
}

impl<D: CaptureDevice, T: TargetChannel> Bench<D, T> {
    /// Run one arm → stimulate → capture → read-back cycle.
    ///
    /// `SIGINT`/`SIGTERM` are held back for the whole cycle and re-raised when
    /// it returns, whichever way it returns. Hardware errors propagate; timeouts
    /// and empty buffers come back as [`CaptureOutcome::Rejected`] and are never
    /// retried here.
    pub fn capture(&mut self, request: &CaptureRequest<'_>) -> Result<CaptureOutcome> {
        let deferred = DeferredInterrupt::acquire()?;
        let outcome = self.capture_unguarded(request);
        if deferred.pending() {
            debug!("Interrupt arrived during capture, delivering it now");
        }
        outcome
    }

    fn capture_unguarded(&mut self, request: &CaptureRequest<'_>) -> Result<CaptureOutcome> {
        if let Some(key) = request.key {
            self.target.set_key(key, request.ack)?;
        }

        self.device.arm()?;

        if let Some(plaintext) = request.plaintext {
            self.target.write(PLAINTEXT, plaintext)?;
        }

        let timed_out = self.device.capture()?;

        let mut polls = 0;
        while !self.target.is_done()? {
            if polls == self.policy.done_poll_limit {
                warn!("Target did not finish operation");
                return Ok(CaptureOutcome::Rejected(Rejection::OperationTimeout));
            }
            polls += 1;
            thread::sleep(self.policy.done_poll_interval);
        }

        if timed_out {
            warn!("Timeout happened during capture");
            return Ok(CaptureOutcome::Rejected(Rejection::CaptureTimeout));
        }

        let len = self.target.output_len();
        let response = self
            .target
            .read(RESPONSE, len, self.policy.response_timeout, request.ack)?;
        let wave = self.device.last_waveform()?;

        if wave.is_empty() {
            return Ok(CaptureOutcome::Rejected(Rejection::NoData));
        }
        Ok(CaptureOutcome::Captured(Trace::new(
            wave,
            request.plaintext.map(<[u8]>::to_vec),
            response,
            request.key.map(<[u8]>::to_vec),
        )))
    }
}
