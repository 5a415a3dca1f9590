use crate::{
    AcquisitionError, AcquisitionSettings, Bench, CaptureDevice, CaptureOutcome, CaptureRequest,
    Counter, Rejection, RunIdAllocator, SessionFileSet, SessionWriter, TargetChannel, Trace,
    GENERATE, GENERATE_PAYLOAD,
};
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use ndarray::{s, Array1, Array2, ArrayView1};
use std::thread;

/// Consecutive rejections of one row between two warnings.
const STALL_WARNING_INTERVAL: u64 = 100;

/// Shape of one run's arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLayout {
    pub rows: usize,
    pub shuffle_window: usize,
    pub message_window: usize,
    pub message_offset: usize,
    pub shuffle_label_len: usize,
    pub message_label_len: usize,
}

impl BatchLayout {
    pub fn from_settings(settings: &AcquisitionSettings) -> Self {
        Self {
            rows: settings.repeat_traces,
            shuffle_window: settings.shuffle_window,
            message_window: settings.message_window,
            message_offset: settings.message_offset,
            shuffle_label_len: settings.shuffle_label_len,
            message_label_len: settings.message_label_len,
        }
    }
}

/// The four arrays of one run, filled strictly in row order.
#[derive(Debug, Clone)]
pub struct CaptureBatch {
    layout: BatchLayout,
    filled: usize,
    pub shuffle_waveforms: Array2<f64>,
    pub message_waveforms: Array2<f64>,
    pub shuffle_labels: Array2<u8>,
    pub message_labels: Array2<u8>,
    pub trigger_counts: Array1<u64>,
}

impl CaptureBatch {
    pub fn new(layout: BatchLayout) -> Self {
        Self {
            layout,
            filled: 0,
            shuffle_waveforms: Array2::zeros((layout.rows, layout.shuffle_window)),
            message_waveforms: Array2::zeros((layout.rows, layout.message_window)),
            shuffle_labels: Array2::zeros((layout.rows, layout.shuffle_label_len)),
            message_labels: Array2::zeros((layout.rows, layout.message_label_len)),
            trigger_counts: Array1::zeros(layout.rows),
        }
    }

    pub fn layout(&self) -> &BatchLayout {
        &self.layout
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn is_complete(&self) -> bool {
        self.filled == self.layout.rows
    }

    /// Slice an accepted trace into `row`.
    ///
    /// `row` must be the next unfilled row. Nothing is written unless every
    /// slice fits.
    pub fn commit(
        &mut self,
        row: usize,
        trace: &Trace,
        trigger_count: usize,
    ) -> Result<(), AcquisitionError> {
        let layout = self.layout;
        if row != self.filled || row >= layout.rows {
            return Err(AcquisitionError::RowOutOfOrder {
                row,
                expected: self.filled,
            });
        }

        let wave = trace.wave();
        if wave.len() < layout.shuffle_window {
            return Err(AcquisitionError::ShortWaveform {
                window: layout.shuffle_window,
                len: wave.len(),
            });
        }
        // a saturated end is past any waveform
        let start = trigger_count.saturating_add(layout.message_offset);
        let end = start.saturating_add(layout.message_window);
        if end > wave.len() {
            return Err(AcquisitionError::WindowOutOfRange {
                start,
                end,
                len: wave.len(),
            });
        }

        let response = trace.response().unwrap_or_default();
        let expected = layout.shuffle_label_len + layout.message_label_len;
        if response.len() != expected {
            return Err(AcquisitionError::ResponseLength {
                actual: response.len(),
                expected,
            });
        }
        let (shuffle_label, message_label) = response.split_at(layout.shuffle_label_len);

        self.shuffle_waveforms
            .slice_mut(s![row, ..])
            .assign(&ArrayView1::from(&wave[..layout.shuffle_window]));
        self.message_waveforms
            .slice_mut(s![row, ..])
            .assign(&ArrayView1::from(&wave[start..end]));
        self.shuffle_labels
            .slice_mut(s![row, ..])
            .assign(&ArrayView1::from(shuffle_label));
        self.message_labels
            .slice_mut(s![row, ..])
            .assign(&ArrayView1::from(message_label));
        self.trigger_counts[row] = trigger_count as u64;

        self.filled += 1;
        Ok(())
    }
}

/// Trigger counts strictly inside `(low, high)` are anomalous and rejected.
pub fn trigger_accepted(trigger_count: usize, low: usize, high: usize) -> bool {
    trigger_count <= low || trigger_count >= high
}

/// Produces one run of validated, segmented traces.
pub struct AcquisitionSession<'a> {
    settings: &'a AcquisitionSettings,
    pub counter: Counter,
}

impl<'a> AcquisitionSession<'a> {
    pub fn new(settings: &'a AcquisitionSettings) -> Self {
        Self {
            settings,
            counter: Counter::new(),
        }
    }

    /// Acquire every row, then hand the complete batch to `writer`.
    ///
    /// Nothing is written if any row fails.
    pub fn run<D, T, A>(
        &mut self,
        bench: &mut Bench<D, T>,
        writer: &SessionWriter<A>,
    ) -> Result<SessionFileSet>
    where
        D: CaptureDevice,
        T: TargetChannel,
        A: RunIdAllocator,
    {
        let batch = self.acquire(bench)?;
        info!("Saving traces");
        writer.commit(&batch)
    }

    /// [`run`](Self::run), then close the bench on success and failure alike.
    ///
    /// A run error takes precedence over a close error.
    pub fn run_and_close<D, T, A>(
        &mut self,
        bench: &mut Bench<D, T>,
        writer: &SessionWriter<A>,
    ) -> Result<SessionFileSet>
    where
        D: CaptureDevice,
        T: TargetChannel,
        A: RunIdAllocator,
    {
        let result = self.run(bench, writer);
        let closed = bench.close();
        let files = result?;
        closed?;
        Ok(files)
    }

    pub fn acquire<D: CaptureDevice, T: TargetChannel>(
        &mut self,
        bench: &mut Bench<D, T>,
    ) -> Result<CaptureBatch> {
        let rows = self.settings.repeat_traces;
        let mut batch = CaptureBatch::new(BatchLayout::from_settings(self.settings));
        self.counter.reset();

        for row in 0..rows {
            if let Err(e) = self.acquire_row(bench, row, &mut batch) {
                error!("Exception occurred for trace {row}: {e:#}");
                return Err(e.context(format!("acquiring trace {row}")));
            }
        }

        self.counter.log_summary();
        Ok(batch)
    }

    fn acquire_row<D: CaptureDevice, T: TargetChannel>(
        &mut self,
        bench: &mut Bench<D, T>,
        row: usize,
        batch: &mut CaptureBatch,
    ) -> Result<()> {
        let settings = self.settings;

        bench
            .target
            .write(GENERATE, &GENERATE_PAYLOAD)
            .context("requesting new stimulus")?;
        thread::sleep(settings.short_delay());

        // Rejected captures are retried against the same stimulus.
        let request = CaptureRequest::default();
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            self.counter.attempt();
            let outcome = bench.capture(&request)?;
            let trigger_count = bench.device.trigger_count()?;
            thread::sleep(settings.long_delay());

            match self.screen(outcome, trigger_count) {
                Ok(trace) => {
                    batch.commit(row, &trace, trigger_count)?;
                    self.counter.accept();
                    info!(
                        "Trace {}/{} accepted (trigger count {}, {} capture(s), {:.1} traces/s)",
                        row + 1,
                        settings.repeat_traces,
                        trigger_count,
                        attempts,
                        self.counter.rate()
                    );
                    return Ok(());
                }
                Err(rejection) => {
                    self.counter.reject(rejection);
                    debug!("Trace {row} attempt {attempts} rejected: {rejection} (trigger count {trigger_count})");
                    if let Some(max) = settings.max_attempts_per_row {
                        if attempts >= max {
                            return Err(AcquisitionError::Stalled { row, attempts }.into());
                        }
                    }
                    if attempts % STALL_WARNING_INTERVAL == 0 {
                        warn!("Trace {row} rejected {attempts} times in a row, last: {rejection}");
                    }
                }
            }
        }
    }

    fn screen(&self, outcome: CaptureOutcome, trigger_count: usize) -> Result<Trace, Rejection> {
        if !trigger_accepted(
            trigger_count,
            self.settings.trigger_low,
            self.settings.trigger_high,
        ) {
            return Err(Rejection::InvalidTrigger);
        }
        let trace = match outcome {
            CaptureOutcome::Captured(trace) => trace,
            CaptureOutcome::Rejected(rejection) => return Err(rejection),
        };
        if trace.response().is_none() {
            return Err(Rejection::MissingResponse);
        }
        Ok(trace)
    }
}
