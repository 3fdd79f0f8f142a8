//! Raw-capture stage: drains the receive path into the raw queue while a scan
//! is running.
//!
//! The stage runs on its own thread next to the scan loop. The two sides share
//! a [`ReadoutControl`]:
//!
//! - the scan publishes the current iteration, which the stage stamps onto
//!   every fragment it reads;
//! - before advancing to the next iteration the scan requests a sync and waits
//!   for the stage to acknowledge it. The stage acknowledges a request only
//!   after a `read_data()` call issued after the request returned nothing, so
//!   every fragment of the finished iteration is already in the raw queue;
//! - `stop()` ends the loop after one final drain of the receive buffer.

use daq_core::data::RawFragment;
use daq_core::driver::RxCore;
use daq_core::error::{AppResult, DaqError};
use daq_core::handoff::HandoffQueue;
use daq_core::limits::{CANCEL_POLL_INTERVAL, READOUT_IDLE_SLEEP};
use daq_core::pipeline::{PipelineStage, StageKind, StageLifecycle, StageReport};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// State shared between the scan loop and the readout thread.
#[derive(Debug, Default)]
pub struct ReadoutControl {
    iteration: AtomicU32,
    sync_requested: AtomicU64,
    sync_acked: AtomicU64,
    stop: AtomicBool,
    finished: AtomicBool,
}

impl ReadoutControl {
    /// Control block with the readout running on iteration 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Iteration stamped on fragments read now.
    pub fn iteration(&self) -> u32 {
        self.iteration.load(Ordering::SeqCst)
    }

    /// Set the iteration for fragments read from now on.
    pub fn set_iteration(&self, iteration: u32) {
        self.iteration.store(iteration, Ordering::SeqCst);
    }

    /// Ask the readout loop to stop after a final drain.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// True once [`stop`](Self::stop) was called.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// True once the readout loop has left, on success or failure.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Wait until the readout loop has emptied the receive buffer.
    ///
    /// Fails with [`DaqError::Cancelled`] on cancellation, with
    /// [`DaqError::RunTimeout`] once `deadline` passes and with
    /// [`DaqError::Processing`] if the readout loop is gone.
    pub fn sync(
        &self,
        cancel: &CancellationToken,
        started: Instant,
        limit: Duration,
    ) -> AppResult<()> {
        let generation = self.sync_requested.fetch_add(1, Ordering::SeqCst) + 1;
        let poll = READOUT_IDLE_SLEEP.min(CANCEL_POLL_INTERVAL);
        loop {
            if self.sync_acked.load(Ordering::SeqCst) >= generation {
                trace!(generation, "Readout synced");
                return Ok(());
            }
            if self.is_finished() {
                return Err(DaqError::Processing(
                    "readout stopped before the scan finished".into(),
                ));
            }
            if cancel.is_cancelled() {
                return Err(DaqError::Cancelled);
            }
            let elapsed = started.elapsed();
            if elapsed > limit {
                return Err(DaqError::RunTimeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                    limit_ms: limit.as_millis() as u64,
                });
            }
            std::thread::sleep(poll);
        }
    }

    fn pending_sync(&self) -> u64 {
        self.sync_requested.load(Ordering::SeqCst)
    }

    fn ack(&self, generation: u64) {
        self.sync_acked.fetch_max(generation, Ordering::SeqCst);
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Receive path plus the control block the stage answers to.
pub type ReadoutInputs<'q> = (&'q dyn RxCore, &'q ReadoutControl);

/// Raw-capture stage.
pub struct ReadoutStage<'q> {
    lifecycle: StageLifecycle,
    rx: Option<&'q dyn RxCore>,
    control: Option<&'q ReadoutControl>,
    output: Option<&'q HandoffQueue<RawFragment>>,
    words: u64,
}

impl<'q> Default for ReadoutStage<'q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'q> ReadoutStage<'q> {
    /// Unconnected readout stage.
    pub fn new() -> Self {
        Self {
            lifecycle: StageLifecycle::new("readout"),
            rx: None,
            control: None,
            output: None,
            words: 0,
        }
    }

    /// Raw words captured so far.
    pub fn words(&self) -> u64 {
        self.words
    }

    /// Read until the receive buffer is empty. Returns fragments moved.
    fn drain_rx(
        &mut self,
        rx: &dyn RxCore,
        control: &ReadoutControl,
        output: &HandoffQueue<RawFragment>,
    ) -> AppResult<u64> {
        let mut moved = 0;
        while let Some(mut fragment) = rx.read_data()? {
            fragment.iteration = control.iteration();
            self.words += fragment.words.len() as u64;
            output.push(fragment);
            moved += 1;
        }
        Ok(moved)
    }
}

impl<'q> PipelineStage<'q> for ReadoutStage<'q> {
    type Inputs = ReadoutInputs<'q>;
    type Outputs = &'q HandoffQueue<RawFragment>;

    fn kind(&self) -> StageKind {
        StageKind::RawCapture
    }

    fn name(&self) -> &'static str {
        "readout"
    }

    fn init(&mut self) -> AppResult<()> {
        self.lifecycle.on_init()
    }

    fn connect(&mut self, inputs: Self::Inputs, outputs: Self::Outputs) -> AppResult<()> {
        self.lifecycle.on_connect()?;
        let (rx, control) = inputs;
        self.rx = Some(rx);
        self.control = Some(control);
        self.output = Some(outputs);
        Ok(())
    }

    fn process(&mut self, cancel: &CancellationToken) -> AppResult<StageReport> {
        self.lifecycle.on_process()?;
        let (Some(rx), Some(control), Some(output)) = (self.rx, self.control, self.output) else {
            return Err(DaqError::Processing("readout not connected".into()));
        };

        let mut report = StageReport::default();
        loop {
            // Sample before reading: an empty read afterwards proves the
            // buffer was drained after the request was made.
            let generation = control.pending_sync();
            let stopping = control.stop_requested();

            let moved = self.drain_rx(rx, control, output)?;
            report.consumed += moved;
            report.produced += moved;
            control.ack(generation);

            if stopping {
                break;
            }
            if cancel.is_cancelled() {
                return Err(DaqError::Cancelled);
            }
            if moved == 0 {
                std::thread::sleep(READOUT_IDLE_SLEEP);
            }
        }
        Ok(report)
    }

    fn end(&mut self) -> AppResult<StageReport> {
        self.lifecycle.on_end()?;
        if let Some(control) = self.control.take() {
            control.mark_finished();
        }
        if let Some(output) = self.output.take() {
            output.close();
            debug!(
                fragments = output.total_pushed(),
                words = self.words,
                "Readout ended"
            );
        }
        self.rx = None;
        Ok(StageReport::default())
    }
}
