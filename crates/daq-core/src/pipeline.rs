//! Contract shared by every processing stage.
//!
//! A stage consumes from one or more borrowed input queues and produces into one
//! or more borrowed output queues. Stages never own queues: the per-run context
//! owns them and lends them for the lifetime `'q`, which is what lets a stage
//! move into a scoped worker thread without reference counting.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──init()──▶ Initialized ──connect()──▶ Connected ──process()──▶ Processing
//!    │                     │                         │                        │
//!    └─────────────────────┴──────────end()──────────┴────────────────────────┴──▶ Ended
//! ```
//!
//! `process()` runs once per connected instance. `end()` is valid from any state
//! except `Ended`, so resources are released even when an earlier step failed.
//! [`run_stage`] drives the whole sequence and always calls `end()`.

use crate::error::{AppResult, DaqError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

/// The closed set of stage variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Receive-core readout into the raw queue
    RawCapture,
    /// Raw words to per-channel events
    EventBuild,
    /// Events to per-iteration histograms
    Histogram,
    /// Histograms to analysis results
    Analyze,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::RawCapture => write!(f, "raw_capture"),
            StageKind::EventBuild => write!(f, "event_build"),
            StageKind::Histogram => write!(f, "histogram"),
            StageKind::Analyze => write!(f, "analyze"),
        }
    }
}

/// Lifecycle state of a stage instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Built, nothing checked yet
    Created,
    /// Prerequisites checked
    Initialized,
    /// Queues bound
    Connected,
    /// `process()` has started
    Processing,
    /// Resources released
    Ended,
}

impl StageState {
    /// Lowercase label used in errors and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Created => "created",
            StageState::Initialized => "initialized",
            StageState::Connected => "connected",
            StageState::Processing => "processing",
            StageState::Ended => "ended",
        }
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State-machine guard embedded in each stage.
#[derive(Debug, Clone)]
pub struct StageLifecycle {
    stage: &'static str,
    state: StageState,
}

impl StageLifecycle {
    /// Guard in the `Created` state for the stage named `stage`.
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            state: StageState::Created,
        }
    }

    /// Current state.
    pub fn state(&self) -> StageState {
        self.state
    }

    fn advance(&mut self, expected: StageState, next: StageState) -> AppResult<()> {
        if self.state != expected {
            return Err(DaqError::InvalidTransition {
                stage: self.stage,
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Created → Initialized
    pub fn on_init(&mut self) -> AppResult<()> {
        self.advance(StageState::Created, StageState::Initialized)
    }

    /// Initialized → Connected
    pub fn on_connect(&mut self) -> AppResult<()> {
        self.advance(StageState::Initialized, StageState::Connected)
    }

    /// Connected → Processing. A second call fails, `process()` is single-shot.
    pub fn on_process(&mut self) -> AppResult<()> {
        self.advance(StageState::Connected, StageState::Processing)
    }

    /// Any state except Ended → Ended.
    pub fn on_end(&mut self) -> AppResult<()> {
        if self.state == StageState::Ended {
            return Err(DaqError::InvalidTransition {
                stage: self.stage,
                from: self.state.as_str(),
                to: StageState::Ended.as_str(),
            });
        }
        self.state = StageState::Ended;
        Ok(())
    }
}

/// Item accounting of a stage run.
///
/// `skipped` counts input the stage dropped (malformed words, out-of-range
/// pixels). Nothing is dropped without being counted here, apart from
/// discards a stage is configured to make, which it counts in its own
/// statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Items taken from the inputs
    pub consumed: u64,
    /// Items pushed to the outputs
    pub produced: u64,
    /// Items dropped
    pub skipped: u64,
}

impl StageReport {
    /// Add the counts of `other` to `self`.
    pub fn merge(&mut self, other: StageReport) {
        self.consumed += other.consumed;
        self.produced += other.produced;
        self.skipped += other.skipped;
    }
}

/// A pipeline step with an init / connect / process / end lifecycle.
///
/// `Inputs` and `Outputs` are the borrowed queue bindings of the stage, for
/// example `&'q HandoffQueue<RawFragment>` in and `ChannelRouter<'q, EventBatch>`
/// out for the event builder.
pub trait PipelineStage<'q> {
    /// Upstream bindings
    type Inputs;
    /// Downstream bindings
    type Outputs;

    /// Which variant this stage is.
    fn kind(&self) -> StageKind;

    /// Short name for logs and errors.
    fn name(&self) -> &'static str;

    /// One-time setup. Fails with [`DaqError::Init`] when a prerequisite is missing.
    fn init(&mut self) -> AppResult<()>;

    /// Bind the stage to its queues. Must be called exactly once, before `process()`.
    fn connect(&mut self, inputs: Self::Inputs, outputs: Self::Outputs) -> AppResult<()>;

    /// Consume input until end-of-stream or cancellation, producing output.
    fn process(&mut self, cancel: &CancellationToken) -> AppResult<StageReport>;

    /// Flush in-flight aggregates, signal end-of-stream downstream and release
    /// resources. Returns the items produced by the flush.
    fn end(&mut self) -> AppResult<StageReport>;
}

/// Run a stage through its whole lifecycle.
///
/// `end()` is called on every path, including when `init()`, `connect()` or
/// `process()` failed. The first error wins; a later `end()` failure is logged.
pub fn run_stage<'q, S>(
    stage: &mut S,
    inputs: S::Inputs,
    outputs: S::Outputs,
    cancel: &CancellationToken,
) -> AppResult<StageReport>
where
    S: PipelineStage<'q> + ?Sized,
{
    let span = info_span!("stage", kind = %stage.kind(), name = stage.name());
    let _enter = span.enter();
    let start = Instant::now();

    let result = stage
        .init()
        .and_then(|_| stage.connect(inputs, outputs))
        .and_then(|_| stage.process(cancel));
    let end_result = stage.end();

    match (result, end_result) {
        (Ok(mut report), Ok(flushed)) => {
            report.merge(flushed);
            info!(
                consumed = report.consumed,
                produced = report.produced,
                skipped = report.skipped,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Stage finished"
            );
            Ok(report)
        }
        (Err(e), Ok(_)) => Err(e),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Err(end_err)) => {
            warn!(error = %end_err, "Stage teardown also failed");
            Err(e)
        }
    }
}
