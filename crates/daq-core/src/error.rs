//! Error types for the acquisition pipeline.
//!
//! This module defines [`DaqError`], the error type shared by every crate in the
//! workspace, together with the queue-level [`QueueError`] and the structured
//! [`DriverError`] reported by hardware collaborators.
//!
//! ## Error Hierarchy
//!
//! - **Configuration errors** (`Configuration`, `UnknownChannel`, `DuplicateChannel`):
//!   fatal, raised before hardware is enabled where possible.
//! - **Stage errors** (`Init`, `InvalidTransition`, `Processing`): fatal for the stage
//!   that raised them. The orchestrator still disables hardware before propagating.
//! - **Queue errors** (`Queue`): `Empty` is recoverable and left to the caller,
//!   `Closed` marks end-of-stream, `Cancelled`/`TimedOut` abort a blocking pop.
//! - **Hardware errors** (`HardwareFault`, `CommandDrainTimeout`, `RunTimeout`):
//!   reported by or about the transmit/receive collaborators. They trigger a
//!   safe-disable of the command and receive paths, then propagate.
//!
//! Queue and driver errors convert into `DaqError` with `?`.

use crate::router::ChannelId;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// What went wrong on a transmit or receive core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Link to the readout board dropped.
    Communication,
    /// The board or front end reported a fault.
    Hardware,
    /// An operation did not complete in time.
    Timeout,
}

impl DriverErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Communication => "link",
            Self::Hardware => "hardware",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a transmit/receive core, tagged with the core name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{core}: {kind} failure: {message}")]
pub struct DriverError {
    /// Name of the failing core, e.g. `mock_tx`
    pub core: String,
    /// Failure category
    pub kind: DriverErrorKind,
    /// Detail from the core
    pub message: String,
}

impl DriverError {
    /// Tag a failure with its core and kind.
    pub fn new(core: impl Into<String>, kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            core: core.into(),
            kind,
            message: message.into(),
        }
    }
}

// =============================================================================
// Queue Errors
// =============================================================================

/// Why a pop from a [`HandoffQueue`](crate::handoff::HandoffQueue) returned no item.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Non-blocking pop found nothing to hand over.
    #[error("queue is empty")]
    Empty,

    /// The producer side closed the queue and every item has been delivered.
    #[error("queue is closed and drained")]
    Closed,

    /// The cancellation token fired while the caller was waiting.
    #[error("blocking pop cancelled")]
    Cancelled,

    /// A bounded wait expired before an item arrived.
    #[error("blocking pop timed out")]
    TimedOut,
}

// =============================================================================
// Application Error
// =============================================================================

/// Result alias used across the workspace.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Error returned by stages, the router and the scan orchestrator.
///
/// ```rust
/// use daq_core::error::DaqError;
///
/// let err = DaqError::init("histogrammer", "no front-end configuration");
/// assert!(!err.is_hardware());
/// assert_eq!(
///     err.to_string(),
///     "Stage 'histogrammer' failed to initialise: no front-end configuration"
/// );
/// ```
#[derive(Error, Debug)]
pub enum DaqError {
    /// Settings parsed but are inconsistent, or the channel map lacks a
    /// channel the scan needs. Raised before hardware is enabled.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// An item was routed to a channel id with no registered queue.
    #[error("Unknown channel {0}: no queue registered")]
    UnknownChannel(ChannelId),

    /// A channel id was registered twice.
    #[error("Channel {0} is already registered")]
    DuplicateChannel(ChannelId),

    /// A stage could not be initialised because a prerequisite is missing.
    ///
    /// **Recovery Strategy**: Fatal for the stage. The orchestrator disables
    /// hardware before propagating.
    #[error("Stage '{stage}' failed to initialise: {message}")]
    Init {
        /// Stage name
        stage: &'static str,
        /// Missing prerequisite
        message: String,
    },

    /// A stage lifecycle method was called out of order.
    #[error("Stage '{stage}' cannot move from {from} to {to}")]
    InvalidTransition {
        /// Stage name
        stage: &'static str,
        /// Current lifecycle state
        from: &'static str,
        /// Requested lifecycle state
        to: &'static str,
    },

    /// The orchestrator was asked to skip or repeat a scan phase.
    #[error("Scan phase cannot move from {from} to {to}")]
    PhaseOrder {
        /// Phase reached so far
        from: &'static str,
        /// Phase that was requested
        to: &'static str,
    },

    /// Handoff queue failure (empty, closed, cancelled or timed out).
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// A transmit or receive core failed. Both paths are disabled before
    /// this reaches the caller.
    #[error("Hardware fault: {0}")]
    HardwareFault(#[from] DriverError),

    /// The transmit command stream did not drain in time.
    #[error("Command stream did not drain within {timeout_ms} ms")]
    CommandDrainTimeout {
        /// Configured drain timeout
        timeout_ms: u64,
    },

    /// The data-taking window exceeded its configured duration.
    #[error("Run phase exceeded {limit_ms} ms (elapsed {elapsed_ms} ms)")]
    RunTimeout {
        /// Time spent in the run phase
        elapsed_ms: u64,
        /// Configured run timeout
        limit_ms: u64,
    },

    /// A stage could not make sense of its input.
    #[error("Processing failed: {0}")]
    Processing(String),

    /// Cooperative cancellation was requested.
    #[error("Operation cancelled")]
    Cancelled,

    /// One or more per-channel analysis tasks failed.
    ///
    /// Every task is joined before this is reported, so the vector holds all
    /// failures of the run.
    #[error("Analysis failed on {} channel(s)", .0.len())]
    ChannelFailures(Vec<(ChannelId, DaqError)>),

    /// Reading a configuration or register file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaqError {
    /// Shorthand for an [`DaqError::Init`] error.
    pub fn init(stage: &'static str, message: impl Into<String>) -> Self {
        DaqError::Init {
            stage,
            message: message.into(),
        }
    }

    /// True for errors raised by (or about) the hardware paths.
    pub fn is_hardware(&self) -> bool {
        matches!(
            self,
            DaqError::HardwareFault(_)
                | DaqError::CommandDrainTimeout { .. }
                | DaqError::RunTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::UnknownChannel(7);
        assert_eq!(err.to_string(), "Unknown channel 7: no queue registered");
    }

    #[test]
    fn test_driver_error_display() {
        let err = DaqError::from(DriverError::new(
            "mock_tx",
            DriverErrorKind::Hardware,
            "link down",
        ));
        assert!(err
            .to_string()
            .contains("mock_tx: hardware failure: link down"));
        assert!(err.is_hardware());
    }

    #[test]
    fn test_queue_error_converts() {
        let err: DaqError = QueueError::Empty.into();
        assert!(matches!(err, DaqError::Queue(QueueError::Empty)));
        assert!(!err.is_hardware());
    }

    #[test]
    fn test_channel_failures_display() {
        let err = DaqError::ChannelFailures(vec![
            (0, DaqError::Processing("bad map".into())),
            (3, DaqError::Cancelled),
        ]);
        assert_eq!(err.to_string(), "Analysis failed on 2 channel(s)");
    }
}
