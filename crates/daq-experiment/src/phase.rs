//! Scan phase state machine.
//!
//! ```text
//! Uninitialized ─▶ Initialized ─▶ Configured ─▶ PreScanned ─▶ Running
//!                                                                │
//!   Finished ◀── Analyzed ◀── Processed ◀── Disabled ◀── PostScanned
//!
//! any phase ──abort()──▶ Aborted
//! ```
//!
//! Phases may only advance to their direct successor. Skipping or repeating a
//! phase is rejected with [`DaqError::PhaseOrder`].

use daq_core::error::{AppResult, DaqError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Phase of one scan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanPhase {
    /// Nothing has run
    Uninitialized,
    /// Scan and stages set up
    Initialized,
    /// Register sets written
    Configured,
    /// Scan-specific registers written, readout running
    PreScanned,
    /// Injections and triggers in progress
    Running,
    /// Scan-specific registers restored
    PostScanned,
    /// Transmit and receive paths disabled
    Disabled,
    /// Raw data decoded into events
    Processed,
    /// Every analysis channel joined
    Analyzed,
    /// Scan complete
    Finished,
    /// Scan stopped by an error or cancellation
    Aborted,
}

impl ScanPhase {
    /// Snake-case label used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Uninitialized => "uninitialized",
            ScanPhase::Initialized => "initialized",
            ScanPhase::Configured => "configured",
            ScanPhase::PreScanned => "pre_scanned",
            ScanPhase::Running => "running",
            ScanPhase::PostScanned => "post_scanned",
            ScanPhase::Disabled => "disabled",
            ScanPhase::Processed => "processed",
            ScanPhase::Analyzed => "analyzed",
            ScanPhase::Finished => "finished",
            ScanPhase::Aborted => "aborted",
        }
    }

    /// The only phase allowed after this one.
    pub fn successor(&self) -> Option<ScanPhase> {
        match self {
            ScanPhase::Uninitialized => Some(ScanPhase::Initialized),
            ScanPhase::Initialized => Some(ScanPhase::Configured),
            ScanPhase::Configured => Some(ScanPhase::PreScanned),
            ScanPhase::PreScanned => Some(ScanPhase::Running),
            ScanPhase::Running => Some(ScanPhase::PostScanned),
            ScanPhase::PostScanned => Some(ScanPhase::Disabled),
            ScanPhase::Disabled => Some(ScanPhase::Processed),
            ScanPhase::Processed => Some(ScanPhase::Analyzed),
            ScanPhase::Analyzed => Some(ScanPhase::Finished),
            ScanPhase::Finished | ScanPhase::Aborted => None,
        }
    }

    /// True for `Finished` and `Aborted`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanPhase::Finished | ScanPhase::Aborted)
    }
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current phase plus the time it was entered.
#[derive(Debug)]
pub struct PhaseTracker {
    phase: ScanPhase,
    entered: Instant,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    /// Tracker in `Uninitialized`.
    pub fn new() -> Self {
        Self {
            phase: ScanPhase::Uninitialized,
            entered: Instant::now(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Time spent in the current phase.
    pub fn in_phase(&self) -> Duration {
        self.entered.elapsed()
    }

    /// Move to `next`, which must be the successor of the current phase.
    pub fn advance(&mut self, next: ScanPhase) -> AppResult<()> {
        if self.phase.successor() != Some(next) {
            return Err(DaqError::PhaseOrder {
                from: self.phase.as_str(),
                to: next.as_str(),
            });
        }
        debug!(from = %self.phase, to = %next, "Scan phase");
        self.phase = next;
        self.entered = Instant::now();
        Ok(())
    }

    /// Leave the normal sequence. A finished scan stays finished.
    pub fn abort(&mut self) {
        if !self.phase.is_terminal() {
            debug!(from = %self.phase, "Scan aborted");
            self.phase = ScanPhase::Aborted;
            self.entered = Instant::now();
        }
    }
}
