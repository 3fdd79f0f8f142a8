//! Shared timing limits and detector geometry.
//!
//! This module centralizes:
//! - Timeout and polling durations for blocking waits
//! - Default channel counts
//! - FE-I4 pixel matrix dimensions
//!
//! Using centralized constants ensures consistency across stages, drivers and
//! the orchestrator.

use std::time::Duration;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Upper bound on a single condition-variable wait inside a blocking pop.
///
/// A blocking consumer re-checks its cancellation token at least this often.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default time allowed for the transmit command stream to drain after
/// configuration (1 second).
pub const CMD_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Interval between `is_cmd_empty()` polls while waiting for the drain.
pub const CMD_DRAIN_POLL: Duration = Duration::from_micros(100);

/// Settle time after enabling the receive path, before pre-scan.
pub const RX_SETTLE_TIME: Duration = Duration::from_millis(1);

/// Default duration limit of the data-taking window (30 seconds).
pub const RUN_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle sleep of the readout loop when the receive core has nothing buffered.
pub const READOUT_IDLE_SLEEP: Duration = Duration::from_micros(200);

// =============================================================================
// Channel Limits
// =============================================================================

/// Number of readout channels on a single controller board.
pub const DEFAULT_CHANNEL_COUNT: usize = 16;

/// Largest channel id the raw data format can encode (8 bits).
pub const MAX_CHANNEL_ID: u32 = 0xFF;

// =============================================================================
// Pixel Matrix
// =============================================================================

/// FE-I4 columns (1-based in the data stream).
pub const N_COL: usize = 80;

/// FE-I4 rows (1-based in the data stream).
pub const N_ROW: usize = 336;

/// Total number of pixels on one front end.
pub const N_PIXELS: usize = N_COL * N_ROW;
