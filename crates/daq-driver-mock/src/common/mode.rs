//! Operational modes for the mock readout board.
//!
//! - **Instant**: commands execute inside `send()`, deterministic, for unit tests
//! - **Realistic**: a worker thread drains the command FIFO with board-like latency
//! - **Chaos**: Realistic timing plus random collaborator failures

use serde::{Deserialize, Serialize};

/// Operational modes for mock hardware
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for integration tests
    Realistic,
    /// Configurable failures - for resilience testing
    Chaos,
}

impl MockMode {
    /// Whether commands are executed by a background worker.
    pub fn is_asynchronous(&self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}

impl std::fmt::Display for MockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockMode::Instant => write!(f, "instant"),
            MockMode::Realistic => write!(f, "realistic"),
            MockMode::Chaos => write!(f, "chaos"),
        }
    }
}
