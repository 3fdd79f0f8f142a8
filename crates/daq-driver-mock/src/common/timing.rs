//! Timing configuration for realistic mode.
//!
//! Board-like delays applied by the command worker.

use std::time::Duration;

/// Timing configuration for realistic mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingConfig {
    /// Serialisation time of one command on the transmit link (µs)
    pub command_latency_us: u64,
    /// Spacing between consecutive triggers of a burst (µs)
    pub trigger_period_us: u64,
}

impl TimingConfig {
    /// Timing of a single-chip FE-I4 readout board.
    pub fn fei4_board() -> Self {
        Self {
            command_latency_us: 20,
            trigger_period_us: 5,
        }
    }

    /// Delay before a sent command takes effect.
    pub fn command_latency(&self) -> Duration {
        Duration::from_micros(self.command_latency_us)
    }

    /// Spacing between simulated triggers.
    pub fn trigger_period(&self) -> Duration {
        Duration::from_micros(self.trigger_period_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing_is_zero() {
        let config = TimingConfig::default();
        assert_eq!(config.command_latency(), Duration::ZERO);
        assert_eq!(config.trigger_period(), Duration::ZERO);
    }

    #[test]
    fn test_fei4_board_timing() {
        let config = TimingConfig::fei4_board();
        assert_eq!(config.command_latency(), Duration::from_micros(20));
        assert_eq!(config.trigger_period_us, 5);
    }
}
