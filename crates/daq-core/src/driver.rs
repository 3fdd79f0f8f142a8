//! Hardware collaborator seams.
//!
//! The orchestrator never talks to a controller board directly. It goes through
//! three traits:
//!
//! - [`TxCore`]: the transmit (command) path into the front ends
//! - [`RxCore`]: the receive (readout) path out of the front ends
//! - [`ConfigLoader`]: source of the per-front-end register set
//!
//! Implementations take `&self` and are `Send + Sync` so that the readout thread
//! and the orchestrator thread can share one instance during the run phase.
//!
//! ```text
//!   orchestrator ──send()──▶ TxCore ──▶ front ends ──▶ RxCore ──read_data()──▶ readout
//! ```

use crate::data::RawFragment;
use crate::error::DriverError;
use crate::router::ChannelId;
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// Channel Masks
// =============================================================================

/// Bit `i` set enables channel `i`.
pub type ChannelMask = u32;

/// Largest channel id a [`ChannelMask`] can address.
pub const MASK_WIDTH: ChannelId = ChannelMask::BITS;

/// Build a mask from a set of channel ids. Ids outside the mask width are ignored.
pub fn channel_mask(channels: impl IntoIterator<Item = ChannelId>) -> ChannelMask {
    channels
        .into_iter()
        .filter(|c| *c < MASK_WIDTH)
        .fold(0, |mask, c| mask | (1 << c))
}

/// Channel ids enabled in `mask`, ascending.
pub fn mask_channels(mask: ChannelMask) -> impl Iterator<Item = ChannelId> {
    (0..MASK_WIDTH).filter(move |c| mask & (1 << c) != 0)
}

// =============================================================================
// Commands
// =============================================================================

/// Global front-end registers the scans touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Register {
    /// ToT code interpretation, 0..=2
    HitDiscCnfg,
    /// Charge injection DAC
    PlsrDac,
    /// Trigger multiplicity
    TrigCount,
    /// Trigger latency
    TrigLat,
}

/// A command pushed through the transmit path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrontEndCommand {
    /// Global reset of the addressed front ends
    Reset,
    /// Write one global register
    WriteRegister {
        /// Target register
        register: Register,
        /// New register value
        value: u16,
    },
    /// Load the pixel enable latch: every pixel not listed in `disabled` is enabled
    WritePixelEnable {
        /// Pixels (col, row), 1-based
        disabled: Vec<(u16, u16)>,
    },
    /// Select the active mask stage: pixel `i` (column-major) is active when
    /// `i % total == stage`
    SetMaskStage {
        /// Active stage, `0..total`
        stage: u32,
        /// Number of mask stages
        total: u32,
    },
    /// Switch between configuration and run mode
    RunMode(bool),
    /// Digital injection followed by a trigger, repeated `count` times
    Trigger {
        /// Repetitions
        count: u32,
    },
    /// Analog charge injection at the current PlsrDAC, repeated `count` times
    Inject {
        /// Repetitions
        count: u32,
    },
}

// =============================================================================
// Collaborator Traits
// =============================================================================

/// Transmit (command) path.
pub trait TxCore: Send + Sync {
    /// Route subsequent commands to the channels in `mask`.
    fn enable(&self, mask: ChannelMask) -> Result<(), DriverError>;

    /// Stop command transmission on every channel.
    fn disable(&self) -> Result<(), DriverError>;

    /// Queue a command for transmission.
    fn send(&self, command: FrontEndCommand) -> Result<(), DriverError>;

    /// True once every queued command has been transmitted.
    fn is_cmd_empty(&self) -> bool;
}

/// Receive (readout) path.
pub trait RxCore: Send + Sync {
    /// Start accepting data from the channels in `mask`.
    fn enable(&self, mask: ChannelMask) -> Result<(), DriverError>;

    /// Stop accepting data.
    fn disable(&self) -> Result<(), DriverError>;

    /// Next buffered fragment, or `None` if nothing is pending.
    ///
    /// The returned fragment carries iteration 0; the readout stage stamps the
    /// current scan iteration.
    fn read_data(&self) -> Result<Option<RawFragment>, DriverError>;
}

// =============================================================================
// Front-End Configuration
// =============================================================================

/// Register set of one front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSet {
    /// Front-end name for logs
    pub name: String,
    /// Small-hit discriminator setting, 0..=2
    pub hit_disc_cnfg: u8,
    /// Injection pulser amplitude in DAC counts
    pub plsr_dac: u16,
    /// Readout triggers per injection
    pub trig_count: u16,
    /// Trigger latency in clock cycles
    pub trig_lat: u16,
    /// Pixels (col, row), 1-based, that stay disabled
    pub disabled_pixels: Vec<(u16, u16)>,
}

impl Default for ConfigSet {
    fn default() -> Self {
        Self {
            name: "fei4b".into(),
            hit_disc_cnfg: 0,
            plsr_dac: 300,
            trig_count: 1,
            trig_lat: 235,
            disabled_pixels: Vec::new(),
        }
    }
}

impl ConfigSet {
    /// The command sequence that writes this set to a front end.
    pub fn to_commands(&self) -> Vec<FrontEndCommand> {
        vec![
            FrontEndCommand::RunMode(false),
            FrontEndCommand::WriteRegister {
                register: Register::HitDiscCnfg,
                value: u16::from(self.hit_disc_cnfg),
            },
            FrontEndCommand::WriteRegister {
                register: Register::PlsrDac,
                value: self.plsr_dac,
            },
            FrontEndCommand::WriteRegister {
                register: Register::TrigCount,
                value: self.trig_count,
            },
            FrontEndCommand::WriteRegister {
                register: Register::TrigLat,
                value: self.trig_lat,
            },
            FrontEndCommand::WritePixelEnable {
                disabled: self.disabled_pixels.clone(),
            },
        ]
    }
}

/// Source of [`ConfigSet`]s.
pub trait ConfigLoader {
    /// Error raised for unreadable or malformed sources.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the register set stored at `path`.
    fn load_from_file(&self, path: &Path) -> Result<ConfigSet, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_mask() {
        assert_eq!(channel_mask([0, 1, 3]), 0b1011);
        assert_eq!(channel_mask([40]), 0);
        assert_eq!(mask_channels(0b1010).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_config_commands_write_registers() {
        let set = ConfigSet {
            hit_disc_cnfg: 2,
            ..ConfigSet::default()
        };
        let commands = set.to_commands();
        assert_eq!(commands.first(), Some(&FrontEndCommand::RunMode(false)));
        assert!(commands.contains(&FrontEndCommand::WriteRegister {
            register: Register::HitDiscCnfg,
            value: 2,
        }));
        assert!(matches!(
            commands.last(),
            Some(FrontEndCommand::WritePixelEnable { .. })
        ));
    }
}
