//! Front-end register sets and how they reach the hardware.

use daq_core::driver::{channel_mask, ConfigLoader, ConfigSet, TxCore};
use daq_core::error::{AppResult, DaqError};
use daq_core::router::ChannelId;
use std::path::Path;
use tracing::debug;

/// One front end attached to a readout channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontEnd {
    channel: ChannelId,
    config: ConfigSet,
}

impl FrontEnd {
    /// Front end on `channel` with register set `config`.
    pub fn new(channel: ChannelId, config: ConfigSet) -> Self {
        Self { channel, config }
    }

    /// Front end with the register set stored at `path`, or the default set
    /// when no path is given.
    pub fn load<L>(channel: ChannelId, loader: &L, path: Option<&Path>) -> AppResult<Self>
    where
        L: ConfigLoader,
        DaqError: From<L::Error>,
    {
        let config = match path {
            Some(path) => loader.load_from_file(path)?,
            None => ConfigSet::default(),
        };
        Ok(Self::new(channel, config))
    }

    /// Readout channel of this front end.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Register set written by [`push`](Self::push).
    pub fn config(&self) -> &ConfigSet {
        &self.config
    }

    /// Register set, for per-scan overrides.
    pub fn config_mut(&mut self) -> &mut ConfigSet {
        &mut self.config
    }

    /// Write the register set and pixel enables of this front end.
    ///
    /// Routes the transmit path to this channel only. The caller restores
    /// the broadcast mask afterwards. Returns the number of commands sent.
    pub fn push(&self, tx: &dyn TxCore) -> AppResult<usize> {
        tx.enable(channel_mask([self.channel]))?;
        let commands = self.config.to_commands();
        let count = commands.len();
        for command in commands {
            tx.send(command)?;
        }
        debug!(
            channel = self.channel,
            name = %self.config.name,
            commands = count,
            "Front-end configuration pushed"
        );
        Ok(count)
    }
}
