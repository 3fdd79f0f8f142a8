//! Scan configuration using Figment
//!
//! Configuration is layered, later sources override earlier ones:
//! 1. Built-in defaults
//! 2. A TOML file (`config/scan.toml` unless a path is given)
//! 3. Environment variables prefixed with `RUST_DAQ_`, sections split on `__`
//!
//! # Example
//! ```no_run
//! use rust_daq::config::ScanConfig;
//!
//! // RUST_DAQ_PIPELINE__CHANNEL_COUNT=8 overrides the file value
//! let config = ScanConfig::load()?;
//! config.validate()?;
//! println!("Channels: {}", config.pipeline.channel_count);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::logging::{parse_log_level, OutputFormat};
use daq_core::driver::{mask_channels, ChannelMask};
use daq_core::error::DaqError;
use daq_core::limits::{CMD_DRAIN_TIMEOUT, DEFAULT_CHANNEL_COUNT, RUN_TIMEOUT};
use daq_core::router::ChannelId;
use daq_driver_mock::{ops, ErrorConfig, ErrorScenario, MockMode, SimulationConfig};
use daq_experiment::scans::{ELECTRONS_PER_PLSR_DAC, MAX_PLSR_DAC};
use daq_experiment::{OrchestratorConfig, ScanKind, ScanSettings};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/scan.toml";

/// Top-level scan configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// `[application]`
    pub application: ApplicationConfig,
    /// `[pipeline]`
    pub pipeline: PipelineConfig,
    /// `[scan]`
    pub scan: ScanSection,
    /// `[front_end]`
    pub front_end: FrontEndSection,
    /// `[mock]`
    pub mock: MockSection,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Name shown in the startup log
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// pretty, compact or json
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "rust-daq".into(),
            log_level: "info".into(),
            log_format: OutputFormat::Pretty,
        }
    }
}

/// Queue layout and pipeline timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Per-channel event queues, channels `0..channel_count`
    pub channel_count: usize,
    /// Channels that get a histogram/analysis thread
    pub analysis_channels: Vec<ChannelId>,
    /// Wait for the command stream to drain
    pub cmd_drain_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_count: DEFAULT_CHANNEL_COUNT,
            analysis_channels: vec![0],
            cmd_drain_timeout_ms: CMD_DRAIN_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Scan loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    /// tot or digital
    pub kind: ScanKind,
    /// Mask stages per scan
    pub mask_stages: u32,
    /// Injections (or triggers) per mask stage
    pub injections: u32,
    /// Injected charge in electrons (ToT scan)
    pub target_charge: f64,
    /// Upper bound of the run phase
    pub run_timeout_ms: u64,
}

impl Default for ScanSection {
    fn default() -> Self {
        let settings = ScanSettings::default();
        Self {
            kind: settings.kind,
            mask_stages: settings.mask_stages,
            injections: settings.injections,
            target_charge: settings.target_charge,
            run_timeout_ms: RUN_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Front-end registers and channel masks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontEndSection {
    /// TOML register set; built-in defaults when unset
    pub config_file: Option<PathBuf>,
    /// Overrides the HitDiscCnfg of the register set (0-2)
    pub hit_disc_cnfg: Option<u8>,
    /// Channels configured and driven by the transmit path
    pub tx_mask: ChannelMask,
    /// Channels the receive path reads
    pub rx_mask: ChannelMask,
}

impl Default for FrontEndSection {
    fn default() -> Self {
        Self {
            config_file: None,
            hit_disc_cnfg: None,
            tx_mask: 0x1,
            rx_mask: 0x1,
        }
    }
}

/// Deterministic failure of one mock operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultSection {
    /// One of tx_enable, tx_disable, send, rx_enable, rx_disable, read_data
    pub operation: String,
    /// Successful calls before the operation starts failing
    pub after: u32,
}

/// Mock readout board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockSection {
    /// instant, realistic or chaos
    pub mode: MockMode,
    /// Seed for reproducible hits and faults
    pub seed: Option<u64>,
    /// Channels with a front end attached; the tx mask channels when unset
    pub channels: Option<Vec<ChannelId>>,
    /// Mean ToT answered at the tuned charge
    pub target_tot: f64,
    /// Gaussian ToT spread
    pub tot_sigma: f64,
    /// Probability that an active pixel answers
    pub occupancy: f64,
    /// Random failure probability of every board operation
    pub failure_rate: f64,
    /// Scripted failure, takes precedence over `failure_rate`
    pub fault: Option<FaultSection>,
}

impl Default for MockSection {
    fn default() -> Self {
        let simulation = SimulationConfig::default();
        Self {
            mode: MockMode::Instant,
            seed: None,
            channels: None,
            target_tot: simulation.target_tot,
            tot_sigma: simulation.tot_sigma,
            occupancy: simulation.occupancy,
            failure_rate: 0.0,
            fault: None,
        }
    }
}

impl MockSection {
    /// Front-end response of the simulated board.
    pub fn simulation(&self) -> SimulationConfig {
        SimulationConfig {
            target_tot: self.target_tot,
            tot_sigma: self.tot_sigma,
            occupancy: self.occupancy,
            ..SimulationConfig::default()
        }
    }

    /// Fault injection for the board. A deterministic fault wins over the
    /// random failure rate.
    pub fn error_config(&self) -> Result<ErrorConfig, DaqError> {
        if let Some(fault) = &self.fault {
            return Ok(ErrorConfig::scenario(ErrorScenario::FailAfterN {
                operation: mock_operation(&fault.operation)?,
                count: fault.after,
            }));
        }
        if self.failure_rate > 0.0 {
            return Ok(ErrorConfig::random_failures_seeded(
                self.failure_rate,
                self.seed,
            ));
        }
        Ok(ErrorConfig::none())
    }
}

fn mock_operation(name: &str) -> Result<&'static str, DaqError> {
    [
        ops::TX_ENABLE,
        ops::TX_DISABLE,
        ops::SEND,
        ops::RX_ENABLE,
        ops::RX_DISABLE,
        ops::READ_DATA,
    ]
    .into_iter()
    .find(|op| *op == name)
    .ok_or_else(|| DaqError::Configuration(format!("Unknown mock operation '{}'", name)))
}

impl ScanConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment. A missing file leaves
    /// the defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// The layered provider stack, exposed for tests and tooling.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(ScanConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUST_DAQ_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), DaqError> {
        parse_log_level(&self.application.log_level).map_err(DaqError::Configuration)?;

        let pipeline = &self.pipeline;
        if pipeline.channel_count == 0 {
            return Err(DaqError::Configuration(
                "pipeline.channel_count must be at least 1".into(),
            ));
        }
        if pipeline.analysis_channels.is_empty() {
            return Err(DaqError::Configuration(
                "pipeline.analysis_channels must name at least one channel".into(),
            ));
        }
        let mut seen = HashSet::new();
        for &channel in &pipeline.analysis_channels {
            if channel as usize >= pipeline.channel_count {
                return Err(DaqError::Configuration(format!(
                    "Analysis channel {} outside 0..{}",
                    channel, pipeline.channel_count
                )));
            }
            if !seen.insert(channel) {
                return Err(DaqError::DuplicateChannel(channel));
            }
        }
        if pipeline.cmd_drain_timeout_ms == 0 || self.scan.run_timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "Timeouts must be non-zero".into(),
            ));
        }

        if self.front_end.tx_mask == 0 || self.front_end.rx_mask == 0 {
            return Err(DaqError::Configuration(
                "front_end.tx_mask and front_end.rx_mask must be non-zero".into(),
            ));
        }
        for (name, mask) in [("tx_mask", self.front_end.tx_mask), ("rx_mask", self.front_end.rx_mask)] {
            if let Some(channel) = mask_channels(mask).find(|c| *c as usize >= pipeline.channel_count) {
                return Err(DaqError::Configuration(format!(
                    "front_end.{} enables channel {} outside 0..{}",
                    name, channel, pipeline.channel_count
                )));
            }
        }
        if let Some(h) = self.front_end.hit_disc_cnfg {
            if h > 2 {
                return Err(DaqError::Configuration(format!(
                    "Invalid hit_disc_cnfg {}. Must be 0-2",
                    h
                )));
            }
        }

        let scan = &self.scan;
        if scan.mask_stages == 0 || scan.injections == 0 {
            return Err(DaqError::Configuration(
                "scan.mask_stages and scan.injections must be at least 1".into(),
            ));
        }
        let max_charge = f64::from(MAX_PLSR_DAC) * ELECTRONS_PER_PLSR_DAC;
        if scan.kind == ScanKind::Tot && !(scan.target_charge > 0.0 && scan.target_charge <= max_charge) {
            return Err(DaqError::Configuration(format!(
                "scan.target_charge {} outside (0, {}] electrons",
                scan.target_charge, max_charge
            )));
        }

        let mock = &self.mock;
        if !(1.0..=14.0).contains(&mock.target_tot) {
            return Err(DaqError::Configuration(format!(
                "mock.target_tot {} outside 1-14",
                mock.target_tot
            )));
        }
        if mock.tot_sigma < 0.0 {
            return Err(DaqError::Configuration("mock.tot_sigma must be >= 0".into()));
        }
        for (name, p) in [("occupancy", mock.occupancy), ("failure_rate", mock.failure_rate)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(DaqError::Configuration(format!(
                    "mock.{} {} outside 0-1",
                    name, p
                )));
            }
        }
        mock.error_config()?;
        Ok(())
    }

    /// Channels with a simulated front end.
    pub fn mock_channels(&self) -> Vec<ChannelId> {
        match &self.mock.channels {
            Some(channels) => channels.clone(),
            None => mask_channels(self.front_end.tx_mask).collect(),
        }
    }

    /// Loop settings of the `[scan]` section.
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            kind: self.scan.kind,
            mask_stages: self.scan.mask_stages,
            injections: self.scan.injections,
            target_charge: self.scan.target_charge,
        }
    }

    /// Orchestrator settings, timeouts converted to durations.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            channel_count: self.pipeline.channel_count,
            analysis_channels: self.pipeline.analysis_channels.clone(),
            tx_mask: self.front_end.tx_mask,
            rx_mask: self.front_end.rx_mask,
            cmd_drain_timeout: Duration::from_millis(self.pipeline.cmd_drain_timeout_ms),
            run_timeout: Duration::from_millis(self.scan.run_timeout_ms),
            front_end_config: self.front_end.config_file.clone(),
            hit_disc_cnfg: self.front_end.hit_disc_cnfg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScanConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pipeline.analysis_channels, vec![0]);
        assert_eq!(config.orchestrator_config(), OrchestratorConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[pipeline]
channel_count = 4
analysis_channels = [0, 2]

[scan]
kind = "digital"
mask_stages = 8

[mock]
mode = "realistic"
"#
        )
        .unwrap();

        let config = ScanConfig::load_from(file.path()).unwrap();
        assert_eq!(config.pipeline.channel_count, 4);
        assert_eq!(config.pipeline.analysis_channels, vec![0, 2]);
        assert_eq!(config.scan.kind, ScanKind::Digital);
        assert_eq!(config.scan.mask_stages, 8);
        assert_eq!(config.scan.injections, ScanSettings::default().injections);
        assert_eq!(config.mock.mode, MockMode::Realistic);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file_keeps_defaults() {
        let config = ScanConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.application.name, "rust-daq");
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = ScanConfig::default();
        config.application.log_level = "loud".into();
        assert!(matches!(config.validate(), Err(DaqError::Configuration(_))));
    }

    #[test]
    fn test_analysis_channel_out_of_range() {
        let mut config = ScanConfig::default();
        config.pipeline.channel_count = 2;
        config.pipeline.analysis_channels = vec![0, 5];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_analysis_channel() {
        let mut config = ScanConfig::default();
        config.pipeline.analysis_channels = vec![1, 1];
        assert!(matches!(
            config.validate(),
            Err(DaqError::DuplicateChannel(1))
        ));
    }

    #[test]
    fn test_zero_masks_rejected() {
        let mut config = ScanConfig::default();
        config.front_end.rx_mask = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tot_target_range() {
        let mut config = ScanConfig::default();
        config.mock.target_tot = 15.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_fault_operation() {
        let mut config = ScanConfig::default();
        config.mock.fault = Some(FaultSection {
            operation: "explode".into(),
            after: 0,
        });
        assert!(config.validate().is_err());
        config.mock.fault = Some(FaultSection {
            operation: "send".into(),
            after: 3,
        });
        assert!(!config.mock.error_config().unwrap().is_none());
    }

    #[test]
    fn test_masks_must_fit_channel_map() {
        let mut config = ScanConfig::default();
        config.pipeline.channel_count = 2;
        config.front_end.tx_mask = 0b100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("front_end.tx_mask enables channel 2"));

        config.front_end.tx_mask = 0b11;
        config.front_end.rx_mask = 0b1000;
        assert!(config.validate().is_err());
        config.front_end.rx_mask = 0b10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mock_channels_follow_tx_mask() {
        let mut config = ScanConfig::default();
        config.front_end.tx_mask = 0b101;
        assert_eq!(config.mock_channels(), vec![0, 2]);
        config.mock.channels = Some(vec![7]);
        assert_eq!(config.mock_channels(), vec![7]);
    }
}
