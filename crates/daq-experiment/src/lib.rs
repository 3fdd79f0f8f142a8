//! Scan execution for rust-daq.
//!
//! - [`scans`] - the [`ScanBase`] lifecycle and the ToT/digital scans
//! - [`front_end`] - register sets pushed through the transmit path
//! - [`readout`] - raw-capture stage running beside the scan loop
//! - [`orchestrator`] - [`ScanOrchestrator`], the phase driver
//! - [`phase`] - phase state machine

pub mod front_end;
pub mod orchestrator;
pub mod phase;
pub mod readout;
pub mod scans;

pub use front_end::FrontEnd;
pub use orchestrator::{
    ChannelOutcome, Hardware, OrchestratorConfig, PhaseTimings, ScanContext, ScanOrchestrator,
    ScanReport,
};
pub use phase::{PhaseTracker, ScanPhase};
pub use readout::{ReadoutControl, ReadoutStage};
pub use scans::{
    build_scan, charge_to_plsr_dac, DigitalScan, RunContext, ScanBase, ScanKind, ScanSettings,
    TotScan,
};
