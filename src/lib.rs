//! # Rust DAQ
//!
//! Application crate for the staged multi-channel readout pipeline. The
//! pipeline itself lives in the workspace crates:
//!
//! - **`daq-core`**: handoff queues, channel routing, the stage contract and
//!   the hardware driver traits.
//! - **`daq-processing`**: raw-data decoding, histogramming and analysis.
//! - **`daq-experiment`**: scan definitions and the scan orchestrator.
//! - **`daq-driver-mock`**: a simulated readout board with fault injection.
//!
//! This crate adds what a runnable tool needs on top of them:
//!
//! - **`config`**: layered scan configuration (defaults, TOML, environment).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`runner`**: builds the board and orchestrator from a configuration
//!   and runs one scan.

pub mod config;
pub mod logging;
pub mod runner;

pub use config::ScanConfig;
pub use runner::{build_board, render_report, run_scan};
