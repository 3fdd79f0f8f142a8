//! Mock Hardware for rust-daq
//!
//! This crate provides a simulated FE-I4 readout board for running scans
//! without physical hardware.
//!
//! # Available Mocks
//!
//! - [`MockBoard`] - readout board hosting one simulated front end per channel
//! - [`MockTxCore`] - transmit core with a command FIFO and drain tracking
//! - [`MockRxCore`] - receive core handing out FE-I4 encoded fragments
//! - [`TomlConfigLoader`] - front-end register sets from TOML files
//!
//! # Modes
//!
//! - `Instant`: commands execute synchronously inside `send()`
//! - `Realistic`: a worker thread drains commands with board latency
//! - `Chaos`: realistic timing with random collaborator failures
//!
//! # Example
//!
//! ```rust
//! use daq_core::driver::{channel_mask, FrontEndCommand, RxCore, TxCore};
//! use daq_driver_mock::MockBoard;
//!
//! let board = MockBoard::builder().channels([0, 1]).seed(7).build();
//! let (tx, rx) = (board.tx(), board.rx());
//! tx.enable(channel_mask([0, 1])).unwrap();
//! rx.enable(channel_mask([0, 1])).unwrap();
//! tx.send(FrontEndCommand::RunMode(true)).unwrap();
//! tx.send(FrontEndCommand::Trigger { count: 1 }).unwrap();
//! assert!(rx.read_data().unwrap().is_some());
//! ```

mod board;
pub mod common;
mod front_end_sim;
mod loader;

pub use board::{
    CallCounts, MockBoard, MockBoardBuilder, MockRxCore, MockTxCore, CHAOS_FAILURE_RATE,
};
pub use common::{ops, ErrorConfig, ErrorScenario, MockMode, MockRng, TimingConfig};
pub use front_end_sim::{RegisterSnapshot, SimulationConfig};
pub use loader::TomlConfigLoader;
