//! `daq-core`
//!
//! Core types and traits shared by every rust-daq crate.
//!
//! This crate defines the handoff layer of the acquisition pipeline: the
//! thread-safe queue that moves items between stages, the per-channel router
//! that fans a single raw stream out to independent consumers, the lifecycle
//! contract every stage follows, and the seams to the transmit and receive
//! hardware paths.
//!
//! ## Key Types
//!
//! - [`HandoffQueue`]: unbounded FIFO with blocking, timed and non-blocking pops
//! - [`ChannelMap`] / [`ChannelRouter`]: channel id to queue mapping
//! - [`PipelineStage`]: init / connect / process / end stage contract
//! - [`TxCore`] / [`RxCore`]: hardware collaborator traits
//! - [`DaqError`]: error type with recovery guidance
//!
//! ## Example
//!
//! ```rust
//! use daq_core::{ChannelMap, DaqError};
//!
//! let map: ChannelMap<u32> = ChannelMap::with_channels(4)?;
//! let router = map.router();
//! router.route_to(2, 7)?;
//! assert!(matches!(router.route_to(9, 1), Err(DaqError::UnknownChannel(9))));
//! # Ok::<(), DaqError>(())
//! ```

pub mod data;
pub mod driver;
pub mod error;
pub mod fei4;
pub mod handoff;
pub mod limits;
pub mod pipeline;
pub mod router;

pub use data::{Event, EventBatch, Hit, RawFragment};
pub use driver::{ChannelMask, ConfigLoader, ConfigSet, FrontEndCommand, Register, RxCore, TxCore};
pub use error::{AppResult, DaqError, DriverError, DriverErrorKind, QueueError};
pub use handoff::HandoffQueue;
pub use pipeline::{run_stage, PipelineStage, StageKind, StageLifecycle, StageReport, StageState};
pub use router::{ChannelId, ChannelMap, ChannelRouter};
pub use tokio_util::sync::CancellationToken;
