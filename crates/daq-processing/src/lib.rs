//! `daq-processing`
//!
//! The stages that turn raw front-end words into scan results:
//!
//! ```text
//! raw queue ─▶ DataProcessor ─▶ chN events ─▶ Histogrammer ─▶ chN histograms ─▶ Analyzer ─▶ chN results
//! ```
//!
//! - [`DataProcessor`]: EventBuild stage, decodes FE-I4 words and routes one
//!   [`EventBatch`](daq_core::EventBatch) per channel through a
//!   [`ChannelRouter`](daq_core::ChannelRouter)
//! - [`Histogrammer`]: Histogram stage with [`HistogramPlugin`]s
//! - [`Analyzer`]: Analyze stage with [`AnalysisPlugin`]s

pub mod analysis;
pub mod data_processor;
pub mod histogram;
pub mod histogrammer;

pub use analysis::{
    AnalysisAlgorithm, AnalysisPlugin, AnalysisResult, Analyzer, OccupancyAnalysis,
    OccupancySummary, ScanParams, TotAnalysis, TotSummary,
};
pub use data_processor::{DataProcessor, DecodeStats};
pub use histogram::{Distribution, Histogram, MapKind, PixelMap};
pub use histogrammer::{
    HistogramAlgorithm, HistogramPlugin, Histogrammer, OccupancyMap, Tot2Map, TotMap,
};
