//! Analyze stage: per-iteration histograms to scan results.
//!
//! Analysis plugins combine the maps of every scan iteration of one channel.
//! They need the scan parameters (injections per pixel, mask-stage count) at
//! `init()`; the stage fails with [`DaqError::Init`] when those are missing.

use crate::histogram::{Distribution, Histogram, MapKind, PixelMap};
use daq_core::error::{AppResult, DaqError, QueueError};
use daq_core::handoff::HandoffQueue;
use daq_core::limits::N_PIXELS;
use daq_core::pipeline::{PipelineStage, StageKind, StageLifecycle, StageReport};
use daq_core::router::ChannelId;
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Loop parameters a scan hands to its analyses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParams {
    /// Injections (or triggers) per pixel
    pub injections: u32,
    /// Mask stages, one scan iteration each
    pub mask_stages: u32,
}

/// Summary of a ToT analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TotSummary {
    /// Analysed channel
    pub channel: ChannelId,
    /// Pixels with at least one hit
    pub pixels_with_hits: usize,
    /// Mean over pixels of the per-pixel mean ToT
    pub mean_of_means: f64,
    /// Mean over pixels of the per-pixel ToT sigma
    pub mean_sigma: f64,
}

/// Summary of an occupancy analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancySummary {
    /// Analysed channel
    pub channel: ChannelId,
    /// Expected hits per pixel
    pub expected: u32,
    /// Pixels whose occupancy differs from `expected`
    pub bad_pixels: usize,
}

/// Item on an analysis result queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnalysisResult {
    /// Histogram produced by the analysis
    Histogram(Histogram),
    /// Mean ToT summary
    Tot(TotSummary),
    /// Occupancy summary
    Occupancy(OccupancySummary),
}

/// Fill/finalize contract of an analysis plugin.
#[enum_dispatch]
pub trait AnalysisAlgorithm {
    /// Plugin name for logs.
    fn name(&self) -> &'static str;

    /// Validate prerequisites.
    fn init(&mut self, params: Option<&ScanParams>) -> AppResult<()>;

    /// Accumulate one histogram. Returns false if the plugin ignored it.
    fn fill(&mut self, histogram: &Histogram) -> bool;

    /// Produce the results for `channel`.
    fn finalize(&mut self, channel: ChannelId) -> Vec<AnalysisResult>;
}

/// Closed set of analysis plugins.
#[enum_dispatch(AnalysisAlgorithm)]
#[derive(Debug, Clone)]
pub enum AnalysisPlugin {
    /// Per-pixel mean and sigma ToT
    TotAnalysis,
    /// Occupancy against the expected hit count
    OccupancyAnalysis,
}

fn require_params(stage: &'static str, params: Option<&ScanParams>) -> AppResult<ScanParams> {
    match params {
        Some(p) if p.injections > 0 && p.mask_stages > 0 => Ok(*p),
        Some(_) => Err(DaqError::init(
            stage,
            "scan parameters need non-zero injections and mask stages",
        )),
        None => Err(DaqError::init(stage, "scan parameters are missing")),
    }
}

fn accumulate(target: &mut Option<PixelMap>, map: &PixelMap) {
    match target {
        Some(sum) => sum.add(map),
        None => {
            let mut sum = PixelMap::new(map.kind, map.channel, None);
            sum.add(map);
            *target = Some(sum);
        }
    }
}

/// Mean and sigma of ToT per pixel.
#[derive(Debug, Clone, Default)]
pub struct TotAnalysis {
    params: Option<ScanParams>,
    occupancy: Option<PixelMap>,
    tot: Option<PixelMap>,
    tot2: Option<PixelMap>,
    iterations: u32,
}

impl AnalysisAlgorithm for TotAnalysis {
    fn name(&self) -> &'static str {
        "tot_analysis"
    }

    fn init(&mut self, params: Option<&ScanParams>) -> AppResult<()> {
        self.params = Some(require_params("tot_analysis", params)?);
        Ok(())
    }

    fn fill(&mut self, histogram: &Histogram) -> bool {
        let Some(map) = histogram.as_map() else {
            return false;
        };
        match map.kind {
            MapKind::Occupancy => {
                accumulate(&mut self.occupancy, map);
                self.iterations += 1;
            }
            MapKind::TotSum => accumulate(&mut self.tot, map),
            MapKind::Tot2Sum => accumulate(&mut self.tot2, map),
            _ => return false,
        }
        true
    }

    fn finalize(&mut self, channel: ChannelId) -> Vec<AnalysisResult> {
        let (Some(occ), Some(tot), Some(tot2)) =
            (self.occupancy.take(), self.tot.take(), self.tot2.take())
        else {
            warn!(channel, "ToT analysis received no complete map set");
            return Vec::new();
        };
        if let Some(params) = self.params {
            if self.iterations != params.mask_stages {
                warn!(
                    channel,
                    received = self.iterations,
                    expected = params.mask_stages,
                    "ToT analysis saw an unexpected number of mask stages"
                );
            }
        }

        let mut mean_map = PixelMap::new(MapKind::MeanTot, channel, None);
        let mut sigma_map = PixelMap::new(MapKind::SigmaTot, channel, None);
        let mut mean_dist = Distribution::new("MeanTotDist", channel, 64, 0.0, 16.0);
        let mut pixels_with_hits = 0usize;
        let (mut sum_mean, mut sum_sigma) = (0.0, 0.0);

        for i in 0..N_PIXELS {
            let n = occ.bins()[i];
            if n <= 0.0 {
                continue;
            }
            let mean = tot.bins()[i] / n;
            let sigma = (tot2.bins()[i] / n - mean * mean).max(0.0).sqrt();
            mean_map.set_bin(i, mean);
            sigma_map.set_bin(i, sigma);
            mean_dist.fill(mean);
            pixels_with_hits += 1;
            sum_mean += mean;
            sum_sigma += sigma;
        }

        let summary = if pixels_with_hits > 0 {
            TotSummary {
                channel,
                pixels_with_hits,
                mean_of_means: sum_mean / pixels_with_hits as f64,
                mean_sigma: sum_sigma / pixels_with_hits as f64,
            }
        } else {
            TotSummary {
                channel,
                pixels_with_hits: 0,
                mean_of_means: 0.0,
                mean_sigma: 0.0,
            }
        };
        info!(
            channel,
            pixels = summary.pixels_with_hits,
            mean_tot = format_args!("{:.2}", summary.mean_of_means),
            sigma_tot = format_args!("{:.2}", summary.mean_sigma),
            "ToT analysis done"
        );

        vec![
            AnalysisResult::Histogram(Histogram::Map(mean_map)),
            AnalysisResult::Histogram(Histogram::Map(sigma_map)),
            AnalysisResult::Histogram(Histogram::Dist(mean_dist)),
            AnalysisResult::Tot(summary),
        ]
    }
}

/// Pixels that did not answer every injection.
#[derive(Debug, Clone, Default)]
pub struct OccupancyAnalysis {
    params: Option<ScanParams>,
    occupancy: Option<PixelMap>,
}

impl AnalysisAlgorithm for OccupancyAnalysis {
    fn name(&self) -> &'static str {
        "occupancy_analysis"
    }

    fn init(&mut self, params: Option<&ScanParams>) -> AppResult<()> {
        self.params = Some(require_params("occupancy_analysis", params)?);
        Ok(())
    }

    fn fill(&mut self, histogram: &Histogram) -> bool {
        match histogram.as_map() {
            Some(map) if map.kind == MapKind::Occupancy => {
                accumulate(&mut self.occupancy, map);
                true
            }
            _ => false,
        }
    }

    fn finalize(&mut self, channel: ChannelId) -> Vec<AnalysisResult> {
        let expected = self.params.map(|p| p.injections).unwrap_or(0);
        let occupancy = self
            .occupancy
            .take()
            .unwrap_or_else(|| PixelMap::new(MapKind::Occupancy, channel, None));
        let bad_pixels = occupancy
            .bins()
            .iter()
            .filter(|n| (**n - f64::from(expected)).abs() > f64::EPSILON)
            .count();
        info!(channel, expected, bad_pixels, "Occupancy analysis done");
        vec![
            AnalysisResult::Histogram(Histogram::Map(occupancy)),
            AnalysisResult::Occupancy(OccupancySummary {
                channel,
                expected,
                bad_pixels,
            }),
        ]
    }
}

/// Analyze stage of one channel.
pub struct Analyzer<'q> {
    lifecycle: StageLifecycle,
    channel: ChannelId,
    params: Option<ScanParams>,
    plugins: Vec<AnalysisPlugin>,
    input: Option<&'q HandoffQueue<Histogram>>,
    output: Option<&'q HandoffQueue<AnalysisResult>>,
    initialized: bool,
}

impl<'q> Analyzer<'q> {
    /// Analysis stage of `channel`. `params` is required by plugins that need the loop settings.
    pub fn new(channel: ChannelId, params: Option<ScanParams>, plugins: Vec<AnalysisPlugin>) -> Self {
        Self {
            lifecycle: StageLifecycle::new("analyzer"),
            channel,
            params,
            plugins,
            input: None,
            output: None,
            initialized: false,
        }
    }
}

impl<'q> PipelineStage<'q> for Analyzer<'q> {
    type Inputs = &'q HandoffQueue<Histogram>;
    type Outputs = &'q HandoffQueue<AnalysisResult>;

    fn kind(&self) -> StageKind {
        StageKind::Analyze
    }

    fn name(&self) -> &'static str {
        "analyzer"
    }

    fn init(&mut self) -> AppResult<()> {
        self.lifecycle.on_init()?;
        if self.plugins.is_empty() {
            return Err(DaqError::init("analyzer", "no analysis plugins configured"));
        }
        for plugin in &mut self.plugins {
            plugin.init(self.params.as_ref())?;
        }
        self.initialized = true;
        Ok(())
    }

    fn connect(&mut self, inputs: Self::Inputs, outputs: Self::Outputs) -> AppResult<()> {
        self.lifecycle.on_connect()?;
        self.input = Some(inputs);
        self.output = Some(outputs);
        Ok(())
    }

    fn process(&mut self, cancel: &CancellationToken) -> AppResult<StageReport> {
        self.lifecycle.on_process()?;
        let Some(input) = self.input else {
            return Err(DaqError::Processing("analyzer not connected".into()));
        };

        let mut report = StageReport::default();
        loop {
            let histogram = match input.pop(cancel) {
                Ok(h) => h,
                Err(QueueError::Closed) => break,
                Err(QueueError::Cancelled) => return Err(DaqError::Cancelled),
                Err(e) => return Err(e.into()),
            };
            report.consumed += 1;
            let mut used = false;
            for plugin in &mut self.plugins {
                used |= plugin.fill(&histogram);
            }
            if !used {
                debug!(channel = self.channel, histogram = histogram.name(), "Histogram unused");
                report.skipped += 1;
            }
        }
        Ok(report)
    }

    fn end(&mut self) -> AppResult<StageReport> {
        self.lifecycle.on_end()?;
        let mut report = StageReport::default();
        if let Some(output) = self.output.take() {
            // Results only make sense after a successful init
            if self.initialized {
                for plugin in &mut self.plugins {
                    for result in plugin.finalize(self.channel) {
                        output.push(result);
                        report.produced += 1;
                    }
                }
            }
            output.close();
        }
        self.input = None;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::pipeline::run_stage;

    const PARAMS: ScanParams = ScanParams {
        injections: 4,
        mask_stages: 2,
    };

    fn map(kind: MapKind, iteration: u32, fills: &[(u16, u16, f64)]) -> Histogram {
        let mut m = PixelMap::new(kind, 0, Some(iteration));
        for &(c, r, w) in fills {
            m.fill(c, r, w);
        }
        Histogram::Map(m)
    }

    #[test]
    fn test_tot_analysis_mean_and_sigma() {
        let input = HandoffQueue::new();
        let output = HandoffQueue::new();
        // Pixel (1,1): ToT 4, 4, 6, 6 over two iterations
        input.push(map(MapKind::Occupancy, 0, &[(1, 1, 2.0)]));
        input.push(map(MapKind::TotSum, 0, &[(1, 1, 8.0)]));
        input.push(map(MapKind::Tot2Sum, 0, &[(1, 1, 32.0)]));
        input.push(map(MapKind::Occupancy, 1, &[(1, 1, 2.0)]));
        input.push(map(MapKind::TotSum, 1, &[(1, 1, 12.0)]));
        input.push(map(MapKind::Tot2Sum, 1, &[(1, 1, 72.0)]));
        input.close();

        let mut stage = Analyzer::new(0, Some(PARAMS), vec![TotAnalysis::default().into()]);
        let report = run_stage(&mut stage, &input, &output, &CancellationToken::new()).unwrap();
        assert_eq!(report.consumed, 6);
        assert_eq!(report.produced, 4);

        let results = output.drain();
        let AnalysisResult::Histogram(Histogram::Map(mean)) = &results[0] else {
            panic!("expected mean map");
        };
        assert_eq!(mean.kind, MapKind::MeanTot);
        assert_eq!(mean.get(1, 1), Some(5.0));
        let AnalysisResult::Histogram(Histogram::Map(sigma)) = &results[1] else {
            panic!("expected sigma map");
        };
        assert!((sigma.get(1, 1).unwrap() - 1.0).abs() < 1e-9);
        let AnalysisResult::Tot(summary) = results[3] else {
            panic!("expected summary");
        };
        assert_eq!(summary.pixels_with_hits, 1);
        assert!((summary.mean_of_means - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_params_is_init_error() {
        let input: HandoffQueue<Histogram> = HandoffQueue::new();
        let output = HandoffQueue::new();
        let mut stage = Analyzer::new(0, None, vec![TotAnalysis::default().into()]);
        let err = run_stage(&mut stage, &input, &output, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, DaqError::Init { stage: "tot_analysis", .. }));
        // No results after a failed init, but downstream still sees end-of-stream
        assert!(output.is_empty());
    }

    #[test]
    fn test_occupancy_analysis_counts_bad_pixels() {
        let input = HandoffQueue::new();
        let output = HandoffQueue::new();
        input.push(map(MapKind::Occupancy, 0, &[(1, 1, 4.0), (2, 1, 3.0)]));
        input.push(map(MapKind::TotSum, 0, &[(1, 1, 10.0)]));
        input.close();

        let mut stage = Analyzer::new(0, Some(PARAMS), vec![OccupancyAnalysis::default().into()]);
        let report = run_stage(&mut stage, &input, &output, &CancellationToken::new()).unwrap();
        assert_eq!(report.skipped, 1);

        let results = output.drain();
        let AnalysisResult::Occupancy(summary) = results[1] else {
            panic!("expected occupancy summary");
        };
        // Every pixel except (1,1) misses injections
        assert_eq!(summary.bad_pixels, N_PIXELS - 1);
        assert_eq!(summary.expected, 4);
    }

    #[test]
    fn test_zero_injections_rejected() {
        let mut plugin = TotAnalysis::default();
        let params = ScanParams {
            injections: 0,
            mask_stages: 1,
        };
        assert!(plugin.init(Some(&params)).is_err());
    }
}
