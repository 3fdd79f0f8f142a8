//! Histogram stage: per-channel event batches to per-iteration pixel maps.
//!
//! Each histogrammer owns a closed set of [`HistogramPlugin`]s chosen when the
//! stage is built. Maps are kept per scan iteration: the first batch of a new
//! iteration finalizes the maps of the previous one and pushes them downstream.
//! `end()` flushes the partially filled set.

use crate::histogram::{Histogram, MapKind, PixelMap};
use daq_core::data::{Event, EventBatch};
use daq_core::error::{AppResult, DaqError, QueueError};
use daq_core::handoff::HandoffQueue;
use daq_core::pipeline::{PipelineStage, StageKind, StageLifecycle, StageReport};
use daq_core::router::ChannelId;
use enum_dispatch::enum_dispatch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Fill/finalize contract of a histogram plugin.
#[enum_dispatch]
pub trait HistogramAlgorithm {
    /// Kind of map this plugin produces.
    fn kind(&self) -> MapKind;

    /// Start a fresh map for `iteration`.
    fn create(&mut self, channel: ChannelId, iteration: u32);

    /// Add one event to the current map. Returns the number of hits that fell
    /// outside the pixel matrix.
    fn fill(&mut self, event: &Event) -> u64;

    /// Hand out the current map, if any.
    fn finalize(&mut self) -> Option<Histogram>;
}

/// Closed set of histogram plugins.
#[enum_dispatch(HistogramAlgorithm)]
#[derive(Debug, Clone)]
pub enum HistogramPlugin {
    /// Hits per pixel
    OccupancyMap,
    /// ToT sum per pixel
    TotMap,
    /// ToT² sum per pixel
    Tot2Map,
}

impl HistogramPlugin {
    /// The plugin set used by ToT scans.
    pub fn tot_set() -> Vec<HistogramPlugin> {
        vec![
            OccupancyMap::default().into(),
            TotMap::default().into(),
            Tot2Map::default().into(),
        ]
    }
}

macro_rules! pixel_map_plugin {
    ($(#[$meta:meta])* $name:ident, $kind:expr, |$tot:ident| $weight:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            current: Option<PixelMap>,
        }

        impl HistogramAlgorithm for $name {
            fn kind(&self) -> MapKind {
                $kind
            }

            fn create(&mut self, channel: ChannelId, iteration: u32) {
                self.current = Some(PixelMap::new($kind, channel, Some(iteration)));
            }

            fn fill(&mut self, event: &Event) -> u64 {
                let Some(map) = self.current.as_mut() else {
                    return 0;
                };
                let mut outside = 0;
                for hit in &event.hits {
                    let $tot = f64::from(hit.tot);
                    if !map.fill(hit.col, hit.row, $weight) {
                        outside += 1;
                    }
                }
                outside
            }

            fn finalize(&mut self) -> Option<Histogram> {
                self.current.take().map(Histogram::Map)
            }
        }
    };
}

pixel_map_plugin!(
    /// Hits per pixel.
    OccupancyMap,
    MapKind::Occupancy,
    |_tot| 1.0
);
pixel_map_plugin!(
    /// Sum of ToT per pixel.
    TotMap,
    MapKind::TotSum,
    |tot| tot
);
pixel_map_plugin!(
    /// Sum of ToT² per pixel.
    Tot2Map,
    MapKind::Tot2Sum,
    |tot| tot * tot
);

/// Histogram stage of one channel.
pub struct Histogrammer<'q> {
    lifecycle: StageLifecycle,
    channel: ChannelId,
    plugins: Vec<HistogramPlugin>,
    iteration: Option<u32>,
    input: Option<&'q HandoffQueue<EventBatch>>,
    output: Option<&'q HandoffQueue<Histogram>>,
}

impl<'q> Histogrammer<'q> {
    /// Histogrammer of `channel` filling `plugins`.
    pub fn new(channel: ChannelId, plugins: Vec<HistogramPlugin>) -> Self {
        Self {
            lifecycle: StageLifecycle::new("histogrammer"),
            channel,
            plugins,
            iteration: None,
            input: None,
            output: None,
        }
    }

    /// Channel this stage accepts.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Finalize every plugin and push the maps. Returns the number pushed.
    fn flush(&mut self, output: &HandoffQueue<Histogram>) -> u64 {
        let mut pushed = 0;
        for plugin in &mut self.plugins {
            if let Some(histogram) = plugin.finalize() {
                output.push(histogram);
                pushed += 1;
            }
        }
        if pushed > 0 {
            trace!(
                channel = self.channel,
                iteration = ?self.iteration,
                pushed,
                "Flushed histograms"
            );
        }
        pushed
    }
}

impl<'q> PipelineStage<'q> for Histogrammer<'q> {
    type Inputs = &'q HandoffQueue<EventBatch>;
    type Outputs = &'q HandoffQueue<Histogram>;

    fn kind(&self) -> StageKind {
        StageKind::Histogram
    }

    fn name(&self) -> &'static str {
        "histogrammer"
    }

    fn init(&mut self) -> AppResult<()> {
        self.lifecycle.on_init()?;
        if self.plugins.is_empty() {
            return Err(DaqError::init("histogrammer", "no histogram plugins configured"));
        }
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
        let (Some(input), Some(output)) = (self.input, self.output) else {
            return Err(DaqError::Processing("histogrammer not connected".into()));
        };

        let mut report = StageReport::default();
        loop {
            let batch = match input.pop(cancel) {
                Ok(batch) => batch,
                Err(QueueError::Closed) => break,
                Err(QueueError::Cancelled) => return Err(DaqError::Cancelled),
                Err(e) => return Err(e.into()),
            };
            report.consumed += 1;

            if batch.channel != self.channel {
                report.skipped += 1;
                continue;
            }
            if self.iteration != Some(batch.iteration) {
                report.produced += self.flush(output);
                self.iteration = Some(batch.iteration);
                for plugin in &mut self.plugins {
                    plugin.create(self.channel, batch.iteration);
                }
            }
            for event in &batch.events {
                // Every plugin sees the same hits, count each rejected hit once
                let outside = self
                    .plugins
                    .iter_mut()
                    .map(|plugin| plugin.fill(event))
                    .max()
                    .unwrap_or(0);
                if outside > 0 {
                    trace!(channel = self.channel, outside, "Hits outside the pixel matrix");
                    report.skipped += outside;
                }
            }
        }
        Ok(report)
    }

    fn end(&mut self) -> AppResult<StageReport> {
        self.lifecycle.on_end()?;
        let mut report = StageReport::default();
        if let Some(output) = self.output.take() {
            report.produced = self.flush(output);
            output.close();
        }
        debug!(channel = self.channel, flushed = report.produced, "Histogrammer ended");
        self.input = None;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::data::Hit;
    use daq_core::pipeline::run_stage;

    fn batch(channel: ChannelId, iteration: u32, hits: &[(u16, u16, u16)]) -> EventBatch {
        let mut batch = EventBatch::new(channel, iteration);
        let mut event = Event::new(0, 0);
        event.hits = hits
            .iter()
            .map(|&(col, row, tot)| Hit { col, row, tot })
            .collect();
        batch.events.push(event);
        batch
    }

    #[test]
    fn test_maps_per_iteration() {
        let events = HandoffQueue::new();
        let histograms = HandoffQueue::new();
        events.push(batch(0, 0, &[(1, 1, 4), (2, 2, 6)]));
        events.push(batch(0, 0, &[(1, 1, 5)]));
        events.push(batch(0, 1, &[(3, 3, 2)]));
        events.close();

        let mut stage = Histogrammer::new(0, HistogramPlugin::tot_set());
        let report =
            run_stage(&mut stage, &events, &histograms, &CancellationToken::new()).unwrap();

        assert_eq!(report.consumed, 3);
        assert_eq!(report.produced, 6);
        assert!(histograms.is_closed());

        let out = histograms.drain();
        let occ0 = out[0].as_map().unwrap();
        assert_eq!(occ0.kind, MapKind::Occupancy);
        assert_eq!(occ0.iteration, Some(0));
        assert_eq!(occ0.get(1, 1), Some(2.0));
        let tot0 = out[1].as_map().unwrap();
        assert_eq!(tot0.get(1, 1), Some(9.0));
        let tot2_0 = out[2].as_map().unwrap();
        assert_eq!(tot2_0.get(2, 2), Some(36.0));

        // Partial set of the last iteration flushed by end()
        let occ1 = out[3].as_map().unwrap();
        assert_eq!(occ1.iteration, Some(1));
        assert_eq!(occ1.get(3, 3), Some(1.0));
    }

    #[test]
    fn test_empty_input_produces_nothing() {
        let events: HandoffQueue<EventBatch> = HandoffQueue::new();
        let histograms = HandoffQueue::new();
        events.close();
        let mut stage = Histogrammer::new(2, HistogramPlugin::tot_set());
        let report =
            run_stage(&mut stage, &events, &histograms, &CancellationToken::new()).unwrap();
        assert_eq!(report, StageReport::default());
        assert!(histograms.is_empty());
        assert!(histograms.is_closed());
    }

    #[test]
    fn test_foreign_channel_batches_skipped() {
        let events = HandoffQueue::new();
        let histograms = HandoffQueue::new();
        events.push(batch(1, 0, &[(1, 1, 4)]));
        events.close();
        let mut stage = Histogrammer::new(0, vec![OccupancyMap::default().into()]);
        let report =
            run_stage(&mut stage, &events, &histograms, &CancellationToken::new()).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.produced, 0);
    }

    #[test]
    fn test_out_of_matrix_hits_counted_as_skipped() {
        let events = HandoffQueue::new();
        let histograms = HandoffQueue::new();
        events.push(batch(0, 0, &[(1, 1, 4), (0, 5, 3), (81, 1, 2), (4, 337, 2)]));
        events.close();

        let mut stage = Histogrammer::new(0, HistogramPlugin::tot_set());
        let report =
            run_stage(&mut stage, &events, &histograms, &CancellationToken::new()).unwrap();
        assert_eq!(report.skipped, 3);

        let occupancy = histograms.try_pop().unwrap();
        let map = occupancy.as_map().unwrap();
        assert_eq!(map.kind, MapKind::Occupancy);
        assert_eq!(map.entries(), 1);
        assert_eq!(map.get(1, 1), Some(1.0));
    }

    #[test]
    fn test_no_plugins_fails_init() {
        let events: HandoffQueue<EventBatch> = HandoffQueue::new();
        let histograms = HandoffQueue::new();
        let mut stage = Histogrammer::new(0, Vec::new());
        let err = run_stage(&mut stage, &events, &histograms, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, DaqError::Init { stage: "histogrammer", .. }));
    }

    #[test]
    fn test_cancelled_while_waiting() {
        let events: HandoffQueue<EventBatch> = HandoffQueue::new();
        let histograms = HandoffQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut stage = Histogrammer::new(0, HistogramPlugin::tot_set());
        let err = run_stage(&mut stage, &events, &histograms, &cancel).unwrap_err();
        assert!(matches!(err, DaqError::Cancelled));
        assert!(histograms.is_closed());
    }
}
