//! EventBuild stage: raw FE-I4 words to per-channel event batches.
//!
//! ```text
//! raw queue ──▶ DataProcessor ──route_to(ch)──▶ ch0 / ch1 / ... event queues
//! ```
//!
//! Every fragment is decoded on its own. A data record before the first
//! header of its channel in that fragment has no event to belong to and is
//! skipped. Words of a channel the router does not know are a configuration
//! error and stop the stage.

use daq_core::data::{Event, EventBatch, Hit, RawFragment};
use daq_core::error::{AppResult, DaqError, QueueError};
use daq_core::fei4::{self, Fei4Word};
use daq_core::handoff::HandoffQueue;
use daq_core::pipeline::{PipelineStage, StageKind, StageLifecycle, StageReport};
use daq_core::router::{ChannelId, ChannelRouter};
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Counters beyond the generic [`StageReport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Raw words read
    pub words: u64,
    /// Event headers decoded
    pub events: u64,
    /// Hits attached to an event
    pub hits: u64,
    /// Records that arrived before any header
    pub orphan_records: u64,
    /// Words that are neither header nor in-matrix record
    pub unknown_words: u64,
    /// Small-hit ToT codes dropped because `HitDiscCnfg` is 0
    pub discarded_small_hits: u64,
}

/// Decoder and demultiplexer for the raw data stream.
pub struct DataProcessor<'q> {
    lifecycle: StageLifecycle,
    default_hit_disc_cnfg: u8,
    hit_disc_cnfg: HashMap<ChannelId, u8>,
    input: Option<&'q HandoffQueue<RawFragment>>,
    router: Option<ChannelRouter<'q, EventBatch>>,
    stats: DecodeStats,
}

impl<'q> DataProcessor<'q> {
    /// Decoder with `HitDiscCnfg` 0 on every channel.
    pub fn new() -> Self {
        Self {
            lifecycle: StageLifecycle::new("data_processor"),
            default_hit_disc_cnfg: 0,
            hit_disc_cnfg: HashMap::new(),
            input: None,
            router: None,
            stats: DecodeStats::default(),
        }
    }

    /// `HitDiscCnfg` used for channels without an explicit setting.
    pub fn with_hit_disc_cnfg(mut self, hit_disc_cnfg: u8) -> Self {
        self.default_hit_disc_cnfg = hit_disc_cnfg;
        self
    }

    /// `HitDiscCnfg` of the front end on `channel`.
    pub fn set_hit_disc_cnfg(&mut self, channel: ChannelId, hit_disc_cnfg: u8) {
        self.hit_disc_cnfg.insert(channel, hit_disc_cnfg);
    }

    fn tot_of(&mut self, code: u8, hit_disc_cnfg: u8) -> Option<u16> {
        let tot = fei4::tot_from_code(code, hit_disc_cnfg);
        if tot.is_none() && code == fei4::SMALL_HIT {
            self.stats.discarded_small_hits += 1;
        }
        tot
    }

    /// Decoding counters accumulated so far.
    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    fn hit_disc_for(&self, channel: ChannelId) -> u8 {
        self.hit_disc_cnfg
            .get(&channel)
            .copied()
            .unwrap_or(self.default_hit_disc_cnfg)
    }

    fn route_fragment(
        &mut self,
        router: &ChannelRouter<'q, EventBatch>,
        fragment: RawFragment,
        report: &mut StageReport,
    ) -> AppResult<()> {
        for batch in self.decode_fragment(router, fragment, report)? {
            router.route_to(batch.channel, batch)?;
            report.produced += 1;
        }
        Ok(())
    }

    /// Decode one fragment into per-channel batches, in order of first appearance.
    fn decode_fragment(
        &mut self,
        router: &ChannelRouter<'q, EventBatch>,
        fragment: RawFragment,
        report: &mut StageReport,
    ) -> AppResult<Vec<EventBatch>> {
        let mut batches: BTreeMap<ChannelId, EventBatch> = BTreeMap::new();
        let mut order: Vec<ChannelId> = Vec::new();
        let iteration = fragment.iteration;

        for word in fragment.words {
            self.stats.words += 1;
            let channel = fei4::channel_of(word);
            if !router.contains(channel) {
                return Err(DaqError::UnknownChannel(channel));
            }
            let hit_disc = self.hit_disc_for(channel);
            let batch = batches.entry(channel).or_insert_with(|| {
                order.push(channel);
                EventBatch::new(channel, iteration)
            });

            match fei4::decode(word) {
                Fei4Word::Header { l1id, bcid } => {
                    batch.events.push(Event::new(l1id, bcid));
                    self.stats.events += 1;
                }
                Fei4Word::Record {
                    col,
                    row,
                    tot1,
                    tot2,
                } => {
                    let Some(event) = batch.events.last_mut() else {
                        self.stats.orphan_records += 1;
                        report.skipped += 1;
                        continue;
                    };
                    if let Some(tot) = self.tot_of(tot1, hit_disc) {
                        event.hits.push(Hit { col, row, tot });
                        self.stats.hits += 1;
                    }
                    if let Some(tot) = self.tot_of(tot2, hit_disc) {
                        // Second ToT belongs to the pixel above
                        if usize::from(row) < daq_core::limits::N_ROW {
                            event.hits.push(Hit {
                                col,
                                row: row + 1,
                                tot,
                            });
                            self.stats.hits += 1;
                        } else {
                            report.skipped += 1;
                        }
                    }
                }
                Fei4Word::Unknown(_) => {
                    self.stats.unknown_words += 1;
                    report.skipped += 1;
                }
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|c| batches.remove(&c))
            .filter(|b| !b.events.is_empty())
            .collect())
    }
}

impl Default for DataProcessor<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'q> PipelineStage<'q> for DataProcessor<'q> {
    type Inputs = &'q HandoffQueue<RawFragment>;
    type Outputs = ChannelRouter<'q, EventBatch>;

    fn kind(&self) -> StageKind {
        StageKind::EventBuild
    }

    fn name(&self) -> &'static str {
        "data_processor"
    }

    fn init(&mut self) -> AppResult<()> {
        self.lifecycle.on_init()?;
        if self.default_hit_disc_cnfg > 2 || self.hit_disc_cnfg.values().any(|h| *h > 2) {
            return Err(DaqError::init(
                "data_processor",
                "HitDiscCnfg must be within 0..=2",
            ));
        }
        Ok(())
    }

    fn connect(&mut self, inputs: Self::Inputs, outputs: Self::Outputs) -> AppResult<()> {
        self.lifecycle.on_connect()?;
        if outputs.channels().next().is_none() {
            return Err(DaqError::Configuration(
                "data processor has no channel routes".into(),
            ));
        }
        self.input = Some(inputs);
        self.router = Some(outputs);
        Ok(())
    }

    fn process(&mut self, cancel: &CancellationToken) -> AppResult<StageReport> {
        self.lifecycle.on_process()?;
        let input = self
            .input
            .ok_or_else(|| DaqError::Processing("data processor not connected".into()))?;
        let router = self
            .router
            .take()
            .ok_or_else(|| DaqError::Processing("data processor not connected".into()))?;

        let mut report = StageReport::default();
        let result = loop {
            match input.pop(cancel) {
                Ok(fragment) => {
                    report.consumed += 1;
                    if let Err(e) = self.route_fragment(&router, fragment, &mut report) {
                        break Err(e);
                    }
                }
                Err(QueueError::Closed) => break Ok(()),
                Err(QueueError::Cancelled) => break Err(DaqError::Cancelled),
                Err(e) => break Err(e.into()),
            }
        };
        self.router = Some(router);
        result?;

        info!(
            fragments = report.consumed,
            batches = report.produced,
            events = self.stats.events,
            hits = self.stats.hits,
            skipped = report.skipped,
            "Raw data decoded"
        );
        Ok(report)
    }

    fn end(&mut self) -> AppResult<StageReport> {
        self.lifecycle.on_end()?;
        if let Some(router) = self.router.take() {
            router.close_all();
            debug!(channels = router.channels().count(), "Closed event queues");
        }
        self.input = None;
        Ok(StageReport::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::fei4::{encode_header, encode_record, NO_HIT};
    use daq_core::pipeline::run_stage;
    use daq_core::router::ChannelMap;

    fn raw_queue(fragments: Vec<RawFragment>) -> HandoffQueue<RawFragment> {
        let raw = HandoffQueue::with_name("raw");
        for f in fragments {
            raw.push(f);
        }
        raw.close();
        raw
    }

    fn run<'q>(
        processor: &mut DataProcessor<'q>,
        raw: &'q HandoffQueue<RawFragment>,
        map: &'q ChannelMap<EventBatch>,
    ) -> AppResult<StageReport> {
        run_stage(processor, raw, map.router(), &CancellationToken::new())
    }

    #[test]
    fn test_decodes_header_and_records() {
        let map = ChannelMap::with_channels(2).unwrap();
        let words = vec![
            encode_header(1, 3, 100),
            encode_record(1, 10, 20, 4, NO_HIT),
            encode_record(1, 11, 30, 0, 2),
        ];
        let raw = raw_queue(vec![RawFragment::new(0, 5, words)]);
        let mut processor = DataProcessor::new();
        let report = run(&mut processor, &raw, &map).unwrap();

        assert_eq!(report.consumed, 1);
        assert_eq!(report.produced, 1);
        assert_eq!(report.skipped, 0);

        let batch = map.queue(1).unwrap().try_pop().unwrap();
        assert_eq!(batch.iteration, 5);
        assert_eq!(batch.events.len(), 1);
        let event = &batch.events[0];
        assert_eq!((event.l1id, event.bcid), (3, 100));
        assert_eq!(
            event.hits,
            vec![
                Hit { col: 10, row: 20, tot: 5 },
                Hit { col: 11, row: 30, tot: 1 },
                Hit { col: 11, row: 31, tot: 3 },
            ]
        );
        assert!(map.queue(0).unwrap().is_empty());
        assert!(map.queue(1).unwrap().is_closed());
    }

    #[test]
    fn test_orphan_and_unknown_words_are_counted() {
        let map = ChannelMap::with_channels(1).unwrap();
        let words = vec![
            encode_record(0, 1, 1, 5, NO_HIT),
            encode_header(0, 1, 1),
            encode_record(0, 0, 1, 5, NO_HIT),
            encode_record(0, 2, 2, 5, NO_HIT),
        ];
        let raw = raw_queue(vec![RawFragment::new(0, 0, words)]);
        let mut processor = DataProcessor::new();
        let report = run(&mut processor, &raw, &map).unwrap();

        assert_eq!(report.skipped, 2);
        let stats = processor.stats();
        assert_eq!(stats.orphan_records, 1);
        assert_eq!(stats.unknown_words, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_tot2_on_last_row_is_skipped() {
        let map = ChannelMap::with_channels(1).unwrap();
        let words = vec![encode_header(0, 0, 0), encode_record(0, 4, 336, 3, 3)];
        let raw = raw_queue(vec![RawFragment::new(0, 0, words)]);
        let mut processor = DataProcessor::new();
        let report = run(&mut processor, &raw, &map).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(processor.stats().hits, 1);
    }

    #[test]
    fn test_hit_disc_cnfg_shifts_tot() {
        let map = ChannelMap::with_channels(2).unwrap();
        let words = vec![
            encode_header(0, 0, 0),
            encode_record(0, 1, 1, 0, 14),
            encode_header(1, 0, 0),
            encode_record(1, 1, 1, 0, 14),
        ];
        let raw = raw_queue(vec![RawFragment::new(0, 0, words)]);
        let mut processor = DataProcessor::new().with_hit_disc_cnfg(2);
        processor.set_hit_disc_cnfg(1, 0);
        run(&mut processor, &raw, &map).unwrap();

        let ch0 = map.queue(0).unwrap().try_pop().unwrap();
        assert_eq!(
            ch0.events[0].hits,
            vec![Hit { col: 1, row: 1, tot: 3 }, Hit { col: 1, row: 2, tot: 2 }]
        );
        // Small hit discarded with HitDiscCnfg 0
        let ch1 = map.queue(1).unwrap().try_pop().unwrap();
        assert_eq!(ch1.events[0].hits, vec![Hit { col: 1, row: 1, tot: 1 }]);
        assert_eq!(processor.stats().discarded_small_hits, 1);
        assert_eq!(processor.stats().hits, 3);
    }

    #[test]
    fn test_unmapped_channel_is_fatal() {
        let map = ChannelMap::with_channels(2).unwrap();
        let words = vec![encode_header(0, 0, 0), encode_header(7, 0, 0)];
        let raw = raw_queue(vec![RawFragment::new(0, 0, words)]);
        let mut processor = DataProcessor::new();
        let err = run(&mut processor, &raw, &map).unwrap_err();
        assert!(matches!(err, DaqError::UnknownChannel(7)));
        // Queues are still closed on the error path
        assert!(map.queue(0).unwrap().is_closed());
        assert!(map.queue(0).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_hit_disc_cnfg_fails_init() {
        let map = ChannelMap::with_channels(1).unwrap();
        let raw = raw_queue(Vec::new());
        let mut processor = DataProcessor::new().with_hit_disc_cnfg(3);
        let err = run(&mut processor, &raw, &map).unwrap_err();
        assert!(matches!(err, DaqError::Init { stage: "data_processor", .. }));
    }
}
