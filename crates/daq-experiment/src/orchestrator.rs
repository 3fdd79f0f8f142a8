//! ScanOrchestrator - drives one scan through its phases.
//!
//! The orchestrator owns the hardware paths for the duration of a scan and
//! runs the phases strictly in order:
//!
//! ```text
//! init ─▶ configure ─▶ pre-scan ─▶ run ─▶ post-scan ─▶ disable
//!                                   │
//!                          readout thread ─▶ raw queue
//!
//! disable ─▶ processing (raw queue ─▶ per-channel event queues)
//!         ─▶ analysis (one thread per channel: histogram ─▶ analyze)
//!         ─▶ finished
//! ```
//!
//! # Failure semantics
//!
//! - Invalid settings (channel map not covering the analysis channels, empty
//!   masks) are rejected before any hardware is touched.
//! - A failure in init, configure or pre-scan skips the remaining phases.
//! - A failure during run (hardware fault, run timeout, cancellation) still
//!   executes post-scan and the disable.
//! - Once hardware init has started, transmit and receive are disabled exactly
//!   once on every path.
//! - Queues still holding items at the end of a scan are discarded and the
//!   counts logged.
//!
//! # Usage
//!
//! ```rust,ignore
//! let board = MockBoard::builder().channels([0, 1]).build();
//! let hardware = Hardware::new(board.tx(), board.rx());
//! let mut orchestrator =
//!     ScanOrchestrator::new(OrchestratorConfig::default(), hardware, TomlConfigLoader);
//! let mut scan = TotScan::new(16_000.0, 32, 50);
//! let report = orchestrator.execute(&mut scan)?;
//! println!("{}", report.timings);
//! ```

use crate::front_end::FrontEnd;
use crate::phase::{PhaseTracker, ScanPhase};
use crate::readout::{ReadoutControl, ReadoutStage};
use crate::scans::{wait_for_cmd_drain, RunContext, ScanBase};
use daq_core::data::{EventBatch, RawFragment};
use daq_core::driver::{
    channel_mask, mask_channels, ChannelMask, ConfigLoader, FrontEndCommand, RxCore, TxCore,
    MASK_WIDTH,
};
use daq_core::error::{AppResult, DaqError};
use daq_core::handoff::HandoffQueue;
use daq_core::limits::{CMD_DRAIN_TIMEOUT, DEFAULT_CHANNEL_COUNT, RUN_TIMEOUT, RX_SETTLE_TIME};
use daq_core::pipeline::{run_stage, StageReport};
use daq_core::router::{ChannelId, ChannelMap};
use daq_processing::{
    AnalysisPlugin, AnalysisResult, Analyzer, DataProcessor, DecodeStats, Histogram,
    HistogramPlugin, Histogrammer, ScanParams,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Settings of one orchestrated scan.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Size of the per-channel event map (channels `0..channel_count`)
    pub channel_count: usize,
    /// Channels that get a histogram/analysis thread
    pub analysis_channels: Vec<ChannelId>,
    /// Channels the transmit path configures and drives
    pub tx_mask: ChannelMask,
    /// Channels the receive path accepts data from
    pub rx_mask: ChannelMask,
    /// Wait for the command stream to drain
    pub cmd_drain_timeout: Duration,
    /// Upper bound of the run phase
    pub run_timeout: Duration,
    /// Front-end register set; defaults apply when unset
    pub front_end_config: Option<PathBuf>,
    /// Overrides the loaded HitDiscCnfg of every front end
    pub hit_disc_cnfg: Option<u8>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            channel_count: DEFAULT_CHANNEL_COUNT,
            analysis_channels: vec![0],
            tx_mask: 0x1,
            rx_mask: 0x1,
            cmd_drain_timeout: CMD_DRAIN_TIMEOUT,
            run_timeout: RUN_TIMEOUT,
            front_end_config: None,
            hit_disc_cnfg: None,
        }
    }
}

impl OrchestratorConfig {
    /// Reject settings the scan could not run with.
    pub fn validate(&self) -> AppResult<()> {
        if self.channel_count == 0 {
            return Err(DaqError::Configuration(
                "channel_count must be at least 1".into(),
            ));
        }
        if self.analysis_channels.is_empty() {
            return Err(DaqError::Configuration(
                "at least one analysis channel is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        for &channel in &self.analysis_channels {
            if !seen.insert(channel) {
                return Err(DaqError::DuplicateChannel(channel));
            }
            if channel as usize >= self.channel_count {
                return Err(DaqError::Configuration(format!(
                    "analysis channel {} is not covered by the {}-channel map",
                    channel, self.channel_count
                )));
            }
        }
        if self.tx_mask == 0 || self.rx_mask == 0 {
            return Err(DaqError::Configuration(
                "tx_mask and rx_mask must enable at least one channel".into(),
            ));
        }
        let mapped = channel_mask(0..MASK_WIDTH.min(self.channel_count as ChannelId));
        for (name, mask) in [("tx_mask", self.tx_mask), ("rx_mask", self.rx_mask)] {
            if mask & !mapped != 0 {
                return Err(DaqError::Configuration(format!(
                    "{} {:#x} enables channels outside the {}-channel map",
                    name, mask, self.channel_count
                )));
            }
        }
        if self.cmd_drain_timeout.is_zero() || self.run_timeout.is_zero() {
            return Err(DaqError::Configuration(
                "cmd_drain_timeout and run_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Transmit and receive paths of the readout board.
#[derive(Clone)]
pub struct Hardware {
    /// Command path
    pub tx: Arc<dyn TxCore>,
    /// Data path
    pub rx: Arc<dyn RxCore>,
}

impl Hardware {
    /// Pair a transmit and a receive core.
    pub fn new(tx: Arc<dyn TxCore>, rx: Arc<dyn RxCore>) -> Self {
        Self { tx, rx }
    }
}

impl std::fmt::Debug for Hardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hardware").finish_non_exhaustive()
    }
}

// =============================================================================
// Scan Context
// =============================================================================

/// Queues of one scan run.
///
/// Created before the hardware is touched and torn down after the last phase;
/// the stages only ever borrow from it.
pub struct ScanContext {
    raw: HandoffQueue<RawFragment>,
    events: ChannelMap<EventBatch>,
    histograms: ChannelMap<Histogram>,
    results: ChannelMap<AnalysisResult>,
    analysis_channels: Vec<ChannelId>,
}

impl ScanContext {
    /// Build the queues for `config`. Fails with [`DaqError::Configuration`]
    /// if the event map does not cover every analysis channel.
    pub fn new(config: &OrchestratorConfig) -> AppResult<Self> {
        let events = ChannelMap::with_channels(config.channel_count)?;
        if let Some(missing) = config
            .analysis_channels
            .iter()
            .find(|channel| !events.contains(**channel))
        {
            return Err(DaqError::Configuration(format!(
                "analysis channel {} has no event queue",
                missing
            )));
        }
        let ids = config.analysis_channels.iter().copied();
        Ok(Self {
            raw: HandoffQueue::with_name("raw"),
            events,
            histograms: ChannelMap::from_ids(ids.clone()),
            results: ChannelMap::from_ids(ids),
            analysis_channels: config.analysis_channels.clone(),
        })
    }

    /// Queue between readout and data processor.
    pub fn raw(&self) -> &HandoffQueue<RawFragment> {
        &self.raw
    }

    /// Per-channel event queues.
    pub fn events(&self) -> &ChannelMap<EventBatch> {
        &self.events
    }

    /// Channels with a histogram/analysis thread.
    pub fn analysis_channels(&self) -> &[ChannelId] {
        &self.analysis_channels
    }

    /// Discard everything still queued. Returns the number of items dropped.
    pub fn teardown(&self) -> usize {
        let mut total = self.raw.discard();
        if total > 0 {
            warn!(queue = "raw", discarded = total, "Discarded unprocessed fragments");
        }
        let maps = [
            ("events", self.events.discard_all()),
            ("histograms", self.histograms.discard_all()),
            ("results", self.results.discard_all()),
        ];
        for (queue, discarded) in maps {
            for (channel, count) in discarded {
                info!(queue, channel, discarded = count, "Discarded queued items");
                total += count;
            }
        }
        debug!(discarded = total, "Scan queues torn down");
        total
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Wall time per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Scan and stage setup
    pub init: Duration,
    /// Register writes to every front end
    pub configure: Duration,
    /// Pre-scan, run and post-scan
    pub scan: Duration,
    /// Data processor after readout stopped
    pub processing: Duration,
    /// Histogram and analysis threads
    pub analysis: Duration,
    /// Whole scan
    pub total: Duration,
}

impl PhaseTimings {
    /// Label and duration of every phase, total last.
    pub fn rows(&self) -> [(&'static str, Duration); 6] {
        [
            ("Init", self.init),
            ("Configure", self.configure),
            ("Scan", self.scan),
            ("Processing", self.processing),
            ("Analysis", self.analysis),
            ("Total", self.total),
        ]
    }

    /// One `info` event per phase.
    pub fn log(&self) {
        for (phase, elapsed) in self.rows() {
            info!(phase, elapsed_ms = elapsed.as_millis() as u64, "Timing");
        }
    }
}

impl std::fmt::Display for PhaseTimings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (phase, elapsed) in self.rows() {
            if phase == "Total" {
                writeln!(f, "{}", "=".repeat(23))?;
            }
            writeln!(f, "{:<12} {:>7} ms", phase, elapsed.as_millis())?;
        }
        Ok(())
    }
}

/// Outcome of one channel's histogram and analysis stages.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOutcome {
    /// Analysis channel
    pub channel: ChannelId,
    /// Histogrammer counts
    pub histogram: StageReport,
    /// Analyzer counts
    pub analysis: StageReport,
    /// Analysis output in production order
    pub results: Vec<AnalysisResult>,
}

/// Everything a finished scan produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    /// Scan name
    pub scan: &'static str,
    /// Readout loop counts
    pub readout: StageReport,
    /// Data processor counts
    pub processing: StageReport,
    /// Word-level decoding counters
    pub decode: DecodeStats,
    /// One entry per analysis channel, in configuration order
    pub channels: Vec<ChannelOutcome>,
    /// Items dropped at teardown
    pub discarded: usize,
    /// Wall time per phase
    pub timings: PhaseTimings,
}

impl ScanReport {
    fn new(scan: &'static str) -> Self {
        Self {
            scan,
            readout: StageReport::default(),
            processing: StageReport::default(),
            decode: DecodeStats::default(),
            channels: Vec::new(),
            discarded: 0,
            timings: PhaseTimings::default(),
        }
    }

    /// Outcome of `channel`, if it was analysed.
    pub fn channel(&self, channel: ChannelId) -> Option<&ChannelOutcome> {
        self.channels.iter().find(|c| c.channel == channel)
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives a scan through init, configure, run, processing and analysis.
pub struct ScanOrchestrator<L> {
    config: OrchestratorConfig,
    hardware: Hardware,
    loader: L,
    cancel: CancellationToken,
    phase: PhaseTracker,
    /// Hardware init started and disable not yet issued
    hardware_active: bool,
    front_ends: Vec<FrontEnd>,
}

impl<L> ScanOrchestrator<L>
where
    L: ConfigLoader,
    DaqError: From<L::Error>,
{
    /// Orchestrator for `hardware`, with register sets read through `loader`.
    pub fn new(config: OrchestratorConfig, hardware: Hardware, loader: L) -> Self {
        Self {
            config,
            hardware,
            loader,
            cancel: CancellationToken::new(),
            phase: PhaseTracker::new(),
            hardware_active: false,
            front_ends: Vec::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts the running scan when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Settings in use.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Phase reached by the current or last scan.
    pub fn phase(&self) -> ScanPhase {
        self.phase.phase()
    }

    /// Front ends configured by the last scan.
    pub fn front_ends(&self) -> &[FrontEnd] {
        &self.front_ends
    }

    /// Run `scan` through every phase.
    ///
    /// An orchestrator executes a single scan; a second call fails with
    /// [`DaqError::PhaseOrder`].
    pub fn execute(&mut self, scan: &mut dyn ScanBase) -> AppResult<ScanReport> {
        if self.phase.phase() != ScanPhase::Uninitialized {
            return Err(DaqError::PhaseOrder {
                from: self.phase.phase().as_str(),
                to: ScanPhase::Initialized.as_str(),
            });
        }

        self.config.validate()?;
        let ctx = ScanContext::new(&self.config)?;

        let span = info_span!("scan", scan = scan.name());
        let _enter = span.enter();
        info!(
            channels = self.config.channel_count,
            analysis_channels = ?self.config.analysis_channels,
            tx_mask = format_args!("{:#x}", self.config.tx_mask),
            rx_mask = format_args!("{:#x}", self.config.rx_mask),
            "Starting scan"
        );

        let started = Instant::now();
        let mut report = ScanReport::new(scan.name());
        let result = self.run_phases(scan, &ctx, &mut report);

        if let Err(e) = &result {
            error!(after = %self.phase.phase(), error = %e, "Scan failed");
            self.phase.abort();
        }
        // Only reached with hardware still active when a phase failed
        if let Err(e) = self.disable_hardware() {
            warn!(error = %e, "Safe-disable after failure also failed");
        }

        report.discarded = ctx.teardown();
        report.timings.total = started.elapsed();
        report.timings.log();

        result.map(|()| {
            info!(
                fragments = report.readout.produced,
                events = report.decode.events,
                hits = report.decode.hits,
                small_hits_dropped = report.decode.discarded_small_hits,
                "Scan finished"
            );
            report
        })
    }

    fn run_phases(
        &mut self,
        scan: &mut dyn ScanBase,
        ctx: &ScanContext,
        report: &mut ScanReport,
    ) -> AppResult<()> {
        let t = Instant::now();
        self.init_phase(scan)?;
        self.phase.advance(ScanPhase::Initialized)?;
        report.timings.init = t.elapsed();

        let t = Instant::now();
        self.configure_phase()?;
        self.phase.advance(ScanPhase::Configured)?;
        report.timings.configure = t.elapsed();

        let t = Instant::now();
        info!(phase = "pre_scan", "Pre scan");
        scan.pre_scan(&*self.hardware.tx)?;
        wait_for_cmd_drain(&*self.hardware.tx, self.config.cmd_drain_timeout, &self.cancel)?;
        self.phase.advance(ScanPhase::PreScanned)?;

        self.phase.advance(ScanPhase::Running)?;
        let run_result = self.run_phase(scan, ctx);
        let post_result = self.post_scan_phase(scan);
        self.phase.advance(ScanPhase::PostScanned)?;
        let disable_result = self.disable_hardware();
        report.timings.scan = t.elapsed();

        report.readout = run_result?;
        post_result.and(disable_result)?;
        self.phase.advance(ScanPhase::Disabled)?;
        info!(fragments = ctx.raw().len(), "Collected raw data fragments");

        let t = Instant::now();
        self.processing_phase(ctx, report)?;
        self.phase.advance(ScanPhase::Processed)?;
        report.timings.processing = t.elapsed();

        let t = Instant::now();
        report.channels = self.analysis_phase(scan, ctx)?;
        self.phase.advance(ScanPhase::Analyzed)?;
        report.timings.analysis = t.elapsed();

        self.phase.advance(ScanPhase::Finished)
    }

    fn init_phase(&mut self, scan: &mut dyn ScanBase) -> AppResult<()> {
        info!(phase = "init", "Init scan");
        scan.init()?;

        self.hardware_active = true;
        let tx = &*self.hardware.tx;
        tx.enable(self.config.tx_mask)?;
        tx.send(FrontEndCommand::Reset)?;
        Ok(())
    }

    fn configure_phase(&mut self) -> AppResult<()> {
        info!(phase = "configure", "Configure front ends");
        let path = self.config.front_end_config.as_deref();
        let front_ends = mask_channels(self.config.tx_mask)
            .map(|channel| -> AppResult<FrontEnd> {
                let mut fe = FrontEnd::load(channel, &self.loader, path)?;
                if let Some(hit_disc_cnfg) = self.config.hit_disc_cnfg {
                    fe.config_mut().hit_disc_cnfg = hit_disc_cnfg;
                }
                Ok(fe)
            })
            .collect::<AppResult<Vec<_>>>()?;

        let tx = &*self.hardware.tx;
        let mut commands = 0;
        for fe in &front_ends {
            commands += fe.push(tx)?;
        }
        self.front_ends = front_ends;
        tx.enable(self.config.tx_mask)?;
        wait_for_cmd_drain(tx, self.config.cmd_drain_timeout, &self.cancel)?;

        self.hardware.rx.enable(self.config.rx_mask)?;
        thread::sleep(RX_SETTLE_TIME);
        info!(
            front_ends = self.front_ends.len(),
            commands,
            "Front ends configured"
        );
        Ok(())
    }

    /// Scan loop on this thread, readout stage on a scoped thread.
    fn run_phase(&self, scan: &mut dyn ScanBase, ctx: &ScanContext) -> AppResult<StageReport> {
        info!(phase = "run", timeout_ms = self.config.run_timeout.as_millis() as u64, "Scan");
        let control = ReadoutControl::new();
        let tx: &dyn TxCore = &*self.hardware.tx;
        let rx: &dyn RxCore = &*self.hardware.rx;
        let cancel = &self.cancel;

        let (scan_result, readout_result) = thread::scope(|s| {
            let readout = s.spawn(|| {
                let mut stage = ReadoutStage::new();
                run_stage(&mut stage, (rx, &control), ctx.raw(), cancel)
            });

            let run_ctx = RunContext::new(
                tx,
                &control,
                cancel,
                self.config.run_timeout,
                self.config.cmd_drain_timeout,
            );
            let scan_result = scan.run(&run_ctx);
            control.stop();

            let readout_result = readout.join().unwrap_or_else(|_| {
                Err(DaqError::Processing("readout thread panicked".into()))
            });
            (scan_result, readout_result)
        });

        match (scan_result, readout_result) {
            (Ok(()), Ok(report)) => Ok(report),
            (Err(e), Ok(_)) | (Ok(()), Err(e)) => Err(e),
            // A dead readout shows up in the scan loop as a failed sync
            (Err(scan_err), Err(readout_err)) => {
                warn!(error = %scan_err, "Scan loop stopped");
                Err(readout_err)
            }
        }
    }

    fn post_scan_phase(&self, scan: &mut dyn ScanBase) -> AppResult<()> {
        info!(phase = "post_scan", "Post scan");
        let tx = &*self.hardware.tx;
        scan.post_scan(tx)?;
        // Leaving run mode must not be cut short by a cancelled run
        wait_for_cmd_drain(tx, self.config.cmd_drain_timeout, &CancellationToken::new())
    }

    /// Disable transmit and receive if hardware init has started and they
    /// were not disabled yet.
    fn disable_hardware(&mut self) -> AppResult<()> {
        if !self.hardware_active {
            return Ok(());
        }
        self.hardware_active = false;
        info!(phase = "disable", "Disabling tx/rx");
        let tx_result = self.hardware.tx.disable();
        let rx_result = self.hardware.rx.disable();
        match (tx_result, rx_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e.into()),
            (Err(e), Err(rx_err)) => {
                warn!(error = %rx_err, "Rx disable also failed");
                Err(e.into())
            }
        }
    }

    fn processing_phase(&self, ctx: &ScanContext, report: &mut ScanReport) -> AppResult<()> {
        info!(phase = "processing", fragments = ctx.raw().len(), "Processing data");
        let mut processor = DataProcessor::new();
        for fe in &self.front_ends {
            processor.set_hit_disc_cnfg(fe.channel(), fe.config().hit_disc_cnfg);
        }
        report.processing =
            run_stage(&mut processor, ctx.raw(), ctx.events().router(), &self.cancel)?;
        report.decode = processor.stats();
        Ok(())
    }

    /// One thread per analysis channel, joined as a group.
    fn analysis_phase(
        &self,
        scan: &dyn ScanBase,
        ctx: &ScanContext,
    ) -> AppResult<Vec<ChannelOutcome>> {
        info!(
            phase = "analysis",
            channels = ?ctx.analysis_channels(),
            "Analyzing data"
        );
        let params = scan.params();
        let histogram_plugins = scan.histogram_plugins();
        let analysis_plugins = scan.analysis_plugins();
        let cancel = &self.cancel;

        let joined: Vec<(ChannelId, AppResult<ChannelOutcome>)> = thread::scope(|s| {
            let handles: Vec<_> = ctx
                .analysis_channels()
                .iter()
                .map(|&channel| {
                    let histogram_plugins = histogram_plugins.clone();
                    let analysis_plugins = analysis_plugins.clone();
                    let handle = s.spawn(move || {
                        analyse_channel(
                            ctx,
                            channel,
                            params,
                            histogram_plugins,
                            analysis_plugins,
                            cancel,
                        )
                    });
                    (channel, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(channel, handle)| {
                    let outcome = handle.join().unwrap_or_else(|_| {
                        Err(DaqError::Processing(format!(
                            "analysis thread of channel {} panicked",
                            channel
                        )))
                    });
                    (channel, outcome)
                })
                .collect()
        });

        let mut outcomes = Vec::with_capacity(joined.len());
        let mut failures = Vec::new();
        for (channel, outcome) in joined {
            match outcome {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(channel, error = %e, "Channel analysis failed");
                    failures.push((channel, e));
                }
            }
        }
        if !failures.is_empty() {
            return Err(DaqError::ChannelFailures(failures));
        }
        Ok(outcomes)
    }
}

/// Histogram then analyze the events of one channel.
fn analyse_channel(
    ctx: &ScanContext,
    channel: ChannelId,
    params: ScanParams,
    histogram_plugins: Vec<HistogramPlugin>,
    analysis_plugins: Vec<AnalysisPlugin>,
    cancel: &CancellationToken,
) -> AppResult<ChannelOutcome> {
    let span = info_span!("analysis", channel);
    let _enter = span.enter();

    let events = ctx.events.queue(channel)?;
    let histograms = ctx.histograms.queue(channel)?;
    let results = ctx.results.queue(channel)?;

    let mut histogrammer = Histogrammer::new(channel, histogram_plugins);
    let histogram = run_stage(&mut histogrammer, events, histograms, cancel)?;

    let mut analyzer = Analyzer::new(channel, Some(params), analysis_plugins);
    let analysis = run_stage(&mut analyzer, histograms, results, cancel)?;

    Ok(ChannelOutcome {
        channel,
        histogram,
        analysis,
        results: results.drain(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn test_uncovered_analysis_channel_rejected() {
        let config = OrchestratorConfig {
            channel_count: 4,
            analysis_channels: vec![0, 4],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_duplicate_analysis_channel_rejected() {
        let config = OrchestratorConfig {
            analysis_channels: vec![1, 1],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DaqError::DuplicateChannel(1))
        ));
    }

    #[test]
    fn test_rx_mask_outside_map_rejected() {
        let config = OrchestratorConfig {
            channel_count: 2,
            rx_mask: 0b100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tx_mask_outside_map_rejected() {
        let config = OrchestratorConfig {
            channel_count: 2,
            tx_mask: 0b101,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DaqError::Configuration(ref msg) if msg.starts_with("tx_mask 0x5")));

        let config = OrchestratorConfig {
            channel_count: 3,
            tx_mask: 0b101,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_context_queues() {
        let config = OrchestratorConfig {
            channel_count: 16,
            analysis_channels: vec![0, 3],
            ..Default::default()
        };
        let ctx = ScanContext::new(&config).unwrap();
        assert_eq!(ctx.events().len(), 16);
        assert_eq!(ctx.histograms.channels().collect::<Vec<_>>(), vec![0, 3]);

        ctx.raw().push(RawFragment::new(0, 0, vec![1]));
        ctx.events().queue(5).unwrap().push(EventBatch::new(5, 0));
        assert_eq!(ctx.teardown(), 2);
        assert!(ctx.raw().is_empty());
    }

    #[test]
    fn test_timing_table() {
        let timings = PhaseTimings {
            init: Duration::from_millis(3),
            total: Duration::from_millis(42),
            ..Default::default()
        };
        let table = timings.to_string();
        assert!(table.contains("Init"));
        assert!(table.lines().last().unwrap().contains("42 ms"));
    }
}
