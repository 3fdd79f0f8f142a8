//! Scan definitions.
//!
//! A scan drives the front ends through its loop (mask stages, injections or
//! triggers) between `pre_scan` and `post_scan`. It also chooses the histogram
//! and analysis plugins its data needs, and hands its loop parameters to the
//! analysis stage.
//!
//! # Available scans
//!
//! - [`TotScan`] - charge injection at a target charge, ToT per pixel
//! - [`DigitalScan`] - digital injection, occupancy per pixel

use crate::readout::ReadoutControl;
use daq_core::driver::{FrontEndCommand, Register, TxCore};
use daq_core::error::{AppResult, DaqError};
use daq_core::limits::CMD_DRAIN_POLL;
use daq_processing::{
    AnalysisPlugin, HistogramPlugin, OccupancyAnalysis, OccupancyMap, ScanParams, TotAnalysis,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Injected charge per PlsrDAC count, in electrons.
pub const ELECTRONS_PER_PLSR_DAC: f64 = 53.4;

/// Largest PlsrDAC setting (10-bit register).
pub const MAX_PLSR_DAC: u16 = 1023;

/// PlsrDAC setting closest to `charge` electrons.
pub fn charge_to_plsr_dac(charge: f64) -> u16 {
    let dac = (charge / ELECTRONS_PER_PLSR_DAC).round();
    dac.clamp(0.0, f64::from(MAX_PLSR_DAC)) as u16
}

/// Poll the transmit path until every queued command went out.
pub fn wait_for_cmd_drain(
    tx: &dyn TxCore,
    timeout: Duration,
    cancel: &CancellationToken,
) -> AppResult<()> {
    let start = Instant::now();
    while !tx.is_cmd_empty() {
        if cancel.is_cancelled() {
            return Err(DaqError::Cancelled);
        }
        if start.elapsed() > timeout {
            return Err(DaqError::CommandDrainTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        std::thread::sleep(CMD_DRAIN_POLL);
    }
    trace!(waited_us = start.elapsed().as_micros() as u64, "Command stream drained");
    Ok(())
}

/// What a scan may touch while it runs.
pub struct RunContext<'a> {
    tx: &'a dyn TxCore,
    readout: &'a ReadoutControl,
    cancel: &'a CancellationToken,
    started: Instant,
    run_timeout: Duration,
    cmd_drain_timeout: Duration,
}

impl<'a> RunContext<'a> {
    /// Context of a run phase starting now.
    pub fn new(
        tx: &'a dyn TxCore,
        readout: &'a ReadoutControl,
        cancel: &'a CancellationToken,
        run_timeout: Duration,
        cmd_drain_timeout: Duration,
    ) -> Self {
        Self {
            tx,
            readout,
            cancel,
            started: Instant::now(),
            run_timeout,
            cmd_drain_timeout,
        }
    }

    /// Transmit core of the board.
    pub fn tx(&self) -> &dyn TxCore {
        self.tx
    }

    /// Send one command, mapping driver failures to [`DaqError::HardwareFault`].
    pub fn send(&self, command: FrontEndCommand) -> AppResult<()> {
        self.tx.send(command)?;
        Ok(())
    }

    /// Fail on cancellation or once the run window is exhausted.
    pub fn check(&self) -> AppResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DaqError::Cancelled);
        }
        let elapsed = self.started.elapsed();
        if elapsed > self.run_timeout {
            return Err(DaqError::RunTimeout {
                elapsed_ms: elapsed.as_millis() as u64,
                limit_ms: self.run_timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    /// Start scan iteration `iteration`; fragments read from now on carry it.
    pub fn begin_iteration(&self, iteration: u32) -> AppResult<()> {
        self.check()?;
        self.readout.set_iteration(iteration);
        Ok(())
    }

    /// Wait until the commands of this iteration went out and their data
    /// reached the raw queue.
    pub fn end_iteration(&self) -> AppResult<()> {
        let remaining = self.run_timeout.saturating_sub(self.started.elapsed());
        wait_for_cmd_drain(self.tx, self.cmd_drain_timeout.min(remaining), self.cancel)
            .map_err(|e| match e {
                // Drain cut short by the run window
                DaqError::CommandDrainTimeout { .. } if remaining < self.cmd_drain_timeout => {
                    DaqError::RunTimeout {
                        elapsed_ms: self.started.elapsed().as_millis() as u64,
                        limit_ms: self.run_timeout.as_millis() as u64,
                    }
                }
                other => other,
            })?;
        self.readout
            .sync(self.cancel, self.started, self.run_timeout)
    }
}

/// Lifecycle of a scan.
pub trait ScanBase: Send {
    /// Scan name for logs and reports.
    fn name(&self) -> &'static str;

    /// Validate the scan settings. Touches no hardware.
    fn init(&mut self) -> AppResult<()>;

    /// Write scan registers and enter run mode.
    fn pre_scan(&mut self, tx: &dyn TxCore) -> AppResult<()>;

    /// The scan loop.
    fn run(&mut self, ctx: &RunContext<'_>) -> AppResult<()>;

    /// Leave run mode.
    fn post_scan(&mut self, tx: &dyn TxCore) -> AppResult<()>;

    /// Loop parameters for the analysis stage.
    fn params(&self) -> ScanParams;

    /// Histograms filled on every analysis channel.
    fn histogram_plugins(&self) -> Vec<HistogramPlugin>;

    /// Analyses run on every analysis channel.
    fn analysis_plugins(&self) -> Vec<AnalysisPlugin>;
}

/// Scan selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    /// Charge injection with ToT histograms and mean ToT analysis
    #[default]
    Tot,
    /// Digital injection with occupancy analysis
    Digital,
}

impl std::fmt::Display for ScanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanKind::Tot => write!(f, "tot"),
            ScanKind::Digital => write!(f, "digital"),
        }
    }
}

/// Loop settings of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Which scan to run
    pub kind: ScanKind,
    /// Mask stages, each enabling a disjoint pixel subset
    pub mask_stages: u32,
    /// Injections (or triggers) per mask stage
    pub injections: u32,
    /// Injected charge in electrons, ToT scans only
    pub target_charge: f64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            kind: ScanKind::Tot,
            mask_stages: 32,
            injections: 50,
            target_charge: 16_000.0,
        }
    }
}

/// Build the scan named by `settings`.
pub fn build_scan(settings: &ScanSettings) -> Box<dyn ScanBase> {
    match settings.kind {
        ScanKind::Tot => Box::new(TotScan::new(
            settings.target_charge,
            settings.mask_stages,
            settings.injections,
        )),
        ScanKind::Digital => Box::new(DigitalScan::new(settings.mask_stages, settings.injections)),
    }
}

fn check_loop(scan: &'static str, mask_stages: u32, injections: u32) -> AppResult<()> {
    if mask_stages == 0 {
        return Err(DaqError::init(scan, "mask_stages must be at least 1"));
    }
    if injections == 0 {
        return Err(DaqError::init(scan, "injections must be at least 1"));
    }
    Ok(())
}

/// Mask-staged loop shared by the scans: one iteration per stage, `pulse`
/// sent once per stage.
fn mask_stage_loop(
    ctx: &RunContext<'_>,
    mask_stages: u32,
    pulse: FrontEndCommand,
) -> AppResult<()> {
    for stage in 0..mask_stages {
        ctx.begin_iteration(stage)?;
        ctx.send(FrontEndCommand::SetMaskStage {
            stage,
            total: mask_stages,
        })?;
        ctx.send(pulse.clone())?;
        ctx.end_iteration()?;
        trace!(stage, "Mask stage done");
    }
    Ok(())
}

/// Charge-injection ToT scan.
#[derive(Debug, Clone)]
pub struct TotScan {
    target_charge: f64,
    mask_stages: u32,
    injections: u32,
    plsr_dac: u16,
}

impl TotScan {
    /// ToT scan injecting `target_charge` electrons.
    pub fn new(target_charge: f64, mask_stages: u32, injections: u32) -> Self {
        Self {
            target_charge,
            mask_stages,
            injections,
            plsr_dac: charge_to_plsr_dac(target_charge),
        }
    }

    /// Pulser setting that injects the target charge.
    pub fn plsr_dac(&self) -> u16 {
        self.plsr_dac
    }
}

impl ScanBase for TotScan {
    fn name(&self) -> &'static str {
        "tot_scan"
    }

    fn init(&mut self) -> AppResult<()> {
        check_loop(self.name(), self.mask_stages, self.injections)?;
        let max_charge = f64::from(MAX_PLSR_DAC) * ELECTRONS_PER_PLSR_DAC;
        if !(self.target_charge > 0.0 && self.target_charge <= max_charge) {
            return Err(DaqError::init(
                self.name(),
                format!(
                    "target charge {} e outside (0, {}] e",
                    self.target_charge, max_charge
                ),
            ));
        }
        self.plsr_dac = charge_to_plsr_dac(self.target_charge);
        debug!(
            target_charge = self.target_charge,
            plsr_dac = self.plsr_dac,
            "ToT scan initialized"
        );
        Ok(())
    }

    fn pre_scan(&mut self, tx: &dyn TxCore) -> AppResult<()> {
        tx.send(FrontEndCommand::WriteRegister {
            register: Register::PlsrDac,
            value: self.plsr_dac,
        })?;
        tx.send(FrontEndCommand::WriteRegister {
            register: Register::TrigCount,
            value: 1,
        })?;
        tx.send(FrontEndCommand::RunMode(true))?;
        Ok(())
    }

    fn run(&mut self, ctx: &RunContext<'_>) -> AppResult<()> {
        mask_stage_loop(
            ctx,
            self.mask_stages,
            FrontEndCommand::Inject {
                count: self.injections,
            },
        )
    }

    fn post_scan(&mut self, tx: &dyn TxCore) -> AppResult<()> {
        tx.send(FrontEndCommand::RunMode(false))?;
        Ok(())
    }

    fn params(&self) -> ScanParams {
        ScanParams {
            injections: self.injections,
            mask_stages: self.mask_stages,
        }
    }

    fn histogram_plugins(&self) -> Vec<HistogramPlugin> {
        HistogramPlugin::tot_set()
    }

    fn analysis_plugins(&self) -> Vec<AnalysisPlugin> {
        vec![
            TotAnalysis::default().into(),
            OccupancyAnalysis::default().into(),
        ]
    }
}

/// Digital-injection occupancy scan.
#[derive(Debug, Clone)]
pub struct DigitalScan {
    mask_stages: u32,
    triggers: u32,
}

impl DigitalScan {
    /// Digital scan with `triggers` per mask stage.
    pub fn new(mask_stages: u32, triggers: u32) -> Self {
        Self {
            mask_stages,
            triggers,
        }
    }
}

impl ScanBase for DigitalScan {
    fn name(&self) -> &'static str {
        "digital_scan"
    }

    fn init(&mut self) -> AppResult<()> {
        check_loop(self.name(), self.mask_stages, self.triggers)
    }

    fn pre_scan(&mut self, tx: &dyn TxCore) -> AppResult<()> {
        tx.send(FrontEndCommand::WriteRegister {
            register: Register::TrigCount,
            value: 1,
        })?;
        tx.send(FrontEndCommand::RunMode(true))?;
        Ok(())
    }

    fn run(&mut self, ctx: &RunContext<'_>) -> AppResult<()> {
        mask_stage_loop(
            ctx,
            self.mask_stages,
            FrontEndCommand::Trigger {
                count: self.triggers,
            },
        )
    }

    fn post_scan(&mut self, tx: &dyn TxCore) -> AppResult<()> {
        tx.send(FrontEndCommand::RunMode(false))?;
        Ok(())
    }

    fn params(&self) -> ScanParams {
        ScanParams {
            injections: self.triggers,
            mask_stages: self.mask_stages,
        }
    }

    fn histogram_plugins(&self) -> Vec<HistogramPlugin> {
        vec![OccupancyMap::default().into()]
    }

    fn analysis_plugins(&self) -> Vec<AnalysisPlugin> {
        vec![OccupancyAnalysis::default().into()]
    }
}
