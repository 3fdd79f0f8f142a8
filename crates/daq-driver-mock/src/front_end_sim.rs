//! Simulated FE-I4 front end attached to one readout channel.

use crate::common::MockRng;
use daq_core::driver::{FrontEndCommand, Register};
use daq_core::fei4::{code_from_tot, encode_header, encode_record, NO_HIT};
use daq_core::limits::{N_COL, N_ROW};
use daq_core::router::ChannelId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Response model of the simulated pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Mean ToT at the tuned injection charge
    pub target_tot: f64,
    /// Pixel-to-pixel ToT spread for analog injection
    pub tot_sigma: f64,
    /// Probability that an active pixel answers an injection
    pub occupancy: f64,
    /// PlsrDAC at which the mean ToT equals `target_tot`
    pub tuned_plsr_dac: u16,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            target_tot: 8.0,
            tot_sigma: 0.8,
            occupancy: 1.0,
            tuned_plsr_dac: 320,
        }
    }
}

/// Register state visible to tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSnapshot {
    /// Small-hit discriminator setting
    pub hit_disc_cnfg: u8,
    /// Injection amplitude
    pub plsr_dac: u16,
    /// Triggers per injection
    pub trig_count: u16,
    /// Trigger latency
    pub trig_lat: u16,
    /// True while in run mode
    pub run_mode: bool,
    /// Active mask stage
    pub mask_stage: u32,
    /// Number of mask stages
    pub mask_total: u32,
    /// Pixels disabled by the register set
    pub disabled_pixels: usize,
}

#[derive(Debug)]
pub(crate) struct FrontEndSim {
    channel: ChannelId,
    hit_disc_cnfg: u8,
    plsr_dac: u16,
    trig_count: u16,
    trig_lat: u16,
    disabled: HashSet<(u16, u16)>,
    mask_stage: u32,
    mask_total: u32,
    run_mode: bool,
    l1id: u16,
    bcid: u16,
}

impl FrontEndSim {
    pub(crate) fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            hit_disc_cnfg: 0,
            plsr_dac: 0,
            trig_count: 1,
            trig_lat: 0,
            disabled: HashSet::new(),
            mask_stage: 0,
            mask_total: 1,
            run_mode: false,
            l1id: 0,
            bcid: 0,
        }
    }

    pub(crate) fn snapshot(&self) -> RegisterSnapshot {
        RegisterSnapshot {
            hit_disc_cnfg: self.hit_disc_cnfg,
            plsr_dac: self.plsr_dac,
            trig_count: self.trig_count,
            trig_lat: self.trig_lat,
            run_mode: self.run_mode,
            mask_stage: self.mask_stage,
            mask_total: self.mask_total,
            disabled_pixels: self.disabled.len(),
        }
    }

    /// Apply a configuration command. Trigger commands are handled by
    /// [`respond`](Self::respond).
    pub(crate) fn apply(&mut self, command: &FrontEndCommand) {
        match command {
            FrontEndCommand::Reset => {
                *self = Self::new(self.channel);
            }
            FrontEndCommand::WriteRegister { register, value } => match register {
                Register::HitDiscCnfg => self.hit_disc_cnfg = (*value & 0x3) as u8,
                Register::PlsrDac => self.plsr_dac = *value,
                Register::TrigCount => self.trig_count = (*value).max(1),
                Register::TrigLat => self.trig_lat = *value,
            },
            FrontEndCommand::WritePixelEnable { disabled } => {
                self.disabled = disabled.iter().copied().collect();
            }
            FrontEndCommand::SetMaskStage { stage, total } => {
                self.mask_total = (*total).max(1);
                self.mask_stage = *stage % self.mask_total;
            }
            FrontEndCommand::RunMode(on) => self.run_mode = *on,
            FrontEndCommand::Trigger { .. } | FrontEndCommand::Inject { .. } => {}
        }
    }

    fn is_active(&self, col: u16, row: u16) -> bool {
        let index = (u32::from(col) - 1) * N_ROW as u32 + (u32::from(row) - 1);
        index % self.mask_total == self.mask_stage && !self.disabled.contains(&(col, row))
    }

    fn hit_tot(&self, analog: bool, sim: &SimulationConfig, rng: &MockRng) -> u16 {
        if !analog {
            return sim.target_tot.round().max(1.0) as u16;
        }
        let scale = f64::from(self.plsr_dac) / f64::from(sim.tuned_plsr_dac.max(1));
        let tot = rng.gaussian(sim.target_tot * scale, sim.tot_sigma).round();
        tot.clamp(0.0, f64::from(u16::MAX)) as u16
    }

    /// Raw words produced by one trigger. Empty outside run mode.
    pub(crate) fn respond(&mut self, analog: bool, sim: &SimulationConfig, rng: &MockRng) -> Vec<u32> {
        if !self.run_mode {
            return Vec::new();
        }
        self.l1id = (self.l1id + 1) & 0x1F;

        let mut hits: Vec<(u16, u16, u8)> = Vec::new();
        for col in 1..=N_COL as u16 {
            for row in 1..=N_ROW as u16 {
                if self.is_active(col, row) && rng.chance(sim.occupancy) {
                    let tot = self.hit_tot(analog, sim, rng);
                    hits.push((col, row, code_from_tot(tot, self.hit_disc_cnfg)));
                }
            }
        }

        let mut words = Vec::with_capacity(hits.len() + usize::from(self.trig_count));
        for bc in 0..self.trig_count {
            self.bcid = (self.bcid + 1) & 0x3FF;
            words.push(encode_header(self.channel, self.l1id, self.bcid));
            if bc != 0 {
                continue;
            }
            // Vertically adjacent hits share one record
            let mut i = 0;
            while i < hits.len() {
                let (col, row, tot1) = hits[i];
                let tot2 = match hits.get(i + 1) {
                    Some(&(c, r, t)) if c == col && r == row + 1 => {
                        i += 1;
                        t
                    }
                    _ => NO_HIT,
                };
                words.push(encode_record(self.channel, col, row, tot1, tot2));
                i += 1;
            }
        }
        words
    }
}
