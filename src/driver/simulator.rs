//! LH-019: Instruction replay against a device state.
//!
//! The simulator walks the terminal instruction list over a copy of the
//! device state and reports anything physically impossible. It never fails
//! outright; the caller decides whether error diagnostics block the run.

use crate::core::state::DeviceState;
use crate::core::types::{Liquid, Location, WellCoords, VOLUME_EPSILON};
use crate::instructions::Instruction;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Index of the offending instruction
    pub index: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at #{}: {}", self.severity, self.index, self.message)
    }
}

/// Diagnostics plus the state the replay ended in.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub diagnostics: Vec<Diagnostic>,
    pub end_state: DeviceState,
}

impl SimulationReport {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }
}

/// Physical validation of an instruction list.
pub trait Simulator {
    fn simulate(&self, instructions: &[Instruction], start: &DeviceState) -> SimulationReport;
}

/// Tracks well volumes, tips and the tipwaste.
#[derive(Debug, Clone)]
pub struct VolumeSimulator {
    /// Lost once per channel per tip load, on its first aspirate
    pub carry_volume: f64,
}

impl VolumeSimulator {
    pub fn new(carry_volume: f64) -> Self {
        Self { carry_volume }
    }
}

#[derive(Debug, Clone, Default)]
struct Channel {
    liquid: Option<Liquid>,
    charged: bool,
}

struct Replay {
    state: DeviceState,
    channels: Option<Vec<Channel>>,
    initialized: bool,
    finalized: bool,
    diagnostics: Vec<Diagnostic>,
    index: usize,
    carry: f64,
}

impl Replay {
    fn report(&mut self, severity: Severity, message: String) {
        self.diagnostics.push(Diagnostic {
            severity,
            index: self.index,
            message,
        });
    }

    fn tips_for(&mut self, wells: &[WellCoords], what: &str) -> bool {
        match &self.channels {
            None => {
                self.report(Severity::Error, format!("{} without tips", what));
                false
            }
            Some(ch) if ch.len() != wells.len() => {
                let n = ch.len();
                self.report(
                    Severity::Error,
                    format!("{} uses {} channel(s) but {} tip(s) are loaded", what, wells.len(), n),
                );
                false
            }
            Some(_) => true,
        }
    }

    fn step(&mut self, instruction: &Instruction) {
        if self.finalized {
            self.report(Severity::Error, "instruction after finalize".to_string());
        }
        if !self.initialized && !matches!(instruction, Instruction::Initialize) {
            self.report(Severity::Warning, "device used before initialize".to_string());
            self.initialized = true;
        }
        match instruction {
            Instruction::Initialize => {
                if self.initialized {
                    self.report(Severity::Warning, "initialized twice".to_string());
                }
                self.initialized = true;
            }
            Instruction::LoadTips { tipbox, tips } => self.load_tips(tipbox, tips),
            Instruction::Aspirate {
                plate,
                wells,
                volume,
                ..
            } => self.aspirate(plate, wells, *volume),
            Instruction::Dispense {
                plate,
                wells,
                volume,
                ..
            } => self.dispense(plate, wells, *volume),
            Instruction::UnloadTips { tipwaste, count } => self.unload_tips(tipwaste, *count),
            Instruction::Message { .. } => {}
            Instruction::Rename {
                plate,
                well,
                from,
                to,
            } => self.rename(plate, *well, from, to),
            Instruction::Finalize => {
                if self.channels.is_some() {
                    self.report(Severity::Error, "finalized with tips still loaded".to_string());
                }
                self.finalized = true;
            }
        }
    }

    /// Take tips the way the planner does and check the instruction names
    /// the same ones.
    fn load_tips(&mut self, tipbox: &str, tips: &[WellCoords]) {
        if self.channels.is_some() {
            self.report(Severity::Error, "tips loaded while tips are still on".to_string());
        }
        let n = tips.len() as u32;
        let problem = match self.state.tipboxes.iter_mut().find(|t| t.id == tipbox) {
            None => Some(format!("unknown tipbox '{}'", tipbox)),
            Some(tb) => {
                let left = tb.remaining();
                match tb.take(n, n > 1) {
                    None => Some(format!(
                        "tipbox '{}' has {} tip(s), {} requested",
                        tipbox, left, n
                    )),
                    Some(expected) if expected != tips => Some(format!(
                        "tips [{}] are not the next free tips of '{}' ([{}])",
                        join_wells(tips),
                        tipbox,
                        join_wells(&expected)
                    )),
                    Some(_) => None,
                }
            }
        };
        if let Some(msg) = problem {
            self.report(Severity::Error, msg);
        }
        self.channels = Some(vec![Channel::default(); n as usize]);
    }

    fn aspirate(&mut self, plate: &str, wells: &[WellCoords], volume: f64) {
        if !self.tips_for(wells, "aspirate") {
            return;
        }
        let carry = self.carry;
        for (i, c) in wells.iter().enumerate() {
            let loc = Location::new(plate, *c);
            let charge = self
                .channels
                .as_ref()
                .is_some_and(|ch| !ch[i].charged);
            let Some(well) = self.state.well_mut(&loc) else {
                self.report(Severity::Error, format!("aspirate from unknown well {}", loc));
                continue;
            };
            let available = well.volume() - well.residual_volume;
            if available + VOLUME_EPSILON < volume {
                let msg = format!(
                    "aspirate {:.2} ul from {} which has {:.2} ul above residual",
                    volume, loc, available
                );
                self.report(Severity::Error, msg);
                continue;
            }
            let Some(contents) = well.contents.as_mut() else {
                continue;
            };
            let take = (volume + if charge { carry } else { 0.0 }).min(contents.volume);
            contents.volume -= take;
            let taken = contents.sample(&contents.id, volume);
            if contents.volume <= VOLUME_EPSILON {
                well.contents = None;
            }
            if let Some(ch) = self.channels.as_mut() {
                ch[i].liquid = Some(taken);
                ch[i].charged = true;
            }
        }
    }

    fn dispense(&mut self, plate: &str, wells: &[WellCoords], volume: f64) {
        if !self.tips_for(wells, "dispense") {
            return;
        }
        for (i, c) in wells.iter().enumerate() {
            let loc = Location::new(plate, *c);
            let held = self
                .channels
                .as_mut()
                .and_then(|ch| ch[i].liquid.take());
            let Some(held) = held else {
                self.report(Severity::Error, format!("dispense into {} from an empty tip", loc));
                continue;
            };
            let Some(well) = self.state.well_mut(&loc) else {
                self.report(Severity::Error, format!("dispense into unknown well {}", loc));
                continue;
            };
            let after = well.volume() + volume;
            if after > well.max_volume + VOLUME_EPSILON {
                let msg = format!(
                    "dispense {:.2} ul into {} overflows it ({:.2} of {:.2} ul)",
                    volume, loc, after, well.max_volume
                );
                self.report(Severity::Error, msg);
                continue;
            }
            match well.contents.as_mut() {
                Some(existing) => {
                    existing.volume = after;
                    if !existing.name.split('+').any(|part| part == held.name) {
                        existing.name = format!("{}+{}", existing.name, held.name);
                    }
                }
                None => {
                    let mut fresh = Liquid::new(&format!("{}@{}", held.name, loc), &held.name, volume)
                        .with_type(&held.liquid_type);
                    fresh.location = Some(loc.clone());
                    well.contents = Some(fresh);
                }
            }
        }
    }

    fn unload_tips(&mut self, tipwaste: &str, count: u32) {
        match self.channels.take() {
            None => self.report(Severity::Warning, "unload with no tips loaded".to_string()),
            Some(ch) if ch.len() as u32 != count => self.report(
                Severity::Warning,
                format!("unloading {} tip(s) but {} are loaded", count, ch.len()),
            ),
            Some(_) => {}
        }
        match self.state.tipwastes.iter_mut().find(|w| w.id == tipwaste) {
            None => self.report(Severity::Error, format!("unknown tipwaste '{}'", tipwaste)),
            Some(w) => {
                w.contents += count;
                if w.contents > w.capacity {
                    let msg = format!("tipwaste '{}' over capacity ({} of {})", tipwaste, w.contents, w.capacity);
                    self.report(Severity::Error, msg);
                }
            }
        }
    }

    fn rename(&mut self, plate: &str, well: WellCoords, from: &str, to: &str) {
        let loc = Location::new(plate, well);
        let Some(contents) = self.state.well_mut(&loc).and_then(|w| w.contents.as_mut()) else {
            self.report(Severity::Error, format!("rename '{}' in empty well {}", from, loc));
            return;
        };
        // `from` is the planning-time id, not the replay id
        contents.id = to.to_string();
    }
}

fn join_wells(wells: &[WellCoords]) -> String {
    wells.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(",")
}

impl Simulator for VolumeSimulator {
    fn simulate(&self, instructions: &[Instruction], start: &DeviceState) -> SimulationReport {
        let mut replay = Replay {
            state: start.clone(),
            channels: None,
            initialized: false,
            finalized: false,
            diagnostics: Vec::new(),
            index: 0,
            carry: self.carry_volume,
        };
        for (i, instruction) in instructions.iter().enumerate() {
            replay.index = i;
            replay.step(instruction);
        }
        if !replay.finalized && !instructions.is_empty() {
            replay.index = instructions.len();
            replay.report(Severity::Warning, "run never finalized".to_string());
        }
        SimulationReport {
            diagnostics: replay.diagnostics,
            end_state: replay.state,
        }
    }
}
