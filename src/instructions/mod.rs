//! LH-012: Instruction expansion for planned blocks.
//!
//! Each handler takes one block of the instruction tree:
//! 1. `transfer` turns a stage of mixes into tip/aspirate/dispense steps
//! 2. `split` records remainders under their new ids
//! 3. `message` surfaces prompts to the operator

pub mod message;
pub mod split;
pub mod transfer;

use crate::core::deck;
use crate::core::error::{PlanError, PlanResult};
use crate::core::labware::Inventory;
use crate::core::state::{DeviceState, PlateIdMap};
use crate::core::types::{OperationSet, Policy, WellCoords};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A self-describing step the device driver executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    Initialize,
    LoadTips {
        tipbox: String,
        tips: Vec<WellCoords>,
    },
    /// One entry in `wells` per channel; a trough well repeats
    Aspirate {
        plate: String,
        wells: Vec<WellCoords>,
        volume: f64,
        liquid: String,
        liquid_type: String,
    },
    Dispense {
        plate: String,
        wells: Vec<WellCoords>,
        volume: f64,
        liquid: String,
        liquid_type: String,
    },
    UnloadTips {
        tipwaste: String,
        count: u32,
    },
    Message {
        message: String,
        wait_seconds: u64,
    },
    /// Bookkeeping: the liquid in a well continues under a new id
    Rename {
        plate: String,
        well: WellCoords,
        from: String,
        to: String,
    },
    Finalize,
}

impl Instruction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::LoadTips { .. } => "load_tips",
            Self::Aspirate { .. } => "aspirate",
            Self::Dispense { .. } => "dispense",
            Self::UnloadTips { .. } => "unload_tips",
            Self::Message { .. } => "message",
            Self::Rename { .. } => "rename",
            Self::Finalize => "finalize",
        }
    }

    /// Plate ids rewritten through `map`; unmapped ids are kept.
    pub fn remap(&self, map: &PlateIdMap) -> Instruction {
        let m = |id: &str| map.after(id).unwrap_or(id).to_string();
        match self {
            Self::Aspirate {
                plate,
                wells,
                volume,
                liquid,
                liquid_type,
            } => Self::Aspirate {
                plate: m(plate),
                wells: wells.clone(),
                volume: *volume,
                liquid: liquid.clone(),
                liquid_type: liquid_type.clone(),
            },
            Self::Dispense {
                plate,
                wells,
                volume,
                liquid,
                liquid_type,
            } => Self::Dispense {
                plate: m(plate),
                wells: wells.clone(),
                volume: *volume,
                liquid: liquid.clone(),
                liquid_type: liquid_type.clone(),
            },
            Self::Rename {
                plate,
                well,
                from,
                to,
            } => Self::Rename {
                plate: m(plate),
                well: *well,
                from: from.clone(),
                to: to.clone(),
            },
            other => other.clone(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wells = |ws: &[WellCoords]| {
            ws.iter()
                .map(|w| w.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        match self {
            Self::Initialize => write!(f, "INITIALIZE"),
            Self::LoadTips { tipbox, tips } => {
                write!(f, "LOAD_TIPS {} [{}]", tipbox, wells(tips))
            }
            Self::Aspirate {
                plate,
                wells: ws,
                volume,
                liquid,
                ..
            } => write!(
                f,
                "ASPIRATE {:.2}ul {} from {} [{}]",
                volume,
                liquid,
                plate,
                wells(ws)
            ),
            Self::Dispense {
                plate,
                wells: ws,
                volume,
                liquid,
                ..
            } => write!(
                f,
                "DISPENSE {:.2}ul {} into {} [{}]",
                volume,
                liquid,
                plate,
                wells(ws)
            ),
            Self::UnloadTips { tipwaste, count } => {
                write!(f, "UNLOAD_TIPS {} -> {}", count, tipwaste)
            }
            Self::Message {
                message,
                wait_seconds,
            } => write!(f, "MESSAGE \"{}\" wait={}s", message, wait_seconds),
            Self::Rename {
                plate,
                well,
                from,
                to,
            } => write!(f, "RENAME {}:{} {} -> {}", plate, well, from, to),
            Self::Finalize => write!(f, "FINALIZE"),
        }
    }
}

/// Count instructions of one kind.
pub fn count(instructions: &[Instruction], kind: &str) -> usize {
    instructions.iter().filter(|i| i.kind() == kind).count()
}

/// Mutable context shared by the block handlers.
pub struct ExpandCtx<'a> {
    pub ops: &'a OperationSet,
    pub state: &'a mut DeviceState,
    pub inventory: &'a mut dyn Inventory,
    pub policy: &'a Policy,
    tipbox: usize,
}

impl<'a> ExpandCtx<'a> {
    pub fn new(
        ops: &'a OperationSet,
        state: &'a mut DeviceState,
        inventory: &'a mut dyn Inventory,
        policy: &'a Policy,
    ) -> Self {
        Self {
            ops,
            state,
            inventory,
            policy,
            tipbox: 0,
        }
    }

    /// Pick up `n` tips, bringing in a new tipbox when the current one
    /// cannot serve the request.
    pub fn load_tips(&mut self, n: u32) -> PlanResult<Instruction> {
        let aligned = n > 1;
        for _ in 0..2 {
            if let Some(tb) = self.state.tipboxes.get_mut(self.tipbox) {
                if let Some(tips) = tb.take(n, aligned) {
                    return Ok(Instruction::LoadTips {
                        tipbox: tb.id.clone(),
                        tips,
                    });
                }
            }
            self.tipbox = deck::add_tipbox(self.state, self.inventory, self.policy)?;
        }
        Err(PlanError::Dire(format!(
            "a fresh tipbox cannot supply {} tip(s) at once",
            n
        )))
    }

    /// Drop `n` tips into the tipwaste. A full tipwaste ends planning.
    pub fn unload_tips(&mut self, n: u32) -> PlanResult<Instruction> {
        let waste = self
            .state
            .tipwastes
            .first_mut()
            .ok_or_else(|| PlanError::Dire("no tipwaste on the deck".to_string()))?;
        if waste.contents + n > waste.capacity {
            return Err(PlanError::NoDeckSpace(format!(
                "tipwaste '{}' holds {} of {} tip(s), {} more do not fit",
                waste.id, waste.contents, waste.capacity, n
            )));
        }
        waste.contents += n;
        Ok(Instruction::UnloadTips {
            tipwaste: waste.id.clone(),
            count: n,
        })
    }
}
