//! LH-001: Liquid, operation, labware and request types.
//!
//! Liquids and operations are plain values addressed by string ids; lineage
//! (samples, split remainders, prompt pass-throughs) is expressed through ids
//! rather than references. Request types derive Serialize/Deserialize for
//! YAML roundtripping and JsonSchema for `liquidplan schema`.

use indexmap::IndexMap;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Floating tolerance for all volume comparisons (µl).
pub const VOLUME_EPSILON: f64 = 1e-6;

// ============================================================================
// Units and addresses
// ============================================================================

/// Volume unit. Everything is normalised to microlitres before planning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VolumeUnit {
    #[default]
    Ul,
    Ml,
}

impl VolumeUnit {
    /// Convert a value in this unit to microlitres.
    pub fn to_ul(self, value: f64) -> f64 {
        match self {
            Self::Ul => value,
            Self::Ml => value * 1000.0,
        }
    }
}

impl fmt::Display for VolumeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ul => write!(f, "ul"),
            Self::Ml => write!(f, "ml"),
        }
    }
}

/// Zero-based well address; displayed as `A1`, `H12`, `AA3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WellCoords {
    pub row: u32,
    pub col: u32,
}

fn well_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z]+)([0-9]+)$").expect("static well pattern"))
}

impl WellCoords {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse an address such as `B7` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let caps = well_regex().captures(&upper)?;
        let mut row = 0u32;
        for b in caps[1].bytes() {
            row = row.checked_mul(26)?.checked_add(u32::from(b - b'A') + 1)?;
        }
        let col: u32 = caps[2].parse().ok()?;
        if col == 0 {
            return None;
        }
        Some(Self {
            row: row - 1,
            col: col - 1,
        })
    }

    fn row_label(&self) -> String {
        let mut n = self.row + 1;
        let mut label = Vec::new();
        while n > 0 {
            let rem = (n - 1) % 26;
            label.push(b'A' + rem as u8);
            n = (n - 1) / 26;
        }
        label.reverse();
        String::from_utf8_lossy(&label).into_owned()
    }
}

impl fmt::Display for WellCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row_label(), self.col + 1)
    }
}

impl TryFrom<String> for WellCoords {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or_else(|| format!("invalid well address '{}'", s))
    }
}

impl From<WellCoords> for String {
    fn from(w: WellCoords) -> Self {
        w.to_string()
    }
}

impl JsonSchema for WellCoords {
    fn schema_name() -> String {
        "WellCoords".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(gen)
    }
}

/// Iteration order used when filling plates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WellOrder {
    #[default]
    Column,
    Row,
}

impl WellOrder {
    /// All addresses of a `rows` x `cols` grid in this order.
    pub fn coords(self, rows: u32, cols: u32) -> Vec<WellCoords> {
        let mut out = Vec::with_capacity((rows * cols) as usize);
        match self {
            Self::Column => {
                for col in 0..cols {
                    for row in 0..rows {
                        out.push(WellCoords::new(row, col));
                    }
                }
            }
            Self::Row => {
                for row in 0..rows {
                    for col in 0..cols {
                        out.push(WellCoords::new(row, col));
                    }
                }
            }
        }
        out
    }
}

/// Fully-qualified position of a liquid: plate id plus well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct Location {
    #[serde(rename = "plate")]
    pub plate_id: String,
    pub well: WellCoords,
}

impl Location {
    pub fn new(plate_id: &str, well: WellCoords) -> Self {
        Self {
            plate_id: plate_id.to_string(),
            well,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plate_id, self.well)
    }
}

// ============================================================================
// Liquids
// ============================================================================

/// A concentration with a free-form unit (`mM`, `ng/ul`, `X`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Concentration {
    pub value: f64,
    pub unit: String,
}

/// A named quantity of substance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liquid {
    /// Unique id; a fresh one is minted whenever the liquid moves
    pub id: String,

    /// Display name (shared by every sample of the same substance)
    pub name: String,

    /// Volume in microlitres
    pub volume: f64,

    /// Handling policy name (see `Policy::liquid_policies`)
    pub liquid_type: String,

    /// Set when this liquid is a sample drawn from another liquid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Plate and well, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    /// Logical time at which the liquid becomes available
    #[serde(default)]
    pub generation: u32,

    /// Must stay one physical instance (never spread across wells)
    #[serde(default)]
    pub single_instance: bool,

    /// Declared concentration of the liquid itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concentration: Option<Concentration>,

    /// Computed component concentrations of mix products
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub components: IndexMap<String, Concentration>,
}

impl Liquid {
    pub fn new(id: &str, name: &str, volume: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            volume,
            liquid_type: default_liquid_type(),
            parent_id: None,
            location: None,
            generation: 0,
            single_instance: false,
            concentration: None,
            components: IndexMap::new(),
        }
    }

    /// Builder-style liquid type override.
    pub fn with_type(mut self, liquid_type: &str) -> Self {
        self.liquid_type = liquid_type.to_string();
        self
    }

    /// Take a sample of `volume` from this liquid under a new id.
    pub fn sample(&self, id: &str, volume: f64) -> Liquid {
        Liquid {
            id: id.to_string(),
            name: self.name.clone(),
            volume,
            liquid_type: self.liquid_type.clone(),
            parent_id: Some(self.id.clone()),
            location: self.location.clone(),
            generation: self.generation,
            single_instance: self.single_instance,
            concentration: self.concentration.clone(),
            components: self.components.clone(),
        }
    }

    pub fn is_sample(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Id of the liquid physically drawn from: the parent for samples.
    pub fn source_key(&self) -> &str {
        self.parent_id.as_deref().unwrap_or(&self.id)
    }
}

fn default_liquid_type() -> String {
    "water".to_string()
}

// ============================================================================
// Operations
// ============================================================================

/// Closed set of operation variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpKind {
    Mix,
    Split,
    Prompt { message: String, wait_seconds: u64 },
}

/// Payload-free operation tag, used for stage typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    Mix,
    Split,
    Prompt,
}

impl OpKind {
    pub fn op_type(&self) -> OpType {
        match self {
            Self::Mix => OpType::Mix,
            Self::Split => OpType::Split,
            Self::Prompt { .. } => OpType::Prompt,
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mix => write!(f, "mix"),
            Self::Split => write!(f, "split"),
            Self::Prompt => write!(f, "prompt"),
        }
    }
}

/// Caller constraints on where a mix product goes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Destination {
    /// Explicit plate id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate_id: Option<String>,

    /// Named plate; every mix naming it shares one plate group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate_name: Option<String>,

    /// Plate type for newly created destination plates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate_type: Option<String>,

    /// Free-form grouping key for mixes that should share plates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_group: Option<String>,

    /// Explicit well within the chosen plate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub well: Option<WellCoords>,

    /// Mix into the first input's well
    #[serde(default)]
    pub in_place: bool,
}

/// One planning operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    pub id: String,
    pub kind: OpKind,
    pub inputs: Vec<Liquid>,
    pub outputs: Vec<Liquid>,
    pub generation: u32,
    pub destination: Destination,
}

fn max_generation(liquids: &[Liquid]) -> u32 {
    liquids.iter().map(|l| l.generation).max().unwrap_or(0)
}

impl Operation {
    /// N inputs into one product.
    pub fn mix(id: &str, inputs: Vec<Liquid>, mut output: Liquid) -> Self {
        let generation = max_generation(&inputs);
        output.generation = generation + 1;
        output.parent_id = None;
        Self {
            id: id.to_string(),
            kind: OpKind::Mix,
            inputs,
            outputs: vec![output],
            generation,
            destination: Destination::default(),
        }
    }

    /// Divide `input` into a moving sample and a renamed remainder.
    pub fn split(id: &str, input: &Liquid, moving_volume: f64) -> Self {
        let generation = input.generation;
        let mut moving = input.sample(&format!("{}/moving", id), moving_volume);
        moving.generation = generation + 1;
        let remaining = Liquid {
            id: format!("{}/remaining", id),
            volume: input.volume - moving_volume,
            parent_id: None,
            generation: generation + 1,
            ..input.clone()
        };
        Self {
            id: id.to_string(),
            kind: OpKind::Split,
            inputs: vec![input.clone()],
            outputs: vec![moving, remaining],
            generation,
            destination: Destination::default(),
        }
    }

    /// Pass-through human interaction step.
    pub fn prompt(id: &str, message: &str, wait_seconds: u64, inputs: Vec<Liquid>) -> Self {
        let generation = max_generation(&inputs);
        let outputs = inputs
            .iter()
            .map(|l| Liquid {
                id: format!("{}/{}", id, l.id),
                parent_id: None,
                generation: generation + 1,
                ..l.clone()
            })
            .collect();
        Self {
            id: id.to_string(),
            kind: OpKind::Prompt {
                message: message.to_string(),
                wait_seconds,
            },
            inputs,
            outputs,
            generation,
            destination: Destination::default(),
        }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn op_type(&self) -> OpType {
        self.kind.op_type()
    }

    /// The mix product (first output).
    pub fn product(&self) -> Option<&Liquid> {
        self.outputs.first()
    }

    pub fn is_in_place(&self) -> bool {
        self.op_type() == OpType::Mix && self.destination.in_place
    }
}

/// Every operation of a run, in submission order.
pub type OperationSet = IndexMap<String, Operation>;

// ============================================================================
// Labware
// ============================================================================

/// A plate model: grid size and per-well volumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlateType {
    pub name: String,
    pub rows: u32,
    pub cols: u32,
    /// Maximum well volume (µl)
    pub max_volume: f64,
    /// Unusable volume at the bottom of each well (µl)
    pub residual_volume: f64,
}

impl PlateType {
    pub fn wells(&self) -> u32 {
        self.rows * self.cols
    }

    pub fn working_volume(&self) -> f64 {
        self.max_volume - self.residual_volume
    }

    /// Single-row reservoirs every channel can reach at once.
    pub fn is_trough(&self) -> bool {
        self.rows == 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TipboxType {
    pub name: String,
    pub rows: u32,
    pub cols: u32,
    pub tip_max_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TipwasteType {
    pub name: String,
    pub capacity: u32,
}

/// One well of a concrete plate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Well {
    pub coords: WellCoords,
    pub max_volume: f64,
    pub residual_volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Liquid>,
    /// Filled by the planner rather than supplied by the caller
    #[serde(default)]
    pub auto_allocated: bool,
    /// Claimed as a destination even while still empty
    #[serde(default)]
    pub reserved: bool,
}

impl Well {
    pub fn volume(&self) -> f64 {
        self.contents.as_ref().map(|l| l.volume).unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_none()
    }

    /// Free for new contents: empty and not claimed.
    pub fn is_free(&self) -> bool {
        self.is_empty() && !self.reserved
    }
}

/// A concrete plate instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plate {
    pub id: String,
    pub name: String,
    pub plate_type: String,
    pub rows: u32,
    pub cols: u32,
    /// Row-major grid
    pub wells: Vec<Well>,
}

impl Plate {
    pub fn new(id: &str, name: &str, ty: &PlateType) -> Self {
        let wells = WellOrder::Row
            .coords(ty.rows, ty.cols)
            .into_iter()
            .map(|coords| Well {
                coords,
                max_volume: ty.max_volume,
                residual_volume: ty.residual_volume,
                contents: None,
                auto_allocated: false,
                reserved: false,
            })
            .collect();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            plate_type: ty.name.clone(),
            rows: ty.rows,
            cols: ty.cols,
            wells,
        }
    }

    fn index(&self, c: WellCoords) -> Option<usize> {
        if c.row < self.rows && c.col < self.cols {
            Some((c.row * self.cols + c.col) as usize)
        } else {
            None
        }
    }

    pub fn well(&self, c: WellCoords) -> Option<&Well> {
        self.index(c).map(|i| &self.wells[i])
    }

    pub fn well_mut(&mut self, c: WellCoords) -> Option<&mut Well> {
        self.index(c).map(move |i| &mut self.wells[i])
    }

    /// First free well in `order`.
    pub fn next_free(&self, order: WellOrder) -> Option<WellCoords> {
        order
            .coords(self.rows, self.cols)
            .into_iter()
            .find(|c| self.well(*c).is_some_and(|w| w.is_free()))
    }

    pub fn free_wells(&self) -> usize {
        self.wells.iter().filter(|w| w.is_free()).count()
    }

    /// Place a liquid, enforcing the capacity invariant.
    pub fn put(&mut self, c: WellCoords, mut liquid: Liquid, auto: bool) -> Result<(), String> {
        let plate_id = self.id.clone();
        let well = self
            .well_mut(c)
            .ok_or_else(|| format!("plate '{}' has no well {}", plate_id, c))?;
        if !well.is_empty() {
            return Err(format!("well {}:{} is already occupied", plate_id, c));
        }
        if liquid.volume > well.max_volume + VOLUME_EPSILON {
            return Err(format!(
                "{:.2} ul of '{}' exceeds {:.2} ul capacity of {}:{}",
                liquid.volume, liquid.name, well.max_volume, plate_id, c
            ));
        }
        liquid.location = Some(Location::new(&plate_id, c));
        well.contents = Some(liquid);
        well.auto_allocated = auto;
        Ok(())
    }
}

/// A box of disposable tips, consumed in column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tipbox {
    pub id: String,
    pub name: String,
    pub tipbox_type: String,
    pub rows: u32,
    pub cols: u32,
    pub tip_max_volume: f64,
    /// Tips taken so far
    #[serde(default)]
    pub used: u32,
}

impl Tipbox {
    pub fn remaining(&self) -> u32 {
        self.rows * self.cols - self.used
    }

    /// Take `n` tips. Multichannel pickups (`aligned`) start at the top of
    /// a fresh column so all channels load together.
    pub fn take(&mut self, n: u32, aligned: bool) -> Option<Vec<WellCoords>> {
        let mut start = self.used;
        if aligned && start % self.rows != 0 {
            start += self.rows - start % self.rows;
        }
        if aligned && n > self.rows {
            return None;
        }
        if start + n > self.rows * self.cols {
            return None;
        }
        let tips = (start..start + n)
            .map(|i| WellCoords::new(i % self.rows, i / self.rows))
            .collect();
        self.used = start + n;
        Some(tips)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tipwaste {
    pub id: String,
    pub name: String,
    pub tipwaste_type: String,
    pub capacity: u32,
    #[serde(default)]
    pub contents: u32,
}

// ============================================================================
// Policy
// ============================================================================

/// Per liquid-type handling rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LiquidPolicy {
    /// Transfers of this type may be batched across channels
    #[serde(default)]
    pub can_multichannel: bool,
}

/// Planning policy; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Volume lost per transfer (µl)
    #[serde(default = "default_carry_volume")]
    pub carry_volume: f64,

    /// Upper bound on auto-allocated input plates, counted as wells over
    /// wells per plate (fractional allowed, spare wells included)
    #[serde(default = "default_max_plates")]
    pub max_plates: f64,

    /// Upper bound on auto-allocated input wells, spare wells included
    #[serde(default = "default_max_wells")]
    pub max_wells: f64,

    /// Weight of residual-volume waste in the allocation objective
    #[serde(default = "default_residual_weight")]
    pub residual_weight: f64,

    /// Flat cost per allocated well
    #[serde(default = "default_well_base_cost")]
    pub well_base_cost: f64,

    /// Candidate plate types for auto-allocated inputs
    #[serde(default = "default_input_plate_types")]
    pub input_plate_types: Vec<String>,

    /// Plate types for new destination plates (first is the default)
    #[serde(default = "default_output_plate_types")]
    pub output_plate_types: Vec<String>,

    #[serde(default)]
    pub well_order: WellOrder,

    /// Channels on the pipetting head
    #[serde(default = "default_channels")]
    pub channels: u32,

    #[serde(default = "default_tipbox_type")]
    pub tipbox_type: String,

    #[serde(default = "default_tipwaste_type")]
    pub tipwaste_type: String,

    /// Deck positions available on the device
    #[serde(default = "default_deck_positions")]
    pub deck_positions: u32,

    /// Handling rules by liquid type
    #[serde(default = "default_liquid_policies")]
    pub liquid_policies: IndexMap<String, LiquidPolicy>,

    /// Keep going when the simulator reports errors
    #[serde(default)]
    pub allow_simulation_errors: bool,

    /// Add one spare well per auto-allocated liquid
    #[serde(default = "default_true")]
    pub spare_wells: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            carry_volume: default_carry_volume(),
            max_plates: default_max_plates(),
            max_wells: default_max_wells(),
            residual_weight: default_residual_weight(),
            well_base_cost: default_well_base_cost(),
            input_plate_types: default_input_plate_types(),
            output_plate_types: default_output_plate_types(),
            well_order: WellOrder::default(),
            channels: default_channels(),
            tipbox_type: default_tipbox_type(),
            tipwaste_type: default_tipwaste_type(),
            deck_positions: default_deck_positions(),
            liquid_policies: default_liquid_policies(),
            allow_simulation_errors: false,
            spare_wells: true,
        }
    }
}

impl Policy {
    /// Unknown liquid types are single-channel.
    pub fn can_multichannel(&self, liquid_type: &str) -> bool {
        self.liquid_policies
            .get(liquid_type)
            .is_some_and(|p| p.can_multichannel)
    }
}

fn default_carry_volume() -> f64 {
    0.5
}

fn default_max_plates() -> f64 {
    4.5
}

fn default_max_wells() -> f64 {
    278.0
}

fn default_residual_weight() -> f64 {
    1.0
}

fn default_well_base_cost() -> f64 {
    0.1
}

fn default_input_plate_types() -> Vec<String> {
    vec!["pcrplate_skirted".to_string()]
}

fn default_output_plate_types() -> Vec<String> {
    vec!["pcrplate".to_string()]
}

fn default_channels() -> u32 {
    8
}

fn default_tipbox_type() -> String {
    "tips200".to_string()
}

fn default_tipwaste_type() -> String {
    "tipwaste".to_string()
}

fn default_deck_positions() -> u32 {
    9
}

fn default_liquid_policies() -> IndexMap<String, LiquidPolicy> {
    IndexMap::from([
        (
            "water".to_string(),
            LiquidPolicy {
                can_multichannel: true,
            },
        ),
        (
            "single_channel".to_string(),
            LiquidPolicy {
                can_multichannel: false,
            },
        ),
        (
            "viscous".to_string(),
            LiquidPolicy {
                can_multichannel: false,
            },
        ),
    ])
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Request (YAML)
// ============================================================================

/// Root of a planning request file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanRequest {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Human-readable run name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub policy: Policy,

    /// Extra labware types beyond the builtin catalog
    #[serde(default)]
    pub labware: LabwareSpec,

    /// Caller-supplied plates holding source liquids
    #[serde(default)]
    pub input_plates: IndexMap<String, InputPlateSpec>,

    /// Pre-existing destination plates
    #[serde(default)]
    pub output_plates: IndexMap<String, OutputPlateSpec>,

    /// Source liquids referenced by operations, keyed by id
    #[serde(default)]
    pub liquids: IndexMap<String, LiquidSpec>,

    /// Operations in submission order
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LabwareSpec {
    #[serde(default)]
    pub plate_types: Vec<PlateType>,
    #[serde(default)]
    pub tipbox_types: Vec<TipboxType>,
    #[serde(default)]
    pub tipwaste_types: Vec<TipwasteType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InputPlateSpec {
    #[serde(rename = "type")]
    pub plate_type: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Well address to contents
    #[serde(default)]
    pub wells: IndexMap<String, WellContentSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WellContentSpec {
    pub name: String,
    pub volume: f64,
    #[serde(default)]
    pub unit: VolumeUnit,
    #[serde(rename = "type", default = "default_liquid_type")]
    pub liquid_type: String,
    #[serde(default)]
    pub concentration: Option<Concentration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutputPlateSpec {
    #[serde(rename = "type")]
    pub plate_type: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Wells that must not be used
    #[serde(default)]
    pub occupied: Vec<WellCoords>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LiquidSpec {
    /// Display name (defaults to the id)
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default = "default_liquid_type")]
    pub liquid_type: String,
    #[serde(default)]
    pub single_instance: bool,
    #[serde(default)]
    pub concentration: Option<Concentration>,
}

/// One operation as written in the request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OperationSpec {
    pub id: String,
    #[serde(flatten)]
    pub body: OperationBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationBody {
    Mix(MixSpec),
    Split(SplitSpec),
    Prompt(PromptSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MixSpec {
    pub components: Vec<ComponentSpec>,
    /// Product id (defaults to `<op id>/out`)
    #[serde(default)]
    pub output_id: Option<String>,
    /// Product name (defaults to component names joined with `+`)
    #[serde(default)]
    pub output_name: Option<String>,
    #[serde(default)]
    pub destination: Destination,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ComponentSpec {
    /// Id of a source liquid or of an earlier operation's output
    pub liquid: String,
    /// Omitted when the referenced liquid is taken whole
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub unit: VolumeUnit,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SplitSpec {
    pub liquid: String,
    pub volume: f64,
    #[serde(default)]
    pub unit: VolumeUnit,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PromptSpec {
    pub message: String,
    #[serde(default)]
    pub wait_seconds: u64,
    pub liquids: Vec<String>,
}

// ============================================================================
// Tests
// ============================================================================
