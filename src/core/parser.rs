//! LH-020: Request parsing, validation and model construction.
//!
//! Parses a planning request (YAML, or TOML by file extension) and checks
//! structural constraints before any planning happens:
//! - Version must be "1.0"
//! - Operation ids are unique and free of `/`
//! - Labware types exist in the catalog
//! - Volumes are positive and well addresses fit their plates
//! - Liquid references resolve to an operation, an output, a declared
//!   liquid or a liquid sitting in an input plate

use super::error::{PlanError, PlanResult};
use super::labware::{Inventory, LabwareCatalog};
use super::state::{DeviceState, PlateRole};
use super::types::*;
use indexmap::IndexMap;
use log::debug;
use rustc_hash::FxHashSet;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a request file from disk. `.toml` files are read as TOML,
/// everything else as YAML.
pub fn parse_request_file(path: &Path) -> Result<PlanRequest, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    if path.extension().is_some_and(|e| e == "toml") {
        parse_request_toml(&content)
    } else {
        parse_request(&content)
    }
}

/// Parse a YAML request from a string.
pub fn parse_request(yaml: &str) -> Result<PlanRequest, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

pub fn parse_request_toml(text: &str) -> Result<PlanRequest, String> {
    toml::from_str(text).map_err(|e| format!("TOML parse error: {}", e))
}

/// Validate a parsed request. Returns a list of errors (empty = valid).
pub fn validate_request(request: &PlanRequest) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut err = |message: String| errors.push(ValidationError { message });
    let catalog = LabwareCatalog::with_spec(&request.labware);

    if request.version != "1.0" {
        err(format!("version must be \"1.0\", got \"{}\"", request.version));
    }
    if request.name.is_empty() {
        err("name must not be empty".to_string());
    }

    // Policy
    let policy = &request.policy;
    if policy.carry_volume < 0.0 {
        err(format!("policy.carry_volume must not be negative ({})", policy.carry_volume));
    }
    if policy.channels == 0 {
        err("policy.channels must be at least 1".to_string());
    }
    if policy.deck_positions < 2 {
        err("policy.deck_positions must leave room for a tipbox and a tipwaste".to_string());
    }
    for t in policy.input_plate_types.iter().chain(&policy.output_plate_types) {
        if catalog.plate_type(t).is_none() {
            err(format!("policy references unknown plate type '{}'", t));
        }
    }
    if policy.input_plate_types.is_empty() {
        err("policy.input_plate_types must not be empty".to_string());
    }

    // Plates
    for (key, plate) in &request.input_plates {
        let Some(ty) = catalog.plate_type(&plate.plate_type) else {
            err(format!("input plate '{}' has unknown type '{}'", key, plate.plate_type));
            continue;
        };
        for (addr, content) in &plate.wells {
            match WellCoords::parse(addr) {
                Some(c) if c.row < ty.rows && c.col < ty.cols => {}
                _ => err(format!("input plate '{}' has no well '{}'", key, addr)),
            }
            let volume = content.unit.to_ul(content.volume);
            if volume <= 0.0 {
                err(format!("input plate '{}' well {}: volume must be positive", key, addr));
            } else if volume > ty.max_volume + VOLUME_EPSILON {
                err(format!(
                    "input plate '{}' well {}: {:.2} ul exceeds {:.2} ul capacity",
                    key, addr, volume, ty.max_volume
                ));
            }
        }
    }
    for (key, plate) in &request.output_plates {
        if catalog.plate_type(&plate.plate_type).is_none() {
            err(format!("output plate '{}' has unknown type '{}'", key, plate.plate_type));
        }
    }

    // Operations
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for o in &request.operations {
        if o.id.is_empty() || o.id.contains('/') {
            err(format!("operation id '{}' must be non-empty and contain no '/'", o.id));
        }
        if !seen.insert(o.id.as_str()) {
            err(format!("duplicate operation id '{}'", o.id));
        }
        if request.liquids.contains_key(&o.id) {
            err(format!("operation '{}' shadows a liquid of the same id", o.id));
        }
        match &o.body {
            OperationBody::Mix(m) => {
                if m.components.is_empty() {
                    err(format!("mix '{}' has no components", o.id));
                }
                for c in &m.components {
                    match c.volume {
                        Some(v) if c.unit.to_ul(v) <= 0.0 => {
                            err(format!("mix '{}': volume of '{}' must be positive", o.id, c.liquid))
                        }
                        None if is_source(request, &c.liquid) => err(format!(
                            "mix '{}': source liquid '{}' needs a volume",
                            o.id, c.liquid
                        )),
                        _ => {}
                    }
                    if !is_known(request, &c.liquid) {
                        err(format!("mix '{}' references unknown liquid '{}'", o.id, c.liquid));
                    }
                }
                if let Some(t) = &m.destination.plate_type {
                    if catalog.plate_type(t).is_none() {
                        err(format!("mix '{}' asks for unknown plate type '{}'", o.id, t));
                    }
                }
                if let Some(p) = &m.destination.plate_id {
                    if !request.output_plates.contains_key(p) {
                        err(format!("mix '{}' targets unknown output plate '{}'", o.id, p));
                    }
                }
            }
            OperationBody::Split(s) => {
                if s.unit.to_ul(s.volume) <= 0.0 {
                    err(format!("split '{}': volume must be positive", o.id));
                }
                if !is_known(request, &s.liquid) {
                    err(format!("split '{}' references unknown liquid '{}'", o.id, s.liquid));
                } else if is_source(request, &s.liquid) {
                    err(format!("split '{}' must act on a mix product, not '{}'", o.id, s.liquid));
                }
            }
            OperationBody::Prompt(p) => {
                if p.liquids.is_empty() {
                    err(format!("prompt '{}' names no liquids", o.id));
                }
                for l in &p.liquids {
                    if !is_known(request, l) {
                        err(format!("prompt '{}' references unknown liquid '{}'", o.id, l));
                    } else if is_source(request, l) {
                        err(format!("prompt '{}' must act on a mix product, not '{}'", o.id, l));
                    }
                }
            }
        }
    }

    errors
}

/// Declared source liquids and liquids sitting in input plates, by id.
fn source_liquids(request: &PlanRequest) -> IndexMap<String, Liquid> {
    let mut sources: IndexMap<String, Liquid> = IndexMap::new();
    for (id, spec) in &request.liquids {
        let name = spec.name.clone().unwrap_or_else(|| id.clone());
        let mut l = Liquid::new(id, &name, 0.0).with_type(&spec.liquid_type);
        l.single_instance = spec.single_instance;
        l.concentration = spec.concentration.clone();
        sources.insert(id.clone(), l);
    }
    for plate in request.input_plates.values() {
        for content in plate.wells.values() {
            if sources.contains_key(&content.name) {
                continue;
            }
            let mut l = Liquid::new(&content.name, &content.name, 0.0).with_type(&content.liquid_type);
            l.concentration = content.concentration.clone();
            sources.insert(content.name.clone(), l);
        }
    }
    sources
}

fn is_source(request: &PlanRequest, reference: &str) -> bool {
    !is_op_reference(request, reference)
        && (request.liquids.contains_key(reference)
            || request
                .input_plates
                .values()
                .any(|p| p.wells.values().any(|w| w.name == reference)))
}

fn is_op_reference(request: &PlanRequest, reference: &str) -> bool {
    let head = reference.split('/').next().unwrap_or(reference);
    request.operations.iter().any(|o| o.id == head)
}

fn is_known(request: &PlanRequest, reference: &str) -> bool {
    is_op_reference(request, reference) || is_source(request, reference)
}

/// What a liquid reference points at.
#[derive(Debug, Clone)]
enum Resolved {
    Source(Liquid),
    Produced(Liquid),
    /// A split's moving output; consumed whole by exactly one mix
    Moving(Liquid),
}

/// `Ok(None)` means the reference names an operation not built yet.
fn resolve(
    reference: &str,
    built: &OperationSet,
    sources: &IndexMap<String, Liquid>,
    request: &PlanRequest,
) -> PlanResult<Option<Resolved>> {
    if let Some(o) = built.get(reference) {
        return match o.op_type() {
            OpType::Mix => Ok(o.product().cloned().map(Resolved::Produced)),
            OpType::Split => Ok(o.outputs.first().cloned().map(Resolved::Moving)),
            OpType::Prompt if o.outputs.len() == 1 => Ok(Some(Resolved::Produced(o.outputs[0].clone()))),
            OpType::Prompt => Err(PlanError::InvalidRequest(format!(
                "prompt '{}' passes {} liquids; name one as '{}/<liquid>'",
                o.id,
                o.outputs.len(),
                o.id
            ))),
        };
    }
    for o in built.values() {
        if let Some(pos) = o.outputs.iter().position(|l| l.id == reference) {
            let l = o.outputs[pos].clone();
            return Ok(Some(if o.op_type() == OpType::Split && pos == 0 {
                Resolved::Moving(l)
            } else {
                Resolved::Produced(l)
            }));
        }
    }
    if is_op_reference(request, reference) {
        let head = reference.split('/').next().unwrap_or(reference);
        if built.contains_key(head) {
            return Err(PlanError::InvalidRequest(format!(
                "operation '{}' has no output '{}'",
                head, reference
            )));
        }
        return Ok(None);
    }
    match sources.get(reference) {
        Some(l) => Ok(Some(Resolved::Source(l.clone()))),
        None => Err(PlanError::InvalidRequest(format!("unknown liquid '{}'", reference))),
    }
}

fn build_one(
    spec: &OperationSpec,
    built: &OperationSet,
    sources: &IndexMap<String, Liquid>,
    request: &PlanRequest,
    plate_ids: &IndexMap<String, String>,
) -> PlanResult<Option<Operation>> {
    let id = spec.id.as_str();
    match &spec.body {
        OperationBody::Mix(m) => {
            let mut inputs = Vec::with_capacity(m.components.len());
            for (i, c) in m.components.iter().enumerate() {
                let Some(r) = resolve(&c.liquid, built, sources, request)? else {
                    return Ok(None);
                };
                let volume = c.volume.map(|v| c.unit.to_ul(v));
                let sample_id = format!("{}/{}", id, i);
                let input = match (r, volume) {
                    (Resolved::Source(l), Some(v)) | (Resolved::Produced(l), Some(v)) => l.sample(&sample_id, v),
                    (Resolved::Produced(l), None) => l,
                    (Resolved::Moving(l), v) => {
                        if v.is_some_and(|v| (v - l.volume).abs() > VOLUME_EPSILON) {
                            return Err(PlanError::InvalidRequest(format!(
                                "mix '{}' takes {:.2} ul of '{}' but the split moves {:.2} ul",
                                id,
                                v.unwrap_or_default(),
                                l.id,
                                l.volume
                            )));
                        }
                        l
                    }
                    (Resolved::Source(l), None) => {
                        return Err(PlanError::InvalidRequest(format!(
                            "mix '{}': source liquid '{}' needs a volume",
                            id, l.id
                        )))
                    }
                };
                inputs.push(input);
            }
            let volume: f64 = inputs.iter().map(|l| l.volume).sum();
            let name = m.output_name.clone().unwrap_or_else(|| {
                let mut names: Vec<&str> = Vec::new();
                for l in &inputs {
                    if !names.contains(&l.name.as_str()) {
                        names.push(&l.name);
                    }
                }
                names.join("+")
            });
            let out_id = m.output_id.clone().unwrap_or_else(|| format!("{}/out", id));
            let liquid_type = inputs
                .first()
                .map(|l| l.liquid_type.clone())
                .unwrap_or_default();
            let product = Liquid::new(&out_id, &name, volume).with_type(&liquid_type);

            let mut destination = m.destination.clone();
            if let Some(key) = &destination.plate_id {
                let real = plate_ids.get(key).ok_or_else(|| {
                    PlanError::InvalidRequest(format!("mix '{}' targets unknown output plate '{}'", id, key))
                })?;
                destination.plate_id = Some(real.clone());
            }
            Ok(Some(Operation::mix(id, inputs, product).with_destination(destination)))
        }
        OperationBody::Split(s) => {
            let Some(r) = resolve(&s.liquid, built, sources, request)? else {
                return Ok(None);
            };
            match r {
                Resolved::Produced(l) => Ok(Some(Operation::split(id, &l, s.unit.to_ul(s.volume)))),
                _ => Err(PlanError::InvalidRequest(format!(
                    "split '{}' must act on a mix product, not '{}'",
                    id, s.liquid
                ))),
            }
        }
        OperationBody::Prompt(p) => {
            let mut inputs = Vec::with_capacity(p.liquids.len());
            for reference in &p.liquids {
                match resolve(reference, built, sources, request)? {
                    None => return Ok(None),
                    Some(Resolved::Produced(l)) => inputs.push(l),
                    Some(_) => {
                        return Err(PlanError::InvalidRequest(format!(
                            "prompt '{}' must act on a mix product, not '{}'",
                            id, reference
                        )))
                    }
                }
            }
            Ok(Some(Operation::prompt(id, &p.message, p.wait_seconds, inputs)))
        }
    }
}

/// Turn the request's operations into an `OperationSet` in submission
/// order. References may point forward; whatever cannot be resolved after
/// a full sweep without progress is reported as circular.
pub fn build_operations(
    request: &PlanRequest,
    plate_ids: &IndexMap<String, String>,
) -> PlanResult<OperationSet> {
    let sources = source_liquids(request);
    let mut built = OperationSet::new();
    let mut pending: Vec<&OperationSpec> = request.operations.iter().collect();

    while !pending.is_empty() {
        let before = pending.len();
        let mut still = Vec::new();
        for spec in pending {
            match build_one(spec, &built, &sources, request, plate_ids)? {
                Some(o) => {
                    built.insert(o.id.clone(), o);
                }
                None => still.push(spec),
            }
        }
        if still.len() == before {
            let ids: Vec<&str> = still.iter().map(|s| s.id.as_str()).collect();
            return Err(PlanError::InvalidRequest(format!(
                "circular liquid references among operations: {}",
                ids.join(", ")
            )));
        }
        pending = still;
    }

    // Restore submission order
    let mut ordered = OperationSet::new();
    for spec in &request.operations {
        if let Some(o) = built.shift_remove(&spec.id) {
            ordered.insert(o.id.clone(), o);
        }
    }
    debug!("built {} operation(s)", ordered.len());
    Ok(ordered)
}

/// Create the caller's input and output plates. Returns the state and a
/// map from request plate key to minted plate id.
pub fn build_plates(
    request: &PlanRequest,
    catalog: &mut LabwareCatalog,
) -> PlanResult<(DeviceState, IndexMap<String, String>)> {
    let mut state = DeviceState::new();
    let mut ids = IndexMap::new();

    for (key, spec) in &request.input_plates {
        let mut plate = catalog.new_plate_of_type(&spec.plate_type)?;
        plate.name = spec.name.clone().unwrap_or_else(|| key.clone());
        catalog.reserve_name(&plate.name);
        for (addr, content) in &spec.wells {
            let c = WellCoords::parse(addr).ok_or_else(|| {
                PlanError::InvalidRequest(format!("input plate '{}': bad well address '{}'", key, addr))
            })?;
            let volume = content.unit.to_ul(content.volume);
            let mut liquid = Liquid::new(&format!("{}@{}:{}", content.name, key, c), &content.name, volume)
                .with_type(&content.liquid_type);
            liquid.concentration = content.concentration.clone();
            plate
                .put(c, liquid, false)
                .map_err(|e| PlanError::InvalidRequest(format!("input plate '{}': {}", key, e)))?;
        }
        ids.insert(key.clone(), plate.id.clone());
        state.add_plate(plate, PlateRole::Input);
    }

    for (key, spec) in &request.output_plates {
        let mut plate = catalog.new_plate_of_type(&spec.plate_type)?;
        plate.name = spec.name.clone().unwrap_or_else(|| key.clone());
        catalog.reserve_name(&plate.name);
        for c in &spec.occupied {
            let well = plate.well_mut(*c).ok_or_else(|| {
                PlanError::InvalidRequest(format!("output plate '{}' has no well {}", key, c))
            })?;
            well.reserved = true;
        }
        ids.insert(key.clone(), plate.id.clone());
        state.add_plate(plate, PlateRole::Output);
    }
    Ok((state, ids))
}
