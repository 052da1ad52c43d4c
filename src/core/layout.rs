//! LH-009: Layout: concrete destinations for every operation output.
//!
//! Phase 1 sorts mixes into `PlateChoice` bins (explicit plate, named plate,
//! layout group, or the default bin per plate type) and chops each bin into
//! plate-sized chunks. Phase 2 walks the chain once more so in-place mixes,
//! splits and prompts inherit the location of the liquid they act on.

use super::error::{PlanError, PlanResult};
use super::labware::Inventory;
use super::sequencer::{op, Chain};
use super::state::{DeviceState, PlateRole};
use super::types::*;
use log::{debug, info};
use rustc_hash::{FxHashMap, FxHashSet};

/// What a group of mixes was binned by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceKey {
    /// An existing output plate
    Plate(String),
    /// A plate name not yet on the deck
    Named(String),
    Group(String),
    /// No preference; one bin per plate type
    Default(String),
}

/// One mix waiting for a well.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub op_id: String,
    pub well: Option<WellCoords>,
}

/// A destination bin, later chopped onto one or more real plates.
#[derive(Debug, Clone, PartialEq)]
pub struct PlateChoice {
    pub key: ChoiceKey,
    /// Real id for `ChoiceKey::Plate`, temporary otherwise
    pub id: String,
    pub plate_type: String,
    pub name: Option<String>,
    pub assignments: Vec<Assignment>,
}

impl PlateChoice {
    fn existing(&self) -> bool {
        matches!(self.key, ChoiceKey::Plate(_))
    }
}

fn default_output_type(policy: &Policy, op_id: &str) -> PlanResult<String> {
    policy.output_plate_types.first().cloned().ok_or_else(|| {
        PlanError::Configuration(format!(
            "mix '{}' needs a new destination plate but no output plate types are configured",
            op_id
        ))
    })
}

/// Bin every placed (not in-place) mix, in chain order.
pub fn classify(
    chain: &Chain,
    ops: &OperationSet,
    state: &DeviceState,
    policy: &Policy,
) -> PlanResult<Vec<PlateChoice>> {
    let mut choices: Vec<PlateChoice> = Vec::new();
    for id in chain.op_ids() {
        let o = op(ops, id)?;
        if !matches!(o.kind, OpKind::Mix) || o.is_in_place() {
            continue;
        }
        let dest = &o.destination;
        let by_name = dest.plate_name.as_ref().and_then(|n| {
            state
                .plates
                .values()
                .find(|p| &p.name == n && state.role(&p.id) == Some(PlateRole::Output))
                .map(|p| p.id.clone())
        });

        let (key, plate_type, name) = if let Some(pid) = dest.plate_id.clone().or(by_name) {
            let plate = state.plate(&pid).ok_or_else(|| {
                PlanError::InvalidRequest(format!("mix '{}' targets unknown plate '{}'", o.id, pid))
            })?;
            (ChoiceKey::Plate(pid), plate.plate_type.clone(), Some(plate.name.clone()))
        } else {
            let ty = match &dest.plate_type {
                Some(t) => t.clone(),
                None => default_output_type(policy, &o.id)?,
            };
            if let Some(n) = &dest.plate_name {
                (ChoiceKey::Named(n.clone()), ty, Some(n.clone()))
            } else if let Some(g) = &dest.layout_group {
                (ChoiceKey::Group(g.clone()), ty, None)
            } else {
                (ChoiceKey::Default(ty.clone()), ty, None)
            }
        };

        let assignment = Assignment {
            op_id: o.id.clone(),
            well: dest.well,
        };
        match choices.iter_mut().find(|c| c.key == key) {
            Some(c) => c.assignments.push(assignment),
            None => {
                let id = match &key {
                    ChoiceKey::Plate(pid) => pid.clone(),
                    _ => format!("choice-{}", choices.len() + 1),
                };
                choices.push(PlateChoice {
                    key,
                    id,
                    plate_type,
                    name,
                    assignments: vec![assignment],
                });
            }
        }
    }
    Ok(choices)
}

/// Place a choice onto real plates. Returns ids of plates created.
fn chop(
    choice: &PlateChoice,
    ops: &mut OperationSet,
    state: &mut DeviceState,
    inventory: &mut dyn Inventory,
    policy: &Policy,
) -> PlanResult<Vec<String>> {
    let mut ordered: Vec<&Assignment> = choice.assignments.iter().filter(|a| a.well.is_some()).collect();
    ordered.extend(choice.assignments.iter().filter(|a| a.well.is_none()));

    if choice.existing() {
        let free = state.plate(&choice.id).map(|p| p.free_wells()).unwrap_or(0);
        if ordered.len() > free {
            return Err(PlanError::Volume(format!(
                "plate '{}' has {} free well(s) but {} mix(es) are assigned to it",
                choice.id,
                free,
                ordered.len()
            )));
        }
        fill(&choice.id, &ordered, ops, state, policy)?;
        return Ok(Vec::new());
    }

    let ty = inventory
        .plate_type(&choice.plate_type)
        .cloned()
        .ok_or_else(|| PlanError::Configuration(format!("unknown output plate type '{}'", choice.plate_type)))?;
    let cap = ty.wells() as usize;
    if cap == 0 {
        return Err(PlanError::Configuration(format!("plate type '{}' has no wells", ty.name)));
    }

    let mut created = Vec::new();
    for (k, chunk) in ordered.chunks(cap).enumerate() {
        let mut plate = inventory.new_plate_of_type(&ty.name)?;
        if let Some(name) = &choice.name {
            plate.name = if k == 0 {
                name.clone()
            } else {
                inventory.unique_name(name)
            };
        }
        debug!(
            "{:?}: chunk {} of {} mix(es) -> {} ({})",
            choice.key,
            k,
            chunk.len(),
            plate.id,
            plate.name
        );
        let id = plate.id.clone();
        state.add_plate(plate, PlateRole::Output);
        fill(&id, chunk, ops, state, policy)?;
        created.push(id);
    }
    Ok(created)
}

fn fill(
    plate_id: &str,
    chunk: &[&Assignment],
    ops: &mut OperationSet,
    state: &mut DeviceState,
    policy: &Policy,
) -> PlanResult<()> {
    let plate = state
        .plate_mut(plate_id)
        .ok_or_else(|| PlanError::Dire(format!("plate '{}' vanished during layout", plate_id)))?;
    let mut requested: FxHashSet<WellCoords> = FxHashSet::default();

    for a in chunk {
        let c = match a.well {
            Some(c) => {
                if !requested.insert(c) {
                    return Err(PlanError::InvalidRequest(format!(
                        "well {} on plate '{}' is requested twice (again by mix '{}')",
                        c, plate.name, a.op_id
                    )));
                }
                let well = plate.well(c).ok_or_else(|| {
                    PlanError::InvalidRequest(format!(
                        "mix '{}' asks for well {} which plate '{}' does not have",
                        a.op_id, c, plate.name
                    ))
                })?;
                if !well.is_free() {
                    return Err(PlanError::InvalidRequest(format!(
                        "mix '{}' asks for well {} on plate '{}' which is already in use",
                        a.op_id, c, plate.name
                    )));
                }
                c
            }
            None => plate.next_free(policy.well_order).ok_or_else(|| {
                PlanError::Volume(format!(
                    "plate '{}' ran out of wells placing mix '{}'",
                    plate.name, a.op_id
                ))
            })?,
        };
        if let Some(w) = plate.well_mut(c) {
            w.reserved = true;
        }
        let o = ops
            .get_mut(&a.op_id)
            .ok_or_else(|| PlanError::Dire(format!("unknown operation '{}'", a.op_id)))?;
        if let Some(product) = o.outputs.first_mut() {
            product.location = Some(Location::new(plate_id, c));
        }
    }
    Ok(())
}

/// Give in-place mixes, splits and prompts the location of what they act
/// on, and stamp source locations onto every input drawn from a product.
pub fn resolve_lineage(chain: &Chain, ops: &mut OperationSet) -> PlanResult<()> {
    let mut known: FxHashMap<String, Location> = FxHashMap::default();
    for stage in &chain.stages {
        for id in &stage.op_ids {
            let o = ops
                .get_mut(id)
                .ok_or_else(|| PlanError::Dire(format!("chain references unknown operation '{}'", id)))?;
            for input in &mut o.inputs {
                if let Some(loc) = known.get(input.source_key()) {
                    input.location = Some(loc.clone());
                }
            }
            match o.kind {
                OpKind::Mix => {
                    if o.is_in_place() {
                        let first = o.inputs.first().ok_or_else(|| {
                            PlanError::InvalidRequest(format!("mix '{}' has no inputs", o.id))
                        })?;
                        let loc = first.location.clone().ok_or_else(|| {
                            PlanError::InvalidRequest(format!(
                                "mix '{}' is in place but its first input '{}' has no location",
                                o.id, first.name
                            ))
                        })?;
                        if let Some(product) = o.outputs.first_mut() {
                            product.location = Some(loc);
                        }
                    }
                }
                OpKind::Split | OpKind::Prompt { .. } => {
                    let pairs: Vec<(usize, Option<Location>)> = match o.kind {
                        OpKind::Split => (0..o.outputs.len())
                            .map(|i| (i, o.inputs[0].location.clone()))
                            .collect(),
                        _ => o
                            .inputs
                            .iter()
                            .enumerate()
                            .map(|(i, l)| (i, l.location.clone()))
                            .collect(),
                    };
                    for (i, loc) in pairs {
                        let loc = loc.ok_or_else(|| {
                            PlanError::InvalidRequest(format!(
                                "{} '{}' acts on a liquid with no location",
                                o.op_type(),
                                o.id
                            ))
                        })?;
                        o.outputs[i].location = Some(loc);
                    }
                }
            }
            for out in &o.outputs {
                if let Some(loc) = &out.location {
                    known.insert(out.id.clone(), loc.clone());
                }
            }
        }
    }
    Ok(())
}

/// Run both layout phases. Returns the ids of newly created plates.
pub fn layout(
    chain: &Chain,
    ops: &mut OperationSet,
    state: &mut DeviceState,
    inventory: &mut dyn Inventory,
    policy: &Policy,
) -> PlanResult<Vec<String>> {
    let choices = classify(chain, ops, state, policy)?;
    let mut created = Vec::new();
    for choice in &choices {
        created.extend(chop(choice, ops, state, inventory, policy)?);
    }
    resolve_lineage(chain, ops)?;
    info!(
        "layout: {} plate choice(s), {} new output plate(s)",
        choices.len(),
        created.len()
    );
    Ok(created)
}

/// Every output has a location and no two placed mixes share a well.
pub fn assert_destinations(chain: &Chain, ops: &OperationSet) -> PlanResult<()> {
    let mut taken: FxHashMap<&Location, &str> = FxHashMap::default();
    for id in chain.op_ids() {
        let o = op(ops, id)?;
        for out in &o.outputs {
            let loc = out.location.as_ref().ok_or_else(|| {
                PlanError::Dire(format!(
                    "{} '{}': output '{}' has no destination after layout",
                    o.op_type(),
                    o.id,
                    out.name
                ))
            })?;
            if matches!(o.kind, OpKind::Mix) && !o.is_in_place() {
                if let Some(prev) = taken.insert(loc, o.id.as_str()) {
                    return Err(PlanError::Dire(format!(
                        "mixes '{}' and '{}' both placed at {}",
                        prev, o.id, loc
                    )));
                }
            }
        }
    }
    Ok(())
}

/// No mix product may exceed the capacity of the well it lands in.
pub fn assert_capacity(chain: &Chain, ops: &OperationSet, state: &DeviceState) -> PlanResult<()> {
    for id in chain.op_ids() {
        let o = op(ops, id)?;
        if !matches!(o.kind, OpKind::Mix) {
            continue;
        }
        let Some(product) = o.product() else { continue };
        let Some(loc) = &product.location else { continue };
        let well = state
            .well(loc)
            .ok_or_else(|| PlanError::Dire(format!("mix '{}' placed at unknown well {}", o.id, loc)))?;
        if product.volume > well.max_volume + VOLUME_EPSILON {
            return Err(PlanError::Volume(format!(
                "mix '{}': {:.2} ul of '{}' does not fit {} ({:.2} ul max)",
                o.id, product.volume, product.name, loc, well.max_volume
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::labware::LabwareCatalog;
    use crate::core::sequencer::sequence;

    fn ops(list: Vec<Operation>) -> OperationSet {
        list.into_iter().map(|o| (o.id.clone(), o)).collect()
    }

    fn mixes(n: usize, dest: Destination) -> Vec<Operation> {
        let water = Liquid::new("water", "water", 0.0);
        (0..n)
            .map(|i| {
                let id = format!("m{}", i);
                Operation::mix(
                    &id,
                    vec![water.sample(&format!("{}/0", id), 10.0)],
                    Liquid::new(&format!("{}/out", id), "water", 10.0),
                )
                .with_destination(dest.clone())
            })
            .collect()
    }

    fn run(
        list: Vec<Operation>,
        state: &mut DeviceState,
        catalog: &mut LabwareCatalog,
        policy: &Policy,
    ) -> PlanResult<(OperationSet, Chain, Vec<String>)> {
        let mut set = ops(list);
        let chain = sequence(&mut set)?;
        let created = layout(&chain, &mut set, state, catalog, policy)?;
        Ok((set, chain, created))
    }

    fn loc_of(set: &OperationSet, id: &str) -> String {
        set[id].outputs[0].location.as_ref().unwrap().to_string()
    }

    #[test]
    fn test_lh009_default_choice_fills_column_order() {
        let mut state = DeviceState::new();
        let mut catalog = LabwareCatalog::builtin();
        let (set, chain, created) =
            run(mixes(3, Destination::default()), &mut state, &mut catalog, &Policy::default()).unwrap();
        assert_eq!(created, vec!["plate-0001"]);
        assert_eq!(loc_of(&set, "m0"), "plate-0001:A1");
        assert_eq!(loc_of(&set, "m2"), "plate-0001:C1");
        assert_destinations(&chain, &set).unwrap();
    }

    #[test]
    fn test_lh009_named_choice_chopped_into_chunks() {
        let mut state = DeviceState::new();
        let mut catalog = LabwareCatalog::builtin();
        let dest = Destination {
            plate_name: Some("results".into()),
            ..Default::default()
        };
        let (set, _, created) = run(mixes(100, dest), &mut state, &mut catalog, &Policy::default()).unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(state.plate(&created[0]).unwrap().name, "results");
        assert_eq!(state.plate(&created[1]).unwrap().name, "results_1");
        assert_eq!(loc_of(&set, "m96"), format!("{}:A1", created[1]));
    }

    #[test]
    fn test_lh009_explicit_wells_first() {
        let mut state = DeviceState::new();
        let mut catalog = LabwareCatalog::builtin();
        let mut list = mixes(2, Destination {
            plate_name: Some("results".into()),
            ..Default::default()
        });
        list[1].destination.well = WellCoords::parse("A1");
        let (set, _, _) = run(list, &mut state, &mut catalog, &Policy::default()).unwrap();
        assert_eq!(loc_of(&set, "m1"), "plate-0001:A1");
        assert_eq!(loc_of(&set, "m0"), "plate-0001:B1");
    }

    #[test]
    fn test_lh009_duplicate_explicit_well() {
        let mut state = DeviceState::new();
        let mut catalog = LabwareCatalog::builtin();
        let list = mixes(2, Destination {
            plate_name: Some("results".into()),
            well: WellCoords::parse("C3"),
            ..Default::default()
        });
        let err = run(list, &mut state, &mut catalog, &Policy::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(err.to_string().contains("C3"));
    }

    #[test]
    fn test_lh009_existing_plate_overflow() {
        let mut state = DeviceState::new();
        let mut catalog = LabwareCatalog::builtin();
        let ty = PlateType {
            name: "strip".into(),
            rows: 8,
            cols: 1,
            max_volume: 200.0,
            residual_volume: 0.5,
        };
        state.add_plate(Plate::new("strip1", "strip1", &ty), PlateRole::Output);
        let list = mixes(9, Destination {
            plate_id: Some("strip1".into()),
            ..Default::default()
        });
        let err = run(list, &mut state, &mut catalog, &Policy::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Volume);
        assert!(err.to_string().contains("strip1"));
    }

    #[test]
    fn test_lh009_layout_group_and_default_are_separate() {
        let mut state = DeviceState::new();
        let mut catalog = LabwareCatalog::builtin();
        let mut list = mixes(2, Destination::default());
        list[1].destination.layout_group = Some("g".into());
        let (set, _, created) = run(list, &mut state, &mut catalog, &Policy::default()).unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(loc_of(&set, "m1"), format!("{}:A1", created[1]));
    }

    #[test]
    fn test_lh009_no_output_types() {
        let mut state = DeviceState::new();
        let mut catalog = LabwareCatalog::builtin();
        let policy = Policy {
            output_plate_types: vec![],
            ..Policy::default()
        };
        let err = run(mixes(1, Destination::default()), &mut state, &mut catalog, &policy).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_lh009_lineage_follows_inputs() {
        let water = Liquid::new("water", "water", 0.0);
        let m1 = Operation::mix("m1", vec![water.sample("m1/0", 50.0)], Liquid::new("m1/out", "water", 50.0));
        let m2 = Operation::mix(
            "m2",
            vec![m1.outputs[0].clone(), water.sample("m2/1", 10.0)],
            Liquid::new("m2/out", "water", 60.0),
        )
        .with_destination(Destination {
            in_place: true,
            ..Default::default()
        });
        let p = Operation::prompt("p", "spin", 0, vec![m2.outputs[0].clone()]);
        let s = Operation::split("s", &p.outputs[0], 20.0);
        let c = Operation::mix("c", vec![s.outputs[0].clone()], Liquid::new("c/out", "water", 20.0));
        let mut state = DeviceState::new();
        let mut catalog = LabwareCatalog::builtin();
        let (set, chain, _) =
            run(vec![m1, m2, p, s, c], &mut state, &mut catalog, &Policy::default()).unwrap();
        assert_eq!(loc_of(&set, "m2"), "plate-0001:A1");
        assert_eq!(loc_of(&set, "p"), "plate-0001:A1");
        assert_eq!(set["s"].outputs[1].location, set["m1"].outputs[0].location);
        assert_eq!(
            set["c"].inputs[0].location.as_ref().unwrap().to_string(),
            "plate-0001:A1"
        );
        assert_eq!(loc_of(&set, "c"), "plate-0001:B1");
        assert_destinations(&chain, &set).unwrap();
    }

    #[test]
    fn test_lh009_in_place_on_source_has_no_location() {
        let water = Liquid::new("water", "water", 0.0);
        let m = Operation::mix(
            "m",
            vec![water.clone(), water.sample("m/1", 10.0)],
            Liquid::new("m/out", "water", 10.0),
        )
        .with_destination(Destination {
            in_place: true,
            ..Default::default()
        });
        let mut state = DeviceState::new();
        let mut catalog = LabwareCatalog::builtin();
        let err = run(vec![m], &mut state, &mut catalog, &Policy::default()).unwrap_err();
        assert!(err.to_string().contains("no location"));
    }

    #[test]
    fn test_lh009_product_over_well_capacity() {
        let water = Liquid::new("water", "water", 0.0);
        let m = Operation::mix(
            "big",
            vec![water.sample("big/0", 250.0)],
            Liquid::new("big/out", "water", 250.0),
        );
        let mut state = DeviceState::new();
        let mut catalog = LabwareCatalog::builtin();
        let (set, chain, _) = run(vec![m], &mut state, &mut catalog, &Policy::default()).unwrap();
        let err = assert_capacity(&chain, &set, &state).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Volume);
        assert!(err.to_string().contains("does not fit"));
    }
}
