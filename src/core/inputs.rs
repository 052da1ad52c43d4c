//! LH-008: Resource planning: input demand, LP allocation, placement and
//! input binding.
//!
//! Demand is keyed by liquid *name*: every well holding "water" can serve
//! every water sample. Shortfalls are covered by auto-allocated wells whose
//! plate type comes from a small linear program and whose count comes from
//! packing the draws no caller well can take.

use super::error::{PlanError, PlanResult};
use super::labware::Inventory;
use super::lp::{Cmp, LinearProgram, LpError};
use super::sequencer::{op, Chain};
use super::state::{DeviceState, PlateRole};
use super::types::*;
use super::volumes::draws;
use indexmap::IndexMap;
use log::{debug, info};
use rustc_hash::FxHashSet;
use serde::Serialize;

/// Demand and supply of one source liquid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolutionNeed {
    pub name: String,
    pub liquid_type: String,
    pub single_instance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concentration: Option<Concentration>,
    /// Working volume already present in caller-supplied wells
    pub supplied: f64,
    /// Total drawn, carry included
    pub required: f64,
    /// Shortfall to auto-allocate
    pub wanting: f64,
    /// Draws no caller well can take whole, in chain order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unserved: Vec<f64>,
    /// Position in first-required order
    pub first_required: usize,
}

impl SolutionNeed {
    /// Working volume auto-allocated wells must hold.
    pub fn shortfall(&self) -> f64 {
        self.unserved.iter().sum()
    }
}

/// Per-run source liquid summary, in first-required order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputSolutions {
    pub needs: IndexMap<String, SolutionNeed>,
}

/// Working volume left in every caller-supplied input well, keyed by liquid
/// name, in the order draws are bound to them.
fn caller_wells(state: &DeviceState) -> IndexMap<String, Vec<(Location, f64)>> {
    let mut wells: IndexMap<String, Vec<(Location, f64)>> = IndexMap::new();
    for plate in state.plates.values() {
        if state.role(&plate.id) != Some(PlateRole::Input) {
            continue;
        }
        for c in WellOrder::Column.coords(plate.rows, plate.cols) {
            let Some(well) = plate.well(c) else { continue };
            if well.auto_allocated {
                continue;
            }
            if let Some(l) = &well.contents {
                wells
                    .entry(l.name.clone())
                    .or_default()
                    .push((Location::new(&plate.id, c), (l.volume - well.residual_volume).max(0.0)));
            }
        }
    }
    wells
}

/// First well with room for the whole draw.
fn first_fit(wells: &mut [(Location, f64)], need: f64) -> Option<&mut (Location, f64)> {
    wells.iter_mut().find(|(_, left)| *left + VOLUME_EPSILON >= need)
}

/// Ids of every liquid some operation produces.
fn produced_ids(ops: &OperationSet) -> FxHashSet<String> {
    ops.values()
        .flat_map(|o| o.outputs.iter())
        .filter(|l| !l.is_sample())
        .map(|l| l.id.clone())
        .collect()
}

impl InputSolutions {
    /// Tally every draw on a liquid no operation produces.
    pub fn compute(
        chain: &Chain,
        ops: &OperationSet,
        state: &DeviceState,
        carry: f64,
    ) -> PlanResult<Self> {
        let produced = produced_ids(ops);
        let mut left = caller_wells(state);

        let mut needs: IndexMap<String, SolutionNeed> = IndexMap::new();
        for id in chain.op_ids() {
            let o = op(ops, id)?;
            for d in draws(o, carry) {
                if produced.contains(&d.source_key) {
                    continue;
                }
                let input = &o.inputs[d.input];
                let next = needs.len();
                let need = needs
                    .entry(input.name.clone())
                    .or_insert_with(|| SolutionNeed {
                        name: input.name.clone(),
                        liquid_type: input.liquid_type.clone(),
                        single_instance: input.single_instance,
                        concentration: input.concentration.clone(),
                        supplied: 0.0,
                        required: 0.0,
                        wanting: 0.0,
                        unserved: Vec::new(),
                        first_required: next,
                    });
                need.required += d.volume;
                match left.get_mut(&input.name).and_then(|w| first_fit(w, d.volume)) {
                    Some(slot) => slot.1 -= d.volume,
                    None => need.unserved.push(d.volume),
                }
            }
        }

        for (name, wells) in caller_wells(state) {
            if let Some(need) = needs.get_mut(&name) {
                need.supplied = wells.iter().map(|(_, v)| v).sum();
            }
        }

        for need in needs.values_mut() {
            let short = need.required - need.supplied;
            need.wanting = if short > VOLUME_EPSILON { short } else { 0.0 };
        }
        info!(
            "{} source liquid(s) required, {} short",
            needs.len(),
            needs.values().filter(|n| n.wanting > 0.0).count()
        );
        Ok(Self { needs })
    }

    /// Liquids with a shortfall, in first-required order.
    pub fn wanting(&self) -> IndexMap<String, f64> {
        self.needs
            .values()
            .filter(|n| n.wanting > 0.0)
            .map(|n| (n.name.clone(), n.wanting))
            .collect()
    }

    pub fn is_satisfied(&self) -> bool {
        self.needs.values().all(|n| n.wanting <= 0.0)
    }
}

/// Wells of one plate type dedicated to one liquid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub liquid: String,
    pub plate_type: String,
    /// Regular wells, spare excluded
    pub wells: u32,
    /// Volume to load across the regular wells: packed draws plus residuals
    pub supply: f64,
    /// Volume loaded into each regular well, residual included
    pub loads: Vec<f64>,
    pub spare: bool,
}

impl Allocation {
    /// Wells placed on the deck, spare included.
    pub fn placed_wells(&self) -> u32 {
        self.wells + u32::from(self.spare)
    }
}

/// Pack draws into wells of `capacity` working volume in order, filling each
/// well before opening the next. Returns the volume packed per well.
pub fn pack_draws(draws: &[f64], capacity: f64) -> Vec<f64> {
    let mut wells: Vec<f64> = Vec::new();
    for &d in draws {
        match wells.last_mut() {
            Some(w) if *w + d <= capacity + VOLUME_EPSILON => *w += d,
            _ => wells.push(d),
        }
    }
    wells
}

/// Choose a plate type per short liquid with the well-count program, then
/// size its wells from the draws they must serve.
pub fn allocate(
    solutions: &InputSolutions,
    inventory: &dyn Inventory,
    policy: &Policy,
) -> PlanResult<Vec<Allocation>> {
    let short: Vec<&SolutionNeed> = solutions
        .needs
        .values()
        .filter(|n| !n.unserved.is_empty())
        .collect();
    if short.is_empty() {
        return Ok(Vec::new());
    }
    if policy.input_plate_types.is_empty() {
        return Err(PlanError::Configuration(format!(
            "no input plate types configured but {} liquid(s) must be auto-allocated ({})",
            short.len(),
            short.iter().map(|n| n.name.as_str()).collect::<Vec<_>>().join(", ")
        )));
    }
    let types: Vec<PlateType> = policy
        .input_plate_types
        .iter()
        .map(|name| {
            inventory
                .plate_type(name)
                .cloned()
                .ok_or_else(|| PlanError::Configuration(format!("unknown input plate type '{}'", name)))
        })
        .collect::<PlanResult<_>>()?;
    let cost = |t: &PlateType| t.residual_volume * policy.residual_weight + policy.well_base_cost;

    let nt = types.len();
    let nv = short.len() * nt;
    let mut objective = Vec::with_capacity(nv);
    for _ in &short {
        for t in &types {
            objective.push(cost(t));
        }
    }
    let mut lp = LinearProgram::minimize(objective);

    for (li, need) in short.iter().enumerate() {
        let wanted = need.shortfall();
        let mut cover = vec![0.0; nv];
        let mut count = vec![0.0; nv];
        let mut fits_any = false;
        for (ti, t) in types.iter().enumerate() {
            let v = li * nt + ti;
            if need.single_instance && t.working_volume() + VOLUME_EPSILON < wanted {
                let mut bar = vec![0.0; nv];
                bar[v] = 1.0;
                lp.constrain(bar, Cmp::Le, 0.0);
                continue;
            }
            fits_any = true;
            cover[v] = t.working_volume();
            count[v] = 1.0;
        }
        if need.single_instance {
            if !fits_any {
                let largest = types.iter().map(|t| t.working_volume()).fold(0.0, f64::max);
                return Err(PlanError::Volume(format!(
                    "single-instance liquid '{}' needs {:.2} ul but the largest input well holds {:.2} ul",
                    need.name, wanted, largest
                )));
            }
            lp.constrain(count, Cmp::Le, 1.0);
        }
        lp.constrain(cover, Cmp::Ge, wanted);
    }
    let plates: Vec<f64> = (0..nv).map(|v| 1.0 / f64::from(types[v % nt].wells())).collect();
    lp.constrain(plates, Cmp::Le, policy.max_plates);
    lp.constrain(vec![1.0; nv], Cmp::Le, policy.max_wells);

    let solution = lp.solve().map_err(|e| match e {
        LpError::Infeasible => PlanError::Volume(format!(
            "cannot supply {} within {} plate(s) / {} well(s)",
            short
                .iter()
                .map(|n| format!("{} ({:.2} ul)", n.name, n.shortfall()))
                .collect::<Vec<_>>()
                .join(", "),
            policy.max_plates,
            policy.max_wells
        )),
        other => PlanError::Dire(format!("input allocation: {}", other)),
    })?;
    debug!("allocation objective {:.4}", solution.objective);

    let mut out = Vec::new();
    let mut plate_share = 0.0;
    for (li, need) in short.iter().enumerate() {
        let xs = &solution.x[li * nt..(li + 1) * nt];
        // A single instance must hold everything, otherwise the largest draw
        let must_hold = if need.single_instance {
            need.shortfall()
        } else {
            need.unserved.iter().copied().fold(0.0, f64::max)
        };
        let Some(ti) = (0..nt)
            .filter(|&t| types[t].working_volume() + VOLUME_EPSILON >= must_hold)
            .min_by(|&a, &b| {
                xs[b]
                    .total_cmp(&xs[a])
                    .then_with(|| cost(&types[a]).total_cmp(&cost(&types[b])))
                    .then_with(|| a.cmp(&b))
            })
        else {
            let largest = types.iter().map(|t| t.working_volume()).fold(0.0, f64::max);
            return Err(PlanError::Volume(format!(
                "'{}' is drawn {:.2} ul at once but the largest input well holds {:.2} ul",
                need.name, must_hold, largest
            )));
        };
        let t = &types[ti];
        let loads: Vec<f64> = pack_draws(&need.unserved, t.working_volume())
            .into_iter()
            .map(|v| v + t.residual_volume)
            .collect();
        debug!(
            "'{}': {} well(s) of {} (program asked for {:.2})",
            need.name,
            loads.len(),
            t.name,
            xs[ti]
        );
        let a = Allocation {
            liquid: need.name.clone(),
            plate_type: t.name.clone(),
            wells: loads.len() as u32,
            supply: loads.iter().sum(),
            loads,
            spare: policy.spare_wells && !need.single_instance,
        };
        plate_share += f64::from(a.placed_wells()) / f64::from(t.wells());
        out.push(a);
    }

    let total_wells: u32 = out.iter().map(Allocation::placed_wells).sum();
    if f64::from(total_wells) > policy.max_wells + VOLUME_EPSILON
        || plate_share > policy.max_plates + VOLUME_EPSILON
    {
        return Err(PlanError::Volume(format!(
            "inputs need {} well(s) on {:.2} plate(s), over the limit of {} well(s) / {} plate(s)",
            total_wells, plate_share, policy.max_wells, policy.max_plates
        )));
    }
    info!(
        "allocated {} well(s) for {} liquid(s)",
        total_wells,
        short.len()
    );
    Ok(out)
}

/// One auto-allocated well.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedWell {
    pub liquid: String,
    pub location: Location,
    pub volume: f64,
    /// Safety margin, drawn from only once regular wells run out
    pub spare: bool,
}

/// Put allocations onto concrete input plates, largest liquid first.
pub fn place(
    allocations: &[Allocation],
    solutions: &InputSolutions,
    state: &mut DeviceState,
    inventory: &mut dyn Inventory,
    policy: &Policy,
) -> PlanResult<Vec<PlacedWell>> {
    let mut order: Vec<&Allocation> = allocations.iter().collect();
    order.sort_by(|a, b| b.supply.total_cmp(&a.supply).then_with(|| a.liquid.cmp(&b.liquid)));

    let mut open: IndexMap<String, String> = IndexMap::new();
    let mut placed = Vec::new();
    for a in order {
        let name = a.liquid.as_str();
        let need = solutions
            .needs
            .get(name)
            .ok_or_else(|| PlanError::Dire(format!("allocation for unknown liquid '{}'", name)))?;
        // The spare matches the fullest regular well
        let spare_load = a.loads.iter().copied().fold(0.0, f64::max);
        let wells = a
            .loads
            .iter()
            .map(|&v| (v, false))
            .chain(a.spare.then_some((spare_load, true)));
        for (volume, spare) in wells {
            let loc = next_input_well(&a.plate_type, &mut open, state, inventory, policy)?;
            let mut liquid = Liquid::new(&format!("{}@{}", name, loc), name, volume)
                .with_type(&need.liquid_type);
            liquid.single_instance = need.single_instance;
            liquid.concentration = need.concentration.clone();
            let plate = state
                .plate_mut(&loc.plate_id)
                .ok_or_else(|| PlanError::Dire(format!("plate '{}' vanished", loc.plate_id)))?;
            plate
                .put(loc.well, liquid, true)
                .map_err(|e| PlanError::Volume(format!("placing '{}': {}", name, e)))?;
            placed.push(PlacedWell {
                liquid: name.to_string(),
                location: loc,
                volume,
                spare,
            });
        }
        debug!("placed '{}'", name);
    }
    Ok(placed)
}

fn next_input_well(
    plate_type: &str,
    open: &mut IndexMap<String, String>,
    state: &mut DeviceState,
    inventory: &mut dyn Inventory,
    policy: &Policy,
) -> PlanResult<Location> {
    if let Some(id) = open.get(plate_type) {
        if let Some(c) = state.plate(id).and_then(|p| p.next_free(policy.well_order)) {
            return Ok(Location::new(id, c));
        }
    }
    let plate = inventory.new_plate_of_type(plate_type)?;
    let id = plate.id.clone();
    debug!("new input plate {} ({})", id, plate_type);
    state.add_plate(plate, PlateRole::Input);
    open.insert(plate_type.to_string(), id.clone());
    let c = state
        .plate(&id)
        .and_then(|p| p.next_free(policy.well_order))
        .ok_or_else(|| PlanError::Configuration(format!("plate type '{}' has no wells", plate_type)))?;
    Ok(Location::new(&id, c))
}

/// Bind every source-liquid draw to a concrete well. Returns the volume
/// drawn from each well, carry included.
pub fn bind_inputs(
    chain: &Chain,
    ops: &mut OperationSet,
    state: &DeviceState,
    placed: &[PlacedWell],
    carry: f64,
) -> PlanResult<IndexMap<Location, f64>> {
    let produced = produced_ids(ops);

    // Candidate wells per liquid name: caller wells, placed wells, spares
    let mut candidates = caller_wells(state);
    for spare in [false, true] {
        for p in placed.iter().filter(|p| p.spare == spare) {
            let residual = state.residual_at(&p.location)?;
            candidates
                .entry(p.liquid.clone())
                .or_default()
                .push((p.location.clone(), (p.volume - residual).max(0.0)));
        }
    }

    let mut drawn: IndexMap<Location, f64> = IndexMap::new();
    let mut bound = 0usize;
    for stage in &chain.stages {
        for id in &stage.op_ids {
            let o = ops
                .get_mut(id)
                .ok_or_else(|| PlanError::Dire(format!("chain references unknown operation '{}'", id)))?;
            let op_draws = draws(o, carry);
            let op_id = o.id.clone();
            for d in op_draws {
                if produced.contains(&d.source_key) {
                    continue;
                }
                let input = &mut o.inputs[d.input];
                let wells = candidates.get_mut(&input.name).ok_or_else(|| {
                    PlanError::Volume(format!(
                        "mix '{}': no well holds any '{}'",
                        op_id, input.name
                    ))
                })?;
                let total: f64 = wells.iter().map(|(_, l)| l).sum();
                let count = wells.len();
                let Some(slot) = first_fit(wells, d.volume) else {
                    return Err(PlanError::Volume(format!(
                        "mix '{}': no single well of '{}' holds {:.2} ul ({:.2} ul left across {} well(s))",
                        op_id, input.name, d.volume, total, count
                    )));
                };
                slot.1 -= d.volume;
                *drawn.entry(slot.0.clone()).or_insert(0.0) += d.volume;
                input.location = Some(slot.0.clone());
                bound += 1;
            }
        }
    }
    info!("bound {} source draw(s) to {} well(s)", bound, drawn.len());
    Ok(drawn)
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

    fn water_dna() -> (OperationSet, Chain) {
        let water = Liquid::new("water", "water", 0.0);
        let dna = Liquid::new("dna", "dna_part", 0.0);
        let m = Operation::mix(
            "m",
            vec![water.sample("m/0", 50.0), dna.sample("m/1", 25.0)],
            Liquid::new("m/out", "water+dna_part", 75.0),
        );
        let mut set = ops(vec![m]);
        let chain = sequence(&mut set).unwrap();
        (set, chain)
    }

    fn water_mixes(volumes: &[f64]) -> (OperationSet, Chain) {
        let water = Liquid::new("water", "water", 0.0);
        let list: Vec<Operation> = volumes
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let id = format!("m{}", i);
                Operation::mix(
                    &id,
                    vec![water.sample(&format!("{}/0", id), v)],
                    Liquid::new(&format!("{}/out", id), "water", v),
                )
            })
            .collect();
        let mut set = ops(list);
        let chain = sequence(&mut set).unwrap();
        (set, chain)
    }

    /// Allocate, place and bind with the builtin catalog.
    fn plan_inputs(
        set: &mut OperationSet,
        chain: &Chain,
        state: &mut DeviceState,
        policy: &Policy,
    ) -> PlanResult<(Vec<Allocation>, Vec<PlacedWell>, IndexMap<Location, f64>)> {
        let mut catalog = LabwareCatalog::builtin();
        let solutions = InputSolutions::compute(chain, set, state, policy.carry_volume)?;
        let allocs = allocate(&solutions, &catalog, policy)?;
        let placed = place(&allocs, &solutions, state, &mut catalog, policy)?;
        let drawn = bind_inputs(chain, set, state, &placed, policy.carry_volume)?;
        Ok((allocs, placed, drawn))
    }

    #[test]
    fn test_lh008_required_supply_scenario() {
        let (set, chain) = water_dna();
        let state = DeviceState::new();
        let solutions = InputSolutions::compute(&chain, &set, &state, 0.5).unwrap();
        assert_eq!(solutions.needs["water"].first_required, 0);
        assert!((solutions.needs["water"].required - 50.5).abs() < VOLUME_EPSILON);
        assert!((solutions.needs["dna_part"].wanting - 25.5).abs() < VOLUME_EPSILON);

        let catalog = LabwareCatalog::builtin();
        let allocs = allocate(&solutions, &catalog, &Policy::default()).unwrap();
        let water = allocs.iter().find(|a| a.liquid == "water").unwrap();
        let dna = allocs.iter().find(|a| a.liquid == "dna_part").unwrap();
        assert_eq!(water.wells, 1);
        assert_eq!(water.plate_type, "pcrplate_skirted");
        assert!((water.supply - 55.0).abs() < VOLUME_EPSILON);
        assert!((dna.supply - 30.0).abs() < VOLUME_EPSILON);
    }

    #[test]
    fn test_lh008_caller_wells_reduce_wanting() {
        let (set, chain) = water_dna();
        let mut catalog = LabwareCatalog::builtin();
        let mut state = DeviceState::new();
        let mut plate = catalog.new_plate_of_type("pcrplate_skirted").unwrap();
        plate
            .put(WellCoords::new(0, 0), Liquid::new("u1", "water", 200.0), false)
            .unwrap();
        state.add_plate(plate, PlateRole::Input);
        let solutions = InputSolutions::compute(&chain, &set, &state, 0.5).unwrap();
        assert_eq!(solutions.needs["water"].wanting, 0.0);
        assert!((solutions.needs["water"].supplied - 195.5).abs() < VOLUME_EPSILON);
        assert_eq!(solutions.wanting().keys().collect::<Vec<_>>(), vec!["dna_part"]);
        assert!(!solutions.is_satisfied());
    }

    #[test]
    fn test_lh008_no_input_types_is_configuration_error() {
        let (set, chain) = water_dna();
        let solutions = InputSolutions::compute(&chain, &set, &DeviceState::new(), 0.5).unwrap();
        let policy = Policy {
            input_plate_types: vec![],
            ..Policy::default()
        };
        let err = allocate(&solutions, &LabwareCatalog::builtin(), &policy).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_lh008_infeasible_allocation() {
        let water = Liquid::new("water", "water", 0.0);
        let list: Vec<Operation> = (0..4)
            .map(|i| {
                let id = format!("m{}", i);
                Operation::mix(
                    &id,
                    vec![water.sample(&format!("{}/0", id), 190.0)],
                    Liquid::new(&format!("{}/out", id), "water", 190.0),
                )
            })
            .collect();
        let mut set = ops(list);
        let chain = sequence(&mut set).unwrap();
        let solutions = InputSolutions::compute(&chain, &set, &DeviceState::new(), 0.5).unwrap();
        let policy = Policy {
            max_wells: 2.0,
            ..Policy::default()
        };
        let err = allocate(&solutions, &LabwareCatalog::builtin(), &policy).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Volume);
        assert!(err.to_string().contains("water"));
    }

    #[test]
    fn test_lh008_cheaper_plate_type_preferred() {
        let (set, chain) = water_dna();
        let solutions = InputSolutions::compute(&chain, &set, &DeviceState::new(), 0.5).unwrap();
        let policy = Policy {
            input_plate_types: vec!["dsw96".into(), "pcrplate".into()],
            ..Policy::default()
        };
        let allocs = allocate(&solutions, &LabwareCatalog::builtin(), &policy).unwrap();
        assert!(allocs.iter().all(|a| a.plate_type == "pcrplate"));
    }

    #[test]
    fn test_lh008_place_orders_and_adds_spares() {
        let (mut set, chain) = water_dna();
        let mut catalog = LabwareCatalog::builtin();
        let mut state = DeviceState::new();
        let policy = Policy::default();
        let solutions = InputSolutions::compute(&chain, &set, &state, 0.5).unwrap();
        let allocs = allocate(&solutions, &catalog, &policy).unwrap();
        let placed = place(&allocs, &solutions, &mut state, &mut catalog, &policy).unwrap();
        // water (55 ul) before dna_part (30 ul), each with one spare
        assert_eq!(placed.len(), 4);
        assert_eq!(placed[0].liquid, "water");
        assert!(!placed[0].spare);
        assert!(placed[1].spare);
        assert_eq!(placed[2].liquid, "dna_part");
        assert_eq!(placed[0].location.to_string(), "plate-0001:A1");
        assert_eq!(placed[1].location.to_string(), "plate-0001:B1");
        assert_eq!(state.plate_ids(PlateRole::Input).len(), 1);

        let drawn = bind_inputs(&chain, &mut set, &state, &placed, 0.5).unwrap();
        assert_eq!(drawn.len(), 2);
        assert!((drawn[&placed[0].location] - 50.5).abs() < VOLUME_EPSILON);
        assert_eq!(set["m"].inputs[0].location.as_ref(), Some(&placed[0].location));
    }

    #[test]
    fn test_lh008_single_instance_gets_one_well_without_spare() {
        let mut enzyme = Liquid::new("enz", "enzyme", 0.0);
        enzyme.single_instance = true;
        let m = Operation::mix("m", vec![enzyme.sample("m/0", 10.0)], Liquid::new("m/out", "enzyme", 10.0));
        let mut set = ops(vec![m]);
        let chain = sequence(&mut set).unwrap();
        let mut catalog = LabwareCatalog::builtin();
        let mut state = DeviceState::new();
        let policy = Policy::default();
        let solutions = InputSolutions::compute(&chain, &set, &state, 0.5).unwrap();
        assert!(solutions.needs["enzyme"].single_instance);
        let allocs = allocate(&solutions, &catalog, &policy).unwrap();
        assert_eq!(allocs.len(), 1);
        assert_eq!(allocs[0].wells, 1);
        let placed = place(&allocs, &solutions, &mut state, &mut catalog, &policy).unwrap();
        assert_eq!(placed.len(), 1);
    }

    #[test]
    fn test_lh008_single_instance_too_large() {
        let mut enzyme = Liquid::new("enz", "enzyme", 0.0);
        enzyme.single_instance = true;
        let list: Vec<Operation> = (0..3)
            .map(|i| {
                let id = format!("m{}", i);
                Operation::mix(
                    &id,
                    vec![enzyme.sample(&format!("{}/0", id), 100.0)],
                    Liquid::new(&format!("{}/out", id), "enzyme", 100.0),
                )
            })
            .collect();
        let mut set = ops(list);
        let chain = sequence(&mut set).unwrap();
        let solutions = InputSolutions::compute(&chain, &set, &DeviceState::new(), 0.5).unwrap();
        let err = allocate(&solutions, &LabwareCatalog::builtin(), &Policy::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Volume);
        assert!(err.to_string().contains("single-instance"));
    }

    #[test]
    fn test_lh008_binding_spills_to_spare() {
        let water = Liquid::new("water", "water", 0.0);
        let list: Vec<Operation> = (0..3)
            .map(|i| {
                let id = format!("m{}", i);
                Operation::mix(
                    &id,
                    vec![water.sample(&format!("{}/0", id), 60.0)],
                    Liquid::new(&format!("{}/out", id), "water", 60.0),
                )
            })
            .collect();
        let mut set = ops(list);
        let chain = sequence(&mut set).unwrap();
        let mut state = DeviceState::new();
        let loc = |c: u32| Location::new("plate-0001", WellCoords::new(c, 0));
        let mut catalog = LabwareCatalog::builtin();
        let mut plate = catalog.new_plate_of_type("pcrplate_skirted").unwrap();
        plate.put(WellCoords::new(0, 0), Liquid::new("a", "water", 130.0), true).unwrap();
        plate.put(WellCoords::new(1, 0), Liquid::new("b", "water", 130.0), true).unwrap();
        state.add_plate(plate, PlateRole::Input);
        let placed = vec![
            PlacedWell { liquid: "water".into(), location: loc(0), volume: 130.0, spare: false },
            PlacedWell { liquid: "water".into(), location: loc(1), volume: 130.0, spare: true },
        ];
        let drawn = bind_inputs(&chain, &mut set, &state, &placed, 0.5).unwrap();
        // 125.5 working: two 60.5 draws fit the regular well, the third spills
        assert!((drawn[&loc(0)] - 121.0).abs() < VOLUME_EPSILON);
        assert!((drawn[&loc(1)] - 60.5).abs() < VOLUME_EPSILON);
    }

    #[test]
    fn test_lh008_binding_runs_dry() {
        let (mut set, chain) = water_dna();
        let state = DeviceState::new();
        let err = bind_inputs(&chain, &mut set, &state, &[], 0.5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Volume);
        assert!(err.to_string().contains("mix 'm'"));
    }
    #[test]
    fn test_lh008_pack_fills_before_opening() {
        assert_eq!(pack_draws(&[150.5, 100.5], 195.5), vec![150.5, 100.5]);
        assert_eq!(pack_draws(&[60.0, 60.0, 60.0, 100.0], 195.5), vec![180.0, 100.0]);
        assert!(pack_draws(&[], 195.5).is_empty());
    }

    #[test]
    fn test_lh008_uneven_draws_each_get_a_fitting_well() {
        let (mut set, chain) = water_mixes(&[150.0, 100.0]);
        let mut state = DeviceState::new();
        let (allocs, placed, drawn) =
            plan_inputs(&mut set, &chain, &mut state, &Policy::default()).unwrap();
        assert_eq!(allocs.len(), 1);
        assert_eq!(allocs[0].wells, 2);
        assert_eq!(allocs[0].loads, vec![155.0, 105.0]);
        assert!((allocs[0].supply - 260.0).abs() < VOLUME_EPSILON);
        // two regular wells, then the spare sized like the fullest one
        assert_eq!(placed.len(), 3);
        assert!(placed[2].spare);
        assert!((placed[2].volume - 155.0).abs() < VOLUME_EPSILON);
        assert!((drawn[&placed[0].location] - 150.5).abs() < VOLUME_EPSILON);
        assert!((drawn[&placed[1].location] - 100.5).abs() < VOLUME_EPSILON);
        assert!(!drawn.contains_key(&placed[2].location));
    }

    #[test]
    fn test_lh008_equal_draws_without_spares() {
        let (mut set, chain) = water_mixes(&[100.0, 100.0, 100.0]);
        let mut state = DeviceState::new();
        let policy = Policy {
            spare_wells: false,
            ..Policy::default()
        };
        let (allocs, placed, drawn) = plan_inputs(&mut set, &chain, &mut state, &policy).unwrap();
        assert_eq!(allocs[0].wells, 3);
        assert!(!allocs[0].spare);
        assert_eq!(placed.len(), 3);
        assert_eq!(drawn.len(), 3);
        for id in ["m0", "m1", "m2"] {
            assert!(set[id].inputs[0].location.is_some());
        }
    }

    #[test]
    fn test_lh008_fragmented_caller_wells_are_topped_up() {
        let (mut set, chain) = water_mixes(&[150.0]);
        let mut catalog = LabwareCatalog::builtin();
        let mut state = DeviceState::new();
        let mut plate = catalog.new_plate_of_type("pcrplate_skirted").unwrap();
        for r in 0..2 {
            plate
                .put(WellCoords::new(r, 0), Liquid::new(&format!("u{}", r), "water", 104.5), false)
                .unwrap();
        }
        state.add_plate(plate, PlateRole::Input);
        let solutions = InputSolutions::compute(&chain, &set, &state, 0.5).unwrap();
        // enough water in total, but no caller well takes the whole draw
        assert_eq!(solutions.needs["water"].wanting, 0.0);
        assert_eq!(solutions.needs["water"].unserved, vec![150.5]);

        let policy = Policy::default();
        let allocs = allocate(&solutions, &catalog, &policy).unwrap();
        assert_eq!(allocs[0].loads, vec![155.0]);
        let placed = place(&allocs, &solutions, &mut state, &mut catalog, &policy).unwrap();
        let drawn = bind_inputs(&chain, &mut set, &state, &placed, 0.5).unwrap();
        assert_eq!(drawn.keys().collect::<Vec<_>>(), vec![&placed[0].location]);
    }

    #[test]
    fn test_lh008_draw_larger_than_any_input_well() {
        let (set, chain) = water_mixes(&[300.0]);
        let solutions = InputSolutions::compute(&chain, &set, &DeviceState::new(), 0.5).unwrap();
        let err = allocate(&solutions, &LabwareCatalog::builtin(), &Policy::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Volume);
    }

    #[test]
    fn test_lh008_spare_wells_count_against_limits() {
        let (set, chain) = water_dna();
        let solutions = InputSolutions::compute(&chain, &set, &DeviceState::new(), 0.5).unwrap();
        let catalog = LabwareCatalog::builtin();
        let tight = Policy {
            max_wells: 3.0,
            ..Policy::default()
        };
        let err = allocate(&solutions, &catalog, &tight).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Volume);
        assert!(err.to_string().contains("4 well(s)"));

        let no_spares = Policy {
            spare_wells: false,
            ..tight.clone()
        };
        assert_eq!(allocate(&solutions, &catalog, &no_spares).unwrap().len(), 2);

        let few_plates = Policy {
            max_plates: 3.0 / 96.0,
            ..Policy::default()
        };
        let err = allocate(&solutions, &catalog, &few_plates).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Volume);
    }
}
