//! LH-021: Orchestrator, the planning pipeline end to end.
//!
//! sequence → assert → solutions → layout → assert → propagate → assert →
//! inputs → deck → instructions → shrink → remap → simulate
//!
//! Every step either succeeds or aborts the run; no partial plan escapes.

use super::codegen;
use super::deck;
use super::error::{PlanError, PlanResult};
use super::inputs::{self, Allocation, InputSolutions};
use super::labware::{Inventory, LabwareCatalog};
use super::layout;
use super::parser;
use super::planner::{self, InstructionTree};
use super::sequencer::{self, Chain};
use super::solutions;
use super::state::{reidentify, DeviceSnapshot, DeviceState, PlateIdMap, PlateRole};
use super::types::*;
use super::volumes;
use crate::driver::simulator::{Diagnostic, Simulator, VolumeSimulator};
use crate::instructions::{ExpandCtx, Instruction};
use indexmap::IndexMap;
use log::{info, warn};
use std::time::Instant;

/// A complete, consistent planning result.
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: String,
    /// Operations after prompt merging, volume inflation and placement
    pub ops: OperationSet,
    pub chain: Chain,
    pub tree: InstructionTree,
    /// Terminal instructions, addressed to the `before` plate ids
    pub instructions: Vec<Instruction>,
    pub solutions: InputSolutions,
    pub allocations: Vec<Allocation>,
    /// Mixes whose volumes were raised to cover downstream draws
    pub inflated: Vec<String>,
    /// What must be on the deck when the run starts
    pub before: DeviceSnapshot,
    /// Re-identified deck after replaying the run
    pub after: DeviceSnapshot,
    pub id_map: PlateIdMap,
    /// Non-blocking (or explicitly allowed) simulator findings
    pub diagnostics: Vec<Diagnostic>,
}

impl Plan {
    pub fn count(&self, kind: &str) -> usize {
        crate::instructions::count(&self.instructions, kind)
    }
}

/// Runs the pipeline over an injected inventory and simulator.
pub struct Orchestrator<'a> {
    pub inventory: &'a mut dyn Inventory,
    pub policy: &'a Policy,
    pub simulator: &'a dyn Simulator,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        inventory: &'a mut dyn Inventory,
        policy: &'a Policy,
        simulator: &'a dyn Simulator,
    ) -> Self {
        Self {
            inventory,
            policy,
            simulator,
        }
    }

    /// Plan `ops` against the caller's plates in `state`.
    pub fn plan(&mut self, name: &str, mut ops: OperationSet, mut state: DeviceState) -> PlanResult<Plan> {
        let start = Instant::now();
        let policy = self.policy;
        let carry = policy.carry_volume;
        info!("planning '{}': {} operation(s)", name, ops.len());

        let chain = sequencer::sequence(&mut ops)?;
        sequencer::check_homogeneous(&chain, &ops)?;
        volumes::assert_volumes(&chain, &ops)?;

        solutions::setup_solutions(&chain, &mut ops)?;

        layout::layout(&chain, &mut ops, &mut state, self.inventory, policy)?;
        layout::assert_destinations(&chain, &ops)?;

        let inflated = volumes::propagate(&chain, &mut ops, carry, |loc| state.residual_at(loc))?;
        volumes::assert_volumes(&chain, &ops)?;
        volumes::assert_draws(&chain, &ops)?;
        layout::assert_capacity(&chain, &ops, &state)?;
        // Concentrations follow the inflated volumes
        solutions::setup_solutions(&chain, &mut ops)?;

        let solutions = InputSolutions::compute(&chain, &ops, &state, carry)?;
        let allocations = inputs::allocate(&solutions, &*self.inventory, policy)?;
        let placed = inputs::place(&allocations, &solutions, &mut state, self.inventory, policy)?;
        let drawn = inputs::bind_inputs(&chain, &mut ops, &state, &placed, carry)?;

        deck::setup_deck(&mut state, self.inventory, policy)?;

        let tree = planner::build_tree(&chain, &ops)?;
        let instructions = {
            let mut ctx = ExpandCtx::new(&ops, &mut state, self.inventory, policy);
            codegen::expand_tree(&mut ctx, &tree)?
        };

        shrink(&mut state, &drawn);
        reset_consumables(&mut state);
        let before = DeviceSnapshot::freeze(state);

        let (after_start, id_map) = reidentify(before.state(), self.inventory)?;
        let remapped: Vec<Instruction> = instructions.iter().map(|i| i.remap(&id_map)).collect();
        let report = self.simulator.simulate(&remapped, &after_start);
        for d in report.warnings() {
            warn!("simulator: {}", d);
        }
        if report.has_errors() {
            let errors: Vec<String> = report.errors().map(|d| d.to_string()).collect();
            if !policy.allow_simulation_errors {
                return Err(PlanError::Simulation(format!(
                    "{} blocking diagnostic(s): {}",
                    errors.len(),
                    errors.join("; ")
                )));
            }
            for e in &errors {
                warn!("simulator (allowed): {}", e);
            }
        }

        info!(
            "planned '{}': {} stage(s), {} instruction(s), {} auto-allocated liquid(s) in {:.1?}",
            name,
            chain.len(),
            instructions.len(),
            solutions.wanting().len(),
            start.elapsed()
        );
        Ok(Plan {
            name: name.to_string(),
            ops,
            chain,
            tree,
            instructions,
            solutions,
            allocations,
            inflated,
            before,
            after: DeviceSnapshot::freeze(report.end_state),
            id_map,
            diagnostics: report.diagnostics,
        })
    }
}

/// Cut auto-allocated wells down to what is drawn from them plus residual;
/// wells never drawn from are emptied and plates left empty are dropped.
pub fn shrink(state: &mut DeviceState, drawn: &IndexMap<Location, f64>) {
    let mut emptied = Vec::new();
    for id in state.plate_ids(PlateRole::Input) {
        let Some(plate) = state.plate_mut(&id) else {
            continue;
        };
        let mut auto_wells = 0;
        for well in plate.wells.iter_mut().filter(|w| w.auto_allocated) {
            auto_wells += 1;
            let loc = Location::new(&id, well.coords);
            match drawn.get(&loc) {
                Some(&used) if used > VOLUME_EPSILON => {
                    if let Some(l) = well.contents.as_mut() {
                        l.volume = used + well.residual_volume;
                    }
                }
                _ => {
                    if let Some(l) = well.contents.take() {
                        warn!("dropping unused well {} ({})", loc, l.name);
                    }
                    well.auto_allocated = false;
                }
            }
        }
        if auto_wells > 0 && plate.wells.iter().all(|w| w.is_empty()) {
            emptied.push(id);
        }
    }
    for id in emptied {
        info!("dropping unused input plate {}", id);
        state.drop_plate(&id);
    }
}

/// Tips and tipwaste start the run fresh.
fn reset_consumables(state: &mut DeviceState) {
    for tb in &mut state.tipboxes {
        tb.used = 0;
    }
    for w in &mut state.tipwastes {
        w.contents = 0;
    }
}

/// Validate, build and plan a parsed request with the builtin simulator.
pub fn plan_request(request: &PlanRequest) -> PlanResult<Plan> {
    let errors = parser::validate_request(request);
    if !errors.is_empty() {
        let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(PlanError::InvalidRequest(msgs.join("; ")));
    }
    let mut catalog = LabwareCatalog::with_spec(&request.labware);
    let (state, plate_ids) = parser::build_plates(request, &mut catalog)?;
    let ops = parser::build_operations(request, &plate_ids)?;
    let simulator = VolumeSimulator::new(request.policy.carry_volume);
    Orchestrator::new(&mut catalog, &request.policy, &simulator).plan(&request.name, ops, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::manifest;
    use crate::core::parser::parse_request;
    use crate::driver::simulator::{Severity, SimulationReport};

    fn plan_yaml(yaml: &str) -> PlanResult<Plan> {
        let _ = env_logger::builder().is_test(true).try_init();
        plan_request(&parse_request(yaml).unwrap())
    }

    const SCENARIO_1: &str = r#"
version: "1.0"
name: water-dna
liquids:
  water: {}
  dna: { name: dna_part }
operations:
  - id: m
    mix:
      components:
        - { liquid: water, volume: 50 }
        - { liquid: dna, volume: 25 }
"#;

    #[test]
    fn test_lh021_required_supply() {
        let plan = plan_yaml(SCENARIO_1).unwrap();
        let wanting = plan.solutions.wanting();
        assert!((wanting["water"] - 50.5).abs() < 1e-9);
        assert!((wanting["dna_part"] - 25.5).abs() < 1e-9);
        let supply = |name: &str| -> f64 {
            plan.allocations
                .iter()
                .filter(|a| a.liquid == name)
                .map(|a| a.supply)
                .sum()
        };
        assert!((supply("water") - 55.0).abs() < 1e-6);
        assert!((supply("dna_part") - 30.0).abs() < 1e-6);
        assert!(plan.diagnostics.is_empty(), "{:?}", plan.diagnostics);

        // Spare wells are dropped by shrink: one well per liquid remains
        let before = plan.before.state();
        let auto: Vec<&Well> = before
            .plates
            .values()
            .flat_map(|p| p.wells.iter())
            .filter(|w| w.auto_allocated)
            .collect();
        assert_eq!(auto.len(), 2);
        assert!(auto.iter().any(|w| (w.volume() - 55.0).abs() < 1e-6));
    }

    #[test]
    fn test_lh021_carry_inflates_product() {
        let mut yaml = String::from(
            r#"
version: "1.0"
name: milk
liquids: { water: {}, milk: {} }
operations:
  - id: wm
    mix:
      components:
        - { liquid: water, volume: 50 }
        - { liquid: milk, volume: 50 }
"#,
        );
        for i in 0..10 {
            yaml.push_str(&format!(
                "  - id: d{}\n    mix: {{ components: [ {{ liquid: wm, volume: 15 }} ] }}\n",
                i
            ));
        }
        let plan = plan_yaml(&yaml).unwrap();
        assert_eq!(plan.inflated, vec!["wm"]);
        let wm = plan.ops["wm"].product().unwrap();
        assert_eq!(wm.name, "water+milk");
        assert!((wm.volume - 155.0).abs() < 1e-6);
        assert!(!plan.diagnostics.iter().any(|d| d.severity == Severity::Error));
    }

    fn eight_mixes(liquid_type: &str) -> String {
        let mut yaml = format!(
            r#"
version: "1.0"
name: batch
policy:
  input_plate_types: [trough12]
liquids:
  water: {{ type: {t} }}
  mastermix: {{ type: {t} }}
  dna: {{ type: {t} }}
operations:
"#,
            t = liquid_type
        );
        for i in 0..8 {
            yaml.push_str(&format!(
                "  - id: m{}\n    mix:\n      components:\n        - {{ liquid: water, volume: 8 }}\n        - {{ liquid: mastermix, volume: 8 }}\n        - {{ liquid: dna, volume: 1 }}\n",
                i
            ));
        }
        yaml
    }

    #[test]
    fn test_lh021_single_channel_transfers() {
        let plan = plan_yaml(&eight_mixes("single_channel")).unwrap();
        assert_eq!(plan.count("aspirate"), 24);
        assert_eq!(plan.count("dispense"), 24);
    }

    #[test]
    fn test_lh021_multichannel_transfers() {
        let plan = plan_yaml(&eight_mixes("water")).unwrap();
        assert_eq!(plan.count("aspirate"), 3);
        assert_eq!(plan.count("dispense"), 3);
        assert!(plan.diagnostics.is_empty(), "{:?}", plan.diagnostics);
        assert_eq!(plan.instructions.first(), Some(&Instruction::Initialize));
        assert_eq!(plan.instructions.last(), Some(&Instruction::Finalize));
    }

    #[test]
    fn test_lh021_orphaned_split() {
        let yaml = r#"
version: "1.0"
name: orphan
liquids: { water: {} }
operations:
  - id: m
    mix: { components: [ { liquid: water, volume: 50 } ] }
  - id: s
    split: { liquid: m, volume: 10 }
"#;
        let err = plan_yaml(yaml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(err.to_string().contains("split 's'"));
    }

    #[test]
    fn test_lh021_invalid_request_lists_problems() {
        let yaml = r#"
version: "0.9"
name: bad
operations:
  - id: m
    mix: { components: [ { liquid: nothing, volume: 5 } ] }
"#;
        let err = plan_yaml(yaml).unwrap_err();
        assert!(err.kind().is_user_fixable());
        let msg = err.to_string();
        assert!(msg.contains("version") && msg.contains("unknown liquid 'nothing'"));
    }

    #[test]
    fn test_lh021_after_state_is_reidentified_and_filled() {
        let plan = plan_yaml(SCENARIO_1).unwrap();
        assert_eq!(plan.id_map.len(), plan.before.state().plates.len());
        let dest = plan.ops["m"].product().unwrap().location.clone().unwrap();
        let after_id = plan.id_map.after(&dest.plate_id).unwrap();
        let well = plan
            .after
            .state()
            .well(&Location::new(after_id, dest.well))
            .unwrap();
        assert!((well.volume() - 75.0).abs() < 1e-6);
        assert!(plan.before.state().well(&dest).unwrap().is_empty());
    }

    #[test]
    fn test_lh021_deterministic() {
        let a = plan_yaml(&eight_mixes("water")).unwrap();
        let b = plan_yaml(&eight_mixes("water")).unwrap();
        assert_eq!(a.instructions, b.instructions);
        assert_eq!(a.before, b.before);
    }

    #[test]
    fn test_lh021_idempotent_resupply() {
        let first = plan_yaml(SCENARIO_1).unwrap();
        let mut request = parse_request(SCENARIO_1).unwrap();
        request.input_plates = manifest::Manifest::from_plan(&first).input_plates;
        let second = plan_request(&request).unwrap();
        assert!(second.solutions.wanting().is_empty(), "{:?}", second.solutions);
        assert!(second.allocations.is_empty());
    }

    #[test]
    fn test_lh021_product_too_large_for_well() {
        let yaml = r#"
version: "1.0"
name: overflow
liquids: { water: {} }
policy: { input_plate_types: [dsw96] }
operations:
  - id: m
    mix: { components: [ { liquid: water, volume: 300 } ] }
"#;
        let err = plan_yaml(yaml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Volume);
    }

    fn water_mixes_yaml(policy: &str, volumes: &[u32]) -> String {
        let mut yaml = format!(
            "version: \"1.0\"\nname: water\npolicy: {}\nliquids: {{ water: {{}} }}\noperations:\n",
            policy
        );
        for (i, v) in volumes.iter().enumerate() {
            yaml.push_str(&format!(
                "  - id: m{}\n    mix: {{ components: [ {{ liquid: water, volume: {} }} ] }}\n",
                i, v
            ));
        }
        yaml
    }

    fn auto_volumes(plan: &Plan) -> Vec<f64> {
        plan.before
            .state()
            .plates
            .values()
            .flat_map(|p| p.wells.iter())
            .filter(|w| w.auto_allocated)
            .map(|w| w.volume())
            .collect()
    }

    #[test]
    fn test_lh021_uneven_draws_plan() {
        let plan = plan_yaml(&water_mixes_yaml("{}", &[150, 100])).unwrap();
        assert_eq!(plan.allocations[0].wells, 2);
        assert_eq!(auto_volumes(&plan), vec![155.0, 105.0]);
        assert!(!plan.diagnostics.iter().any(|d| d.severity == Severity::Error));
    }

    #[test]
    fn test_lh021_equal_draws_without_spares_plan() {
        let plan = plan_yaml(&water_mixes_yaml("{ spare_wells: false }", &[100, 100, 100])).unwrap();
        assert_eq!(plan.allocations[0].wells, 3);
        assert_eq!(auto_volumes(&plan), vec![105.0, 105.0, 105.0]);
        assert!(!plan.diagnostics.iter().any(|d| d.severity == Severity::Error));
    }

    /// Flags every run with one blocking diagnostic.
    struct Strict;

    impl Simulator for Strict {
        fn simulate(&self, _: &[Instruction], start: &DeviceState) -> SimulationReport {
            SimulationReport {
                diagnostics: vec![Diagnostic {
                    severity: Severity::Error,
                    index: 0,
                    message: "arm collision".into(),
                }],
                end_state: start.clone(),
            }
        }
    }

    fn plan_with_strict(allow: bool) -> PlanResult<Plan> {
        let mut request = parse_request(SCENARIO_1).unwrap();
        request.policy.allow_simulation_errors = allow;
        let mut catalog = LabwareCatalog::with_spec(&request.labware);
        let (state, ids) = parser::build_plates(&request, &mut catalog).unwrap();
        let ops = parser::build_operations(&request, &ids).unwrap();
        Orchestrator::new(&mut catalog, &request.policy, &Strict).plan("strict", ops, state)
    }

    #[test]
    fn test_lh021_simulation_errors_block_unless_allowed() {
        let err = plan_with_strict(false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Simulation);
        assert!(err.to_string().contains("arm collision"));

        let plan = plan_with_strict(true).unwrap();
        assert_eq!(plan.diagnostics.len(), 1);
    }
}
