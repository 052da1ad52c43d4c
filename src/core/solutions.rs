//! LH-006: Solution setup: component concentrations of mix products.

use super::error::{PlanError, PlanResult};
use super::sequencer::Chain;
use super::types::{Concentration, Liquid, OpKind, OperationSet, VOLUME_EPSILON};
use indexmap::IndexMap;
use log::debug;
use rustc_hash::FxHashMap;

type Components = IndexMap<String, Concentration>;

/// Accumulate `value * volume` for one component, enforcing one unit.
fn accumulate(
    acc: &mut IndexMap<String, (f64, String)>,
    op_id: &str,
    component: &str,
    c: &Concentration,
    volume: f64,
) -> PlanResult<()> {
    if c.value < 0.0 || !c.value.is_finite() {
        return Err(PlanError::Concentration(format!(
            "mix '{}': component '{}' has invalid concentration {} {}",
            op_id, component, c.value, c.unit
        )));
    }
    match acc.get_mut(component) {
        Some((sum, unit)) => {
            if *unit != c.unit {
                return Err(PlanError::Concentration(format!(
                    "mix '{}': component '{}' arrives in both {} and {}",
                    op_id, component, unit, c.unit
                )));
            }
            *sum += c.value * volume;
        }
        None => {
            acc.insert(component.to_string(), (c.value * volume, c.unit.clone()));
        }
    }
    Ok(())
}

/// What a liquid contributes: its computed components, or itself.
fn contribution(l: &Liquid) -> Vec<(String, Concentration)> {
    if !l.components.is_empty() {
        l.components
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    } else if let Some(c) = &l.concentration {
        vec![(l.name.clone(), c.clone())]
    } else {
        Vec::new()
    }
}

/// Compute product concentrations in chain order. Returns how many mix
/// products carry at least one component.
pub fn setup_solutions(chain: &Chain, ops: &mut OperationSet) -> PlanResult<usize> {
    let mut known: FxHashMap<String, Components> = FxHashMap::default();
    let mut populated = 0;

    for stage in &chain.stages {
        for id in &stage.op_ids {
            let o = ops
                .get_mut(id)
                .ok_or_else(|| PlanError::Dire(format!("chain references unknown operation '{}'", id)))?;

            for input in &mut o.inputs {
                if let Some(c) = known.get(input.source_key()) {
                    input.components = c.clone();
                }
            }

            match o.kind {
                OpKind::Mix => {
                    let total: f64 = o.inputs.iter().map(|l| l.volume).sum();
                    if total <= VOLUME_EPSILON {
                        return Err(PlanError::Concentration(format!(
                            "mix '{}' has zero volume",
                            o.id
                        )));
                    }
                    let mut acc: IndexMap<String, (f64, String)> = IndexMap::new();
                    for input in &o.inputs {
                        for (name, c) in contribution(input) {
                            accumulate(&mut acc, &o.id, &name, &c, input.volume)?;
                        }
                    }
                    let components: Components = acc
                        .into_iter()
                        .map(|(name, (sum, unit))| {
                            (
                                name,
                                Concentration {
                                    value: sum / total,
                                    unit,
                                },
                            )
                        })
                        .collect();
                    if !components.is_empty() {
                        populated += 1;
                        debug!("mix '{}': {} component(s)", o.id, components.len());
                    }
                    if let Some(product) = o.outputs.first_mut() {
                        product.components = components.clone();
                        known.insert(product.id.clone(), components);
                    }
                }
                OpKind::Split => {
                    let components = o.inputs[0].components.clone();
                    for out in &mut o.outputs {
                        out.components = components.clone();
                        known.insert(out.id.clone(), components.clone());
                    }
                }
                OpKind::Prompt { .. } => {
                    for (input, output) in o.inputs.iter().zip(o.outputs.iter_mut()) {
                        output.components = input.components.clone();
                        known.insert(output.id.clone(), input.components.clone());
                    }
                }
            }
        }
    }
    Ok(populated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::sequencer::sequence;
    use crate::core::types::Operation;

    fn conc(value: f64, unit: &str) -> Option<Concentration> {
        Some(Concentration {
            value,
            unit: unit.to_string(),
        })
    }

    fn ops(list: Vec<Operation>) -> OperationSet {
        list.into_iter().map(|o| (o.id.clone(), o)).collect()
    }

    #[test]
    fn test_lh006_dilution() {
        let water = Liquid::new("water", "water", 0.0);
        let mut dna = Liquid::new("dna", "dna_part", 0.0);
        dna.concentration = conc(30.0, "ng/ul");
        let m = Operation::mix(
            "m",
            vec![water.sample("m/0", 50.0), dna.sample("m/1", 25.0)],
            Liquid::new("m/out", "water+dna_part", 75.0),
        );
        let mut set = ops(vec![m]);
        let chain = sequence(&mut set).unwrap();
        assert_eq!(setup_solutions(&chain, &mut set).unwrap(), 1);
        let c = &set["m"].outputs[0].components["dna_part"];
        assert!((c.value - 10.0).abs() < 1e-9);
        assert_eq!(c.unit, "ng/ul");
    }

    #[test]
    fn test_lh006_components_flow_downstream() {
        let water = Liquid::new("water", "water", 0.0);
        let mut salt = Liquid::new("salt", "salt", 0.0);
        salt.concentration = conc(100.0, "mM");
        let m1 = Operation::mix(
            "m1",
            vec![water.sample("m1/0", 50.0), salt.sample("m1/1", 50.0)],
            Liquid::new("m1/out", "brine", 100.0),
        );
        let m2 = Operation::mix(
            "m2",
            vec![m1.outputs[0].sample("m2/0", 10.0), water.sample("m2/1", 30.0)],
            Liquid::new("m2/out", "dilute brine", 40.0),
        );
        let mut set = ops(vec![m1, m2]);
        let chain = sequence(&mut set).unwrap();
        setup_solutions(&chain, &mut set).unwrap();
        let c = &set["m2"].outputs[0].components["salt"];
        assert!((c.value - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_lh006_unit_mismatch() {
        let mut a = Liquid::new("a", "salt", 0.0);
        a.concentration = conc(1.0, "M");
        let mut b = Liquid::new("b", "salt", 0.0);
        b.concentration = conc(5.0, "mM");
        let m = Operation::mix(
            "m",
            vec![a.sample("m/0", 5.0), b.sample("m/1", 5.0)],
            Liquid::new("m/out", "salt", 10.0),
        );
        let mut set = ops(vec![m]);
        let chain = sequence(&mut set).unwrap();
        let err = setup_solutions(&chain, &mut set).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Concentration);
        assert!(err.to_string().contains("'salt'"));
    }

    #[test]
    fn test_lh006_negative_concentration() {
        let mut a = Liquid::new("a", "dye", 0.0);
        a.concentration = conc(-1.0, "X");
        let m = Operation::mix("m", vec![a.sample("m/0", 5.0)], Liquid::new("m/out", "dye", 5.0));
        let mut set = ops(vec![m]);
        let chain = sequence(&mut set).unwrap();
        assert!(setup_solutions(&chain, &mut set).is_err());
    }

    #[test]
    fn test_lh006_plain_liquids_have_no_components() {
        let water = Liquid::new("water", "water", 0.0);
        let m = Operation::mix("m", vec![water.sample("m/0", 5.0)], Liquid::new("m/out", "water", 5.0));
        let mut set = ops(vec![m]);
        let chain = sequence(&mut set).unwrap();
        assert_eq!(setup_solutions(&chain, &mut set).unwrap(), 0);
        assert!(set["m"].outputs[0].components.is_empty());
    }
}
