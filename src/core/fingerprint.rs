//! LH-023: BLAKE3 plan fingerprints.
//!
//! Two plans with the same deck layout and the same liquids in the same
//! wells hash the same. Used to spot plan drift between runs.

use super::orchestrator::Plan;
use super::state::DeviceState;
use super::types::OperationSet;

fn hash_deck(hasher: &mut blake3::Hasher, state: &DeviceState) {
    for (position, object) in &state.deck {
        hasher.update(position.as_bytes());
        hasher.update(b"=");
        hasher.update(object.as_bytes());
        hasher.update(b"\n");
    }
    for (id, plate) in &state.plates {
        hasher.update(id.as_bytes());
        hasher.update(b"\0");
        hasher.update(plate.plate_type.as_bytes());
        hasher.update(b"\n");
        for well in &plate.wells {
            let Some(l) = &well.contents else {
                continue;
            };
            let line = format!("{}:{}={}@{:.4}\n", id, well.coords, l.name, l.volume);
            hasher.update(line.as_bytes());
        }
    }
}

fn hash_locations(hasher: &mut blake3::Hasher, ops: &OperationSet) {
    for (id, op) in ops {
        for l in op.inputs.iter().chain(op.outputs.iter()) {
            let loc = l
                .location
                .as_ref()
                .map(|loc| loc.to_string())
                .unwrap_or_default();
            let line = format!("{}/{}={}@{:.4}\n", id, l.id, loc, l.volume);
            hasher.update(line.as_bytes());
        }
    }
}

/// Fingerprint of a plan's starting deck and every liquid location.
pub fn plan_fingerprint(plan: &Plan) -> String {
    let mut hasher = blake3::Hasher::new();
    hash_deck(&mut hasher, plan.before.state());
    hasher.update(b"--\n");
    hash_locations(&mut hasher, &plan.ops);
    format!("blake3:{}", hasher.finalize().to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::orchestrator::plan_request;
    use crate::core::parser::parse_request;

    fn request(volume: u32) -> String {
        format!(
            r#"
version: "1.0"
name: fp
liquids: {{ water: {{}}, buffer: {{}} }}
operations:
  - id: m
    mix:
      components:
        - {{ liquid: water, volume: {} }}
        - {{ liquid: buffer, volume: 10 }}
"#,
            volume
        )
    }

    fn fingerprint_of(yaml: &str) -> String {
        plan_fingerprint(&plan_request(&parse_request(yaml).unwrap()).unwrap())
    }

    #[test]
    fn test_lh023_equal_requests_equal_fingerprints() {
        let a = fingerprint_of(&request(20));
        assert!(a.starts_with("blake3:"));
        assert_eq!(a.len(), "blake3:".len() + 64);
        assert_eq!(a, fingerprint_of(&request(20)));
    }

    #[test]
    fn test_lh023_volume_change_changes_fingerprint() {
        assert_ne!(fingerprint_of(&request(20)), fingerprint_of(&request(30)));
    }
}
