//! LH-022: Resource manifest: what the operator must put on the deck.
//!
//! The manifest lists every auto-allocated input plate in the same shape as a
//! request's `input_plates`, so it can be pasted back into the request and the
//! next plan finds nothing left to allocate.

use super::fingerprint;
use super::orchestrator::Plan;
use super::state::PlateRole;
use super::types::{InputPlateSpec, VolumeUnit, WellContentSpec};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Manifest file name inside an output directory.
pub const MANIFEST_FILE: &str = "manifest.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema: String,
    pub name: String,
    pub generator: String,
    /// BLAKE3 fingerprint of the plan this manifest belongs to
    pub fingerprint: String,
    /// Plate name to contents, ready for a request's `input_plates`
    pub input_plates: IndexMap<String, InputPlateSpec>,
}

impl Manifest {
    /// Collect auto-allocated wells from the plan's starting deck.
    pub fn from_plan(plan: &Plan) -> Self {
        let before = plan.before.state();
        let mut input_plates = IndexMap::new();
        for id in before.plate_ids(PlateRole::Input) {
            let Some(plate) = before.plate(&id) else {
                continue;
            };
            let wells: IndexMap<String, WellContentSpec> = plate
                .wells
                .iter()
                .filter(|w| w.auto_allocated)
                .filter_map(|w| {
                    let l = w.contents.as_ref()?;
                    Some((
                        w.coords.to_string(),
                        WellContentSpec {
                            name: l.name.clone(),
                            volume: l.volume,
                            unit: VolumeUnit::Ul,
                            liquid_type: l.liquid_type.clone(),
                            concentration: l.concentration.clone(),
                        },
                    ))
                })
                .collect();
            if wells.is_empty() {
                continue;
            }
            input_plates.insert(
                plate.name.clone(),
                InputPlateSpec {
                    plate_type: plate.plate_type.clone(),
                    name: Some(plate.name.clone()),
                    wells,
                },
            );
        }
        Self {
            schema: "1.0".to_string(),
            name: plan.name.clone(),
            generator: format!("liquidplan {}", env!("CARGO_PKG_VERSION")),
            fingerprint: fingerprint::plan_fingerprint(plan),
            input_plates,
        }
    }

    /// Total auto-allocated volume per liquid name.
    pub fn totals(&self) -> IndexMap<String, f64> {
        let mut totals: IndexMap<String, f64> = IndexMap::new();
        for w in self.input_plates.values().flat_map(|p| p.wells.values()) {
            *totals.entry(w.name.clone()).or_insert(0.0) += w.unit.to_ul(w.volume);
        }
        totals
    }
}

pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE)
}

/// Write the manifest under `dir` atomically.
pub fn save_manifest(dir: &Path, manifest: &Manifest) -> Result<PathBuf, String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("cannot create dir {}: {}", dir.display(), e))?;
    let path = manifest_path(dir);
    let yaml = serde_yaml_ng::to_string(manifest).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!(
            "cannot rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;
    Ok(path)
}

/// Load a manifest; `None` if the directory holds none.
pub fn load_manifest(dir: &Path) -> Result<Option<Manifest>, String> {
    let path = manifest_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let manifest: Manifest = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid manifest {}: {}", path.display(), e))?;
    Ok(Some(manifest))
}
