//! LH-002: Labware inventory, the plate/tip type catalog and object factories.
//!
//! The catalog is injected into the orchestrator; ids and display names come
//! from deterministic counters so identical requests produce identical plans.

use super::error::{PlanError, PlanResult};
use super::types::*;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;

/// Factory for fresh physical objects.
pub trait Inventory {
    fn plate_type(&self, name: &str) -> Option<&PlateType>;
    fn new_plate_of_type(&mut self, type_name: &str) -> PlanResult<Plate>;
    fn new_tipbox_of_type(&mut self, type_name: &str) -> PlanResult<Tipbox>;
    fn new_tipwaste_of_type(&mut self, type_name: &str) -> PlanResult<Tipwaste>;

    /// A display name not handed out before, derived from `base`.
    fn unique_name(&mut self, base: &str) -> String;
}

/// In-process labware catalog.
#[derive(Debug, Clone)]
pub struct LabwareCatalog {
    plate_types: IndexMap<String, PlateType>,
    tipbox_types: IndexMap<String, TipboxType>,
    tipwaste_types: IndexMap<String, TipwasteType>,
    next_id: u64,
    names: FxHashSet<String>,
}

impl Default for LabwareCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LabwareCatalog {
    /// Catalog with the builtin plate, tipbox and tipwaste models.
    pub fn builtin() -> Self {
        let plates = [
            ("pcrplate", 8, 12, 200.0, 0.5),
            ("pcrplate_skirted", 8, 12, 200.0, 4.5),
            ("dsw96", 8, 12, 2000.0, 50.0),
            ("trough12", 1, 12, 15000.0, 500.0),
            ("reservoir", 1, 1, 150000.0, 5000.0),
        ];
        let mut catalog = Self {
            plate_types: IndexMap::new(),
            tipbox_types: IndexMap::new(),
            tipwaste_types: IndexMap::new(),
            next_id: 0,
            names: FxHashSet::default(),
        };
        for (name, rows, cols, max_volume, residual_volume) in plates {
            catalog.add_plate_type(PlateType {
                name: name.to_string(),
                rows,
                cols,
                max_volume,
                residual_volume,
            });
        }
        catalog.add_tipbox_type(TipboxType {
            name: "tips200".to_string(),
            rows: 8,
            cols: 12,
            tip_max_volume: 200.0,
        });
        catalog.add_tipwaste_type(TipwasteType {
            name: "tipwaste".to_string(),
            capacity: 960,
        });
        catalog
    }

    /// Builtin catalog plus the request's extra labware.
    pub fn with_spec(spec: &LabwareSpec) -> Self {
        let mut catalog = Self::builtin();
        for pt in &spec.plate_types {
            catalog.add_plate_type(pt.clone());
        }
        for tt in &spec.tipbox_types {
            catalog.add_tipbox_type(tt.clone());
        }
        for wt in &spec.tipwaste_types {
            catalog.add_tipwaste_type(wt.clone());
        }
        catalog
    }

    pub fn add_plate_type(&mut self, ty: PlateType) {
        self.plate_types.insert(ty.name.clone(), ty);
    }

    pub fn add_tipbox_type(&mut self, ty: TipboxType) {
        self.tipbox_types.insert(ty.name.clone(), ty);
    }

    pub fn add_tipwaste_type(&mut self, ty: TipwasteType) {
        self.tipwaste_types.insert(ty.name.clone(), ty);
    }

    pub fn plate_type_names(&self) -> Vec<String> {
        self.plate_types.keys().cloned().collect()
    }

    /// Mark a caller-supplied name as taken.
    pub fn reserve_name(&mut self, name: &str) {
        self.names.insert(name.to_string());
    }

    fn mint_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }
}

impl Inventory for LabwareCatalog {
    fn plate_type(&self, name: &str) -> Option<&PlateType> {
        self.plate_types.get(name)
    }

    fn new_plate_of_type(&mut self, type_name: &str) -> PlanResult<Plate> {
        let ty = self
            .plate_types
            .get(type_name)
            .cloned()
            .ok_or_else(|| PlanError::Configuration(format!("unknown plate type '{}'", type_name)))?;
        let id = self.mint_id("plate");
        let name = self.unique_name(type_name);
        Ok(Plate::new(&id, &name, &ty))
    }

    fn new_tipbox_of_type(&mut self, type_name: &str) -> PlanResult<Tipbox> {
        let ty = self
            .tipbox_types
            .get(type_name)
            .cloned()
            .ok_or_else(|| PlanError::Configuration(format!("unknown tipbox type '{}'", type_name)))?;
        let id = self.mint_id("tipbox");
        let name = self.unique_name(type_name);
        Ok(Tipbox {
            id,
            name,
            tipbox_type: ty.name,
            rows: ty.rows,
            cols: ty.cols,
            tip_max_volume: ty.tip_max_volume,
            used: 0,
        })
    }

    fn new_tipwaste_of_type(&mut self, type_name: &str) -> PlanResult<Tipwaste> {
        let ty = self
            .tipwaste_types
            .get(type_name)
            .cloned()
            .ok_or_else(|| {
                PlanError::Configuration(format!("unknown tipwaste type '{}'", type_name))
            })?;
        let id = self.mint_id("tipwaste");
        let name = self.unique_name(type_name);
        Ok(Tipwaste {
            id,
            name,
            tipwaste_type: ty.name,
            capacity: ty.capacity,
            contents: 0,
        })
    }

    fn unique_name(&mut self, base: &str) -> String {
        let mut n = 1u32;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.names.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
