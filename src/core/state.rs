//! LH-011: Device state: plates, tip resources and deck positions.
//!
//! `DeviceState` is mutated while planning. Once planning is done it is
//! frozen into a "before" snapshot and a re-identified "after" snapshot,
//! linked only by a `PlateIdMap`.

use super::error::{PlanError, PlanResult};
use super::labware::Inventory;
use super::types::*;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Which side of the run a plate sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateRole {
    Input,
    Output,
}

/// Mutable planning-time view of the deck.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Plates by id in creation order
    pub plates: IndexMap<String, Plate>,
    pub roles: IndexMap<String, PlateRole>,
    #[serde(default)]
    pub tipboxes: Vec<Tipbox>,
    #[serde(default)]
    pub tipwastes: Vec<Tipwaste>,
    /// Deck position -> labware id
    #[serde(default)]
    pub deck: IndexMap<String, String>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plate(&mut self, plate: Plate, role: PlateRole) {
        self.roles.insert(plate.id.clone(), role);
        self.plates.insert(plate.id.clone(), plate);
    }

    pub fn plate(&self, id: &str) -> Option<&Plate> {
        self.plates.get(id)
    }

    pub fn plate_mut(&mut self, id: &str) -> Option<&mut Plate> {
        self.plates.get_mut(id)
    }

    pub fn role(&self, id: &str) -> Option<PlateRole> {
        self.roles.get(id).copied()
    }

    /// Plate ids with the given role, sorted.
    pub fn plate_ids(&self, role: PlateRole) -> Vec<String> {
        let mut ids: Vec<String> = self
            .roles
            .iter()
            .filter(|(_, r)| **r == role)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn well(&self, loc: &Location) -> Option<&Well> {
        self.plate(&loc.plate_id).and_then(|p| p.well(loc.well))
    }

    pub fn well_mut(&mut self, loc: &Location) -> Option<&mut Well> {
        self.plate_mut(&loc.plate_id)
            .and_then(|p| p.well_mut(loc.well))
    }

    /// Residual volume of the well at `loc`.
    pub fn residual_at(&self, loc: &Location) -> PlanResult<f64> {
        self.well(loc)
            .map(|w| w.residual_volume)
            .ok_or_else(|| PlanError::Dire(format!("no well at {}", loc)))
    }

    /// Labware id sitting at a deck position.
    pub fn at_position(&self, position: &str) -> Option<&str> {
        self.deck.get(position).map(String::as_str)
    }

    pub fn position_of(&self, object_id: &str) -> Option<&str> {
        self.deck
            .iter()
            .find(|(_, id)| id.as_str() == object_id)
            .map(|(pos, _)| pos.as_str())
    }

    /// Remove a plate and its deck slot.
    pub fn drop_plate(&mut self, id: &str) {
        self.plates.shift_remove(id);
        self.roles.shift_remove(id);
        self.deck.retain(|_, obj| obj.as_str() != id);
    }
}

/// Frozen device state handed to drivers and simulators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    state: DeviceState,
}

impl DeviceSnapshot {
    pub fn freeze(state: DeviceState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }
}

/// Plate id correspondence between the before and after snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlateIdMap {
    forward: IndexMap<String, String>,
}

impl PlateIdMap {
    pub fn insert(&mut self, before: &str, after: &str) {
        self.forward.insert(before.to_string(), after.to_string());
    }

    pub fn after(&self, before: &str) -> Option<&str> {
        self.forward.get(before).map(String::as_str)
    }

    pub fn before(&self, after: &str) -> Option<&str> {
        self.forward
            .iter()
            .find(|(_, a)| a.as_str() == after)
            .map(|(b, _)| b.as_str())
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward.iter().map(|(a, b)| (a.as_str(), b.as_str()))
    }
}

/// Copy every plate under a fresh id from the inventory.
pub fn reidentify(
    before: &DeviceState,
    inventory: &mut dyn Inventory,
) -> PlanResult<(DeviceState, PlateIdMap)> {
    let mut after = DeviceState {
        tipboxes: before.tipboxes.clone(),
        tipwastes: before.tipwastes.clone(),
        ..DeviceState::default()
    };
    let mut map = PlateIdMap::default();

    for (id, plate) in &before.plates {
        let fresh = inventory.new_plate_of_type(&plate.plate_type)?;
        let mut copy = plate.clone();
        copy.id = fresh.id.clone();
        for well in &mut copy.wells {
            if let Some(liquid) = well.contents.as_mut() {
                liquid.location = Some(Location::new(&copy.id, well.coords));
            }
        }
        map.insert(id, &copy.id);
        let role = before.role(id).unwrap_or(PlateRole::Output);
        after.add_plate(copy, role);
    }

    for (pos, obj) in &before.deck {
        let mapped = map.after(obj).unwrap_or(obj.as_str()).to_string();
        after.deck.insert(pos.clone(), mapped);
    }
    Ok((after, map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::labware::LabwareCatalog;

    fn state_with_plate(catalog: &mut LabwareCatalog) -> DeviceState {
        let mut s = DeviceState::new();
        let mut p = catalog.new_plate_of_type("pcrplate_skirted").unwrap();
        p.put(WellCoords::new(0, 0), Liquid::new("w", "water", 55.0), true)
            .unwrap();
        s.deck.insert("position_2".into(), p.id.clone());
        s.add_plate(p, PlateRole::Input);
        s
    }

    #[test]
    fn test_lh011_lookup() {
        let mut c = LabwareCatalog::builtin();
        let s = state_with_plate(&mut c);
        let loc = Location::new("plate-0001", WellCoords::new(0, 0));
        assert_eq!(s.well(&loc).unwrap().volume(), 55.0);
        assert_eq!(s.residual_at(&loc).unwrap(), 4.5);
        assert_eq!(s.plate_ids(PlateRole::Input), vec!["plate-0001"]);
        assert!(s.plate_ids(PlateRole::Output).is_empty());
        assert_eq!(s.position_of("plate-0001"), Some("position_2"));
        assert!(s.residual_at(&Location::new("nope", WellCoords::new(0, 0))).is_err());
    }

    #[test]
    fn test_lh011_reidentify() {
        let mut c = LabwareCatalog::builtin();
        let before = state_with_plate(&mut c);
        let (after, map) = reidentify(&before, &mut c).unwrap();
        let new_id = map.after("plate-0001").unwrap();
        assert_ne!(new_id, "plate-0001");
        assert_eq!(map.before(new_id), Some("plate-0001"));
        let plate = after.plate(new_id).unwrap();
        let liquid = plate.well(WellCoords::new(0, 0)).unwrap().contents.as_ref().unwrap();
        assert_eq!(liquid.location.as_ref().unwrap().plate_id, new_id);
        assert_eq!(after.at_position("position_2"), Some(new_id));
        // before is untouched
        assert!(before.plate("plate-0001").is_some());
    }

    #[test]
    fn test_lh011_drop_plate() {
        let mut c = LabwareCatalog::builtin();
        let mut s = state_with_plate(&mut c);
        s.drop_plate("plate-0001");
        assert!(s.plates.is_empty());
        assert!(s.deck.is_empty());
    }
}
