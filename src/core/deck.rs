//! LH-010: Device setup. Assigns labware to deck positions.
//!
//! Positions are named `position_1..position_N`. The first tipbox takes the
//! first slot, input then output plates follow in id order, and the tipwaste
//! always sits in the last slot.

use super::error::{PlanError, PlanResult};
use super::labware::Inventory;
use super::state::{DeviceState, PlateRole};
use super::types::Policy;
use log::{debug, info};

pub fn position_name(i: u32) -> String {
    format!("position_{}", i)
}

/// Place one tipbox, every plate and the tipwaste.
pub fn setup_deck(
    state: &mut DeviceState,
    inventory: &mut dyn Inventory,
    policy: &Policy,
) -> PlanResult<()> {
    let inputs = state.plate_ids(PlateRole::Input);
    let outputs = state.plate_ids(PlateRole::Output);
    let needed = inputs.len() + outputs.len() + 2;
    if needed > policy.deck_positions as usize {
        return Err(PlanError::NoDeckSpace(format!(
            "{} input plate(s), {} output plate(s), a tipbox and a tipwaste need {} positions but the device has {}",
            inputs.len(),
            outputs.len(),
            needed,
            policy.deck_positions
        )));
    }

    state.deck.clear();
    state.tipboxes.clear();
    state.tipwastes.clear();

    let tipbox = inventory.new_tipbox_of_type(&policy.tipbox_type)?;
    let tipwaste = inventory.new_tipwaste_of_type(&policy.tipwaste_type)?;

    let mut next = 1u32;
    let mut put = |state: &mut DeviceState, id: &str| {
        state.deck.insert(position_name(next), id.to_string());
        debug!("{} <- {}", position_name(next), id);
        next += 1;
    };
    put(state, &tipbox.id);
    for id in inputs.iter().chain(outputs.iter()) {
        put(state, id);
    }
    state
        .deck
        .insert(position_name(policy.deck_positions), tipwaste.id.clone());

    state.tipboxes.push(tipbox);
    state.tipwastes.push(tipwaste);
    info!(
        "deck: {} of {} position(s) used",
        state.deck.len(),
        policy.deck_positions
    );
    Ok(())
}

/// First unoccupied position, if any.
pub fn free_position(state: &DeviceState, policy: &Policy) -> Option<String> {
    (1..=policy.deck_positions)
        .map(position_name)
        .find(|p| state.at_position(p).is_none())
}

/// Bring a fresh tipbox onto the deck. Returns its index in `state.tipboxes`.
pub fn add_tipbox(
    state: &mut DeviceState,
    inventory: &mut dyn Inventory,
    policy: &Policy,
) -> PlanResult<usize> {
    let position = free_position(state, policy).ok_or_else(|| {
        PlanError::NoDeckSpace(format!(
            "tips ran out after {} tipbox(es) and no deck position is free",
            state.tipboxes.len()
        ))
    })?;
    let tipbox = inventory.new_tipbox_of_type(&policy.tipbox_type)?;
    debug!("{} <- {} (extra tips)", position, tipbox.id);
    state.deck.insert(position, tipbox.id.clone());
    state.tipboxes.push(tipbox);
    Ok(state.tipboxes.len() - 1)
}
