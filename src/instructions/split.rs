//! LH-014: Split block handler.
//!
//! A split moves nothing by itself; the moving sample is picked up by the
//! mix that consumes it. What remains in the well continues under the
//! split's remaining id, which the driver records as a rename.

use super::{ExpandCtx, Instruction};
use crate::core::error::{PlanError, PlanResult};
use crate::core::sequencer::op;

pub fn expand(ctx: &mut ExpandCtx<'_>, op_ids: &[String]) -> PlanResult<Vec<Instruction>> {
    let mut out = Vec::with_capacity(op_ids.len());
    for id in op_ids {
        let o = op(ctx.ops, id)?;
        let (Some(input), Some(remaining)) = (o.inputs.first(), o.outputs.get(1)) else {
            return Err(PlanError::Dire(format!("split '{}' is malformed", o.id)));
        };
        let loc = input.location.as_ref().ok_or_else(|| {
            PlanError::Dire(format!("split '{}': '{}' has no location", o.id, input.name))
        })?;
        out.push(Instruction::Rename {
            plate: loc.plate_id.clone(),
            well: loc.well,
            from: input.id.clone(),
            to: remaining.id.clone(),
        });
    }
    Ok(out)
}
