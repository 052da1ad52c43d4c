//! LH-015: Message block handler.

use super::{ExpandCtx, Instruction};
use crate::core::error::{PlanError, PlanResult};
use crate::core::sequencer::op;
use crate::core::types::OpKind;

/// One message per prompt; aggregated prompts already carry all their
/// liquids, so the operator sees each distinct message once.
pub fn expand(ctx: &mut ExpandCtx<'_>, op_ids: &[String]) -> PlanResult<Vec<Instruction>> {
    op_ids
        .iter()
        .map(|id| {
            let o = op(ctx.ops, id)?;
            match &o.kind {
                OpKind::Prompt {
                    message,
                    wait_seconds,
                } => Ok(Instruction::Message {
                    message: message.clone(),
                    wait_seconds: *wait_seconds,
                }),
                _ => Err(PlanError::Dire(format!(
                    "{} '{}' in a message block",
                    o.op_type(),
                    o.id
                ))),
            }
        })
        .collect()
}
