//! LH-017: Instruction generation. Dispatches tree blocks to their handlers.
//!
//! Each block type expands through its own handler:
//! - transfer: tips, aspirate, dispense
//! - split: remainder renames
//! - message: operator prompts

use super::error::PlanResult;
use super::planner::{InstructionNode, InstructionTree};
use crate::instructions::{self, ExpandCtx, Instruction};
use log::info;

/// Expand one node into terminal instructions.
pub fn expand_node(ctx: &mut ExpandCtx<'_>, node: &InstructionNode) -> PlanResult<Vec<Instruction>> {
    match node {
        InstructionNode::Initialize => Ok(vec![Instruction::Initialize]),
        InstructionNode::Transfer { op_ids } => instructions::transfer::expand(ctx, op_ids),
        InstructionNode::Split { op_ids } => instructions::split::expand(ctx, op_ids),
        InstructionNode::Message { op_ids } => instructions::message::expand(ctx, op_ids),
        InstructionNode::Finalize => Ok(vec![Instruction::Finalize]),
    }
}

/// Expand the whole tree, in order.
pub fn expand_tree(ctx: &mut ExpandCtx<'_>, tree: &InstructionTree) -> PlanResult<Vec<Instruction>> {
    let mut out = Vec::new();
    for node in &tree.nodes {
        out.extend(expand_node(ctx, node)?);
    }
    info!(
        "expanded {} block(s) into {} instruction(s), {} tipbox(es) used",
        tree.nodes.len(),
        out.len(),
        ctx.state.tipboxes.len()
    );
    Ok(out)
}
