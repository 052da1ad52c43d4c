//! LH-016: Execution planning. Turns the placed chain into an instruction tree.

use super::error::PlanResult;
use super::sequencer::{stage_type, Chain};
use super::types::{OpType, OperationSet};
use serde::Serialize;

/// One node of the instruction tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "block", rename_all = "snake_case")]
pub enum InstructionNode {
    Initialize,
    Message { op_ids: Vec<String> },
    Split { op_ids: Vec<String> },
    Transfer { op_ids: Vec<String> },
    Finalize,
}

impl InstructionNode {
    pub fn op_ids(&self) -> &[String] {
        match self {
            Self::Message { op_ids } | Self::Split { op_ids } | Self::Transfer { op_ids } => op_ids,
            Self::Initialize | Self::Finalize => &[],
        }
    }
}

/// Initialize, one block per stage, Finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstructionTree {
    pub nodes: Vec<InstructionNode>,
    pub transfers: u32,
    pub splits: u32,
    pub messages: u32,
}

/// Build the instruction tree. A stage mixing operation types is an
/// internal error.
pub fn build_tree(chain: &Chain, ops: &OperationSet) -> PlanResult<InstructionTree> {
    let mut nodes = vec![InstructionNode::Initialize];
    let mut transfers = 0u32;
    let mut splits = 0u32;
    let mut messages = 0u32;

    for stage in &chain.stages {
        let op_ids = stage.op_ids.clone();
        let node = match stage_type(stage, ops)? {
            OpType::Prompt => {
                messages += 1;
                InstructionNode::Message { op_ids }
            }
            OpType::Split => {
                splits += 1;
                InstructionNode::Split { op_ids }
            }
            OpType::Mix => {
                transfers += 1;
                InstructionNode::Transfer { op_ids }
            }
        };
        nodes.push(node);
    }
    nodes.push(InstructionNode::Finalize);

    Ok(InstructionTree {
        nodes,
        transfers,
        splits,
        messages,
    })
}
