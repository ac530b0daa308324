//! Scheduling results attached to a scope.
use crate::{BlockIdx, RegionIdx, StmId};
use std::collections::BTreeMap;

/// A statement placed on the time axis. `begin` and `end` count cycles
/// from the start of the scope; blocks are laid out one after another in
/// topological order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledNode {
    pub stm: StmId,
    pub begin: u32,
    pub end: u32,
    pub min_latency: u32,
    pub latency: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockSchedule {
    /// First cycle of the block.
    pub base: u32,
    /// Number of cycles the block occupies; at least one.
    pub length: u32,
    /// Nodes ordered by `(begin, program order)`.
    pub nodes: Vec<ScheduledNode>,
}

impl BlockSchedule {
    /// Nodes starting at the given block-relative step.
    pub fn nodes_at(&self, step: u32) -> impl Iterator<Item = &ScheduledNode> {
        self.nodes
            .iter()
            .filter(move |n| n.begin.saturating_sub(self.base) == step)
    }
}

/// A loop scheduled with a modulo initiation interval.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineInfo {
    pub region: RegionIdx,
    pub head: BlockIdx,
    /// Blocks of the loop body, in topological order, head included.
    pub blocks: Vec<BlockIdx>,
    pub ii: u32,
    /// Iteration latency divided by `ii`, rounded up.
    pub stages: u32,
    /// Iteration latency of one pass through the body.
    pub latency: u32,
    /// Cycle of an iteration from which its loop condition can be read.
    /// Statements outside the head block start no earlier.
    pub exit_step: u32,
    /// Modulo slot of every body statement: `begin mod ii` relative to the
    /// start of the iteration.
    pub slots: BTreeMap<StmId, u32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schedule {
    pub blocks: BTreeMap<BlockIdx, BlockSchedule>,
    pub pipelines: Vec<PipelineInfo>,
}

impl Schedule {
    pub fn node(&self, stm: StmId) -> Option<&ScheduledNode> {
        self.blocks
            .values()
            .flat_map(|b| b.nodes.iter())
            .find(|n| n.stm == stm)
    }

    /// The cycle at which the last block ends.
    pub fn latency(&self) -> u32 {
        self.blocks
            .values()
            .map(|b| b.base + b.length)
            .max()
            .unwrap_or(0)
    }

    pub fn pipeline_of(&self, blk: BlockIdx) -> Option<&PipelineInfo> {
        self.pipelines.iter().find(|p| p.blocks.contains(&blk))
    }
}
