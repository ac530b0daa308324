use crate::{Expr, Stm, StmKind, SynthParams};
use polyhls_utils::impl_index;

/// Index of a block in its scope's block arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockIdx(pub u32);
impl_index!(BlockIdx);

impl std::fmt::Display for BlockIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// A basic block. Control leaves the block only through its last
/// statement; edges are kept as index lists on both ends.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub stms: Vec<Stm>,
    pub preds: Vec<BlockIdx>,
    pub succs: Vec<BlockIdx>,
    /// The subsets of `preds`/`succs` that are loop back edges.
    pub preds_loop: Vec<BlockIdx>,
    pub succs_loop: Vec<BlockIdx>,
    /// Condition under which the block is reached from the scope entry.
    pub path_exp: Option<Expr>,
    pub synth_params: SynthParams,
    /// Tombstone; removed blocks keep their index but are skipped.
    pub removed: bool,
}

impl Block {
    pub fn new(synth_params: SynthParams) -> Self {
        Block {
            synth_params,
            ..Default::default()
        }
    }

    pub fn terminator(&self) -> Option<&Stm> {
        self.stms.last().filter(|s| s.is_jump() || matches!(s.kind, StmKind::Ret(_)))
    }

    pub fn terminator_mut(&mut self) -> Option<&mut Stm> {
        self.stms
            .last_mut()
            .filter(|s| s.is_jump() || matches!(s.kind, StmKind::Ret(_)))
    }

    /// Position of `pred` in the predecessor list; phi arguments are
    /// aligned with it.
    pub fn pred_pos(&self, pred: BlockIdx) -> Option<usize> {
        self.preds.iter().position(|p| *p == pred)
    }

    pub fn phis(&self) -> impl Iterator<Item = &Stm> {
        self.stms.iter().filter(|s| s.is_phi())
    }

    /// Index of the first statement that is not a phi.
    pub fn first_non_phi(&self) -> usize {
        self.stms.iter().take_while(|s| s.is_phi()).count()
    }

    /// A block that contains nothing but an unconditional jump.
    pub fn is_forwarding(&self) -> bool {
        matches!(
            self.stms.as_slice(),
            [Stm {
                kind: StmKind::Jump { .. },
                ..
            }]
        )
    }

    pub fn is_loop_head(&self) -> bool {
        !self.preds_loop.is_empty()
    }

    /// Forward (non back-edge) predecessors.
    pub fn fwd_preds(&self) -> impl Iterator<Item = BlockIdx> + '_ {
        self.preds
            .iter()
            .copied()
            .filter(|p| !self.preds_loop.contains(p))
    }

    pub fn fwd_succs(&self) -> impl Iterator<Item = BlockIdx> + '_ {
        self.succs
            .iter()
            .copied()
            .filter(|s| !self.succs_loop.contains(s))
    }
}
