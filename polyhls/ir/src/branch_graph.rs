use crate::StmId;
use std::collections::BTreeSet;

/// Pairs of statements that sit in mutually exclusive branches and so never
/// execute in the same iteration.
#[derive(Clone, Debug, Default)]
pub struct BranchGraph {
    edges: BTreeSet<(StmId, StmId)>,
}

impl BranchGraph {
    pub fn add_exclusive(&mut self, a: StmId, b: StmId) {
        if a != b {
            self.edges.insert((a.min(b), a.max(b)));
        }
    }

    pub fn are_exclusive(&self, a: StmId, b: StmId) -> bool {
        self.edges.contains(&(a.min(b), a.max(b)))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
