//! The loop region tree of a scope.
use crate::{BlockIdx, Expr};
use polyhls_utils::{Id, IndexedMap, impl_index};
use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionIdx(pub u32);
impl_index!(RegionIdx);

impl RegionIdx {
    /// The implicit region covering the whole scope.
    pub const TOP: RegionIdx = RegionIdx(0);
}

/// Facts about a natural loop recognized from its header phis.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoopInfo {
    /// The induction variable driving the loop condition.
    pub counter: Option<Id>,
    pub init: Option<Expr>,
    pub update: Option<Expr>,
    pub cond: Option<Expr>,
    /// Blocks outside the loop that are targets of edges leaving it.
    pub exits: Vec<BlockIdx>,
    /// Constant trip count, when init, step and bound are all known.
    pub trip_count: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct Region {
    /// Loop head; `None` for the top region.
    pub head: Option<BlockIdx>,
    /// Every block of the region, nested regions included.
    pub blocks: BTreeSet<BlockIdx>,
    /// Sources of the back edges into `head`.
    pub tails: Vec<BlockIdx>,
    pub parent: Option<RegionIdx>,
    pub children: Vec<RegionIdx>,
    pub info: LoopInfo,
}

impl Region {
    pub fn is_loop(&self) -> bool {
        self.head.is_some()
    }
}

/// Nested natural loops. Region 0 is the top region.
#[derive(Clone, Debug)]
pub struct LoopTree {
    pub regions: IndexedMap<RegionIdx, Region>,
}

impl LoopTree {
    pub fn new(all_blocks: BTreeSet<BlockIdx>) -> Self {
        let mut regions = IndexedMap::new();
        regions.push(Region {
            head: None,
            blocks: all_blocks,
            tails: vec![],
            parent: None,
            children: vec![],
            info: LoopInfo::default(),
        });
        LoopTree { regions }
    }

    pub fn top(&self) -> &Region {
        &self.regions[RegionIdx::TOP]
    }

    /// Add a loop region under `parent`.
    pub fn add_loop(
        &mut self,
        parent: RegionIdx,
        head: BlockIdx,
        tails: Vec<BlockIdx>,
        blocks: BTreeSet<BlockIdx>,
    ) -> RegionIdx {
        let idx = self.regions.push(Region {
            head: Some(head),
            blocks,
            tails,
            parent: Some(parent),
            children: vec![],
            info: LoopInfo::default(),
        });
        self.regions[parent].children.push(idx);
        idx
    }

    /// Loop regions, outermost first.
    pub fn loops(&self) -> Vec<RegionIdx> {
        let mut out = vec![];
        let mut work = vec![RegionIdx::TOP];
        while let Some(r) = work.pop() {
            if self.regions[r].is_loop() {
                out.push(r);
            }
            work.extend(self.regions[r].children.iter().rev().copied());
        }
        out
    }

    /// The innermost region that contains `blk`.
    pub fn region_of(&self, blk: BlockIdx) -> RegionIdx {
        let mut cur = RegionIdx::TOP;
        'descend: loop {
            for &c in &self.regions[cur].children {
                if self.regions[c].blocks.contains(&blk) {
                    cur = c;
                    continue 'descend;
                }
            }
            return cur;
        }
    }

    /// Blocks of `r` that are not inside any of its child regions.
    pub fn own_blocks(&self, r: RegionIdx) -> BTreeSet<BlockIdx> {
        let mut blocks = self.regions[r].blocks.clone();
        for c in &self.regions[r].children {
            for b in &self.regions[*c].blocks {
                blocks.remove(b);
            }
        }
        blocks
    }

    pub fn depth(&self, mut r: RegionIdx) -> usize {
        let mut d = 0;
        while let Some(p) = self.regions[r].parent {
            d += 1;
            r = p;
        }
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nesting() {
        let all: BTreeSet<BlockIdx> = (0..6).map(BlockIdx).collect();
        let mut tree = LoopTree::new(all);
        let outer = tree.add_loop(
            RegionIdx::TOP,
            BlockIdx(1),
            vec![BlockIdx(4)],
            (1..5).map(BlockIdx).collect(),
        );
        let inner = tree.add_loop(
            outer,
            BlockIdx(2),
            vec![BlockIdx(3)],
            [BlockIdx(2), BlockIdx(3)].into_iter().collect(),
        );
        assert_eq!(tree.region_of(BlockIdx(3)), inner);
        assert_eq!(tree.region_of(BlockIdx(4)), outer);
        assert_eq!(tree.region_of(BlockIdx(5)), RegionIdx::TOP);
        assert_eq!(tree.loops(), vec![outer, inner]);
        assert_eq!(tree.depth(inner), 2);
        assert_eq!(tree.own_blocks(outer).len(), 2);
    }
}
