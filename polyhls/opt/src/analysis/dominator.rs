//! Dominators over the forward edges of a scope and dominance frontiers
//! over all of its edges.
use polyhls_ir::{BlockIdx, Scope, cfg};
use std::collections::{BTreeMap, BTreeSet};

/// Dominator sets, the dominator tree and the dominance frontier of every
/// block reachable from the entry. Back edges do not change dominance on
/// reducible graphs, but they do contribute loop heads to the frontier.
#[derive(Debug, Default)]
pub struct DominatorTree {
    doms: BTreeMap<BlockIdx, BTreeSet<BlockIdx>>,
    idom: BTreeMap<BlockIdx, BlockIdx>,
    children: BTreeMap<BlockIdx, Vec<BlockIdx>>,
    frontier: BTreeMap<BlockIdx, BTreeSet<BlockIdx>>,
    root: Option<BlockIdx>,
}

impl DominatorTree {
    pub fn new(scope: &Scope) -> Self {
        let order = cfg::topo_order(scope);
        let Some(&root) = order.first() else {
            return Self::default();
        };
        let all: BTreeSet<BlockIdx> = order.iter().copied().collect();
        let mut doms: BTreeMap<BlockIdx, BTreeSet<BlockIdx>> = order
            .iter()
            .map(|b| (*b, if *b == root { BTreeSet::from([root]) } else { all.clone() }))
            .collect();

        // Classical iterative intersection; reverse post-order converges
        // after a couple of rounds on reducible graphs.
        let mut changed = true;
        while changed {
            changed = false;
            for &b in order.iter().skip(1) {
                let mut new: Option<BTreeSet<BlockIdx>> = None;
                for p in scope.block(b).fwd_preds().filter(|p| all.contains(p)) {
                    let pd = &doms[&p];
                    new = Some(match new {
                        None => pd.clone(),
                        Some(n) => n.intersection(pd).copied().collect(),
                    });
                }
                let mut new = new.unwrap_or_default();
                new.insert(b);
                if new != doms[&b] {
                    doms.insert(b, new);
                    changed = true;
                }
            }
        }

        // The immediate dominator is the strict dominator with the largest
        // dominator set.
        let mut idom = BTreeMap::new();
        let mut children: BTreeMap<BlockIdx, Vec<BlockIdx>> = BTreeMap::new();
        for &b in &order {
            let strict = doms[&b].iter().filter(|d| **d != b);
            if let Some(&d) = strict.max_by_key(|d| doms[*d].len()) {
                idom.insert(b, d);
                children.entry(d).or_default().push(b);
            }
        }
        children.values_mut().for_each(|c| c.sort());

        let mut tree = DominatorTree {
            doms,
            idom,
            children,
            frontier: BTreeMap::new(),
            root: Some(root),
        };
        tree.frontier = tree.compute_frontier(scope, &order);
        tree
    }

    fn compute_frontier(
        &self,
        scope: &Scope,
        order: &[BlockIdx],
    ) -> BTreeMap<BlockIdx, BTreeSet<BlockIdx>> {
        let mut df: BTreeMap<BlockIdx, BTreeSet<BlockIdx>> = BTreeMap::new();
        // Children before parents.
        for &n in self.post_order().iter() {
            let mut set = BTreeSet::new();
            for &s in &scope.block(n).succs {
                if !self.strictly_dominates(n, s) && order.contains(&s) {
                    set.insert(s);
                }
            }
            for c in self.children(n) {
                for &v in df.get(c).into_iter().flatten() {
                    if !self.strictly_dominates(n, v) {
                        set.insert(v);
                    }
                }
            }
            df.insert(n, set);
        }
        df
    }

    pub fn root(&self) -> Option<BlockIdx> {
        self.root
    }

    pub fn dominates(&self, a: BlockIdx, b: BlockIdx) -> bool {
        self.doms.get(&b).is_some_and(|d| d.contains(&a))
    }

    pub fn strictly_dominates(&self, a: BlockIdx, b: BlockIdx) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn idom(&self, b: BlockIdx) -> Option<BlockIdx> {
        self.idom.get(&b).copied()
    }

    pub fn children(&self, b: BlockIdx) -> &[BlockIdx] {
        self.children.get(&b).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn frontier(&self, b: BlockIdx) -> impl Iterator<Item = BlockIdx> + '_ {
        self.frontier.get(&b).into_iter().flatten().copied()
    }

    /// Iterated dominance frontier of a set of blocks.
    pub fn iterated_frontier(&self, blocks: &BTreeSet<BlockIdx>) -> BTreeSet<BlockIdx> {
        let mut out = BTreeSet::new();
        let mut work: Vec<BlockIdx> = blocks.iter().copied().collect();
        while let Some(b) = work.pop() {
            for f in self.frontier(b) {
                if out.insert(f) {
                    work.push(f);
                }
            }
        }
        out
    }

    /// Blocks of the dominator tree in pre-order.
    pub fn pre_order(&self) -> Vec<BlockIdx> {
        let mut out = vec![];
        let mut work: Vec<BlockIdx> = self.root.into_iter().collect();
        while let Some(b) = work.pop() {
            out.push(b);
            work.extend(self.children(b).iter().rev().copied());
        }
        out
    }

    pub fn post_order(&self) -> Vec<BlockIdx> {
        let mut out = vec![];
        let mut work: Vec<(BlockIdx, bool)> = self.root.into_iter().map(|r| (r, false)).collect();
        while let Some((b, expanded)) = work.pop() {
            if expanded {
                out.push(b);
            } else {
                work.push((b, true));
                work.extend(self.children(b).iter().rev().map(|c| (*c, false)));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_ir::{Expr, Id, JumpKind, ScopeTags, StmKind};
    use polyhls_utils::Loc;

    /// b0 -> b1, b2; b1 -> b3; b2 -> b3
    fn diamond() -> Scope {
        let mut s = Scope::new(Id::new("@top.f"), ScopeTags::FUNCTION);
        let b: Vec<_> = (0..4).map(|_| s.new_block()).collect();
        s.entry = Some(b[0]);
        s.exit = Some(b[3]);
        let cj = s.mk_stm(
            StmKind::CJump {
                cond: Expr::temp("c"),
                t: b[1],
                f: b[2],
            },
            Loc::unknown(),
        );
        s.block_mut(b[0]).stms.push(cj);
        cfg::connect(&mut s, b[0], b[1]);
        cfg::connect(&mut s, b[0], b[2]);
        cfg::add_jump(&mut s, b[1], b[3], JumpKind::Plain);
        cfg::add_jump(&mut s, b[2], b[3], JumpKind::Plain);
        s
    }

    #[test]
    fn diamond_dominators() {
        let s = diamond();
        let dt = DominatorTree::new(&s);
        let b = |i| BlockIdx(i);
        assert_eq!(dt.idom(b(3)), Some(b(0)));
        assert_eq!(dt.idom(b(1)), Some(b(0)));
        assert!(dt.dominates(b(0), b(3)));
        assert!(!dt.dominates(b(1), b(3)));
        assert_eq!(dt.frontier(b(1)).collect::<Vec<_>>(), vec![b(3)]);
        assert_eq!(dt.frontier(b(2)).collect::<Vec<_>>(), vec![b(3)]);
        assert_eq!(dt.frontier(b(0)).count(), 0);
        assert_eq!(dt.pre_order(), vec![b(0), b(1), b(2), b(3)]);
        assert_eq!(*dt.post_order().last().unwrap(), b(0));
    }
}
