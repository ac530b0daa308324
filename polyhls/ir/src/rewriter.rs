//! Rename references inside expressions and statements, used when code
//! is copied from one scope into another.
use crate::{BlockIdx, Expr, Stm, StmKind};
use polyhls_utils::Id;
use std::collections::HashMap;

/// A rewriter maps symbol names to replacement expressions and block
/// indices to new block indices.
#[derive(Default, Debug)]
pub struct Rewriter {
    pub temps: HashMap<Id, Expr>,
    pub blocks: HashMap<BlockIdx, BlockIdx>,
}

impl Rewriter {
    pub fn new(temps: HashMap<Id, Expr>, blocks: HashMap<BlockIdx, BlockIdx>) -> Self {
        Rewriter { temps, blocks }
    }

    /// Replace every `TEMP` in `e` that has a mapping. Replacements are not
    /// rewritten again.
    pub fn rewrite_expr(&self, e: &mut Expr) {
        if let Expr::Temp(n) = e {
            if let Some(rep) = self.temps.get(n) {
                *e = rep.clone();
            }
            return;
        }
        for k in e.kids_mut() {
            self.rewrite_expr(k);
        }
    }

    pub fn rewrite_block(&self, b: BlockIdx) -> BlockIdx {
        self.blocks.get(&b).copied().unwrap_or(b)
    }

    pub fn rewrite_stm(&self, stm: &mut Stm) {
        for e in stm.exprs_mut() {
            self.rewrite_expr(e);
        }
        match &mut stm.kind {
            StmKind::CJump { t, f, .. } => {
                *t = self.rewrite_block(*t);
                *f = self.rewrite_block(*f);
            }
            StmKind::MCJump { targets, .. } => {
                for t in targets.iter_mut() {
                    *t = self.rewrite_block(*t);
                }
            }
            StmKind::Jump { target, .. } => *target = self.rewrite_block(*target),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinOp, Stm, StmId};
    use polyhls_utils::Loc;

    #[test]
    fn rewrite_names_and_targets() {
        let mut rw = Rewriter::default();
        rw.temps.insert(Id::new("a"), Expr::temp("x#1"));
        rw.temps.insert(Id::new("x#1"), Expr::temp("never"));
        rw.blocks.insert(BlockIdx(0), BlockIdx(7));
        let mut stm = Stm::new(
            StmId(0),
            StmKind::Move {
                dst: Expr::temp("b"),
                src: Expr::binop(BinOp::Add, Expr::temp("a"), Expr::int(1)),
            },
            Loc::unknown(),
        );
        rw.rewrite_stm(&mut stm);
        assert_eq!(stm.src().unwrap().to_string(), "(x#1 + 1)");
        let mut j = Stm::new(
            StmId(1),
            StmKind::Jump {
                target: BlockIdx(0),
                kind: Default::default(),
            },
            Loc::unknown(),
        );
        rw.rewrite_stm(&mut j);
        assert_eq!(j.targets(), vec![BlockIdx(7)]);
    }
}
