//! Statements. A statement owns its expression trees and refers to blocks
//! by index.
use crate::{BlockIdx, Expr, QSym};
use polyhls_utils::{Loc, WithPos, impl_index};
use strum::{Display, EnumString};

/// Stable identity of a statement within its scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmId(pub u32);
impl_index!(StmId);

impl std::fmt::Display for StmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Display, EnumString)]
pub enum JumpKind {
    #[default]
    #[strum(serialize = "")]
    Plain,
    #[strum(serialize = "break")]
    Break,
    #[strum(serialize = "continue")]
    Continue,
    /// Back edge to a loop head.
    #[strum(serialize = "loop")]
    Loop,
    #[strum(serialize = "exit")]
    Exit,
    #[strum(serialize = "specific")]
    Specific,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString)]
pub enum PhiKind {
    #[strum(serialize = "phi")]
    Phi,
    #[strum(serialize = "uphi")]
    UPhi,
    #[strum(serialize = "lphi")]
    LPhi,
}

/// A selector between values. For `PHI` and `LPHI` the argument at
/// position `i` flows in from the `i`-th predecessor of the block; `ps`
/// holds the matching predicates once they are known.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Phi {
    pub kind: PhiKind,
    pub var: Expr,
    pub args: Vec<Expr>,
    pub ps: Vec<Expr>,
}

impl Phi {
    pub fn new(kind: PhiKind, var: Expr, args: Vec<Expr>) -> Self {
        Phi {
            kind,
            var,
            args,
            ps: vec![],
        }
    }

    pub fn remove_arg(&mut self, pos: usize) {
        if pos < self.args.len() {
            self.args.remove(pos);
        }
        if pos < self.ps.len() {
            self.ps.remove(pos);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StmKind {
    Expr(Expr),
    Move {
        dst: Expr,
        src: Expr,
    },
    CExpr {
        cond: Expr,
        exp: Expr,
    },
    CMove {
        cond: Expr,
        dst: Expr,
        src: Expr,
    },
    CJump {
        cond: Expr,
        t: BlockIdx,
        f: BlockIdx,
    },
    MCJump {
        conds: Vec<Expr>,
        targets: Vec<BlockIdx>,
    },
    Jump {
        target: BlockIdx,
        kind: JumpKind,
    },
    Ret(Expr),
    Phi(Phi),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Stm {
    pub id: StmId,
    pub kind: StmKind,
    pub loc: Loc,
}

impl WithPos for Stm {
    fn loc(&self) -> Loc {
        self.loc
    }
}

impl Stm {
    pub fn new(id: StmId, kind: StmKind, loc: Loc) -> Self {
        Stm { id, kind, loc }
    }

    pub fn is_jump(&self) -> bool {
        matches!(
            self.kind,
            StmKind::Jump { .. } | StmKind::CJump { .. } | StmKind::MCJump { .. }
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.kind, StmKind::Phi(_))
    }

    pub fn as_phi(&self) -> Option<&Phi> {
        match &self.kind {
            StmKind::Phi(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_phi_mut(&mut self) -> Option<&mut Phi> {
        match &mut self.kind {
            StmKind::Phi(p) => Some(p),
            _ => None,
        }
    }

    /// The destination expression of a defining statement.
    pub fn dst(&self) -> Option<&Expr> {
        match &self.kind {
            StmKind::Move { dst, .. } | StmKind::CMove { dst, .. } => Some(dst),
            StmKind::Phi(p) => Some(&p.var),
            _ => None,
        }
    }

    pub fn dst_mut(&mut self) -> Option<&mut Expr> {
        match &mut self.kind {
            StmKind::Move { dst, .. } | StmKind::CMove { dst, .. } => Some(dst),
            StmKind::Phi(p) => Some(&mut p.var),
            _ => None,
        }
    }

    /// The source value of a `MOVE`/`CMOVE`.
    pub fn src(&self) -> Option<&Expr> {
        match &self.kind {
            StmKind::Move { src, .. } | StmKind::CMove { src, .. } => Some(src),
            _ => None,
        }
    }

    /// The symbol path this statement defines, if any.
    pub fn def_qsym(&self) -> Option<QSym> {
        self.dst().and_then(Expr::qsym)
    }

    /// The single local symbol defined by this statement.
    pub fn def_sym(&self) -> Option<polyhls_utils::Id> {
        match self.dst()? {
            crate::Expr::Temp(n) => Some(*n),
            _ => None,
        }
    }

    /// Expressions read by this statement. The destination of a defining
    /// statement is not included.
    pub fn src_exprs(&self) -> Vec<&Expr> {
        match &self.kind {
            StmKind::Expr(e) | StmKind::Ret(e) => vec![e],
            StmKind::Move { src, .. } => vec![src],
            StmKind::CExpr { cond, exp } => vec![cond, exp],
            StmKind::CMove { cond, src, .. } => vec![cond, src],
            StmKind::CJump { cond, .. } => vec![cond],
            StmKind::MCJump { conds, .. } => conds.iter().collect(),
            StmKind::Jump { .. } => vec![],
            StmKind::Phi(p) => p.args.iter().chain(p.ps.iter()).collect(),
        }
    }

    pub fn src_exprs_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            StmKind::Expr(e) | StmKind::Ret(e) => vec![e],
            StmKind::Move { src, .. } => vec![src],
            StmKind::CExpr { cond, exp } => vec![cond, exp],
            StmKind::CMove { cond, src, .. } => vec![cond, src],
            StmKind::CJump { cond, .. } => vec![cond],
            StmKind::MCJump { conds, .. } => conds.iter_mut().collect(),
            StmKind::Jump { .. } => vec![],
            StmKind::Phi(p) => p.args.iter_mut().chain(p.ps.iter_mut()).collect(),
        }
    }

    /// Every expression of the statement including the destination.
    pub fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            StmKind::Move { dst, src } => vec![dst, src],
            StmKind::CMove { cond, dst, src } => vec![cond, dst, src],
            StmKind::Phi(p) => std::iter::once(&mut p.var)
                .chain(p.args.iter_mut())
                .chain(p.ps.iter_mut())
                .collect(),
            StmKind::Expr(e) | StmKind::Ret(e) => vec![e],
            StmKind::CExpr { cond, exp } => vec![cond, exp],
            StmKind::CJump { cond, .. } => vec![cond],
            StmKind::MCJump { conds, .. } => conds.iter_mut().collect(),
            StmKind::Jump { .. } => vec![],
        }
    }

    /// Reference paths read by this statement. For a destination like
    /// `self.x`, the head `self` counts as read.
    pub fn use_qsyms(&self) -> Vec<QSym> {
        let mut uses: Vec<QSym> = self.src_exprs().iter().flat_map(|e| e.refs()).collect();
        if let Some(dst) = self.dst() {
            match dst {
                Expr::Attr(head, _) => uses.extend(head.refs()),
                Expr::Mref(m, o) => {
                    uses.extend(m.refs());
                    uses.extend(o.refs());
                }
                _ => {}
            }
        }
        uses
    }

    /// Jump targets in edge order.
    pub fn targets(&self) -> Vec<BlockIdx> {
        match &self.kind {
            StmKind::Jump { target, .. } => vec![*target],
            StmKind::CJump { t, f, .. } => vec![*t, *f],
            StmKind::MCJump { targets, .. } => targets.clone(),
            _ => vec![],
        }
    }

    pub fn replace_target(&mut self, old: BlockIdx, new: BlockIdx) {
        match &mut self.kind {
            StmKind::Jump { target, .. } => {
                if *target == old {
                    *target = new;
                }
            }
            StmKind::CJump { t, f, .. } => {
                if *t == old {
                    *t = new;
                }
                if *f == old {
                    *f = new;
                }
            }
            StmKind::MCJump { targets, .. } => {
                for t in targets.iter_mut().filter(|t| **t == old) {
                    *t = new;
                }
            }
            _ => {}
        }
    }

    /// Does this statement have effects beyond its destination?
    pub fn has_side_effect(&self) -> bool {
        let call_like = |e: &Expr| {
            let mut found = false;
            e.walk(&mut |x| found |= x.is_call_like() || matches!(x, Expr::Mstore(..)));
            found
        };
        match &self.kind {
            StmKind::Expr(_) | StmKind::CExpr { .. } | StmKind::Ret(_) => true,
            StmKind::Move { src, .. } | StmKind::CMove { src, .. } => call_like(src),
            _ => self.is_jump(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_utils::Id;

    #[test]
    fn uses_and_defs() {
        let stm = Stm::new(
            StmId(0),
            StmKind::Move {
                dst: Expr::attr(Expr::temp("self"), "x"),
                src: Expr::temp("y"),
            },
            Loc::unknown(),
        );
        let def = stm.def_qsym().unwrap();
        assert_eq!(def.as_slice(), &[Id::new("self"), Id::new("x")]);
        assert_eq!(stm.def_sym(), None);
        let uses = stm.use_qsyms();
        assert_eq!(uses.len(), 2);
        assert!(!stm.has_side_effect());
    }

    #[test]
    fn retarget_jumps() {
        let mut stm = Stm::new(
            StmId(1),
            StmKind::CJump {
                cond: Expr::temp("c"),
                t: BlockIdx(1),
                f: BlockIdx(2),
            },
            Loc::unknown(),
        );
        stm.replace_target(BlockIdx(2), BlockIdx(5));
        assert_eq!(stm.targets(), vec![BlockIdx(1), BlockIdx(5)]);
    }
}
