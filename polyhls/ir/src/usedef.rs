//! Per-scope def/use tables and their incremental updater.
use crate::{BlockIdx, QSym, Scope, Stm, StmId};
use polyhls_utils::Id;
use std::collections::{BTreeSet, HashMap};

/// Defining and using statements of every symbol in a scope, indexed by
/// local symbol, by qualified path and by statement.
///
/// A destination `a` defines the symbol `a`; a destination `a.b` defines
/// the path `a.b` and uses `a`. Symbols mentioned by the types of other
/// symbols (symbolic list lengths) are recorded in `type_uses`.
#[derive(Clone, Debug, Default)]
pub struct UseDefTable {
    def_sym: HashMap<Id, BTreeSet<StmId>>,
    use_sym: HashMap<Id, BTreeSet<StmId>>,
    def_qsym: HashMap<QSym, BTreeSet<StmId>>,
    use_qsym: HashMap<QSym, BTreeSet<StmId>>,
    stm_defs: HashMap<StmId, Vec<QSym>>,
    stm_uses: HashMap<StmId, Vec<QSym>>,
    stm_block: HashMap<StmId, BlockIdx>,
    type_uses: HashMap<Id, BTreeSet<Id>>,
}

impl UseDefTable {
    /// Visit every statement of the scope once.
    pub fn build(scope: &Scope) -> Self {
        let mut table = UseDefTable::default();
        for (blk, stm) in scope.all_stms() {
            table.add_stm(blk, stm);
        }
        for sym in scope.symbols.values() {
            for e in sym.typ.exprs() {
                for q in e.refs() {
                    table.type_uses.entry(q[0]).or_default().insert(sym.name);
                }
            }
        }
        table
    }

    /// Record the contributions of `stm` placed in `blk`.
    pub fn add_stm(&mut self, blk: BlockIdx, stm: &Stm) {
        self.stm_block.insert(stm.id, blk);
        let defs: Vec<QSym> = stm.def_qsym().into_iter().collect();
        let uses = stm.use_qsyms();
        for q in &defs {
            if q.len() == 1 {
                self.def_sym.entry(q[0]).or_default().insert(stm.id);
            }
            self.def_qsym.entry(q.clone()).or_default().insert(stm.id);
        }
        for q in &uses {
            self.use_sym.entry(q[0]).or_default().insert(stm.id);
            self.use_qsym.entry(q.clone()).or_default().insert(stm.id);
        }
        self.stm_defs.insert(stm.id, defs);
        self.stm_uses.insert(stm.id, uses);
    }

    /// Drop every contribution of the statement `id`.
    pub fn remove_stm(&mut self, id: StmId) {
        self.stm_block.remove(&id);
        for q in self.stm_defs.remove(&id).unwrap_or_default() {
            if let Some(s) = self.def_sym.get_mut(&q[0]) {
                s.remove(&id);
            }
            if let Some(s) = self.def_qsym.get_mut(&q) {
                s.remove(&id);
            }
        }
        for q in self.stm_uses.remove(&id).unwrap_or_default() {
            if let Some(s) = self.use_sym.get_mut(&q[0]) {
                s.remove(&id);
            }
            if let Some(s) = self.use_qsym.get_mut(&q) {
                s.remove(&id);
            }
        }
    }

    /// Replace the contributions of `old` by those of `new`.
    pub fn replace(&mut self, blk: BlockIdx, old: StmId, new: &Stm) {
        self.remove_stm(old);
        self.add_stm(blk, new);
    }

    /// Statements defining the local symbol `sym`.
    pub fn defs(&self, sym: Id) -> Vec<StmId> {
        self.def_sym
            .get(&sym)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Statements using the symbol `sym`, either directly or as the head of
    /// a dotted path.
    pub fn uses(&self, sym: Id) -> Vec<StmId> {
        self.use_sym
            .get(&sym)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn qdefs(&self, q: &[Id]) -> Vec<StmId> {
        self.def_qsym
            .get(q)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn quses(&self, q: &[Id]) -> Vec<StmId> {
        self.use_qsym
            .get(q)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn defs_at(&self, stm: StmId) -> &[QSym] {
        self.stm_defs.get(&stm).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn uses_at(&self, stm: StmId) -> &[QSym] {
        self.stm_uses.get(&stm).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn block_of(&self, stm: StmId) -> Option<BlockIdx> {
        self.stm_block.get(&stm).copied()
    }

    /// Blocks containing a definition of `sym`.
    pub fn def_blocks(&self, sym: Id) -> BTreeSet<BlockIdx> {
        self.defs(sym)
            .into_iter()
            .filter_map(|s| self.block_of(s))
            .collect()
    }

    /// Local symbols that are defined somewhere in the scope.
    pub fn defined_syms(&self) -> BTreeSet<Id> {
        self.def_sym
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn is_used(&self, sym: Id) -> bool {
        self.use_sym.get(&sym).is_some_and(|s| !s.is_empty())
            || self.type_uses.get(&sym).is_some_and(|s| !s.is_empty())
    }

    /// Symbols whose types mention `sym`.
    pub fn type_users(&self, sym: Id) -> Vec<Id> {
        self.type_uses
            .get(&sym)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Expr, ScopeTags, StmKind, SymTags, Type};
    use polyhls_utils::Loc;

    #[test]
    fn incremental_update() {
        let mut scope = Scope::new(Id::new("@top.f"), ScopeTags::FUNCTION);
        scope.add_sym(Id::new("x"), Type::int(32, true), SymTags::empty());
        scope.add_sym(Id::new("y"), Type::int(32, true), SymTags::empty());
        let b = scope.new_block();
        scope.entry = Some(b);
        let s0 = scope.mk_stm(
            StmKind::Move {
                dst: Expr::temp("x"),
                src: Expr::int(1),
            },
            Loc::unknown(),
        );
        let s1 = scope.mk_stm(
            StmKind::Move {
                dst: Expr::temp("y"),
                src: Expr::temp("x"),
            },
            Loc::unknown(),
        );
        let (id0, id1) = (s0.id, s1.id);
        scope.block_mut(b).stms = vec![s0, s1];
        let mut ud = UseDefTable::build(&scope);
        assert_eq!(ud.defs(Id::new("x")), vec![id0]);
        assert_eq!(ud.uses(Id::new("x")), vec![id1]);

        let s2 = scope.mk_stm(
            StmKind::Move {
                dst: Expr::temp("y"),
                src: Expr::int(1),
            },
            Loc::unknown(),
        );
        ud.replace(b, id1, &s2);
        assert!(!ud.is_used(Id::new("x")));
        assert_eq!(ud.defs(Id::new("y")), vec![s2.id]);
        assert_eq!(ud.block_of(s2.id), Some(b));
    }

    #[test]
    fn paths_and_statement_index() {
        let mut scope = Scope::new(Id::new("@top.g"), ScopeTags::FUNCTION);
        scope.add_sym(Id::new("o"), Type::int(32, true), SymTags::empty());
        scope.add_sym(Id::new("v"), Type::int(32, true), SymTags::empty());
        let b0 = scope.new_block();
        let b1 = scope.new_block();
        scope.entry = Some(b0);
        let field = || Expr::attr(Expr::temp("o"), "f");
        let s0 = scope.mk_stm(
            StmKind::Move {
                dst: field(),
                src: Expr::int(3),
            },
            Loc::unknown(),
        );
        let s1 = scope.mk_stm(
            StmKind::Move {
                dst: Expr::temp("v"),
                src: field(),
            },
            Loc::unknown(),
        );
        let s2 = scope.mk_stm(
            StmKind::Move {
                dst: Expr::temp("v"),
                src: Expr::int(0),
            },
            Loc::unknown(),
        );
        let (id0, id1) = (s0.id, s1.id);
        scope.block_mut(b0).stms = vec![s0, s1];
        scope.block_mut(b1).stms = vec![s2];
        let ud = UseDefTable::build(&scope);

        let path = QSym::from_slice(&[Id::new("o"), Id::new("f")]);
        assert_eq!(ud.qdefs(&path), vec![id0]);
        assert_eq!(ud.quses(&path), vec![id1]);
        assert_eq!(ud.defs_at(id0), &[path.clone()]);
        assert!(ud.uses_at(id1).contains(&path));
        // Storing into a field uses the object.
        assert!(ud.uses(Id::new("o")).contains(&id0));
        assert_eq!(ud.def_blocks(Id::new("v")), BTreeSet::from([b0, b1]));
        assert_eq!(ud.defined_syms(), BTreeSet::from([Id::new("v")]));
    }
}
