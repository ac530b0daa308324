//! Static single assignment form, one variable class at a time.
use crate::analysis::DominatorTree;
use crate::analysis::path_exp::{path_conds, phi_predicates};
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{
    BlockIdx, Context, Expr, Id, Phi, PhiKind, Scope, StmId, StmKind, SymTags, Type, TypeKind,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::marker::PhantomData;

/// Symbols that keep a single name across the whole scope.
const SHARED: SymTags = SymTags::PARAM
    .union(SymTags::RETURN)
    .union(SymTags::FREE)
    .union(SymTags::FIELD)
    .union(SymTags::STATIC)
    .union(SymTags::SELF)
    .union(SymTags::REGISTER)
    .union(SymTags::TEMP)
    .union(SymTags::CONDITION)
    .union(SymTags::IMPORTED)
    .union(SymTags::BUILTIN)
    .union(SymTags::PREDEFINED);

/// The class of variables one instance of [Ssa] renames.
pub trait SsaClass {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    /// Should a local of this type get a version per definition?
    fn renames(typ: &Type, ctx: &Context) -> bool;
}

pub struct Scalars;
pub struct Tuples;
pub struct Lists;
pub struct Objects;

impl SsaClass for Scalars {
    const NAME: &'static str = "scalar-ssa";
    const DESCRIPTION: &'static str = "convert scalar locals to SSA form";

    fn renames(typ: &Type, _ctx: &Context) -> bool {
        typ.is_scalar()
    }
}

impl SsaClass for Tuples {
    const NAME: &'static str = "tuple-ssa";
    const DESCRIPTION: &'static str = "convert tuple locals to SSA form";

    fn renames(typ: &Type, _ctx: &Context) -> bool {
        typ.is_tuple()
    }
}

impl SsaClass for Lists {
    const NAME: &'static str = "list-ssa";
    const DESCRIPTION: &'static str = "convert list references to SSA form";

    fn renames(typ: &Type, _ctx: &Context) -> bool {
        typ.is_list() && !typ.is_rom()
    }
}

impl SsaClass for Objects {
    const NAME: &'static str = "object-ssa";
    const DESCRIPTION: &'static str = "convert object references to SSA form";

    /// Module instances are shared hardware and never versioned.
    fn renames(typ: &Type, ctx: &Context) -> bool {
        let TypeKind::Object { scope } = typ.kind else {
            return false;
        };
        ctx.get_scope(scope)
            .is_some_and(|c| c.try_borrow().is_ok_and(|c| !c.is_module()))
    }
}

/// Renames every local of class `K` so that it has exactly one definition.
/// Phis are placed on the iterated dominance frontier of the defining
/// blocks, versions `x#N` are assigned walking the dominator tree, trivial
/// and dead phis are removed, the remaining phis get their predicates and
/// phis at loop heads become loop phis.
pub struct Ssa<K> {
    _class: PhantomData<K>,
}

impl<K> Default for Ssa<K> {
    fn default() -> Self {
        Ssa {
            _class: PhantomData,
        }
    }
}

pub type ScalarSsa = Ssa<Scalars>;
pub type TupleSsa = Ssa<Tuples>;
pub type ListSsa = Ssa<Lists>;
pub type ObjectSsa = Ssa<Objects>;

impl<K: SsaClass> Named for Ssa<K> {
    fn name() -> &'static str {
        K::NAME
    }

    fn description() -> &'static str {
        K::DESCRIPTION
    }
}

/// Locals of class `K` defined only by plain moves, with their defining
/// blocks. A conditional or phi definition excludes the symbol.
fn candidates<K: SsaClass>(scope: &Scope, ctx: &Context) -> BTreeMap<Id, BTreeSet<BlockIdx>> {
    let mut defs: BTreeMap<Id, BTreeSet<BlockIdx>> = BTreeMap::new();
    let mut excluded: BTreeSet<Id> = BTreeSet::new();
    for (blk, stm) in scope.all_stms() {
        let Some(d) = stm.def_sym() else { continue };
        if matches!(stm.kind, StmKind::Move { .. }) {
            defs.entry(d).or_default().insert(blk);
        } else {
            excluded.insert(d);
        }
    }
    defs.retain(|name, _| {
        !excluded.contains(name)
            && scope
                .sym(*name)
                .is_some_and(|s| !s.tags.intersects(SHARED) && K::renames(&s.typ, ctx))
    });
    defs
}

/// Insert an empty phi for each symbol on the iterated dominance frontier
/// of its defining blocks. Returns the placed phis with their symbol.
fn place_phis(
    scope: &mut Scope,
    dom: &DominatorTree,
    defs: &BTreeMap<Id, BTreeSet<BlockIdx>>,
) -> HashMap<StmId, Id> {
    let mut placed = HashMap::new();
    for (sym, blocks) in defs {
        for b in dom.iterated_frontier(blocks) {
            let n = scope.block(b).preds.len();
            if n < 2 {
                continue;
            }
            let loc = scope.block(b).stms.first().map_or(scope.loc, |s| s.loc);
            let phi = Phi::new(PhiKind::Phi, Expr::temp(*sym), vec![Expr::none(); n]);
            let stm = scope.mk_stm(StmKind::Phi(phi), loc);
            placed.insert(stm.id, *sym);
            let at = scope.block(b).first_non_phi();
            scope.block_mut(b).stms.insert(at, stm);
        }
    }
    placed
}

struct Renamer<'a> {
    dom: &'a DominatorTree,
    defs: &'a BTreeMap<Id, BTreeSet<BlockIdx>>,
    placed: &'a HashMap<StmId, Id>,
    stacks: HashMap<Id, Vec<Id>>,
}

impl Renamer<'_> {
    fn current(&self, sym: Id) -> Option<Id> {
        self.stacks.get(&sym).and_then(|s| s.last().copied())
    }

    fn rename_uses(&self, e: &mut Expr) {
        e.walk_mut(&mut |x| {
            if let Expr::Temp(n) = x {
                if self.defs.contains_key(n) {
                    if let Some(v) = self.current(*n) {
                        *n = v;
                    }
                }
            }
        });
    }

    fn visit(&mut self, scope: &mut Scope, blk: BlockIdx) {
        let mut pushed = vec![];
        let mut stms = std::mem::take(&mut scope.block_mut(blk).stms);
        for stm in &mut stms {
            let placed = self.placed.get(&stm.id).copied();
            if !stm.is_phi() {
                for e in stm.src_exprs_mut() {
                    self.rename_uses(e);
                }
                if let Some(dst) = stm.dst_mut() {
                    if !matches!(dst, Expr::Temp(_)) {
                        self.rename_uses(dst);
                    }
                }
            }
            let orig = placed.or_else(|| {
                if stm.is_phi() {
                    None
                } else {
                    stm.def_sym().filter(|d| self.defs.contains_key(d))
                }
            });
            let Some(orig) = orig else { continue };
            let (typ, tags) = scope
                .sym(orig)
                .map_or((Type::undef(), SymTags::empty()), |s| (s.typ.clone(), s.tags));
            let new = scope.gen_sym(orig, typ, tags);
            if let Some(dst) = stm.dst_mut() {
                *dst = Expr::Temp(new);
            }
            self.stacks.entry(orig).or_default().push(new);
            pushed.push(orig);
        }
        scope.block_mut(blk).stms = stms;

        let mut succs = scope.block(blk).succs.clone();
        succs.dedup();
        for s in succs {
            let slots: Vec<usize> = scope
                .block(s)
                .preds
                .iter()
                .enumerate()
                .filter(|(_, p)| **p == blk)
                .map(|(i, _)| i)
                .collect();
            let mut fills = vec![];
            for stm in scope.block(s).phis() {
                if let Some(v) = self.placed.get(&stm.id).and_then(|o| self.current(*o)) {
                    fills.push((stm.id, v));
                }
            }
            for stm in scope.block_mut(s).stms.iter_mut() {
                let Some((_, v)) = fills.iter().find(|(id, _)| *id == stm.id) else {
                    continue;
                };
                if let Some(phi) = stm.as_phi_mut() {
                    for &i in &slots {
                        phi.args[i] = Expr::Temp(*v);
                    }
                }
            }
        }

        let dom = self.dom;
        for &c in dom.children(blk) {
            self.visit(scope, c);
        }
        for orig in pushed {
            if let Some(s) = self.stacks.get_mut(&orig) {
                s.pop();
            }
        }
    }
}

/// Replace `name` by `rep` wherever the statement reads it.
fn substitute(scope: &mut Scope, name: Id, rep: &Expr) {
    for blk in scope.live_blocks() {
        for stm in scope.block_mut(blk).stms.iter_mut() {
            for e in stm.src_exprs_mut() {
                e.replace_temp(name, rep);
            }
            if let Some(dst) = stm.dst_mut() {
                if !matches!(dst, Expr::Temp(_)) {
                    dst.replace_temp(name, rep);
                }
            }
        }
    }
}

/// Drop placed phis that nothing reads and phis whose arguments all agree.
/// Removing one phi can make another trivial, so this runs to a fixpoint.
fn simplify_phis(scope: &mut Scope, placed: &mut HashMap<StmId, Id>) {
    loop {
        let mut users: HashMap<Id, BTreeSet<StmId>> = HashMap::new();
        for (_, stm) in scope.all_stms() {
            for q in stm.use_qsyms() {
                if let Some(h) = q.first() {
                    users.entry(*h).or_default().insert(stm.id);
                }
            }
        }
        let mut found = None;
        for (blk, stm) in scope.all_stms() {
            if !placed.contains_key(&stm.id) {
                continue;
            }
            let Some(phi) = stm.as_phi() else { continue };
            let Some(var) = phi.var.as_temp() else { continue };
            let read_elsewhere = users
                .get(&var)
                .is_some_and(|u| u.iter().any(|i| *i != stm.id));
            if !read_elsewhere {
                found = Some((blk, stm.id, var, None));
                break;
            }
            let mut distinct: Vec<&Expr> = vec![];
            for a in &phi.args {
                if a.as_temp() != Some(var) && !distinct.contains(&a) {
                    distinct.push(a);
                }
            }
            if let [only] = distinct.as_slice() {
                if **only != Expr::none() {
                    found = Some((blk, stm.id, var, Some((*only).clone())));
                    break;
                }
            }
        }
        let Some((blk, id, var, rep)) = found else {
            return;
        };
        scope.block_mut(blk).stms.retain(|s| s.id != id);
        placed.remove(&id);
        if let Some(rep) = rep {
            substitute(scope, var, &rep);
        }
        scope.del_sym(var);
    }
}

/// Delete renamed symbols that no statement mentions any more.
fn drop_stale_symbols(scope: &mut Scope, renamed: impl Iterator<Item = Id>) {
    let mut seen: BTreeSet<Id> = BTreeSet::new();
    for (_, stm) in scope.all_stms() {
        for e in stm.src_exprs().into_iter().chain(stm.dst()) {
            e.walk(&mut |x| {
                if let Expr::Temp(n) = x {
                    seen.insert(*n);
                }
            });
        }
    }
    for name in renamed {
        if !seen.contains(&name) {
            scope.del_sym(name);
        }
    }
}

/// Give the remaining phis their predicates; those at loop heads become
/// loop phis over induction variables.
fn finish_phis(scope: &mut Scope, placed: &HashMap<StmId, Id>) {
    let conds = path_conds(scope);
    let mut inductions = vec![];
    for blk in scope.live_blocks() {
        let head = scope.block(blk).is_loop_head();
        let ps = (!head).then(|| phi_predicates(scope, &conds, blk));
        for stm in scope.block_mut(blk).stms.iter_mut() {
            if !placed.contains_key(&stm.id) {
                continue;
            }
            let Some(phi) = stm.as_phi_mut() else { continue };
            match &ps {
                Some(ps) => phi.ps = ps.clone(),
                None => {
                    phi.kind = PhiKind::LPhi;
                    inductions.extend(phi.var.as_temp());
                }
            }
        }
    }
    for name in inductions {
        if let Some(sym) = scope.sym_mut(name) {
            if sym.typ.is_scalar() || sym.typ.is_seq() || sym.typ.is_object() {
                sym.tags |= SymTags::INDUCTION;
            }
        }
    }
}

impl<K: SsaClass> Visitor for Ssa<K> {
    fn visits(&self, scope: &Scope) -> bool {
        scope.has_body() && !scope.is_lib()
    }

    fn start(&mut self, scope: &mut Scope, ctx: &mut Context) -> VisResult {
        let defs = candidates::<K>(scope, ctx);
        if defs.is_empty() {
            return Ok(Action::SkipChildren);
        }
        let dom = DominatorTree::new(scope);
        let mut placed = place_phis(scope, &dom, &defs);
        if let Some(root) = dom.root() {
            let mut renamer = Renamer {
                dom: &dom,
                defs: &defs,
                placed: &placed,
                stacks: HashMap::new(),
            };
            renamer.visit(scope, root);
        }
        simplify_phis(scope, &mut placed);
        drop_stale_symbols(scope, defs.keys().copied());
        finish_phis(scope, &placed);
        log::debug!(
            "{}: {} renamed {} symbol(s), {} phi(s) kept",
            scope.name,
            K::NAME,
            defs.len(),
            placed.len()
        );
        scope.invalidate();
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    fn blocks(src: &str, f: &str) -> (Context, Vec<Vec<String>>) {
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        ScalarSsa::do_pass_default(&mut ctx).unwrap();
        let out = {
            let rc = ctx.scope(Id::new(f)).unwrap();
            let s = rc.borrow();
            s.live_blocks()
                .into_iter()
                .map(|b| s.block(b).stms.iter().map(|s| s.to_string()).collect())
                .collect()
        };
        (ctx, out)
    }

    #[test]
    fn diamond() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param c: bool;
  sym x: int32;
  block b0 entry {
    x = 1;
    cjump c ? b1 : b2;
  }
  block b1 preds(b0) {
    x = 2;
    jump b3;
  }
  block b2 preds(b0) {
    x = 3;
    jump b3;
  }
  block b3 exit preds(b1, b2) {
    ret x;
  }
}
"#;
        let (ctx, b) = blocks(src, "@top.f");
        assert_eq!(b[0], vec!["x#0 = 1", "cjump c ? b1 : b2"]);
        assert_eq!(b[1], vec!["x#1 = 2", "jump b3"]);
        assert_eq!(b[2], vec!["x#2 = 3", "jump b3"]);
        assert_eq!(b[3], vec!["x#3 = phi(x#1 ? c, x#2 ? (!c))", "ret x#3"]);
        let f = ctx.scope(Id::new("@top.f")).unwrap();
        let f = f.borrow();
        assert!(!f.has_sym(Id::new("x")));
        assert_eq!(f.sym(Id::new("x#3")).unwrap().ancestor, Some(Id::new("x")));
    }

    #[test]
    fn loop_phis() {
        let src = r#"
scope @top [namespace] {}
scope @top.g [function] {
  sym i: int32;
  sym s: int32;
  block b0 entry {
    i = 0;
    s = 0;
    jump b1;
  }
  block b1 preds(b0, b2) {
    @t#0 = (i < 10);
    cjump @t#0 ? b2 : b3;
  }
  block b2 preds(b1) {
    s = (s + i);
    i = (i + 1);
    jump b1 loop;
  }
  block b3 exit preds(b1) {
    ret s;
  }
}
"#;
        let (ctx, b) = blocks(src, "@top.g");
        assert_eq!(b[0], vec!["i#0 = 0", "s#0 = 0", "jump b1"]);
        assert_eq!(
            b[1],
            vec![
                "i#1 = lphi(i#0, i#2)",
                "s#1 = lphi(s#0, s#2)",
                "@t#0 = (i#1 < 10)",
                "cjump @t#0 ? b2 : b3"
            ]
        );
        assert_eq!(b[2], vec!["s#2 = (s#1 + i#1)", "i#2 = (i#1 + 1)", "jump b1 loop"]);
        assert_eq!(b[3], vec!["ret s#1"]);
        let g = ctx.scope(Id::new("@top.g")).unwrap();
        let g = g.borrow();
        assert!(g.sym(Id::new("i#1")).unwrap().is_induction());
        assert!(!g.sym(Id::new("i#2")).unwrap().is_induction());
    }

    #[test]
    fn single_definition_without_phis() {
        let src = r#"
scope @top [namespace] {}
scope @top.h [function] {
  param c: bool;
  sym x: int32;
  block b0 entry {
    x = 5;
    cjump c ? b1 : b2;
  }
  block b1 preds(b0) {
    jump b2;
  }
  block b2 exit preds(b0, b1) {
    ret x;
  }
}
"#;
        let (_, b) = blocks(src, "@top.h");
        assert_eq!(b[2], vec!["ret x#0"]);
    }
}
