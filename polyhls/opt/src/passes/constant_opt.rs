use crate::analysis::{DominatorTree, TypeEval};
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{
    BlockIdx, Const, Context, Expr, Id, JumpKind, PhiKind, RelOp, Scope, Stm, StmId, StmKind,
    SymTags, TypeKind, UnOp, UseDefTable, cfg,
};
use std::collections::{HashSet, VecDeque};

/// Symbols whose value is visible outside the scope and must keep their
/// definition.
const SHARED: SymTags = SymTags::PARAM
    .union(SymTags::RETURN)
    .union(SymTags::FREE)
    .union(SymTags::FIELD)
    .union(SymTags::STATIC)
    .union(SymTags::SELF)
    .union(SymTags::REGISTER);

/// Evaluate a node whose operands are constants.
fn fold_node(e: &Expr) -> Option<Expr> {
    let truth = |x: &Expr| x.as_const().and_then(Const::is_true);
    Some(match e {
        Expr::Unop(op, x) => {
            let c = x.as_const()?;
            match op {
                UnOp::Not => Expr::bool(!c.is_true()?),
                UnOp::USub => Expr::int(c.as_int()?.wrapping_neg()),
                UnOp::UAdd => Expr::int(c.as_int()?),
                UnOp::Invert => Expr::int(!c.as_int()?),
            }
        }
        Expr::Binop(op, l, r) => Expr::int(op.eval(l.as_int()?, r.as_int()?)?),
        Expr::Relop(RelOp::And, l, r) if l.is_const() || r.is_const() => {
            Expr::and((**l).clone(), (**r).clone())
        }
        Expr::Relop(RelOp::Or, l, r) if l.is_const() || r.is_const() => {
            Expr::or((**l).clone(), (**r).clone())
        }
        Expr::Relop(op, l, r) => {
            let (lc, rc) = (l.as_const()?, r.as_const()?);
            match (op, lc.as_int(), rc.as_int()) {
                (_, Some(a), Some(b)) => Expr::bool(op.eval(a, b)),
                (RelOp::Eq | RelOp::Is, ..) => Expr::bool(lc == rc),
                (RelOp::NotEq | RelOp::IsNot, ..) => Expr::bool(lc != rc),
                _ => return None,
            }
        }
        Expr::Condop(c, a, b) => match truth(c) {
            Some(true) => (**a).clone(),
            Some(false) => (**b).clone(),
            None if a == b => (**a).clone(),
            None => return None,
        },
        Expr::Polyop(_, vs) if vs.len() == 1 => vs[0].clone(),
        Expr::Polyop(op, vs) => {
            let mut acc = op.identity()?;
            for v in vs {
                acc = op.eval(acc, v.as_int()?)?;
            }
            Expr::int(acc)
        }
        _ => return None,
    })
}

/// Fold every constant sub-expression of `e`, bottom up.
pub(crate) fn fold_expr(e: &mut Expr) -> bool {
    let mut changed = false;
    e.walk_mut(&mut |x| {
        if let Some(folded) = fold_node(x) {
            if folded != *x {
                *x = folded;
                changed = true;
            }
        }
    });
    changed
}

/// Turn the terminator of `blk` into a plain jump when its condition is
/// constant, dropping the edges that are never taken. Arms of a `MCJUMP`
/// that can never fire are removed.
pub(crate) fn fold_branch(scope: &mut Scope, blk: BlockIdx) -> bool {
    let truth = |x: &Expr| x.as_const().and_then(Const::is_true);
    let Some(term) = scope.block(blk).terminator() else {
        return false;
    };
    let old_targets = term.targets();
    let new_kind = match &term.kind {
        StmKind::CJump { cond, t, f } => match truth(cond) {
            Some(b) => StmKind::Jump {
                target: if b { *t } else { *f },
                kind: JumpKind::Plain,
            },
            None if t == f => StmKind::Jump {
                target: *t,
                kind: JumpKind::Plain,
            },
            None => return false,
        },
        StmKind::MCJump { conds, targets } => {
            let mut arms = vec![];
            for (c, t) in conds.iter().zip(targets) {
                match truth(c) {
                    Some(false) => {}
                    Some(true) => {
                        arms.push((Expr::bool(true), *t));
                        break;
                    }
                    None => arms.push((c.clone(), *t)),
                }
            }
            match arms.len() {
                0 => return false,
                n if n == conds.len() => return false,
                1 => StmKind::Jump {
                    target: arms[0].1,
                    kind: JumpKind::Plain,
                },
                _ => {
                    let (conds, targets) = arms.into_iter().unzip();
                    StmKind::MCJump { conds, targets }
                }
            }
        }
        _ => return false,
    };
    let kept: HashSet<BlockIdx> = match &new_kind {
        StmKind::Jump { target, .. } => [*target].into(),
        StmKind::MCJump { targets, .. } => targets.iter().copied().collect(),
        _ => HashSet::new(),
    };
    if let Some(term) = scope.block_mut(blk).terminator_mut() {
        term.kind = new_kind;
    }
    let mut dropped: Vec<BlockIdx> = old_targets.into_iter().filter(|t| !kept.contains(t)).collect();
    dropped.dedup();
    for d in dropped {
        cfg::disconnect(scope, blk, d);
    }
    true
}

/// The value of a global or class level constant named by `e`.
fn global_value(ctx: &Context, scope: &Scope, e: &Expr) -> Option<Const> {
    let (owner, name) = match e {
        Expr::Temp(n) if !scope.has_sym(*n) => {
            let sym = ctx.lookup_sym(scope, *n)?;
            if !sym.is_static() {
                return None;
            }
            (sym.scope, *n)
        }
        Expr::Attr(base, n) => match ctx.type_of_ref(scope, base)?.kind {
            TypeKind::Class { scope, .. } | TypeKind::Namespace { scope } => (scope, *n),
            _ => return None,
        },
        _ => return None,
    };
    if let Some(c) = ctx.runtime_info.global_constant(owner.child(name)) {
        return Some(c.clone());
    }
    let rc = ctx.get_scope(owner)?;
    let owner = rc.try_borrow().ok()?;
    owner.constants.get(&name).cloned()
}

/// Constant folding before SSA:
/// - folds operations on constants,
/// - replaces reads of global and class constants by their value,
/// - propagates locals assigned a single constant into the uses they
///   dominate and prunes them,
/// - removes branches that are never taken.
///
/// In namespaces and class bodies the constant assignments are recorded in
/// [Scope::constants] instead.
#[derive(Default)]
pub struct EarlyConstantOpt;

impl Named for EarlyConstantOpt {
    fn name() -> &'static str {
        "early-constant-opt"
    }

    fn description() -> &'static str {
        "fold constants and constant branches before SSA"
    }
}

impl EarlyConstantOpt {
    fn fold_stms(scope: &mut Scope, ctx: &Context) -> bool {
        let mut changed = false;
        for blk in scope.live_blocks() {
            for pos in 0..scope.block(blk).stms.len() {
                let mut stm = scope.block(blk).stms[pos].clone();
                let mut dirty = false;
                for e in stm.src_exprs_mut() {
                    e.walk_mut(&mut |x| {
                        if let Some(c) = global_value(ctx, scope, x) {
                            *x = Expr::Const(c);
                            dirty = true;
                        }
                    });
                    dirty |= fold_expr(e);
                }
                if dirty {
                    scope.block_mut(blk).stms[pos] = stm;
                    changed = true;
                }
            }
        }
        changed
    }

    fn record_constants(scope: &mut Scope) -> bool {
        let ud = UseDefTable::build(scope);
        let mut found = vec![];
        for (_, stm) in scope.all_stms() {
            if let StmKind::Move {
                dst: Expr::Temp(d),
                src: Expr::Const(c),
            } = &stm.kind
            {
                if ud.defs(*d).len() == 1 && scope.constants.get(d) != Some(c) {
                    found.push((*d, c.clone()));
                }
            }
        }
        let changed = !found.is_empty();
        scope.constants.extend(found);
        changed
    }

    fn propagate_locals(scope: &mut Scope) -> bool {
        let ud = UseDefTable::build(scope);
        let dom = DominatorTree::new(scope);
        let pos = scope.stm_positions();
        let mut removed: HashSet<StmId> = HashSet::new();
        let mut edits: Vec<(StmId, Id, Const)> = vec![];
        for (_, stm) in scope.all_stms() {
            let StmKind::Move {
                dst: Expr::Temp(d),
                src: Expr::Const(c),
            } = &stm.kind
            else {
                continue;
            };
            let local = scope.sym(*d).is_some_and(|s| !s.tags.intersects(SHARED));
            if !local || ud.defs(*d).len() != 1 || !ud.type_users(*d).is_empty() {
                continue;
            }
            let (dblk, dpos) = pos[&stm.id];
            let dominated = ud.uses(*d).iter().all(|u| {
                let (ublk, upos) = pos[u];
                if scope.block(ublk).stms[upos].is_phi() {
                    false
                } else if ublk == dblk {
                    upos > dpos
                } else {
                    dom.dominates(dblk, ublk)
                }
            });
            if dominated {
                edits.push((stm.id, *d, c.clone()));
            }
        }
        for (id, d, c) in &edits {
            let rep = Expr::Const(c.clone());
            for u in ud.uses(*d) {
                let (b, p) = pos[&u];
                for e in scope.block_mut(b).stms[p].exprs_mut() {
                    e.replace_temp(*d, &rep);
                }
            }
            removed.insert(*id);
            scope.del_sym(*d);
        }
        for blk in scope.live_blocks() {
            scope.block_mut(blk).stms.retain(|s| !removed.contains(&s.id));
        }
        !edits.is_empty()
    }
}

impl Visitor for EarlyConstantOpt {
    fn start(&mut self, scope: &mut Scope, ctx: &mut Context) -> VisResult {
        let function_like = scope.is_function_like();
        loop {
            let mut changed = Self::fold_stms(scope, ctx);
            if function_like {
                changed |= Self::propagate_locals(scope);
                let mut branches = false;
                for blk in scope.live_blocks() {
                    branches |= fold_branch(scope, blk);
                }
                if branches {
                    cfg::remove_unreachable(scope);
                    changed = true;
                }
            } else {
                changed |= Self::record_constants(scope);
            }
            if !changed {
                break;
            }
            scope.invalidate();
        }
        Ok(Action::SkipChildren)
    }
}

/// Constant propagation on SSA form, driven by a statement worklist:
/// - constant operands are folded, as are `len` of fixed size sequences and
///   constant subscripts of constant arrays,
/// - phis with a constant true predicate or a single remaining argument
///   become moves,
/// - constant moves are propagated into every use and removed,
/// - constant branches become jumps.
#[derive(Default)]
pub struct ConstantOpt;

impl Named for ConstantOpt {
    fn name() -> &'static str {
        "constant-opt"
    }

    fn description() -> &'static str {
        "propagate and fold constants on SSA form"
    }
}

/// What to do with a statement after its operands were folded.
enum Outcome {
    Keep,
    ToMove(Expr, Expr),
    Propagate(Id, Const),
    Branch,
}

fn locate(scope: &Scope, ud: &UseDefTable, id: StmId) -> Option<(BlockIdx, usize)> {
    let blk = ud.block_of(id)?;
    if scope.block(blk).removed {
        return None;
    }
    let pos = scope.block(blk).stms.iter().position(|s| s.id == id)?;
    Some((blk, pos))
}

/// The item at `idx` of an array that is assigned once and never stored to.
fn const_item(scope: &Scope, mem: Id, idx: i64) -> Option<Expr> {
    let mut def = None;
    for (_, stm) in scope.all_stms() {
        if stm.def_sym() == Some(mem) {
            if def.is_some() {
                return None;
            }
            def = stm.src();
        }
        let stored = stm.src_exprs().iter().any(|e| {
            let mut found = false;
            e.walk(&mut |x| {
                if let Expr::Mstore(m, ..) = x {
                    found |= m.head() == Some(mem);
                }
            });
            found
        });
        if stored {
            return None;
        }
    }
    let Some(Expr::Array { items, repeat, .. }) = def else {
        return None;
    };
    let times = usize::try_from(repeat.as_int()?).ok()?;
    let idx = usize::try_from(idx).ok()?;
    if items.is_empty() || idx >= items.len() * times {
        return None;
    }
    items.get(idx % items.len()).filter(|i| i.is_const()).cloned()
}

fn fold_typed(e: &mut Expr, scope: &Scope, ctx: &Context) -> bool {
    let ev = TypeEval::new(ctx, scope);
    let mut changed = false;
    e.walk_mut(&mut |x| {
        let rep = match x {
            Expr::Syscall { name, args, .. } if *name == "len" && args.len() == 1 => {
                ev.of(&args[0]).length().map(|n| Expr::int(n as i64))
            }
            Expr::Mref(m, o) => match (m.as_temp(), o.as_int()) {
                (Some(m), Some(i)) => const_item(scope, m, i),
                _ => None,
            },
            _ => None,
        };
        if let Some(rep) = rep {
            *x = rep;
            changed = true;
        }
    });
    changed
}

fn outcome(stm: &Stm, scope: &Scope, ud: &UseDefTable) -> Outcome {
    match &stm.kind {
        StmKind::Phi(phi) => {
            let truth = |x: &Expr| x.as_const().and_then(Const::is_true);
            let last = phi.args.len().saturating_sub(1);
            if let Some(i) = phi.ps.iter().position(|p| truth(p) == Some(true)) {
                if i < last {
                    return Outcome::ToMove(phi.var.clone(), phi.args[i].clone());
                }
            }
            let live: Vec<&Expr> = if phi.kind == PhiKind::UPhi && phi.ps.len() == phi.args.len() {
                phi.args
                    .iter()
                    .zip(&phi.ps)
                    .filter(|(_, p)| truth(p) != Some(false))
                    .map(|(a, _)| a)
                    .collect()
            } else {
                phi.args.iter().collect()
            };
            match live.as_slice() {
                [only] => Outcome::ToMove(phi.var.clone(), (*only).clone()),
                [first, rest @ ..] if rest.iter().all(|a| a == first) && first.is_const() => {
                    Outcome::ToMove(phi.var.clone(), (*first).clone())
                }
                _ => Outcome::Keep,
            }
        }
        StmKind::Move {
            dst: Expr::Temp(d),
            src: Expr::Const(c),
        } => {
            let local = scope.sym(*d).is_some_and(|s| !s.tags.intersects(SHARED));
            if local && ud.defs(*d).len() == 1 {
                Outcome::Propagate(*d, c.clone())
            } else {
                Outcome::Keep
            }
        }
        StmKind::CJump { cond, .. } if cond.is_const() => Outcome::Branch,
        StmKind::MCJump { conds, .. } if conds.iter().any(Expr::is_const) => Outcome::Branch,
        _ => Outcome::Keep,
    }
}

impl Visitor for ConstantOpt {
    fn start(&mut self, scope: &mut Scope, ctx: &mut Context) -> VisResult {
        let mut ud = UseDefTable::build(scope);
        let mut queue: VecDeque<StmId> = scope.all_stms().map(|(_, s)| s.id).collect();
        let mut queued: HashSet<StmId> = queue.iter().copied().collect();
        let mut cfg_changed = false;
        let enqueue = |queue: &mut VecDeque<StmId>, queued: &mut HashSet<StmId>, ids: Vec<StmId>| {
            for id in ids {
                if queued.insert(id) {
                    queue.push_back(id);
                }
            }
        };

        while let Some(id) = queue.pop_front() {
            queued.remove(&id);
            let Some((blk, pos)) = locate(scope, &ud, id) else {
                continue;
            };
            let mut stm = scope.block(blk).stms[pos].clone();
            let mut changed = false;
            for e in stm.src_exprs_mut() {
                changed |= fold_expr(e);
                changed |= fold_typed(e, scope, ctx);
            }

            match outcome(&stm, scope, &ud) {
                Outcome::ToMove(dst, src) => {
                    ud.remove_stm(id);
                    scope.block_mut(blk).stms.remove(pos);
                    let mv = scope.mk_stm(StmKind::Move { dst, src }, stm.loc);
                    let at = scope.block(blk).first_non_phi();
                    ud.add_stm(blk, &mv);
                    enqueue(&mut queue, &mut queued, vec![mv.id]);
                    scope.block_mut(blk).stms.insert(at, mv);
                }
                Outcome::Propagate(d, c) => {
                    let rep = Expr::Const(c.clone());
                    let users = ud.uses(d);
                    for u in &users {
                        let Some((ub, up)) = locate(scope, &ud, *u) else {
                            continue;
                        };
                        let user = &mut scope.block_mut(ub).stms[up];
                        for e in user.exprs_mut() {
                            e.replace_temp(d, &rep);
                        }
                        let user = user.clone();
                        ud.replace(ub, *u, &user);
                    }
                    enqueue(&mut queue, &mut queued, users);
                    ud.remove_stm(id);
                    scope.block_mut(blk).stms.remove(pos);
                    scope.constants.insert(d, c);
                    if !ud.is_used(d) {
                        scope.del_sym(d);
                    }
                }
                Outcome::Branch => {
                    scope.block_mut(blk).stms[pos] = stm;
                    let succs = scope.block(blk).succs.clone();
                    if fold_branch(scope, blk) {
                        cfg_changed = true;
                        cfg::remove_unreachable(scope);
                        // Joins that lost a predecessor may hold single-argument phis.
                        for s in succs {
                            if !scope.block(s).removed {
                                let phis = scope.block(s).phis().map(|p| p.id).collect();
                                enqueue(&mut queue, &mut queued, phis);
                            }
                        }
                    }
                    if let Some(term) = scope.block(blk).terminator() {
                        let term = term.clone();
                        ud.replace(blk, id, &term);
                    }
                }
                Outcome::Keep if changed => {
                    ud.replace(blk, id, &stm);
                    if let Some(d) = stm.def_sym() {
                        enqueue(&mut queue, &mut queued, ud.uses(d));
                    }
                    scope.block_mut(blk).stms[pos] = stm;
                }
                Outcome::Keep => {}
            }
        }

        if cfg_changed {
            scope.invalidate();
        } else {
            scope.usedef = Some(ud);
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, Printer, from_ast::ast_to_ir};

    fn context(src: &str) -> Context {
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        ast_to_ir(prog, Config::default(), None).unwrap()
    }

    fn body(ctx: &Context, name: &str) -> Vec<String> {
        let rc = ctx.scope(Id::new(name)).unwrap();
        let scope = rc.borrow();
        scope.all_stms().map(|(_, s)| s.to_string()).collect()
    }

    #[test]
    fn fold_and_prune_locals() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function, returnable] {
  return: int32;
  sym @return: int32 [return];
  block b0 entry exit {
    x = (2 + 3);
    y = (x * 4);
    @return = y;
    ret @return;
  }
}
"#;
        let mut ctx = context(src);
        EarlyConstantOpt::do_pass_default(&mut ctx).unwrap();
        assert_eq!(body(&ctx, "@top.f"), vec!["@return = 20", "ret @return"]);
        let f = ctx.scope(Id::new("@top.f")).unwrap();
        assert!(!f.borrow().has_sym(Id::new("x")));
        assert!(!f.borrow().has_sym(Id::new("y")));
    }

    #[test]
    fn globals_and_dead_branches() {
        let src = r#"
scope @top [namespace] {
  sym N: int32 [static];
  block b0 entry exit {
    N = (2 * 4);
    ret None;
  }
}
scope @top.f [function] {
  param a: int32;
  block b0 entry {
    c = (N > 4);
    cjump c ? b1 : b2;
  }
  block b1 preds(b0) {
    a = (a + N);
    jump b3;
  }
  block b2 preds(b0) {
    a = 0;
    jump b3;
  }
  block b3 exit preds(b1, b2) {
    ret a;
  }
}
"#;
        let mut ctx = context(src);
        EarlyConstantOpt::do_pass_default(&mut ctx).unwrap();
        let top = ctx.scope(Id::new("@top")).unwrap();
        assert_eq!(top.borrow().constants.get(&Id::new("N")), Some(&Const::Int(8)));
        assert_eq!(
            body(&ctx, "@top.f"),
            vec!["jump b1", "a = (a + 8)", "jump b3", "ret a"]
        );
        let f = ctx.scope(Id::new("@top.f")).unwrap();
        assert!(f.borrow().block(BlockIdx(2)).removed);
        assert_eq!(f.borrow().block(BlockIdx(3)).preds, vec![BlockIdx(1)]);
    }

    const SSA: &str = r#"
scope @top [namespace] {}
scope @top.f [function, returnable] {
  param c: bool;
  return: int32;
  sym @return: int32 [return];
  sym xs: rom<int32>[3];
  block b0 entry {
    xs = list[4, 5, 6];
    k#1 = 1;
    cjump c ? b1 : b2;
  }
  block b1 preds(b0) {
    x#1 = xs[k#1];
    jump b3;
  }
  block b2 preds(b0) {
    x#2 = syscall len(xs);
    jump b3;
  }
  block b3 exit preds(b1, b2) {
    x#3 = phi(x#1 ? True, x#2 ? (!True));
    @return = x#3;
    ret @return;
  }
}
"#;

    #[test]
    fn ssa_propagation() {
        let mut ctx = context(SSA);
        ConstantOpt::do_pass_default(&mut ctx).unwrap();
        let f = ctx.scope(Id::new("@top.f")).unwrap();
        let f = f.borrow();
        let exit: Vec<String> = f
            .block(BlockIdx(3))
            .stms
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(exit, vec!["@return = 5", "ret @return"]);
        assert!(f.block(BlockIdx(1)).stms.iter().all(|s| s.is_jump()));
        assert!(f.block(BlockIdx(2)).stms.iter().all(|s| s.is_jump()));
    }

    #[test]
    fn idempotent() {
        let mut ctx = context(SSA);
        ConstantOpt::do_pass_default(&mut ctx).unwrap();
        let once = Printer::scope_to_string(&ctx.scope(Id::new("@top.f")).unwrap().borrow());
        ConstantOpt::do_pass_default(&mut ctx).unwrap();
        let twice = Printer::scope_to_string(&ctx.scope(Id::new("@top.f")).unwrap().borrow());
        assert_eq!(once, twice);
    }
}
