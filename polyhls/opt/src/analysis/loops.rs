//! Natural loop discovery and induction variable recognition.
use super::DominatorTree;
use polyhls_ir::{
    BinOp, BlockIdx, Expr, Id, LoopInfo, LoopTree, PhiKind, RegionIdx, RelOp, Scope, StmKind,
};
use std::collections::{BTreeMap, BTreeSet};

/// Build the region tree of a scope. Every back edge `tail -> head` whose
/// head dominates its tail contributes a natural loop; back edges sharing a
/// head are merged into one loop.
pub fn build_loop_tree(scope: &Scope, dom: &DominatorTree) -> LoopTree {
    let live: BTreeSet<BlockIdx> = scope.live_blocks().into_iter().collect();
    let mut loops: BTreeMap<BlockIdx, (Vec<BlockIdx>, BTreeSet<BlockIdx>)> = BTreeMap::new();
    for &head in &live {
        for &tail in &scope.block(head).preds_loop {
            if !dom.dominates(head, tail) {
                log::warn!("{}: irreducible back edge {tail} -> {head}", scope.name);
                continue;
            }
            let entry = loops.entry(head).or_default();
            entry.0.push(tail);
            entry.1.extend(loop_body(scope, head, tail));
        }
    }

    // Outer loops contain their inner loops, so bigger bodies go first.
    let mut order: Vec<_> = loops.into_iter().collect();
    order.sort_by_key(|(h, (_, body))| (std::cmp::Reverse(body.len()), *h));
    let mut tree = LoopTree::new(live);
    for (head, (tails, body)) in order {
        let parent = tree.region_of(head);
        tree.add_loop(parent, head, tails, body);
    }
    tree
}

/// `head` plus every block that reaches `tail` without passing `head`.
fn loop_body(scope: &Scope, head: BlockIdx, tail: BlockIdx) -> BTreeSet<BlockIdx> {
    let mut body = BTreeSet::from([head]);
    let mut work = vec![tail];
    while let Some(b) = work.pop() {
        if body.insert(b) {
            work.extend(scope.block(b).preds.iter().copied());
        }
    }
    body
}

/// Recognize the counter, bounds and exits of loop `r`. The scope is
/// expected to be in SSA form with loop phis at the head.
pub fn loop_info(scope: &Scope, tree: &LoopTree, r: RegionIdx) -> LoopInfo {
    let region = &tree.regions[r];
    let mut info = LoopInfo::default();
    let Some(head) = region.head else {
        return info;
    };

    let mut exits = BTreeSet::new();
    for &b in &region.blocks {
        for s in &scope.block(b).succs {
            if !region.blocks.contains(s) {
                exits.insert(*s);
            }
        }
    }
    info.exits = exits.into_iter().collect();

    let Some(cond) = head_condition(scope, head, &region.blocks) else {
        return info;
    };
    let head_blk = scope.block(head);
    let fwd_pos: Vec<usize> = head_blk
        .preds
        .iter()
        .enumerate()
        .filter(|(_, p)| !region.blocks.contains(p))
        .map(|(i, _)| i)
        .collect();
    for stm in head_blk.phis() {
        let Some(phi) = stm.as_phi() else { continue };
        if phi.kind == PhiKind::UPhi {
            continue;
        }
        let Some(var) = phi.var.as_temp() else { continue };
        if !cond.mentions(var) {
            continue;
        }
        info.counter = Some(var);
        info.init = fwd_pos
            .first()
            .and_then(|i| phi.args.get(*i))
            .map(|a| resolve_const(scope, a));
        let back = head_blk
            .preds
            .iter()
            .position(|p| region.blocks.contains(p))
            .and_then(|i| phi.args.get(i));
        info.update = back.and_then(|b| b.as_temp()).and_then(|t| single_def_src(scope, t));
        info.cond = Some(cond.clone());
        info.trip_count = trip_count(var, &info);
        break;
    }
    if info.cond.is_none() {
        info.cond = Some(cond);
    }
    info
}

/// The condition under which the loop continues, taken from the branch at
/// the end of the head. Condition temporaries are looked through.
fn head_condition(scope: &Scope, head: BlockIdx, body: &BTreeSet<BlockIdx>) -> Option<Expr> {
    let StmKind::CJump { cond, t, .. } = &scope.block(head).terminator()?.kind else {
        return None;
    };
    let cond = match cond.as_temp().and_then(|c| single_def_src(scope, c)) {
        Some(e @ Expr::Relop(..)) => e,
        _ => cond.clone(),
    };
    Some(if body.contains(t) { cond } else { Expr::not(cond) })
}

/// The value assigned by the only `MOVE` defining `sym`.
fn single_def_src(scope: &Scope, sym: Id) -> Option<Expr> {
    let mut found = None;
    for (_, stm) in scope.all_stms() {
        if stm.def_sym() == Some(sym) {
            if found.is_some() {
                return None;
            }
            found = match &stm.kind {
                StmKind::Move { src, .. } => Some(src.clone()),
                _ => return None,
            };
        }
    }
    found
}

fn resolve_const(scope: &Scope, e: &Expr) -> Expr {
    match e.as_temp().and_then(|t| single_def_src(scope, t)) {
        Some(c @ Expr::Const(_)) => c,
        _ => e.clone(),
    }
}

fn trip_count(var: Id, info: &LoopInfo) -> Option<u64> {
    let init = info.init.as_ref()?.as_int()?;
    let step = match info.update.as_ref()? {
        Expr::Binop(BinOp::Add, l, r) if l.as_temp() == Some(var) => r.as_int()?,
        Expr::Binop(BinOp::Add, l, r) if r.as_temp() == Some(var) => l.as_int()?,
        _ => return None,
    };
    let (op, bound) = match info.cond.as_ref()? {
        Expr::Relop(op, l, r) if l.as_temp() == Some(var) => (*op, r.as_int()?),
        _ => return None,
    };
    if step <= 0 {
        return None;
    }
    let span = match op {
        RelOp::Lt | RelOp::NotEq => bound - init,
        RelOp::LtE => bound - init + 1,
        _ => return None,
    };
    Some(if span <= 0 {
        0
    } else {
        ((span + step - 1) / step) as u64
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    const SRC: &str = r#"
scope @top [namespace] {}
scope @top.f [function] {
  block b0 entry {
    i#0 = 0;
    jump b1;
  }
  block b1 preds(b0, b2) {
    i#1 = lphi(i#0, i#2);
    @t#0 = (i#1 < 10);
    cjump @t#0 ? b2 : b3;
  }
  block b2 preds(b1) {
    i#2 = (i#1 + 1);
    jump b1 loop;
  }
  block b3 exit preds(b1) {
    ret None;
  }
}
"#;

    #[test]
    fn counted_loop() {
        let prog = IrParser::parse(SRC.as_bytes()).unwrap();
        let ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        let f = ctx.scope(Id::new("@top.f")).unwrap();
        let f = f.borrow();
        let dom = DominatorTree::new(&f);
        let tree = build_loop_tree(&f, &dom);
        let loops = tree.loops();
        assert_eq!(loops.len(), 1);
        let region = &tree.regions[loops[0]];
        assert_eq!(region.head, Some(BlockIdx(1)));
        assert_eq!(region.blocks.len(), 2);
        let info = loop_info(&f, &tree, loops[0]);
        assert_eq!(info.counter.map(|c| c.root()), Some(Id::new("i")));
        assert_eq!(info.init, Some(Expr::int(0)));
        assert_eq!(info.exits, vec![BlockIdx(3)]);
        assert_eq!(info.trip_count, Some(10));
    }
}
