use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{BlockIdx, Context, Expr, Id, Phi, PhiKind, Scope, StmId, StmKind};
use std::collections::HashMap;

/// Replaces the uses of tuple and object phis by predicated statements
/// over the phi arguments, so every branch keeps its own record:
/// ```text
/// o#2 = phi(a ? c, b ? (!c))     y = uphi(a.x ? c, b.x ? (!c))
/// y = o#2.x;                 =>  cmove c ? a.x = 1
/// o#2.x = 1;                     cmove (!c) ? b.x = 1
/// ```
/// Uses of the whole value stay. A phi left without readers is removed.
#[derive(Default)]
pub struct UsePhiMaterializer;

impl Named for UsePhiMaterializer {
    fn name() -> &'static str {
        "use-phi-materializer"
    }

    fn description() -> &'static str {
        "turn uses of tuple and object phis into predicated statements"
    }
}

struct Selector {
    blk: BlockIdx,
    id: StmId,
    var: Id,
    arms: Vec<(Expr, Expr)>,
}

/// Is `v` read only through field or item accesses in `e`?
fn projected_only(e: &Expr, v: Id) -> bool {
    match e {
        Expr::Temp(n) => *n != v,
        Expr::Attr(head, _) if head.as_temp() == Some(v) => true,
        Expr::Mref(mem, offset) if mem.as_temp() == Some(v) => projected_only(offset, v),
        _ => e.kids().into_iter().all(|k| projected_only(k, v)),
    }
}

fn with_arg(e: &Expr, v: Id, arg: &Expr) -> Expr {
    let mut e = e.clone();
    e.replace_temp(v, arg);
    e
}

/// The predicated replacement of one reader of `sel`, if it can be split.
fn split(kind: &StmKind, sel: &Selector) -> Option<Vec<StmKind>> {
    let v = sel.var;
    match kind {
        StmKind::Move {
            dst: dst @ Expr::Temp(_),
            src,
        } if src.mentions(v) && projected_only(src, v) => {
            let (args, ps) = sel
                .arms
                .iter()
                .map(|(a, p)| (with_arg(src, v, a), p.clone()))
                .unzip();
            let mut phi = Phi::new(PhiKind::UPhi, dst.clone(), args);
            phi.ps = ps;
            Some(vec![StmKind::Phi(phi)])
        }
        StmKind::Move { dst, src }
            if dst.head() == Some(v) && !matches!(dst, Expr::Temp(_)) && projected_only(src, v) =>
        {
            Some(
                sel.arms
                    .iter()
                    .map(|(a, p)| StmKind::CMove {
                        cond: p.clone(),
                        dst: with_arg(dst, v, a),
                        src: with_arg(src, v, a),
                    })
                    .collect(),
            )
        }
        StmKind::Expr(e) if e.mentions(v) && projected_only(e, v) => Some(
            sel.arms
                .iter()
                .map(|(a, p)| StmKind::CExpr {
                    cond: p.clone(),
                    exp: with_arg(e, v, a),
                })
                .collect(),
        ),
        _ => None,
    }
}

fn selectors(scope: &Scope) -> Vec<Selector> {
    let mut out = vec![];
    for (blk, stm) in scope.all_stms() {
        let Some(phi) = stm.as_phi() else { continue };
        if phi.kind != PhiKind::Phi || phi.ps.len() != phi.args.len() {
            continue;
        }
        let Some(var) = phi.var.as_temp() else { continue };
        let record = scope
            .sym(var)
            .is_some_and(|s| s.typ.is_tuple() || s.typ.is_object());
        if !record || phi.args.iter().any(|a| *a == Expr::none()) {
            continue;
        }
        out.push(Selector {
            blk,
            id: stm.id,
            var,
            arms: phi.args.iter().cloned().zip(phi.ps.iter().cloned()).collect(),
        });
    }
    out
}

impl Visitor for UsePhiMaterializer {
    fn start(&mut self, scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        let mut changed = false;
        for sel in selectors(scope) {
            let mut splits: HashMap<StmId, Vec<StmKind>> = HashMap::new();
            let mut kept_readers = 0;
            for (_, stm) in scope.all_stms() {
                if stm.id == sel.id || !stm.use_qsyms().iter().any(|q| q.first() == Some(&sel.var)) {
                    continue;
                }
                match split(&stm.kind, &sel) {
                    Some(kinds) => {
                        splits.insert(stm.id, kinds);
                    }
                    None => kept_readers += 1,
                }
            }
            for blk in scope.live_blocks() {
                if !scope.block(blk).stms.iter().any(|s| splits.contains_key(&s.id)) {
                    continue;
                }
                let old = std::mem::take(&mut scope.block_mut(blk).stms);
                let mut new = Vec::with_capacity(old.len());
                for stm in old {
                    match splits.remove(&stm.id) {
                        Some(kinds) => {
                            for kind in kinds {
                                new.push(scope.mk_stm(kind, stm.loc));
                            }
                        }
                        None => new.push(stm),
                    }
                }
                scope.block_mut(blk).stms = new;
                changed = true;
            }
            if kept_readers == 0 {
                scope.block_mut(sel.blk).stms.retain(|s| s.id != sel.id);
                scope.del_sym(sel.var);
                changed = true;
            }
        }
        if changed {
            scope.invalidate();
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    #[test]
    fn field_reads_and_writes() {
        let src = r#"
scope @top [namespace] {}
scope @top.P [class] {
  sym x: int32 [field];
}
scope @top.f [function] {
  param c: bool;
  param a: object<@top.P>;
  param b: object<@top.P>;
  sym o#2: object<@top.P>;
  sym y: int32;
  block b0 entry {
    cjump c ? b1 : b2;
  }
  block b1 preds(b0) {
    jump b3;
  }
  block b2 preds(b0) {
    jump b3;
  }
  block b3 exit preds(b1, b2) {
    o#2 = phi(a ? c, b ? (!c));
    y = o#2.x;
    o#2.x = 1;
    ret y;
  }
}
"#;
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        UsePhiMaterializer::do_pass_default(&mut ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        let f = rc.borrow();
        let exit: Vec<String> = f.block(BlockIdx(3)).stms.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            exit,
            vec![
                "y = uphi(a.x ? c, b.x ? (!c))",
                "cmove c ? a.x = 1",
                "cmove (!c) ? b.x = 1",
                "ret y"
            ]
        );
        assert!(!f.has_sym(Id::new("o#2")));
    }

    #[test]
    fn whole_value_use_keeps_phi() {
        let src = r#"
scope @top [namespace] {}
scope @top.P [class] {
  sym x: int32 [field];
}
scope @top.f [function] {
  param c: bool;
  param a: object<@top.P>;
  param b: object<@top.P>;
  sym o#2: object<@top.P>;
  block b0 entry {
    cjump c ? b1 : b2;
  }
  block b1 preds(b0) {
    jump b3;
  }
  block b2 preds(b0) {
    jump b3;
  }
  block b3 exit preds(b1, b2) {
    o#2 = phi(a ? c, b ? (!c));
    ret o#2;
  }
}
"#;
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        UsePhiMaterializer::do_pass_default(&mut ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        let f = rc.borrow();
        assert_eq!(f.block(BlockIdx(3)).stms.len(), 2);
    }
}
