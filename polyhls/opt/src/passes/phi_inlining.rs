use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{BlockIdx, Context, Expr, PhiKind, Scope, StmKind};

/// Merges a selector whose argument is another selector of the same block:
/// ```text
/// y = uphi(a ? c, b ? (!c));
/// z = uphi(y ? d, e ? (!d));  =>  z = uphi(a ? (d && c), b ? (d && (!c)), e ? (!d))
/// ```
/// The merged selector picks its arguments by predicate, so it is always a
/// `uphi`. Loop phis are left alone.
#[derive(Default)]
pub struct PhiInlining;

impl Named for PhiInlining {
    fn name() -> &'static str {
        "phi-inlining"
    }

    fn description() -> &'static str {
        "merge selectors over selectors of the same block"
    }
}

/// Arguments with their predicates, for selectors that have both.
fn arms(kind: &StmKind) -> Option<(Expr, Vec<(Expr, Expr)>)> {
    let StmKind::Phi(phi) = kind else {
        return None;
    };
    if phi.kind == PhiKind::LPhi || phi.ps.len() != phi.args.len() {
        return None;
    }
    let arms = phi.args.iter().cloned().zip(phi.ps.iter().cloned()).collect();
    Some((phi.var.clone(), arms))
}

/// The first selector that reads another selector of the same block, with
/// its merged arguments and predicates.
fn find_merge(scope: &Scope, blk: BlockIdx) -> Option<(usize, Expr, Vec<Expr>, Vec<Expr>)> {
    let stms = &scope.block(blk).stms;
    for (i, outer) in stms.iter().enumerate() {
        let Some((var, outer_arms)) = arms(&outer.kind) else {
            continue;
        };
        for inner in &stms[..i] {
            let Some((ivar, inner_arms)) = arms(&inner.kind) else {
                continue;
            };
            if ivar == var || !outer_arms.iter().any(|(a, _)| *a == ivar) {
                continue;
            }
            let mut args = vec![];
            let mut ps = vec![];
            for (a, p) in &outer_arms {
                if *a == ivar {
                    for (b, q) in &inner_arms {
                        args.push(b.clone());
                        ps.push(Expr::and(p.clone(), q.clone()));
                    }
                } else {
                    args.push(a.clone());
                    ps.push(p.clone());
                }
            }
            return Some((i, ivar, args, ps));
        }
    }
    None
}

fn inline_once(scope: &mut Scope, blk: BlockIdx) -> bool {
    let Some((i, ivar, args, ps)) = find_merge(scope, blk) else {
        return false;
    };
    let name = scope.name;
    let stm = &mut scope.block_mut(blk).stms[i];
    let Some(phi) = stm.as_phi_mut() else {
        return false;
    };
    phi.kind = PhiKind::UPhi;
    phi.args = args;
    phi.ps = ps;
    log::debug!("{name}: merged {ivar} into `{stm}'");
    true
}

impl Visitor for PhiInlining {
    fn start(&mut self, scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        let mut changed = false;
        for blk in scope.live_blocks() {
            while inline_once(scope, blk) {
                changed = true;
            }
        }
        if changed {
            scope.usedef = None;
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, Id, from_ast::ast_to_ir};

    #[test]
    fn nested_selectors() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param a: int32;
  param b: int32;
  param e: int32;
  param c: bool;
  param d: bool;
  block b0 entry exit {
    y = uphi(a ? c, b ? (!c));
    z = uphi(y ? d, e ? (!d));
    ret z;
  }
}
"#;
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        PhiInlining::do_pass_default(&mut ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        let f = rc.borrow();
        let stms: Vec<String> = f.all_stms().map(|(_, s)| s.to_string()).collect();
        assert_eq!(
            stms,
            vec![
                "y = uphi(a ? c, b ? (!c))",
                "z = uphi(a ? (d && c), b ? (d && (!c)), e ? (!d))",
                "ret z"
            ]
        );
    }
}
