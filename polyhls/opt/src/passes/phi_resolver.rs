use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{BlockIdx, Context, Expr, Id, Phi, PhiKind, Scope, StmKind, SymTags, Type};
use polyhls_utils::Loc;

/// Takes the scope out of SSA form before data flow graphs are built.
///
/// A `phi` or `lphi` becomes one move per incoming edge, placed before the
/// terminator of the predecessor. A `uphi` becomes one conditional move per
/// argument, in place. Moves entering the same block that read each other's
/// destinations go through temporaries.
#[derive(Default)]
pub struct PhiCondResolver;

impl Named for PhiCondResolver {
    fn name() -> &'static str {
        "phi-cond-resolver"
    }

    fn description() -> &'static str {
        "lower phis to moves in predecessors and conditional moves"
    }
}

/// Moves to place at the end of one predecessor.
struct EdgeCopies {
    pred: BlockIdx,
    moves: Vec<(Id, Expr, Loc)>,
}

fn place_moves(scope: &mut Scope, copies: EdgeCopies) {
    let vars: Vec<Id> = copies.moves.iter().map(|(v, ..)| *v).collect();
    let clobbers = copies.moves.iter().any(|(v, src, _)| {
        vars.iter().any(|other| other != v && src.mentions(*other))
    });
    let mut kinds = vec![];
    if clobbers {
        let mut finals = vec![];
        for (v, src, loc) in copies.moves {
            let typ = scope.sym(v).map_or_else(Type::undef, |s| s.typ.clone());
            let t = scope.gen_temp(typ);
            kinds.push((StmKind::Move { dst: Expr::Temp(t), src }, loc));
            finals.push((StmKind::Move { dst: Expr::Temp(v), src: Expr::Temp(t) }, loc));
        }
        kinds.extend(finals);
    } else {
        for (v, src, loc) in copies.moves {
            kinds.push((StmKind::Move { dst: Expr::Temp(v), src }, loc));
        }
    }
    let mut at = {
        let b = scope.block(copies.pred);
        b.stms.len() - usize::from(b.terminator().is_some())
    };
    for (kind, loc) in kinds {
        let stm = scope.mk_stm(kind, loc);
        scope.block_mut(copies.pred).stms.insert(at, stm);
        at += 1;
    }
}

fn resolve_block(scope: &mut Scope, blk: BlockIdx) -> bool {
    let phis: Vec<(Phi, Loc)> = scope
        .block(blk)
        .phis()
        .filter_map(|s| s.as_phi().map(|p| (p.clone(), s.loc)))
        .collect();
    if phis.is_empty() {
        return false;
    }
    let preds = scope.block(blk).preds.clone();
    let mut edges: Vec<EdgeCopies> = preds
        .iter()
        .map(|p| EdgeCopies {
            pred: *p,
            moves: vec![],
        })
        .collect();
    let mut cmoves = vec![];
    for (phi, loc) in phis {
        let Some(var) = phi.var.as_temp() else {
            continue;
        };
        if scope.sym(var).is_some_and(|s| s.typ.is_list()) {
            if let Some(s) = scope.sym_mut(var) {
                s.tags |= SymTags::ALIAS;
            }
        }
        match phi.kind {
            PhiKind::UPhi => {
                for (arg, p) in phi.args.into_iter().zip(phi.ps) {
                    if arg != Expr::none() {
                        cmoves.push((
                            StmKind::CMove {
                                cond: p,
                                dst: phi.var.clone(),
                                src: arg,
                            },
                            loc,
                        ));
                    }
                }
            }
            PhiKind::Phi | PhiKind::LPhi => {
                for (i, arg) in phi.args.into_iter().enumerate() {
                    if arg == Expr::none() {
                        continue;
                    }
                    if let Some(edge) = edges.get_mut(i) {
                        edge.moves.push((var, arg, loc));
                    }
                }
            }
        }
    }

    let at = scope.block(blk).first_non_phi();
    let rest = scope.block_mut(blk).stms.split_off(at);
    let mut stms = Vec::with_capacity(cmoves.len() + rest.len());
    for (kind, loc) in cmoves {
        stms.push(scope.mk_stm(kind, loc));
    }
    stms.extend(rest);
    scope.block_mut(blk).stms = stms;

    for copies in edges {
        if !copies.moves.is_empty() {
            place_moves(scope, copies);
        }
    }
    true
}

impl Visitor for PhiCondResolver {
    fn start(&mut self, scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        let mut changed = false;
        for blk in scope.live_blocks() {
            changed |= resolve_block(scope, blk);
        }
        if changed {
            log::debug!("{}: left SSA form", scope.name);
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

    fn run(src: &str) -> Context {
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        PhiCondResolver::do_pass_default(&mut ctx).unwrap();
        ctx
    }

    fn stms(ctx: &Context, blk: u32) -> Vec<String> {
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        let f = rc.borrow();
        f.block(BlockIdx(blk)).stms.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn moves_in_predecessors() {
        let ctx = run(r#"
scope @top [namespace] {}
scope @top.f [function] {
  param c: bool;
  block b0 entry {
    cjump c ? b1 : b2;
  }
  block b1 preds(b0) {
    x#1 = 2;
    jump b3;
  }
  block b2 preds(b0) {
    x#2 = 3;
    jump b3;
  }
  block b3 exit preds(b1, b2) {
    x#3 = phi(x#1 ? c, x#2 ? (!c));
    ret x#3;
  }
}
"#);
        assert_eq!(stms(&ctx, 1), vec!["x#1 = 2", "x#3 = x#1", "jump b3"]);
        assert_eq!(stms(&ctx, 2), vec!["x#2 = 3", "x#3 = x#2", "jump b3"]);
        assert_eq!(stms(&ctx, 3), vec!["ret x#3"]);
    }

    #[test]
    fn swapped_loop_values() {
        let ctx = run(r#"
scope @top [namespace] {}
scope @top.f [function] {
  block b0 entry {
    a#0 = 1;
    b#0 = 2;
    jump b1;
  }
  block b1 preds(b0, b2) {
    a#1 = lphi(a#0, b#1);
    b#1 = lphi(b#0, a#1);
    @t#0 = (a#1 < 10);
    cjump @t#0 ? b2 : b3;
  }
  block b2 preds(b1) {
    jump b1 loop;
  }
  block b3 exit preds(b1) {
    ret a#1;
  }
}
"#);
        assert_eq!(
            stms(&ctx, 0),
            vec!["a#0 = 1", "b#0 = 2", "a#1 = a#0", "b#1 = b#0", "jump b1"]
        );
        assert_eq!(
            stms(&ctx, 2),
            vec!["@t#1 = b#1", "@t#2 = a#1", "a#1 = @t#1", "b#1 = @t#2", "jump b1 loop"]
        );
        assert_eq!(stms(&ctx, 1), vec!["@t#0 = (a#1 < 10)", "cjump @t#0 ? b2 : b3"]);
    }

    #[test]
    fn selector_becomes_conditional_moves() {
        let ctx = run(r#"
scope @top [namespace] {}
scope @top.f [function] {
  param a: int32;
  param b: int32;
  param c: bool;
  block b0 entry exit {
    y = uphi(a ? c, b ? (!c));
    ret y;
  }
}
"#);
        assert_eq!(
            stms(&ctx, 0),
            vec!["cmove c ? y = a", "cmove (!c) ? y = b", "ret y"]
        );
    }

    #[test]
    fn list_selector_is_alias() {
        let ctx = run(r#"
scope @top [namespace] {}
scope @top.f [function] {
  param c: bool;
  param m: list<int32>[4];
  param n: list<int32>[4];
  sym r: list<int32>[4];
  block b0 entry exit {
    r = uphi(m ? c, n ? (!c));
    ret r[0];
  }
}
"#);
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        assert!(rc.borrow().sym(Id::new("r")).unwrap().is_alias());
    }
}
