use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{BinOp, Context, Expr, Id, Scope, StmKind, SymTags, UseDefTable};

/// Folds constants across chains of associative operations:
/// ```text
/// t = (a + 1);              t = (a + 1);
/// u = (t + 2);     =>       u = (a + 3);
/// ```
/// in three steps. Bin-inlining substitutes a single-use-site binop into a
/// user applying the same operator with a constant, bin-to-poly flattens
/// nested binops into one polyadic operation and poly-to-bin folds the
/// constants of a polyadic operation and rebuilds binops from the rest.
#[derive(Default)]
pub struct PolyadConstantFolding;

impl Named for PolyadConstantFolding {
    fn name() -> &'static str {
        "polyad-constant-folding"
    }

    fn description() -> &'static str {
        "fold constants across chains of associative operators"
    }
}

const LOCAL_ONLY: SymTags = SymTags::PARAM
    .union(SymTags::RETURN)
    .union(SymTags::FIELD)
    .union(SymTags::FREE)
    .union(SymTags::STATIC)
    .union(SymTags::REGISTER);

fn is_leaf(e: &Expr) -> bool {
    matches!(e, Expr::Temp(_) | Expr::Const(_))
}

/// The source `x op y` of the single definition of `t`, when its operands
/// are leaves that never change.
fn inlinable_def(scope: &Scope, ud: &UseDefTable, t: Id, op: BinOp) -> Option<Expr> {
    if scope.sym(t).is_none_or(|s| s.tags.intersects(LOCAL_ONLY)) {
        return None;
    }
    let [def] = ud.defs(t)[..] else {
        return None;
    };
    let StmKind::Move { src, .. } = &scope.stm(def)?.kind else {
        return None;
    };
    let Expr::Binop(dop, l, r) = src else {
        return None;
    };
    let stable = |e: &Expr| match e {
        Expr::Temp(n) => ud.defs(*n).len() <= 1,
        e => is_leaf(e),
    };
    (*dop == op && stable(l) && stable(r)).then(|| src.clone())
}

fn bin_inlining(scope: &mut Scope) -> bool {
    let ud = UseDefTable::build(scope);
    let mut edits = vec![];
    for (blk, stm) in scope.all_stms() {
        let StmKind::Move {
            src: Expr::Binop(op, l, r),
            ..
        } = &stm.kind
        else {
            continue;
        };
        if !op.is_associative() {
            continue;
        }
        let (t, is_left) = match (&**l, &**r) {
            (Expr::Temp(t), Expr::Const(_)) => (*t, true),
            (Expr::Const(_), Expr::Temp(t)) => (*t, false),
            _ => continue,
        };
        if let Some(def) = inlinable_def(scope, &ud, t, *op) {
            let (l, r) = if is_left {
                (def, (**r).clone())
            } else {
                ((**l).clone(), def)
            };
            edits.push((blk, stm.id, Expr::binop(*op, l, r)));
        }
    }
    let changed = !edits.is_empty();
    for (blk, id, new) in edits {
        if let Some(stm) = scope.block_mut(blk).stms.iter_mut().find(|s| s.id == id) {
            if let StmKind::Move { src, .. } = &mut stm.kind {
                *src = new;
            }
        }
    }
    changed
}

fn flatten(op: BinOp, e: Expr, out: &mut Vec<Expr>) {
    match e {
        Expr::Binop(o, l, r) if o == op => {
            flatten(op, *l, out);
            flatten(op, *r, out);
        }
        Expr::Polyop(o, vs) if o == op => {
            for v in vs {
                flatten(op, v, out);
            }
        }
        e => out.push(e),
    }
}

fn bin_to_poly(e: &mut Expr) -> bool {
    let mut changed = false;
    e.walk_mut(&mut |x| {
        let Expr::Binop(op, l, r) = x else { return };
        let op = *op;
        if !op.is_associative() {
            return;
        }
        let nested = |k: &Expr| matches!(k, Expr::Binop(o, ..) | Expr::Polyop(o, _) if *o == op);
        if !nested(l) && !nested(r) {
            return;
        }
        let mut leaves = vec![];
        flatten(op, std::mem::replace(x, Expr::none()), &mut leaves);
        *x = Expr::Polyop(op, leaves);
        changed = true;
    });
    changed
}

fn poly_to_bin(e: &mut Expr) -> bool {
    let mut changed = false;
    e.walk_mut(&mut |x| {
        let Expr::Polyop(op, vs) = x else { return };
        let Some(identity) = op.identity() else { return };
        let op = *op;
        let mut acc = identity;
        let mut rest = vec![];
        for v in std::mem::take(vs) {
            match v.as_int().and_then(|c| op.eval(acc, c)) {
                Some(folded) => acc = folded,
                None => rest.push(v),
            }
        }
        if acc != identity || rest.is_empty() {
            rest.push(Expr::int(acc));
        }
        *x = rest
            .into_iter()
            .reduce(|l, r| Expr::binop(op, l, r))
            .unwrap_or_else(|| Expr::int(identity));
        changed = true;
    });
    changed
}

impl Visitor for PolyadConstantFolding {
    fn start(&mut self, scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        let mut changed = false;
        // Each round can expose one more link of a chain.
        for _ in 0..scope.all_stms().count().max(1) {
            if !bin_inlining(scope) {
                break;
            }
            changed = true;
            for blk in scope.live_blocks() {
                for stm in scope.block_mut(blk).stms.iter_mut() {
                    for e in stm.src_exprs_mut() {
                        bin_to_poly(e);
                        poly_to_bin(e);
                    }
                }
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
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    fn run(body: &str) -> Vec<String> {
        let src = format!(
            r#"
scope @top [namespace] {{}}
scope @top.f [function] {{
  param a: int32;
  param b: int32;
  sym t: int32;
  sym u: int32;
  sym v: int32;
  block b0 entry exit {{
{body}
  }}
}}
"#
        );
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        PolyadConstantFolding::do_pass_default(&mut ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        let f = rc.borrow();
        f.all_stms().map(|(_, s)| s.to_string()).collect()
    }

    #[test]
    fn addition_chain() {
        let out = run("t = (a + 1);\nu = (2 + t);\nv = (u + 3);\nret v;");
        assert_eq!(out, vec!["t = (a + 1)", "u = (a + 3)", "v = (a + 6)", "ret v"]);
    }

    #[test]
    fn mixed_operators_stay() {
        let out = run("t = (a * 2);\nu = (t + 1);\nv = (b - 1);\nret (u + v);");
        assert_eq!(out, vec!["t = (a * 2)", "u = (t + 1)", "v = (b - 1)", "ret (u + v)"]);
    }
}
