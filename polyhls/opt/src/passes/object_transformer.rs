use crate::analysis::TypeEval;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{
    BlockIdx, Context, Expr, Id, Phi, PhiKind, Scope, Stm, StmKind, Type, TypeKind,
};

/// Maximum nesting of objects copied field by field.
const MAX_DEPTH: usize = 8;

/// Copies of whole objects into object fields are turned into copies of
/// their data fields:
/// ```text
/// self.p = q;            =>  self.p.x = q.x; self.p.y = q.y;
/// self.p = (c ? q : r);  =>  self.p.x = uphi(q.x ? c, r.x ? (!c)); ...
/// ```
/// Fields holding objects are expanded recursively. Copies between local
/// variables are references and are left alone.
#[derive(Default)]
pub struct ObjectTransformer;

impl Named for ObjectTransformer {
    fn name() -> &'static str {
        "object-transformer"
    }

    fn description() -> &'static str {
        "expand object copies into field copies"
    }
}

/// Data fields of `class` and its bases, in declaration order.
fn data_fields(ctx: &Context, class: Id) -> Vec<(Id, Type)> {
    let Some(rc) = ctx.get_scope(class) else {
        return vec![];
    };
    let Ok(c) = rc.try_borrow() else {
        return vec![];
    };
    let mut out: Vec<(Id, Type)> = vec![];
    for b in &c.bases {
        for f in data_fields(ctx, *b) {
            if !out.iter().any(|(n, _)| *n == f.0) {
                out.push(f);
            }
        }
    }
    for sym in c.symbols.values() {
        if sym.is_field() && !sym.typ.is_function() && !out.iter().any(|(n, _)| *n == sym.name) {
            out.push((sym.name, sym.typ.clone()));
        }
    }
    out
}

/// Is `e` a reference to an existing object, as opposed to its creation?
fn is_object_ref(e: &Expr) -> bool {
    matches!(e, Expr::Temp(_) | Expr::Attr(..))
}

fn expand(
    ctx: &Context,
    class: Id,
    dst: &Expr,
    srcs: &[(Expr, Expr)],
    depth: usize,
    out: &mut Vec<StmKind>,
) {
    for (f, typ) in data_fields(ctx, class) {
        let d = Expr::attr(dst.clone(), f);
        let s: Vec<(Expr, Expr)> = srcs
            .iter()
            .map(|(src, p)| (Expr::attr(src.clone(), f), p.clone()))
            .collect();
        if let TypeKind::Object { scope } = typ.kind {
            if depth < MAX_DEPTH {
                expand(ctx, scope, &d, &s, depth + 1, out);
                continue;
            }
        }
        out.push(match s.as_slice() {
            [(src, _)] => StmKind::Move {
                dst: d,
                src: src.clone(),
            },
            _ => {
                let (args, ps) = s.into_iter().unzip();
                let mut phi = Phi::new(PhiKind::UPhi, d, args);
                phi.ps = ps;
                StmKind::Phi(phi)
            }
        });
    }
}

impl Visitor for ObjectTransformer {
    fn visit_stm(
        &mut self,
        stm: &mut Stm,
        _blk: BlockIdx,
        scope: &mut Scope,
        ctx: &mut Context,
    ) -> VisResult {
        let StmKind::Move { dst, src } = &stm.kind else {
            return Ok(Action::Continue);
        };
        if !matches!(dst, Expr::Attr(..)) {
            return Ok(Action::Continue);
        }
        let ev = TypeEval::new(ctx, scope);
        let TypeKind::Object { scope: class } = ev.of(dst).kind else {
            return Ok(Action::Continue);
        };
        if ctx
            .get_scope(class)
            .is_none_or(|c| c.try_borrow().map_or(true, |c| c.is_module()))
        {
            return Ok(Action::Continue);
        }
        let srcs = match src {
            s if is_object_ref(s) && ev.of(s).is_object() => vec![(s.clone(), Expr::bool(true))],
            Expr::Condop(c, a, b) if is_object_ref(a) && is_object_ref(b) => vec![
                ((**a).clone(), (**c).clone()),
                ((**b).clone(), Expr::not((**c).clone())),
            ],
            _ => return Ok(Action::Continue),
        };
        let mut out = vec![];
        expand(ctx, class, dst, &srcs, 0, &mut out);
        if out.is_empty() {
            return Ok(Action::Continue);
        }
        log::debug!("{}: expanded `{stm}' into {} copies", scope.name, out.len());
        Ok(Action::Change(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    #[test]
    fn field_copies() {
        let src = r#"
scope @top [namespace] {}
scope @top.P [class] {
  sym x: int32 [field];
  sym y: int32 [field];
}
scope @top.M [class, module] {
  sym p: object<@top.P> [field];
}
scope @top.M.w [method, worker] {
  param q: object<@top.P>;
  param r: object<@top.P>;
  param c: bool;
  sym self: object<@top.M> [self];
  block b0 entry exit {
    self.p = q;
    self.p = (c ? q : r);
    s = q;
    ret None;
  }
}
"#;
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        ObjectTransformer::do_pass_default(&mut ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.M.w")).unwrap();
        let w = rc.borrow();
        let stms: Vec<String> = w.all_stms().map(|(_, s)| s.to_string()).collect();
        assert_eq!(
            stms,
            vec![
                "self.p.x = q.x",
                "self.p.y = q.y",
                "self.p.x = uphi(q.x ? c, r.x ? (!c))",
                "self.p.y = uphi(q.y ? c, r.y ? (!c))",
                "s = q",
                "ret None"
            ]
        );
    }
}
