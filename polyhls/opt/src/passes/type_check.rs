use crate::analysis::TypeEval;
use crate::traversal::{
    Action, ConstructVisitor, DiagnosticContext, DiagnosticPass, Named, VisResult, Visitor,
};
use polyhls_ir::{BlockIdx, Context, Expr, Id, Scope, Stm, StmKind, TypeKind, builtins};
use polyhls_utils::{Error, ErrorCode, HlsResult, Loc};
use std::collections::HashSet;

/// Reports the type errors left after type propagation:
/// - calls with too many or missing arguments, or arguments incompatible
///   with annotated parameters,
/// - calls of values that are not callable,
/// - unknown attributes and subscripts of non-sequences,
/// - misuse of `len`,
/// - assignments incompatible with an annotated destination,
/// - reads of local variables that are never assigned,
/// - access to the non-port fields of a module object from outside of it,
/// - worker arguments that are neither ports nor scalars.
pub struct TypeChecker {
    diag: DiagnosticContext,
    /// Locals of the current scope that are assigned somewhere.
    defined: HashSet<Id>,
}

impl ConstructVisitor for TypeChecker {
    fn from(_ctx: &Context) -> HlsResult<Self> {
        Ok(TypeChecker {
            diag: DiagnosticContext::default(),
            defined: HashSet::new(),
        })
    }

    fn clear_data(&mut self) {
        // Diagnostics are shared between scopes
        self.defined.clear();
    }
}

impl Named for TypeChecker {
    fn name() -> &'static str {
        "type-checker"
    }

    fn description() -> &'static str {
        "report type errors after type propagation"
    }
}

impl DiagnosticPass for TypeChecker {
    fn diagnostics(&self) -> &DiagnosticContext {
        &self.diag
    }
}

impl TypeChecker {
    fn check_expr(&mut self, e: &Expr, loc: Loc, scope: &Scope, ctx: &Context) {
        let ev = TypeEval::new(ctx, scope);
        let mut errors = vec![];
        e.walk(&mut |x| match x {
            Expr::Call { func, args, kwargs } => {
                check_call(func, args, kwargs, loc, scope, ctx, &mut errors)
            }
            Expr::New { class, args, kwargs } => {
                let ctor = class.child("__init__");
                if ctx.has_scope(ctor) {
                    check_arity(ctor, args, kwargs, loc, ctx, &mut errors);
                }
            }
            Expr::Attr(base, field) => check_attr(base, *field, loc, scope, ctx, &mut errors),
            Expr::Mref(m, _) => {
                let t = ev.of(m);
                if !t.is_undef() && !t.is_seq() && !matches!(t.kind, TypeKind::Generic) {
                    errors.push(Error::fail(loc, ErrorCode::IsNotSubscriptable, &[m]));
                }
            }
            Expr::Syscall { name, args, .. } if *name == "len" => match args.as_slice() {
                [a] => {
                    let t = ev.of(a);
                    if !t.is_undef() && !t.is_seq() {
                        errors.push(Error::fail::<&str>(loc, ErrorCode::LenTakesSeqType, &[]));
                    }
                }
                _ => errors.push(Error::fail::<&str>(loc, ErrorCode::LenTakesOneArg, &[])),
            },
            Expr::Temp(n) => {
                let local = scope.sym(*n).is_some_and(|s| {
                    s.tags.is_empty() && !s.typ.is_function() && !s.typ.is_class()
                });
                if local && !self.defined.contains(n) {
                    errors.push(Error::fail(loc, ErrorCode::ReferencedBeforeAssign, &[n]));
                }
            }
            _ => {}
        });
        for err in errors {
            self.diag.error(err);
        }
    }
}

fn check_call(
    func: &Expr,
    args: &[Expr],
    kwargs: &[(Id, Expr)],
    loc: Loc,
    scope: &Scope,
    ctx: &Context,
    errors: &mut Vec<Error>,
) {
    let ev = TypeEval::new(ctx, scope);
    if let Expr::Attr(_, m) = func {
        if *m == builtins::APPEND_WORKER {
            for a in args.iter().skip(1) {
                let t = ev.of(a);
                if !(t.is_port() || t.is_scalar() || t.is_undef()) {
                    errors.push(Error::fail(loc, ErrorCode::WorkerArgType, &[a]));
                }
            }
            return;
        }
    }
    let Some(t) = ctx.type_of_ref(scope, func) else {
        return;
    };
    let callee = match t.kind {
        TypeKind::Function { scope, .. } => scope,
        TypeKind::Class { scope, .. } => scope.child("__init__"),
        TypeKind::Undef | TypeKind::Generic | TypeKind::Expr(_) => return,
        _ => {
            errors.push(Error::fail(loc, ErrorCode::IsNotCallable, &[func]));
            return;
        }
    };
    if !ctx.has_scope(callee) {
        return;
    }
    check_arity(callee, args, kwargs, loc, ctx, errors);
    let Some(rc) = ctx.get_scope(callee) else {
        return;
    };
    let Ok(c) = rc.try_borrow() else {
        return;
    };
    if c.is_lib() {
        return;
    }
    for (p, a) in c.params.iter().zip(args) {
        let Some(pt) = c.sym(p.sym).map(|s| &s.typ) else {
            continue;
        };
        if pt.explicit && !pt.is_compatible(&ev.of(a)) {
            errors.push(Error::fail(
                loc,
                ErrorCode::IncompatibleType,
                &[a.to_string(), callee.base().to_string()],
            ));
        }
    }
}

fn check_arity(
    callee: Id,
    args: &[Expr],
    kwargs: &[(Id, Expr)],
    loc: Loc,
    ctx: &Context,
    errors: &mut Vec<Error>,
) {
    let Some(rc) = ctx.get_scope(callee) else {
        return;
    };
    let Ok(c) = rc.try_borrow() else {
        return;
    };
    let name = if c.is_ctor() {
        callee.parent().map(|p| p.base()).unwrap_or("__init__")
    } else {
        callee.base()
    };
    if args.len() > c.params.len() {
        errors.push(Error::fail(
            loc,
            ErrorCode::TakesToomanyArgs,
            &[name.to_string(), c.params.len().to_string(), args.len().to_string()],
        ));
        return;
    }
    let missing = c.params.iter().enumerate().any(|(i, p)| {
        i >= args.len() && p.default.is_none() && !kwargs.iter().any(|(k, _)| *k == p.sym)
    });
    if missing {
        errors.push(Error::fail(loc, ErrorCode::MissingRequiredArg, &[name]));
    }
}

fn check_attr(
    base: &Expr,
    field: Id,
    loc: Loc,
    scope: &Scope,
    ctx: &Context,
    errors: &mut Vec<Error>,
) {
    let bt = TypeEval::new(ctx, scope).of(base);
    let owner = match &bt.kind {
        TypeKind::Object { scope } | TypeKind::Class { scope, .. } | TypeKind::Namespace { scope } => {
            *scope
        }
        _ => return,
    };
    let Some(sym) = ctx.class_field(owner, field) else {
        errors.push(Error::fail(loc, ErrorCode::UnknownAttribute, &[field]));
        return;
    };
    let is_module = ctx
        .get_scope(owner)
        .is_some_and(|o| o.try_borrow().is_ok_and(|o| o.is_module()));
    let inside = scope.name.as_ref().starts_with(&format!("{owner}."));
    if bt.is_object() && is_module && !inside && !sym.typ.is_port() && !sym.typ.is_function() {
        errors.push(Error::fail(loc, ErrorCode::InvalidModuleObjectAccess, &[field]));
    }
}

impl Visitor for TypeChecker {
    fn start(&mut self, scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        self.defined = scope.all_stms().filter_map(|(_, s)| s.def_sym()).collect();
        Ok(Action::Continue)
    }

    fn visit_stm(
        &mut self,
        stm: &mut Stm,
        _blk: BlockIdx,
        scope: &mut Scope,
        ctx: &mut Context,
    ) -> VisResult {
        for e in stm.src_exprs() {
            self.check_expr(e, stm.loc, scope, ctx);
        }
        match &stm.kind {
            StmKind::Move { dst, src } => {
                if let Expr::Attr(base, _) = dst {
                    self.check_expr(base, stm.loc, scope, ctx);
                }
                let ev = TypeEval::new(ctx, scope);
                let dt = ev.of(dst);
                if dt.explicit && !dt.is_compatible(&ev.of(src)) {
                    return self.diag.bail(Error::fail(
                        stm.loc,
                        ErrorCode::IncompatibleType,
                        &[src, dst],
                    ));
                }
            }
            StmKind::Ret(e) => {
                let t = TypeEval::new(ctx, scope).of(e);
                if scope.return_type.explicit && !scope.return_type.is_compatible(&t) {
                    return self.diag.bail(Error::fail(
                        stm.loc,
                        ErrorCode::IncompatibleType,
                        &[e.to_string(), scope.name.base().to_string()],
                    ));
                }
            }
            _ => {}
        }
        Ok(Action::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    fn codes(src: &str) -> Vec<Option<ErrorCode>> {
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        let pass = TypeChecker::do_pass_default(&mut ctx).unwrap();
        pass.diagnostics().errors().map(|e| e.code()).collect()
    }

    const CALLEE: &str = r#"
scope @top [namespace] {
  sym K: int32 [static];
}
scope @top.g [function] {
  param a: int32!;
  param b: int32! = 1;
  return: int32;
  block b0 entry exit {
    ret a;
  }
}
"#;

    #[test]
    fn call_arity() {
        let src = format!(
            "{CALLEE}{}",
            r#"
scope @top.f [function] {
  block b0 entry exit {
    x = g(1, 2, 3);
    y = g();
    z = g(1);
    ret None;
  }
}
"#
        );
        assert_eq!(
            codes(&src),
            vec![
                Some(ErrorCode::TakesToomanyArgs),
                Some(ErrorCode::MissingRequiredArg)
            ]
        );
    }

    #[test]
    fn callable_and_len() {
        let src = format!(
            "{CALLEE}{}",
            r#"
scope @top.f [function] {
  param n: int32!;
  block b0 entry exit {
    x = n(1);
    y = syscall len(n);
    z = syscall len(n, n);
    ret None;
  }
}
"#
        );
        assert_eq!(
            codes(&src),
            vec![
                Some(ErrorCode::IsNotCallable),
                Some(ErrorCode::LenTakesSeqType),
                Some(ErrorCode::LenTakesOneArg)
            ]
        );
    }

    #[test]
    fn unknown_attribute_and_unassigned_local() {
        let src = r#"
scope @top [namespace] {}
scope @top.C [class] {
  sym v: int32 [field];
}
scope @top.f [function] {
  param c: object<@top.C>!;
  sym u: int32;
  block b0 entry exit {
    x = c.w;
    y = (u + c.v);
    ret None;
  }
}
"#;
        assert_eq!(
            codes(src),
            vec![
                Some(ErrorCode::UnknownAttribute),
                Some(ErrorCode::ReferencedBeforeAssign)
            ]
        );
    }
}
