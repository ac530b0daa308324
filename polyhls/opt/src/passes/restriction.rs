use crate::analysis::TypeEval;
use crate::traversal::{
    Action, ConstructVisitor, DiagnosticContext, DiagnosticPass, Named, VisResult, Visitor,
};
use polyhls_ir::{BlockIdx, Const, Context, Expr, Scheduling, Scope, Stm, StmKind};
use polyhls_utils::{Error, ErrorCode, HlsResult};

/// Restrictions checked on the program as written, before any
/// transformation:
/// 1. `range`, `unroll` and `pipelined` only make sense as the iterable of
///    a `for` loop; every remaining use is an error.
/// 2. Variables of the global namespace and of class bodies must be
///    assigned compile-time constants (module instances excepted).
pub struct EarlyRestrictionChecker {
    diag: DiagnosticContext,
}

impl ConstructVisitor for EarlyRestrictionChecker {
    fn from(_ctx: &Context) -> HlsResult<Self> {
        Ok(EarlyRestrictionChecker {
            diag: DiagnosticContext::default(),
        })
    }

    fn clear_data(&mut self) {
        // Diagnostics are shared between scopes
    }
}

impl Named for EarlyRestrictionChecker {
    fn name() -> &'static str {
        "early-restriction-checker"
    }

    fn description() -> &'static str {
        "reject loop-only builtins outside of loops and non-constant globals"
    }
}

impl DiagnosticPass for EarlyRestrictionChecker {
    fn diagnostics(&self) -> &DiagnosticContext {
        &self.diag
    }
}

/// Expressions that can be evaluated while the program is elaborated.
fn is_static_expr(e: &Expr, scope: &Scope, ctx: &Context) -> bool {
    match e {
        Expr::Const(_) | Expr::New { .. } => true,
        Expr::Temp(n) => ctx
            .lookup_sym(scope, *n)
            .is_some_and(|s| s.is_static() || s.typ.is_class() || s.typ.is_function()),
        Expr::Unop(_, x) => is_static_expr(x, scope, ctx),
        Expr::Binop(_, l, r) | Expr::Relop(_, l, r) => {
            is_static_expr(l, scope, ctx) && is_static_expr(r, scope, ctx)
        }
        Expr::Array { items, repeat, .. } => {
            is_static_expr(repeat, scope, ctx) && items.iter().all(|i| is_static_expr(i, scope, ctx))
        }
        _ => false,
    }
}

impl Visitor for EarlyRestrictionChecker {
    fn visits(&self, scope: &Scope) -> bool {
        scope.has_body()
    }

    fn visit_stm(
        &mut self,
        stm: &mut Stm,
        _blk: BlockIdx,
        scope: &mut Scope,
        ctx: &mut Context,
    ) -> VisResult {
        let mut loop_only = vec![];
        for e in stm.src_exprs() {
            e.walk(&mut |x| {
                if let Expr::Syscall { name, .. } = x {
                    if matches!(name.as_ref(), "range" | "unroll" | "pipelined") {
                        loop_only.push(*name);
                    }
                }
            });
        }
        for name in loop_only {
            self.diag.error(Error::fail(
                stm.loc,
                ErrorCode::RangeUnrollPipelinedOutsideFor,
                &[name],
            ));
        }

        if scope.is_namespace() || scope.is_class() {
            if let StmKind::Move {
                dst: Expr::Temp(d),
                src,
            } = &stm.kind
            {
                if !is_static_expr(src, scope, ctx) {
                    let code = if scope.is_namespace() {
                        ErrorCode::GlobalVarMustBeConst
                    } else {
                        ErrorCode::ClassVarMustBeConst
                    };
                    return self.diag.bail(Error::fail(stm.loc, code, &[d]));
                }
            }
        }
        Ok(Action::Continue)
    }
}

/// Restrictions that can only be decided once loops are analyzed and
/// constants are folded:
/// 1. A timed scope may not contain a loop whose trip count is unknown.
/// 2. `assert` of a constant false expression.
/// 3. Constant indexes outside the bounds of a fixed size sequence.
pub struct LateRestrictionChecker {
    diag: DiagnosticContext,
}

impl ConstructVisitor for LateRestrictionChecker {
    fn from(_ctx: &Context) -> HlsResult<Self> {
        Ok(LateRestrictionChecker {
            diag: DiagnosticContext::default(),
        })
    }

    fn clear_data(&mut self) {
        // Diagnostics are shared between scopes
    }
}

impl Named for LateRestrictionChecker {
    fn name() -> &'static str {
        "late-restriction-checker"
    }

    fn description() -> &'static str {
        "reject unbounded timed loops, false assertions and out of bounds indexes"
    }
}

impl DiagnosticPass for LateRestrictionChecker {
    fn diagnostics(&self) -> &DiagnosticContext {
        &self.diag
    }
}

impl LateRestrictionChecker {
    fn check_index(&mut self, stm: &Stm, scope: &Scope, ctx: &Context) {
        let ev = TypeEval::new(ctx, scope);
        let mut overflows = vec![];
        for e in stm.src_exprs() {
            e.walk(&mut |x| {
                let (Expr::Mref(m, o) | Expr::Mstore(m, o, _)) = x else {
                    return;
                };
                let (Some(len), Some(idx)) = (ev.of(m).length(), o.as_int()) else {
                    return;
                };
                if idx < 0 || idx as u64 >= len {
                    overflows.push(m.to_string());
                }
            });
        }
        for m in overflows {
            self.diag
                .error(Error::fail(stm.loc, ErrorCode::SeqCapacityOverflowed, &[m]));
        }
    }
}

impl Visitor for LateRestrictionChecker {
    fn start(&mut self, scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        let Some(tree) = &scope.loop_tree else {
            return Ok(Action::Continue);
        };
        for r in tree.loops() {
            let region = &tree.regions[r];
            let Some(head) = region.head else { continue };
            let timed = scope.synth_params.scheduling == Scheduling::Timed
                || scope.block(head).synth_params.scheduling == Scheduling::Timed;
            if timed && region.info.trip_count.is_none() {
                let loc = scope
                    .block(head)
                    .stms
                    .first()
                    .map(|s| s.loc)
                    .unwrap_or(scope.loc);
                self.diag
                    .error(Error::fail::<&str>(loc, ErrorCode::TimedVariableLoop, &[]));
            }
        }
        Ok(Action::Continue)
    }

    fn visit_stm(
        &mut self,
        stm: &mut Stm,
        _blk: BlockIdx,
        scope: &mut Scope,
        ctx: &mut Context,
    ) -> VisResult {
        if let StmKind::Expr(Expr::Syscall { name, args, .. }) = &stm.kind {
            let always_false = args
                .first()
                .and_then(Expr::as_const)
                .and_then(Const::is_true)
                == Some(false);
            if *name == "assert" && always_false {
                self.diag
                    .error(Error::fail::<&str>(stm.loc, ErrorCode::AssertAlwaysFalse, &[]));
            }
        }
        self.check_index(stm, scope, ctx);
        Ok(Action::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    fn run<P>(src: &str) -> Vec<Option<ErrorCode>>
    where
        P: Visitor + ConstructVisitor + Named + DiagnosticPass,
    {
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        let pass = P::do_pass_default(&mut ctx).unwrap();
        pass.diagnostics().errors().map(|e| e.code()).collect()
    }

    #[test]
    fn range_outside_loop() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  block b0 entry exit {
    3: r = syscall range(10);
    ret None;
  }
}
"#;
        let codes = run::<EarlyRestrictionChecker>(src);
        assert_eq!(codes, vec![Some(ErrorCode::RangeUnrollPipelinedOutsideFor)]);
    }

    #[test]
    fn non_constant_global() {
        let src = r#"
scope @top [namespace] {
  sym N: int32 [static];
  sym G: int32 [static];
  block b0 entry exit {
    N = (2 * 4);
    G = f();
    ret None;
  }
}
scope @top.f [function] {
  return: int32;
  block b0 entry exit {
    ret 1;
  }
}
"#;
        let codes = run::<EarlyRestrictionChecker>(src);
        assert_eq!(codes, vec![Some(ErrorCode::GlobalVarMustBeConst)]);
    }

    #[test]
    fn false_assert_and_overflow() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  sym xs: list<int32>[4];
  block b0 entry exit {
    xs = list[1, 2, 3, 4];
    syscall assert(False);
    y = xs[4];
    ret None;
  }
}
"#;
        let codes = run::<LateRestrictionChecker>(src);
        assert_eq!(
            codes,
            vec![
                Some(ErrorCode::AssertAlwaysFalse),
                Some(ErrorCode::SeqCapacityOverflowed)
            ]
        );
    }
}
