use crate::analysis::TypeEval;
use crate::traversal::{
    Action, ConstructVisitor, DiagnosticContext, DiagnosticPass, Named, VisResult, Visitor,
};
use polyhls_ir::{Context, Expr, Id, Scope, StmKind, TypeKind, builtins};
use polyhls_utils::{Error, ErrorCode, HlsResult};
use std::collections::BTreeSet;

/// Checks the placement rules of modules and their ports:
/// 1. Module classes are defined directly in a namespace.
/// 2. Ports of a module are created by its constructor only.
pub struct ModuleChecker {
    diag: DiagnosticContext,
}

impl ConstructVisitor for ModuleChecker {
    fn from(_ctx: &Context) -> HlsResult<Self> {
        Ok(ModuleChecker {
            diag: DiagnosticContext::default(),
        })
    }

    fn clear_data(&mut self) {
        // Diagnostics are shared between scopes
    }
}

impl Named for ModuleChecker {
    fn name() -> &'static str {
        "module-checker"
    }

    fn description() -> &'static str {
        "check that modules are global and create ports in their constructor"
    }
}

impl DiagnosticPass for ModuleChecker {
    fn diagnostics(&self) -> &DiagnosticContext {
        &self.diag
    }
}

fn parent_is(ctx: &Context, scope: &Scope, pred: impl Fn(&Scope) -> bool) -> bool {
    scope
        .parent
        .and_then(|p| ctx.get_scope(p))
        .is_some_and(|p| p.try_borrow().is_ok_and(|p| pred(&p)))
}

impl Visitor for ModuleChecker {
    fn visits(&self, scope: &Scope) -> bool {
        scope.is_module() || scope.has_body()
    }

    fn start(&mut self, scope: &mut Scope, ctx: &mut Context) -> VisResult {
        if scope.is_module() && !parent_is(ctx, scope, Scope::is_namespace) {
            self.diag.error(Error::fail(
                scope.loc,
                ErrorCode::ModuleMustBeInGlobal,
                &[scope.name.base()],
            ));
        }
        if !scope.has_body() || scope.is_ctor() || !parent_is(ctx, scope, Scope::is_module) {
            return Ok(Action::SkipChildren);
        }
        for (_, stm) in scope.all_stms() {
            if let StmKind::Move {
                dst,
                src: Expr::New { class, .. },
            } = &stm.kind
            {
                if builtins::is_port_class(*class) {
                    self.diag
                        .error(Error::fail(stm.loc, ErrorCode::PortMustBeInCtor, &[dst]));
                }
            }
        }
        Ok(Action::SkipChildren)
    }
}

/// Warns about ports of a module that are never accessed, and about
/// channels whose data type is never given.
pub struct PortAccessChecker {
    diag: DiagnosticContext,
}

impl ConstructVisitor for PortAccessChecker {
    fn from(_ctx: &Context) -> HlsResult<Self> {
        Ok(PortAccessChecker {
            diag: DiagnosticContext::default(),
        })
    }

    fn clear_data(&mut self) {
        // Diagnostics are shared between scopes
    }
}

impl Named for PortAccessChecker {
    fn name() -> &'static str {
        "port-access-checker"
    }

    fn description() -> &'static str {
        "warn about unused ports and untyped channels"
    }
}

impl DiagnosticPass for PortAccessChecker {
    fn diagnostics(&self) -> &DiagnosticContext {
        &self.diag
    }
}

/// Fields of `module` that are read anywhere in the program. A port that is
/// only assigned by its constructor does not count.
fn accessed_fields(ctx: &Context, module: Id) -> HlsResult<BTreeSet<Id>> {
    let mut used = BTreeSet::new();
    for name in ctx.user_scopes() {
        let rc = ctx.scope(name)?;
        let scope = rc.borrow();
        if !scope.has_body() {
            continue;
        }
        let ev = TypeEval::new(ctx, &scope);
        for (_, stm) in scope.all_stms() {
            for e in stm.src_exprs() {
                e.walk(&mut |x| {
                    if let Expr::Attr(base, field) = x {
                        if ev.of(base).scope() == Some(module) {
                            used.insert(*field);
                        }
                    }
                });
            }
        }
    }
    Ok(used)
}

impl Visitor for PortAccessChecker {
    fn start_context(&mut self, ctx: &mut Context) -> VisResult {
        let modules: Vec<Id> = ctx
            .user_scopes()
            .into_iter()
            .filter(|n| ctx.get_scope(*n).is_some_and(|s| s.borrow().is_module()))
            .collect();
        for m in modules {
            let used = accessed_fields(ctx, m)?;
            let rc = ctx.scope(m)?;
            let module = rc.borrow();
            for sym in module.symbols.values() {
                let TypeKind::Port { scope, dtype, .. } = &sym.typ.kind else {
                    continue;
                };
                if !used.contains(&sym.name) {
                    self.diag.warn(Error::fail(
                        module.loc,
                        ErrorCode::PortIsNotUsed,
                        &[sym.name],
                    ));
                }
                if *scope == builtins::QUEUE_CLASS && dtype.is_undef() {
                    self.diag.warn(Error::fail(
                        module.loc,
                        ErrorCode::UnannotatedChannel,
                        &[sym.name],
                    ));
                }
            }
        }
        Ok(Action::Continue)
    }

    fn visits(&self, _scope: &Scope) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    fn context(src: &str) -> Context {
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        ast_to_ir(prog, Config::default(), None).unwrap()
    }

    #[test]
    fn module_placement_and_port_creation() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  block b0 entry exit {
    ret None;
  }
}
scope @top.f.M [class, module] {}
scope @top.N [class, module] {
  sym p: port<polyphony.io.Port, int8, out> [field];
}
scope @top.N.w [method, worker] {
  sym self: object<@top.N> [self];
  block b0 entry exit {
    12: self.p = new polyphony.io.Port("int8", "out");
    ret None;
  }
}
"#;
        let mut ctx = context(src);
        let pass = ModuleChecker::do_pass_default(&mut ctx).unwrap();
        let errs: Vec<_> = pass.diagnostics().errors().collect();
        assert_eq!(errs.len(), 2);
        assert_eq!(errs[0].code(), Some(ErrorCode::ModuleMustBeInGlobal));
        assert_eq!(errs[1].code(), Some(ErrorCode::PortMustBeInCtor));
        assert_eq!(errs[1].loc().line(), 12);
    }

    #[test]
    fn unused_and_untyped_ports() {
        let src = r#"
scope @top [namespace] {}
scope @top.M [class, module] {
  sym i: port<polyphony.io.Port, int8, in> [field];
  sym o: port<polyphony.io.Port, int8, out> [field];
  sym q: port<polyphony.io.Queue, undef, any> [field];
}
scope @top.M.w [method, worker] {
  sym self: object<@top.M> [self];
  block b0 entry exit {
    v = self.i.rd();
    self.q.put(v);
    ret None;
  }
}
"#;
        let mut ctx = context(src);
        let pass = PortAccessChecker::do_pass_default(&mut ctx).unwrap();
        let warns: Vec<_> = pass
            .diagnostics()
            .warnings()
            .map(|w| (w.code(), w.message()))
            .collect();
        assert_eq!(warns.len(), 2);
        assert_eq!(warns[0].0, Some(ErrorCode::PortIsNotUsed));
        assert!(warns[0].1.contains("'o'"));
        assert_eq!(warns[1].0, Some(ErrorCode::UnannotatedChannel));
    }
}
