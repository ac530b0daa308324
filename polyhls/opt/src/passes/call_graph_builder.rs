use crate::analysis::CallGraph;
use crate::traversal::{
    Action, ConstructVisitor, Named, ParseVal, PassOpt, VisResult, Visitor,
};
use polyhls_ir::{Context, Id, Scope, ScopeTags};
use polyhls_utils::{HlsResult, OutputFile};
use std::collections::BTreeSet;
use std::io::Write;

/// Builds the call graph of the program and marks every class that is
/// instantiated somewhere as `instantiated`. With `-x
/// call-graph-builder:dot=<file>` the graph is written in Graphviz format.
pub struct CallGraphBuilder {
    dot: Option<OutputFile>,
}

impl Named for CallGraphBuilder {
    fn name() -> &'static str {
        "call-graph-builder"
    }

    fn description() -> &'static str {
        "build the call graph and mark instantiated classes"
    }

    fn opts() -> Vec<PassOpt> {
        vec![PassOpt::new(
            "dot",
            "write the call graph in Graphviz format",
            ParseVal::OutStream(OutputFile::Null),
            PassOpt::parse_outstream,
        )]
    }
}

impl ConstructVisitor for CallGraphBuilder {
    fn from(ctx: &Context) -> HlsResult<Self> {
        let opts = Self::get_opts(ctx);
        Ok(CallGraphBuilder {
            dot: opts["dot"].not_null_outstream(),
        })
    }

    fn clear_data(&mut self) {}
}

impl Visitor for CallGraphBuilder {
    fn start_context(&mut self, ctx: &mut Context) -> VisResult {
        let cg = CallGraph::new(ctx);
        for name in ctx.user_scopes() {
            let rc = ctx.scope(name)?;
            let mut scope = rc.borrow_mut();
            if scope.is_class() && cg.callers(name).next().is_some() {
                scope.tags |= ScopeTags::INSTANTIATED;
            }
        }
        if let Some(out) = &self.dot {
            writeln!(out.get_write()?, "{}", cg.to_dot())?;
        }
        Ok(Action::Continue)
    }

    fn visits(&self, _scope: &Scope) -> bool {
        false
    }
}

/// Deletes the functions and methods that cannot be reached from a root of
/// the program: namespaces, testbenches, modules and the workers recorded
/// in the runtime information. Typically these are generic functions that
/// were replaced by their specializations, or functions inlined everywhere.
#[derive(Default)]
pub struct UnusedScopeRemoval;

impl Named for UnusedScopeRemoval {
    fn name() -> &'static str {
        "unused-scope-removal"
    }

    fn description() -> &'static str {
        "remove functions that are never called"
    }
}

fn roots(ctx: &Context) -> Vec<Id> {
    let mut out = vec![];
    for name in ctx.user_scopes() {
        let Some(rc) = ctx.get_scope(name) else {
            continue;
        };
        let s = rc.borrow();
        if s.is_namespace() || s.is_testbench() || s.is_module() {
            out.push(name);
        }
    }
    let rt = &ctx.runtime_info;
    for inst in &rt.instances {
        out.push(inst.class);
        out.extend(rt.workers_of(inst.name));
    }
    out
}

impl Visitor for UnusedScopeRemoval {
    fn start_context(&mut self, ctx: &mut Context) -> VisResult {
        let cg = CallGraph::new(ctx);
        let live: BTreeSet<Id> = cg.reachable_from(roots(ctx));
        let dead: Vec<Id> = ctx
            .user_scopes()
            .into_iter()
            .filter(|n| !live.contains(n))
            .filter(|n| {
                ctx.get_scope(*n)
                    .is_some_and(|s| s.borrow().is_function_like())
            })
            .collect();
        for name in dead {
            // Children of a removed scope are already gone.
            if !ctx.has_scope(name) {
                continue;
            }
            log::debug!("removing unused scope {name}");
            ctx.remove_scope(name);
            if let Some(parent) = name.parent().and_then(|p| ctx.get_scope(p)) {
                let mut parent = parent.borrow_mut();
                let base = Id::new(name.base());
                if parent
                    .sym(base)
                    .is_some_and(|s| s.typ.scope() == Some(name))
                {
                    parent.del_sym(base);
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
    use polyhls_ir::{Config, ModuleInstance, WorkerBinding, from_ast::ast_to_ir};

    const SRC: &str = r#"
scope @top [namespace] {
  sym add: function<@top.add>;
  sym add_i16_i16: function<@top.add_i16_i16>;
  sym C: class<@top.C>;
  sym D: class<@top.D>;
}
scope @top.add [function] {
  param a: undef;
  block b0 entry exit {
    ret a;
  }
}
scope @top.add_i16_i16 [function] {
  param a: int16;
  block b0 entry exit {
    ret a;
  }
}
scope @top.C [class] {}
scope @top.C.__init__ [method, ctor] {
  sym self: object<@top.C> [self];
  block b0 entry exit {
    ret None;
  }
}
scope @top.D [class] {}
scope @top.main [function, testbench] {
  sym x: int16!;
  block b0 entry exit {
    y = add_i16_i16(x);
    c = new C();
    ret None;
  }
}
"#;

    fn context() -> Context {
        let prog = IrParser::parse(SRC.as_bytes()).unwrap();
        ast_to_ir(prog, Config::default(), None).unwrap()
    }

    #[test]
    fn instantiated_classes() {
        let mut ctx = context();
        CallGraphBuilder::do_pass_default(&mut ctx).unwrap();
        let tagged = |n: &str| {
            ctx.scope(Id::new(n))
                .unwrap()
                .borrow()
                .tags
                .contains(ScopeTags::INSTANTIATED)
        };
        assert!(tagged("@top.C"));
        assert!(!tagged("@top.D"));
    }

    #[test]
    fn unreachable_functions() {
        let mut ctx = context();
        UnusedScopeRemoval::do_pass_default(&mut ctx).unwrap();
        assert!(!ctx.has_scope(Id::new("@top.add")));
        assert!(ctx.has_scope(Id::new("@top.add_i16_i16")));
        assert!(ctx.has_scope(Id::new("@top.C.__init__")));
        let top = ctx.scope(Id::new("@top")).unwrap();
        assert!(!top.borrow().has_sym(Id::new("add")));
        assert!(top.borrow().has_sym(Id::new("add_i16_i16")));
    }

    #[test]
    fn runtime_workers_are_roots() {
        let mut ctx = context();
        ctx.runtime_info.instances.push(ModuleInstance {
            name: Id::new("@top.m"),
            class: Id::new("@top.D"),
            args: vec![],
        });
        ctx.runtime_info.workers.push(WorkerBinding {
            instance: Id::new("@top.m"),
            func: Id::new("@top.add"),
        });
        UnusedScopeRemoval::do_pass_default(&mut ctx).unwrap();
        assert!(ctx.has_scope(Id::new("@top.add")));
    }
}
