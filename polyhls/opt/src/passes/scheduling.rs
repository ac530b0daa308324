use crate::analysis::build_branch_graph;
use crate::analysis::scheduler::{asap_latency, schedule_scope};
use crate::traversal::{Action, Named, Order, VisResult, Visitor};
use polyhls_ir::{Context, Scope};

/// Schedules every function-like scope. Callees are scheduled first so
/// that calls see the latency of the unit they start.
#[derive(Default)]
pub struct Scheduler;

impl Named for Scheduler {
    fn name() -> &'static str {
        "scheduler"
    }

    fn description() -> &'static str {
        "build data flow graphs and schedule every scope"
    }
}

impl Visitor for Scheduler {
    fn iteration_order() -> Order {
        Order::Post
    }

    fn visits(&self, scope: &Scope) -> bool {
        scope.has_body() && scope.is_function_like() && !scope.is_lib()
    }

    fn start(&mut self, scope: &mut Scope, ctx: &mut Context) -> VisResult {
        if scope.branch_graph.is_none() {
            scope.branch_graph = Some(build_branch_graph(scope));
        }
        let schedule = schedule_scope(scope, ctx)?;
        let latency = asap_latency(&schedule);
        log::info!(
            "{}: {} cycle(s), latency {latency} as a callee",
            scope.name,
            schedule.latency()
        );
        scope.asap_latency = Some(latency);
        scope.schedule = Some(schedule);
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{BlockIdx, Config, Id, SymTags, from_ast::ast_to_ir};

    const SRC: &str = r#"
scope @top [namespace] {
  sym g: function<@top.g>;
}
scope @top.g [function] {
  param x: int32;
  sym @return: int32 [return];
  block b0 entry exit {
    @return = (x + 1);
    ret @return;
  }
}
scope @top.f [function] {
  param a: int32;
  param m: list<int32>[4];
  sym t: int32;
  sym u: int32;
  sym v: int32;
  sym @return: int32 [return];
  block b0 entry exit {
    t = m[0];
    u = m[1];
    v = g(a);
    @return = ((t + u) + v);
    ret @return;
  }
}
"#;

    #[test]
    fn callee_latency_and_memory_port() {
        let prog = IrParser::parse(SRC.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        Scheduler::do_pass_default(&mut ctx).unwrap();

        let g = ctx.scope(Id::new("@top.g")).unwrap();
        let g_latency = g.borrow().asap_latency.unwrap();

        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        let f = rc.borrow();
        let sched = f.schedule.as_ref().unwrap();
        let stms = &f.block(BlockIdx(0)).stms;
        let node = |i: usize| *sched.node(stms[i].id).unwrap();
        // One read port on `m`.
        assert_ne!(node(0).begin, node(1).begin);
        assert_eq!(node(2).latency, g_latency);
        assert!(node(3).begin >= node(2).end);
        assert!(node(3).begin >= node(1).end);
        assert!(f.asap_latency.unwrap() >= sched.latency().min(3));
        assert!(!f.sym(Id::new("t")).unwrap().tags.contains(SymTags::ALIAS));
    }
}
