//! Cycle latency of scheduled statements.
use super::resources::{CallClass, NodeResources};
use polyhls_ir::{Context, CyclePolicy, Expr, Scope, Stm, StmKind, builtins};

/// Latency assumed for a call whose callee has not been scheduled yet.
pub const CALL_MINIMUM_STEP: u32 = 3;
/// Functional units of one kind usable in a single cycle.
pub const MAX_FUNC_UNIT: usize = 10;

/// `(min_latency, latency)` of a statement.
pub fn stm_latency(stm: &Stm, res: &NodeResources, scope: &Scope, ctx: &Context) -> (u32, u32) {
    let dst_is_alias = stm
        .def_sym()
        .and_then(|d| scope.sym(d))
        .is_some_and(|s| s.is_alias());

    if let Some(l) = call_latency(stm, res, dst_is_alias, ctx) {
        return l;
    }
    if !res.mem_writes.is_empty() || !res.mem_reads.is_empty() {
        return (1, 1);
    }
    match &stm.kind {
        StmKind::Move { .. } | StmKind::CMove { .. } => {
            if dst_is_alias || scope.synth_params.cycle == CyclePolicy::Minimum {
                (0, 0)
            } else {
                (0, 1)
            }
        }
        _ => (0, 0),
    }
}

fn call_latency(
    stm: &Stm,
    res: &NodeResources,
    dst_is_alias: bool,
    ctx: &Context,
) -> Option<(u32, u32)> {
    let call = res.calls.first()?;
    Some(match call {
        CallClass::User(callee) => {
            let lat = ctx
                .get_scope(*callee)
                .and_then(|s| s.borrow().asap_latency)
                .unwrap_or(CALL_MINIMUM_STEP);
            (lat, lat)
        }
        CallClass::Port { method, .. } => match method.as_ref() {
            "rd" | "get" if dst_is_alias => (0, 0),
            "edge" | "empty" | "full" => (0, 0),
            _ => (1, 1),
        },
        CallClass::Timing(name) if *name == builtins::CLKSLEEP => {
            let n = timing_arg(stm).unwrap_or(1).max(1);
            let sentinel = i64::from(ctx.config.sleep_sentinel_threshold);
            // Long sleeps become a counting wait state.
            let lat = if n <= sentinel { n as u32 } else { 1 };
            (lat, lat)
        }
        CallClass::Timing(_) => (1, 1),
        CallClass::Effect(_) | CallClass::Builtin => (0, 0),
    })
}

fn timing_arg(stm: &Stm) -> Option<i64> {
    let mut n = None;
    for e in stm.src_exprs() {
        e.walk(&mut |x| match x {
            Expr::Syscall { args, .. } | Expr::Call { args, .. } => {
                n = n.or_else(|| args.first().and_then(Expr::as_int))
            }
            _ => {}
        });
    }
    n
}
