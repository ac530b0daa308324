//! Hardware resources used by a statement.
use super::latency::MAX_FUNC_UNIT;
use polyhls_ir::{BinOp, Context, Expr, Id, Scope, Stm, builtins};
use std::collections::BTreeMap;

/// A resource shared between statements of a scope.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    /// A memory array with a single read-write port.
    Mem(Id),
    /// An I/O port or channel.
    Port(Id),
    /// Arithmetic functional units of one kind.
    Op(BinOp),
    /// The single instance of a called sub-module.
    Call(Id),
}

impl Resource {
    /// How many statements may use the resource in one cycle.
    pub fn capacity(&self) -> usize {
        match self {
            Resource::Op(_) => MAX_FUNC_UNIT,
            _ => 1,
        }
    }

    /// Resources worth a modulo slot of their own in a pipeline.
    pub fn is_scarce(&self) -> bool {
        matches!(self, Resource::Mem(_) | Resource::Port(_))
    }
}

/// What a call expression does in hardware.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallClass {
    /// A user function or method implemented as a sub-module.
    User(Id),
    /// A method of a port object; `port` is the port's path.
    Port { port: Id, method: Id },
    /// A timing primitive such as `clksleep`.
    Timing(Id),
    /// `print`, `assert` and other effects without hardware timing.
    Effect(Id),
    /// Builtins evaluated at elaboration time.
    Builtin,
}

/// Name a memory or port by its access path, SSA versions stripped.
pub fn path_id(e: &Expr) -> Option<Id> {
    let q = e.qsym()?;
    Some(Id::new(
        q.iter()
            .map(|s| s.root().as_ref().to_string())
            .collect::<Vec<_>>()
            .join("."),
    ))
}

pub fn classify_call(e: &Expr, scope: &Scope, ctx: &Context) -> Option<CallClass> {
    Some(match e {
        Expr::Call { func, .. } => {
            let Some(callee) = ctx.callee_of(scope, func) else {
                return Some(CallClass::Builtin);
            };
            let owner = callee.parent();
            if owner.is_some_and(builtins::is_port_class) {
                let Expr::Attr(port, method) = &**func else {
                    return Some(CallClass::Builtin);
                };
                CallClass::Port {
                    port: path_id(port)?,
                    method: *method,
                }
            } else if builtins::is_timing(callee) {
                CallClass::Timing(callee)
            } else if ctx.get_scope(callee).is_some_and(|s| s.borrow().is_lib()) {
                CallClass::Builtin
            } else {
                CallClass::User(callee)
            }
        }
        Expr::Syscall { name, .. } => {
            if builtins::is_timing(*name) {
                CallClass::Timing(*name)
            } else if *name == "print" || *name == "assert" {
                CallClass::Effect(*name)
            } else {
                CallClass::Builtin
            }
        }
        _ => return None,
    })
}

/// Resources and ordering facts of one statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeResources {
    pub ops: BTreeMap<BinOp, usize>,
    pub mem_reads: Vec<Id>,
    pub mem_writes: Vec<Id>,
    pub ports: Vec<Id>,
    pub calls: Vec<CallClass>,
    /// Exclusive operations are totally ordered within their block.
    pub exclusive: bool,
}

impl NodeResources {
    pub fn extract(stm: &Stm, scope: &Scope, ctx: &Context) -> Self {
        let mut res = NodeResources::default();
        for e in stm.src_exprs() {
            e.walk(&mut |x| match x {
                Expr::Binop(op, ..) => *res.ops.entry(*op).or_default() += 1,
                Expr::Polyop(op, vs) => {
                    *res.ops.entry(*op).or_default() += vs.len().saturating_sub(1)
                }
                Expr::Mref(m, _) => res.mem_reads.extend(path_id(m)),
                Expr::Mstore(m, ..) => res.mem_writes.extend(path_id(m)),
                Expr::Call { .. } | Expr::Syscall { .. } => {
                    if let Some(c) = classify_call(x, scope, ctx) {
                        if let CallClass::Port { port, .. } = &c {
                            res.ports.push(*port);
                        }
                        res.calls.push(c);
                    }
                }
                _ => {}
            });
        }
        res.exclusive = res.calls.iter().any(|c| {
            matches!(
                c,
                CallClass::User(_)
                    | CallClass::Port { .. }
                    | CallClass::Timing(_)
                    | CallClass::Effect(_)
            )
        });
        res
    }

    /// Every resource this statement occupies when it starts.
    pub fn resources(&self) -> Vec<Resource> {
        let mut out: Vec<Resource> = vec![];
        for m in self.mem_reads.iter().chain(&self.mem_writes) {
            out.push(Resource::Mem(*m));
        }
        for p in &self.ports {
            out.push(Resource::Port(*p));
        }
        for (op, n) in &self.ops {
            for _ in 0..*n {
                out.push(Resource::Op(*op));
            }
        }
        for c in &self.calls {
            if let CallClass::User(callee) = c {
                out.push(Resource::Call(*callee));
            }
        }
        out
    }

    pub fn mems(&self) -> impl Iterator<Item = &Id> {
        self.mem_reads.iter().chain(&self.mem_writes)
    }
}
