use crate::analysis::CallGraph;
use polyhls_ir::{Context, Id};

/// The order in which the scopes are traversed.
#[derive(Default, PartialEq, Eq, Clone, Copy, Debug)]
pub enum Order {
    /// Creation order of the scopes.
    #[default]
    No,
    /// Callers before callees.
    Pre,
    /// Callees before callers. Scopes on a call cycle are visited together
    /// in name order.
    Post,
}

/// Computes the names of the user scopes in a traversal order.
///
/// The order is a snapshot: scopes added while a pass runs are not part of
/// it, and scopes removed while a pass runs are skipped by the visitor.
pub struct ScopeOrder;

impl ScopeOrder {
    pub fn compute(ctx: &Context, order: Order) -> Vec<Id> {
        match order {
            Order::No => ctx.user_scopes(),
            Order::Post => CallGraph::new(ctx).post_order(),
            Order::Pre => {
                let mut po = CallGraph::new(ctx).post_order();
                po.reverse();
                po
            }
        }
    }
}
