//! Analyses over scopes: dominators, loops, path conditions, data flow
//! and scheduling. Passes call into these; none of them mutate the IR.
mod call_graph;
mod dominator;
mod exclusion;
mod loops;

pub mod dfg;
pub mod latency;
pub mod path_exp;
pub mod pipeline;
pub mod resources;
pub mod scheduler;
pub mod typing;

pub use call_graph::CallGraph;
pub use dfg::{DfNode, Dfg, EdgeKind};
pub use dominator::DominatorTree;
pub use exclusion::build_branch_graph;
pub use latency::{CALL_MINIMUM_STEP, MAX_FUNC_UNIT};
pub use loops::{build_loop_tree, loop_info};
pub use path_exp::PathCond;
pub use resources::{NodeResources, Resource};
pub use typing::TypeEval;
