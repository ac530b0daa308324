//! Internal representation of the polyhls compiler.
//!
//! A program is a forest of [Scope]s held by a [Context]. Function-like
//! scopes own a control flow graph of [Block]s holding [Stm]s over
//! [Expr] trees.
mod block;
mod branch_graph;
mod common;
mod context;
mod expr;
mod printer;
mod region;
mod runtime;
mod schedule;
mod scope;
mod stg;
mod stm;
mod symbol;
mod types;
mod usedef;

pub mod builtins;
pub mod cfg;
pub mod from_ast;
pub mod rewriter;

pub use block::{Block, BlockIdx};
pub use branch_graph::BranchGraph;
pub use common::{RRC, rrc};
pub use context::{Config, Context, rename_prefix};
pub use expr::{BinOp, Const, Expr, QSym, RelOp, UnOp};
pub use printer::Printer;
pub use region::{LoopInfo, LoopTree, Region, RegionIdx};
pub use rewriter::Rewriter;
pub use runtime::{ModuleInstance, RuntimeInfo, WorkerBinding};
pub use schedule::{BlockSchedule, PipelineInfo, Schedule, ScheduledNode};
pub use scope::{CyclePolicy, Param, Scheduling, Scope, ScopeTags, SynthParams};
pub use stg::{Action, ActionKind, RETURN_REG, State, Stg, Transition};
pub use stm::{JumpKind, Phi, PhiKind, Stm, StmId, StmKind};
pub use symbol::{SymTags, Symbol};
pub use types::{Direction, Length, Type, TypeKind};
pub use usedef::UseDefTable;

pub use polyhls_utils::{GetName, Id};
