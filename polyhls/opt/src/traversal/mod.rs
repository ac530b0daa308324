//! Helpers for traversing scopes and their statements.
mod action;
mod construct;
mod diagnostics;
mod order;
mod visitor;

pub use action::{Action, VisResult};
pub use construct::{ConstructVisitor, Named, ParseVal, PassOpt};
pub use diagnostics::{DiagnosticContext, DiagnosticPass};
pub use order::{Order, ScopeOrder};
pub use visitor::Visitor;
