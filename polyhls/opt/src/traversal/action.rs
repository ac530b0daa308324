//! Actions control the traversal of statements.
use polyhls_ir::StmKind;
use polyhls_utils::HlsResult;

/// Result of performing a visit.
pub type VisResult = HlsResult<Action>;

/// Action performed at the end of visiting a scope or a statement.
pub enum Action {
    /// Continue the traversal.
    Continue,
    /// Globally abort the traversal of the current scope.
    Stop,
    /// When returned from [start](super::Visitor::start), do not visit the
    /// statements of the scope.
    SkipChildren,
    /// Replace the visited statement by a sequence of statements. An empty
    /// sequence removes the statement. The new statements are not visited.
    Change(Vec<StmKind>),
}

impl Action {
    /// Run the traversal specified by `next` if this traversal succeeds.
    /// If the result of this traversal is not `Action::Continue`, do not
    /// run `next()`.
    pub(super) fn and_then<F>(self, mut next: F) -> VisResult
    where
        F: FnMut() -> VisResult,
    {
        match self {
            Action::Continue => next(),
            Action::Change(_) | Action::Stop | Action::SkipChildren => Ok(self),
        }
    }

    pub fn change(kind: StmKind) -> Self {
        Action::Change(vec![kind])
    }

    pub fn remove() -> Self {
        Action::Change(vec![])
    }

    /// Changes a Action::SkipChildren to Action::Continue.
    pub(super) fn pop(self) -> Self {
        match self {
            Action::SkipChildren => Action::Continue,
            x => x,
        }
    }
}
