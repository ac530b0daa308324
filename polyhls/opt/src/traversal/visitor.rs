//! Implements a visitor for scopes.
//! Passes implemented as a [Visitor] are invoked on a [Context] and visit
//! every user [Scope] with a body.
use super::action::{Action, VisResult};
use super::{ConstructVisitor, Named, Order, ScopeOrder};
use polyhls_ir::{BlockIdx, Context, Scope, Stm};
use polyhls_utils::HlsResult;

/// The visiting interface for scopes. Contains three kinds of functions:
/// 1. [Visitor::start] and [Visitor::finish]: called before and after
///    visiting the statements of a scope.
/// 2. [Visitor::visit_stm]: called on each statement, block by block.
/// 3. [Visitor::start_context] and [Visitor::finish_context]: called once
///    around the traversal of all scopes.
///
/// While a scope is visited it is mutably borrowed; passes that need other
/// scopes look them up through the [Context]. The statements of the block
/// being walked by [Visitor::visit_stm] are detached from the block.
pub trait Visitor {
    /// Precondition for this pass to run on the program. If this function
    /// returns None, the pass triggers. Otherwise it aborts and logs the
    /// string as the reason.
    fn precondition(_ctx: &Context) -> Option<String>
    where
        Self: Sized,
    {
        None
    }

    /// Transform the [Context] before visiting the scopes.
    fn start_context(&mut self, _ctx: &mut Context) -> VisResult {
        Ok(Action::Continue)
    }

    /// Transform the [Context] after visiting the scopes.
    fn finish_context(&mut self, _ctx: &mut Context) -> VisResult {
        Ok(Action::Continue)
    }

    /// Define the iteration order in which scopes should be visited
    fn iteration_order() -> Order
    where
        Self: Sized,
    {
        Order::No
    }

    /// Should the scope be visited at all?
    fn visits(&self, scope: &Scope) -> bool {
        scope.has_body()
    }

    /// Define the traversal over a scope.
    fn traverse_scope(&mut self, scope: &mut Scope, ctx: &mut Context) -> HlsResult<()>
    where
        Self: Sized,
    {
        self.start(scope, ctx)?
            .and_then(|| self.visit_stms(scope, ctx))?
            .pop();
        self.finish(scope, ctx)?;
        Ok(())
    }

    /// Walk every statement of the scope, applying the [Action::Change]
    /// results.
    fn visit_stms(&mut self, scope: &mut Scope, ctx: &mut Context) -> VisResult
    where
        Self: Sized,
    {
        for blk in scope.live_blocks() {
            let stms = std::mem::take(&mut scope.block_mut(blk).stms);
            let mut out = Vec::with_capacity(stms.len());
            let mut iter = stms.into_iter();
            let mut stop = false;
            for mut stm in iter.by_ref() {
                match self.visit_stm(&mut stm, blk, scope, ctx)? {
                    Action::Continue | Action::SkipChildren => out.push(stm),
                    Action::Change(kinds) => {
                        for kind in kinds {
                            out.push(scope.mk_stm(kind, stm.loc));
                        }
                        scope.usedef = None;
                    }
                    Action::Stop => {
                        out.push(stm);
                        stop = true;
                        break;
                    }
                }
            }
            out.extend(iter);
            scope.block_mut(blk).stms = out;
            if stop {
                return Ok(Action::Stop);
            }
        }
        Ok(Action::Continue)
    }

    /// Run the visitor on a given [Context].
    ///
    /// After visiting a scope, it calls [ConstructVisitor::clear_data] to
    /// reset the struct.
    fn do_pass(&mut self, ctx: &mut Context) -> HlsResult<()>
    where
        Self: Sized + ConstructVisitor + Named,
    {
        if let Some(msg) = Self::precondition(&*ctx) {
            log::info!("Skipping `{}': {msg}", Self::name());
            return Ok(());
        }
        self.start_context(ctx)?;
        for name in ScopeOrder::compute(ctx, Self::iteration_order()) {
            // Scopes removed by an earlier visit are skipped.
            let Some(rc) = ctx.get_scope(name) else {
                continue;
            };
            if !self.visits(&rc.borrow()) {
                continue;
            }
            let mut scope = rc.borrow_mut();
            self.traverse_scope(&mut scope, ctx)?;
            self.clear_data();
        }
        self.finish_context(ctx)?;
        Ok(())
    }

    /// Build a [Default] implementation of this pass and call
    /// [Visitor::do_pass] using it.
    fn do_pass_default(ctx: &mut Context) -> HlsResult<Self>
    where
        Self: ConstructVisitor + Sized + Named,
    {
        let mut visitor = Self::from(&*ctx)?;
        visitor.do_pass(ctx)?;
        Ok(visitor)
    }

    /// Executed before the traversal begins.
    fn start(&mut self, _scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        Ok(Action::Continue)
    }

    /// Executed after the traversal ends.
    /// This method is always invoked regardless of the [Action] returned
    /// from the statements.
    fn finish(&mut self, _scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        Ok(Action::Continue)
    }

    /// Executed for every statement of block `blk`.
    fn visit_stm(
        &mut self,
        _stm: &mut Stm,
        _blk: BlockIdx,
        _scope: &mut Scope,
        _ctx: &mut Context,
    ) -> VisResult {
        Ok(Action::Continue)
    }
}
