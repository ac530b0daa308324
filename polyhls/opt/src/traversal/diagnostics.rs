//! Checker passes keep going after the first problem and report all of
//! them once the traversal is over.
use super::{Action, VisResult};
use polyhls_ir::Context;
use polyhls_utils::{Error, MultiError};

/// Implemented by passes that collect errors instead of stopping.
pub trait DiagnosticPass {
    fn diagnostics(&self) -> &DiagnosticContext;
}

/// Errors and warnings found so far, in the order they were found.
#[derive(Default, Debug)]
pub struct DiagnosticContext {
    errors: Vec<Error>,
    warnings: Vec<Error>,
}

impl DiagnosticContext {
    pub fn error(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn warn(&mut self, warning: Error) {
        self.warnings.push(warning)
    }

    /// Record `error` and keep visiting the remaining statements.
    pub fn bail(&mut self, error: Error) -> VisResult {
        self.error(error);
        Ok(Action::Continue)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Error> {
        self.warnings.iter()
    }

    /// Hand the warnings to `ctx`, which prints them at the end of the
    /// compilation, and fail with the errors if there are any.
    pub fn report(&self, ctx: &mut Context) -> Result<(), MultiError> {
        for w in &self.warnings {
            ctx.warn(w.clone());
        }
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(MultiError::from(self.errors.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_ir::Config;

    #[test]
    fn warnings_survive_errors() {
        let mut diag = DiagnosticContext::default();
        diag.warn(Error::misc("unused port"));
        assert!(diag.bail(Error::misc("bad write")).is_ok());

        let mut ctx = Context::new(Config::default());
        let errs = diag.report(&mut ctx).unwrap_err();
        assert_eq!(errs.errors().len(), 1);
        assert_eq!(ctx.warnings.len(), 1);
    }
}
