use polyhls_ir as ir;
use polyhls_utils::{HlsResult, OutputFile};

/// A backend for the polyhls compiler.
pub trait Backend {
    /// The name of this backend.
    fn name(&self) -> &'static str;
    /// Validate this program for emitting using this backend. Returns an
    /// Err(..) if the program has unexpected constructs.
    fn validate(prog: &ir::Context) -> HlsResult<()>;
    /// Transforms the program into a formatted string representing a valid
    /// backend program.
    fn emit(prog: &ir::Context, write: &mut OutputFile) -> HlsResult<()>;
    /// Convenience function to validate and emit the program.
    fn run(&self, prog: ir::Context, mut file: OutputFile) -> HlsResult<()> {
        Self::validate(&prog)?;
        Self::emit(&prog, &mut file)
    }
}
