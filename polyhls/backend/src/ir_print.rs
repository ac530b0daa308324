use crate::traits::Backend;
use polyhls_ir as ir;
use polyhls_utils::{HlsResult, OutputFile};
use std::io::Write;

/// Prints the program in the textual IR accepted by the frontend.
#[derive(Default)]
pub struct IrBackend;

impl Backend for IrBackend {
    fn name(&self) -> &'static str {
        "ir"
    }

    fn validate(_prog: &ir::Context) -> HlsResult<()> {
        Ok(())
    }

    fn emit(prog: &ir::Context, file: &mut OutputFile) -> HlsResult<()> {
        let mut out = file.get_write()?;
        ir::Printer::write_context(prog, &mut out)?;
        out.flush()?;
        Ok(())
    }
}
