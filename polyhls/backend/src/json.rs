use crate::{ModuleInfo, stg::check_stgs, traits::Backend};
use polyhls_ir as ir;
use polyhls_utils::{Error, HlsResult, OutputFile};
use serde::Serialize;
use std::io::Write;

/// Emits the module descriptions as JSON for an external HDL generator.
#[derive(Default)]
pub struct JsonBackend;

#[derive(Serialize)]
struct Program<'a> {
    file: Option<&'a str>,
    modules: Vec<ModuleInfo>,
}

impl Backend for JsonBackend {
    fn name(&self) -> &'static str {
        "json"
    }

    fn validate(prog: &ir::Context) -> HlsResult<()> {
        check_stgs(prog)
    }

    fn emit(prog: &ir::Context, file: &mut OutputFile) -> HlsResult<()> {
        let program = Program {
            file: prog.file.as_deref(),
            modules: ModuleInfo::collect(prog)?,
        };
        let mut out = file.get_write()?;
        // Compact unless someone is reading it.
        let res = if file.isatty() {
            serde_json::to_writer_pretty(&mut out, &program)
        } else {
            serde_json::to_writer(&mut out, &program)
        };
        res.map_err(|e| Error::write_error(format!("JSON: {e}")))?;
        writeln!(out)?;
        out.flush()?;
        Ok(())
    }
}
