use crate::{ModuleInfo, traits::Backend};
use polyhls_ir as ir;
use polyhls_utils::{Error, HlsResult, OutputFile};
use std::io::Write;

/// Emits the module descriptions and their state transition graphs as
/// text.
#[derive(Default)]
pub struct StgBackend;

/// Every STG must have a final state reachable by name from its
/// transitions.
pub(crate) fn check_stgs(prog: &ir::Context) -> HlsResult<()> {
    for name in prog.user_scopes() {
        let rc = prog.scope(name)?;
        let scope = rc.borrow();
        for stg in &scope.stgs {
            if stg.finish_state().is_none() {
                return Err(Error::malformed(format!(
                    "{}: stg {} has no final state",
                    scope.name, stg.name
                )));
            }
            let n = stg.states.len();
            if let Some(s) = stg.states.iter().find(|s| s.next.targets().iter().any(|t| *t >= n)) {
                return Err(Error::malformed(format!(
                    "{}: state {} jumps outside of stg {}",
                    scope.name, s.name, stg.name
                )));
            }
        }
    }
    Ok(())
}

impl Backend for StgBackend {
    fn name(&self) -> &'static str {
        "stg"
    }

    fn validate(prog: &ir::Context) -> HlsResult<()> {
        check_stgs(prog)
    }

    fn emit(prog: &ir::Context, file: &mut OutputFile) -> HlsResult<()> {
        let modules = ModuleInfo::collect(prog)?;
        let mut out = file.get_write()?;
        for (i, m) in modules.iter().enumerate() {
            if i > 0 {
                writeln!(out)?;
            }
            write!(out, "{m}")?;
        }
        out.flush()?;
        log::info!(
            "emitted {} module(s) with {} state(s) to {file}",
            modules.len(),
            modules.iter().map(ModuleInfo::state_count).sum::<usize>()
        );
        Ok(())
    }
}
