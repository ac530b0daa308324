//! Driver for the polyhls compiler.
use crate::cmdline::Opts;
use polyhls_frontend::IrParser;
use polyhls_ir::{self as ir, Printer};
use polyhls_opt::pass_manager::{PassManager, PassResult};
use polyhls_utils::Error;
use std::io::Write;

/// Parse a textual IR program and run the given passes and pipelines.
pub fn compile_str(
    src: &str,
    config: ir::Config,
    passes: &[String],
) -> PassResult<ir::Context> {
    let prog = IrParser::parse(src.as_bytes())?;
    let mut ctx = ir::from_ast::ast_to_ir(prog, config, None)?;
    let pm = PassManager::default_passes()?;
    pm.execute_plan(&mut ctx, passes, &[], false)?;
    Ok(ctx)
}

/// Print the state transition graphs of every compiled scope.
fn dump_stgs(ctx: &ir::Context) -> PassResult<()> {
    let out = &mut std::io::stdout();
    for name in ctx.user_scopes() {
        let rc = ctx.scope(name)?;
        for stg in &rc.borrow().stgs {
            Printer::write_stg(stg, out).map_err(Error::from)?;
        }
    }
    out.flush().map_err(Error::from)?;
    Ok(())
}

/// Log and clear the warnings recorded so far. Returns how many there were.
pub fn report_warnings(ctx: &mut ir::Context) -> usize {
    let n = ctx.warnings.len();
    for warning in ctx.warnings.drain(..) {
        log::warn!("{warning}");
    }
    n
}

/// Run the compiler from the command line.
pub fn run_compiler() -> PassResult<()> {
    // parse the command line arguments into Opts struct
    let mut opts = Opts::get_opts();

    // enable tracing
    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(opts.log_level)
        .target(env_logger::Target::Stderr)
        .init();

    let pm = PassManager::default_passes()?;

    // list all the avaliable pass options when flag --list-passes is enabled
    if opts.list_passes {
        println!("{}", pm.complete_help());
        return Ok(());
    }

    let Some(file) = opts.file.clone() else {
        return Err(Error::invalid_file("no input file given").into());
    };
    let prog = polyhls_frontend::IrParser::parse_file(&file)?;
    let name = file.to_string_lossy();
    let mut ctx = ir::from_ast::ast_to_ir(prog, opts.config(), Some(name.as_ref()))?;
    // Extra options for the passes
    ctx.extra_opts = opts.extra_opts.drain(..).collect();

    // Run all passes specified by the command line
    let res = pm.execute_plan(&mut ctx, &opts.pass, &opts.disable_pass, opts.dump_ir);
    report_warnings(&mut ctx);
    res?;

    if ctx.config.dump_stg {
        dump_stgs(&ctx)?;
    }
    log::info!("compiled {}", file.display());
    opts.run_backend(ctx)?;
    Ok(())
}

