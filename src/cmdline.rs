//! Command line parsing for the polyhls compiler.
use argh::FromArgs;
#[cfg(feature = "serialize")]
use polyhls_backend::JsonBackend;
use polyhls_backend::{Backend, BackendOpt, IrBackend, StgBackend};
use polyhls_ir as ir;
use polyhls_utils::{HlsResult, OutputFile};
use std::path::PathBuf;

#[derive(FromArgs)]
/// Options passed to the polyhls compiler.
pub struct Opts {
    /// input program in textual IR
    #[argh(positional)]
    pub file: Option<PathBuf>,

    /// base name of the output file
    #[argh(option, short = 'o', default = "String::from(\"polyphony_out\")")]
    pub output: String,

    /// directory for the output file; standard output when omitted
    #[argh(option, short = 'd')]
    pub dir: Option<PathBuf>,

    /// log at info level
    #[argh(switch, short = 'v')]
    pub verbose: bool,

    /// logging level
    #[argh(option, long = "log", default = "log::LevelFilter::Warn")]
    pub log_level: log::LevelFilter,

    /// run this pass or pipeline
    #[argh(option, short = 'p', long = "pass", default = "vec![\"all\".into()]")]
    pub pass: Vec<String>,

    /// disable this pass or pipeline
    #[argh(option, long = "disable-pass")]
    pub disable_pass: Vec<String>,

    /// extra options passed to passes, as pass:opt or pass:opt=value
    #[argh(option, short = 'x', long = "extra-opt")]
    pub extra_opts: Vec<String>,

    /// select a backend: stg, json, ir or none
    #[argh(option, short = 'b', default = "BackendOpt::default()")]
    pub backend: BackendOpt,

    /// width of integers without an explicit width
    #[argh(option, long = "int-width", default = "32")]
    pub int_width: u32,

    /// inline every call, including calls into modules
    #[argh(switch, long = "perfect-inlining")]
    pub perfect_inlining: bool,

    /// evaluate pure functions at compile time
    #[argh(switch, long = "enable-pure")]
    pub enable_pure: bool,

    /// clksleep cycles above which a counting wait state is generated
    #[argh(option, long = "sleep-sentinel", default = "50")]
    pub sleep_sentinel: u32,

    /// print the IR after every pass
    #[argh(switch, long = "dump-ir")]
    pub dump_ir: bool,

    /// print the state transition graphs after compilation
    #[argh(switch, long = "dump-stg")]
    pub dump_stg: bool,

    /// list all registered passes and aliases
    #[argh(switch, long = "list-passes")]
    pub list_passes: bool,
}

impl Opts {
    /// Parse the command line, folding `-v` into the log level.
    pub fn get_opts() -> Opts {
        let mut opts: Opts = argh::from_env();
        if opts.verbose && opts.log_level < log::LevelFilter::Info {
            opts.log_level = log::LevelFilter::Info;
        }
        opts
    }

    pub fn config(&self) -> ir::Config {
        ir::Config {
            default_int_width: self.int_width,
            perfect_inlining: self.perfect_inlining,
            enable_pure: self.enable_pure,
            sleep_sentinel_threshold: self.sleep_sentinel,
            dump_ir: self.dump_ir,
            dump_stg: self.dump_stg,
            verbose: self.verbose,
            ..ir::Config::default()
        }
    }

    /// Where the backend writes: `<dir>/<output>.<ext>` when a directory
    /// is given, standard output otherwise.
    pub fn output_file(&self) -> OutputFile {
        match &self.dir {
            Some(d) => OutputFile::in_dir(Some(d), &self.output, self.backend.extension()),
            None => OutputFile::Stdout,
        }
    }

    /// Run the selected backend on the compiled context.
    pub fn run_backend(&self, ctx: ir::Context) -> HlsResult<()> {
        let file = self.output_file();
        match self.backend {
            BackendOpt::Stg => StgBackend.run(ctx, file),
            #[cfg(feature = "serialize")]
            BackendOpt::Json => JsonBackend.run(ctx, file),
            BackendOpt::Ir => IrBackend.run(ctx, file),
            BackendOpt::None => Ok(()),
        }
    }
}
