//! Command-line interface: `velac [-h] [-v] [-c] [-o outfile] [-A] [-O<level>]
//! [-I<dir>] [-V<...>] [file] [program-args...]`. With no file, drops into
//! the REPL; otherwise loads, compiles, and (by default) interprets the
//! file's implicit `main`.

use crate::backend::Backend;
use crate::compile::Pipeline;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "velac")]
#[command(about = "Ahead-of-time and interactive compiler for the Vela systems language")]
#[command(version)]
pub struct Cli {
    /// Print AST and backend IR as each stage runs.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit a native object/executable instead of running via the JIT.
    #[arg(short = 'c', long = "compile")]
    pub compile: bool,

    /// Output path. Defaults to the input path with its extension stripped.
    #[arg(short = 'o')]
    pub outfile: Option<PathBuf>,

    /// Emit assembly alongside the object file.
    #[arg(short = 'A', long = "asm")]
    pub asm: bool,

    /// Optimization level, e.g. `-O2`.
    #[arg(short = 'O')]
    pub opt_level: Option<String>,

    /// Add a directory to the module search path. Repeatable.
    #[arg(short = 'I')]
    pub include_dirs: Vec<PathBuf>,

    /// Backend-specific verbose flags, passed through uninterpreted.
    #[arg(short = 'V')]
    pub backend_flags: Vec<String>,

    /// Source file to compile. REPL starts if omitted.
    pub file: Option<PathBuf>,

    /// Forwarded to the compiled program as argv.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub program_args: Vec<String>,
}

pub fn run_cli() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let Some(file) = cli.file.clone() else {
        crate::repl::run(cli.verbose);
        return Ok(());
    };

    if cli.compile {
        eprintln!("error: native object/executable emission is not supported by this build; omit -c to run via the interpreter");
        std::process::exit(1);
    }

    let mut pipeline = Pipeline::new().with_verbose(cli.verbose);
    let (module, source_file) = match pipeline.compile_file(&file) {
        Ok(result) => result,
        Err(diagnostic) => {
            eprint!("{}", diagnostic.render(&crate::span::File::load(&file).unwrap_or(diagnostic_fallback_file(&file)), true));
            std::process::exit(1);
        }
    };
    let _ = source_file;

    let main_name = pipeline.interner.intern("main");
    let main = module.main_function(main_name).ok_or("no code to run")?;
    let mut interpreter = crate::backend::Interpreter::new(&pipeline.interner);
    match interpreter.run_function(&module, main) {
        Ok(value) => {
            if cli.verbose {
                eprintln!("main returned {}", value);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

fn diagnostic_fallback_file(path: &std::path::Path) -> crate::span::File {
    crate::span::File::spoofed(path.display().to_string(), "")
}
