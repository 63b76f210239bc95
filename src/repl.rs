//! The interactive shell. Each line is appended to a growing source
//! buffer and the whole buffer is recompiled and rerun; the newest
//! top-level statements are wrapped in [`ExprKind::DocTest`] so the shell
//! can report the statement's source, value, and type the way a batch
//! `DocTest` assertion would.
//!
//! Declarations are typechecked at global scope on every run (see
//! [`crate::typeck::check_program`]), so a variable declared on one line
//! is visible to the next. Re-running the whole buffer on every
//! keystroke is simpler than threading a persistent [`crate::env::Environment`]
//! through the driver, at the cost of replaying earlier side effects —
//! acceptable for a reference shell, not for a production REPL.

use crate::ast::{Expr, ExprKind, NodeIdGen};
use crate::backend::{Backend, Interpreter};
use crate::compile::Pipeline;
use crate::error::Diagnostic;
use crate::lexer::Lexer;
use crate::lower::lower_program;
use crate::parser::parse_program;
use crate::span::{File, Span};
use crate::typeck::check_program;
use std::io::{self, BufRead, Write};

pub fn run(verbose: bool) {
    println!("vela {} — type Ctrl-D to quit", env!("CARGO_PKG_VERSION"));
    let mut pipeline = Pipeline::new().with_verbose(verbose);
    let mut buffer = String::new();
    let mut wrapped_statements = 0usize;
    let stdin = io::stdin();

    loop {
        print!("vela> ");
        if io::stdout().flush().is_err() {
            break;
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => {
                println!();
                break;
            }
            Ok(_) => {}
        }
        if line.trim().is_empty() {
            continue;
        }

        let candidate = format!("{}{}", buffer, line);
        match run_buffer(&mut pipeline, &candidate, wrapped_statements) {
            Ok((total_statements, value, ty)) => {
                buffer = candidate;
                wrapped_statements = total_statements;
                println!("{} : {}", value, pipeline.types.pretty(ty, &pipeline.interner));
            }
            Err(diag) => {
                let file = File::spoofed("<repl>", candidate);
                eprint!("{}", diag.render(&file, true));
            }
        }
    }
}

fn run_buffer(
    pipeline: &mut Pipeline,
    source: &str,
    already_wrapped: usize,
) -> Result<(usize, crate::backend::RuntimeValue, crate::types::TypeId), Diagnostic> {
    let tokens = Lexer::tokenize(source, &mut pipeline.interner)?;
    let mut block = parse_program(&tokens, &mut pipeline.interner)?;
    let total = block.statements.len();
    let mut ids = NodeIdGen::default();
    for stmt in block.statements.iter_mut().skip(already_wrapped) {
        let span = stmt.span;
        let placeholder = Expr::new(ids.next(), span, ExprKind::Nil(None));
        let inner = std::mem::replace(stmt, placeholder);
        *stmt = Expr::new(ids.next(), span, ExprKind::DocTest { expr: Box::new(inner), skip_source: false });
    }
    let last_id = block.statements.last().map(|s| s.id);

    let table = check_program(&block, &mut pipeline.types, &mut pipeline.interner)?;
    let ty = last_id.and_then(|id| table.get(&id).copied()).unwrap_or(pipeline.types.void_ty);

    let module = lower_program(&block, &table, &mut pipeline.types, &mut pipeline.interner)?;
    let main_name = pipeline.interner.intern("main");
    let main = module.main_function(main_name).expect("lower_program always emits a main function");
    let mut interpreter = Interpreter::new(&pipeline.interner);
    let value = interpreter
        .run_function(&module, main)
        .map_err(|e| Diagnostic::error(e.0, Span::new(0, 0)))?;
    Ok((total, value, ty))
}
