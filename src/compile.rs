//! End-to-end pipeline: source text → tokens → AST → typed AST →
//! backend IR → interpreted result. [`Pipeline`] is shared by the batch
//! compiler entry point and the REPL so both drive the exact same
//! stages in the exact same order.

use crate::backend::{Backend, Interpreter, RuntimeValue};
use crate::error::Diagnostic;
use crate::intern::Interner;
use crate::ir::Module;
use crate::lexer::Lexer;
use crate::lower::lower_program;
use crate::parser::parse_program;
use crate::span::File;
use crate::typeck::check_program;
use crate::types::TypeInterner;
use std::path::Path;

pub struct Pipeline {
    pub interner: Interner,
    pub types: TypeInterner,
    pub verbose: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline { interner: Interner::new(), types: TypeInterner::new(), verbose: false }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Runs every stage and returns the lowered module, without executing it.
    pub fn lower_source(&mut self, source: &str) -> Result<Module, Diagnostic> {
        let tokens = Lexer::tokenize(source, &mut self.interner)?;
        if self.verbose {
            eprintln!("lexed {} tokens", tokens.len());
        }
        let block = parse_program(&tokens, &mut self.interner)?;
        if self.verbose {
            eprintln!("parsed {} top-level statements", block.statements.len());
        }
        let table = check_program(&block, &mut self.types, &mut self.interner)?;
        if self.verbose {
            eprintln!("typechecked {} expressions", table.len());
        }
        lower_program(&block, &table, &mut self.types, &mut self.interner)
    }

    /// Lowers and runs a source file with the reference interpreting backend.
    pub fn run_source(&mut self, source: &str) -> Result<RuntimeValue, Diagnostic> {
        let module = self.lower_source(source)?;
        let main_name = self.interner.intern("main");
        let mut interpreter = Interpreter::new(&self.interner);
        let main = module.main_function(main_name).ok_or_else(|| Diagnostic::error("no code to run", crate::span::Span::new(0, 0)))?;
        interpreter
            .run_function(&module, main)
            .map_err(|e| Diagnostic::error(e.0, crate::span::Span::new(0, 0)))
    }

    pub fn compile_file(&mut self, path: &Path) -> Result<(Module, File), Diagnostic> {
        let file = File::load(path).map_err(|e| Diagnostic::error(format!("cannot read {}: {}", path.display(), e), crate::span::Span::new(0, 0)))?;
        let module = self.lower_source(file.source())?;
        Ok((module, file))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl From<crate::lexer::LexError> for Diagnostic {
    fn from(err: crate::lexer::LexError) -> Self {
        match err {
            crate::lexer::LexError::UnexpectedChar { ch, span } => Diagnostic::error(format!("unexpected character '{}'", ch), span),
            crate::lexer::LexError::UnterminatedString { span } => Diagnostic::error("unterminated string literal", span),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_a_simple_arithmetic_script() {
        let mut pipeline = Pipeline::new();
        let result = pipeline.run_source("x := 2 + 3\nreturn x\n").unwrap();
        assert_eq!(result, RuntimeValue::Int(5));
    }

    #[test]
    fn reports_a_diagnostic_for_unit_mismatch() {
        let mut pipeline = Pipeline::new();
        let err = pipeline.lower_source("x := 1:Int64<m> + 1:Int64<s>\n");
        assert!(err.is_err());
    }
}
