//! Diagnostics. `Result<T, Diagnostic>` is the error channel threaded
//! through lexing, parsing, typechecking, and lowering — there is no
//! longjmp-style unwind target; every fallible stage returns a `Result`
//! and the driver is the only place that renders and prints one.

use crate::span::{File, Span};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub spans: Vec<Span>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Diagnostic { severity: Severity::Error, message: message.into(), spans: vec![span], help: None }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.spans.push(span);
        self
    }

    /// Renders every recorded span against `file`'s source, colorized
    /// when `colorize` is set (piped output disables it).
    pub fn render(&self, file: &File, colorize: bool) -> String {
        let label = if colorize { "\x1b[1;31merror\x1b[0m" } else { "error" };
        let mut out = format!("{}: {}\n", label, self.message);
        for span in &self.spans {
            let mut body = String::new();
            if file.fprint_span(&mut body, span.start, span.end, "", 1, colorize).is_ok() {
                out.push_str(&body);
                out.push('\n');
            }
        }
        if let Some(help) = &self.help {
            let tag = if colorize { "\x1b[1;36mhelp\x1b[0m" } else { "help" };
            out.push_str(&format!("{}: {}\n", tag, help));
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {}", self.message)
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_message_and_source_line() {
        let file = File::spoofed("test", "x := 1\ny := x + @\n");
        let bad = file.source().find('@').unwrap();
        let diag = Diagnostic::error("unexpected character", Span::new(bad, bad + 1));
        let rendered = diag.render(&file, false);
        assert!(rendered.contains("unexpected character"));
        assert!(rendered.contains("y := x + @"));
    }

    #[test]
    fn with_help_appends_help_line() {
        let file = File::spoofed("test", "x\n");
        let diag = Diagnostic::error("oops", Span::new(0, 1)).with_help("try y instead");
        assert!(diag.render(&file, false).contains("try y instead"));
    }
}
