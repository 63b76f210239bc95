//! Source text with a precomputed line index, spans, and highlighted
//! diagnostic rendering.
//!
//! A [`File`] owns an immutable source buffer plus an index of line start
//! offsets and per-line indentation. A [`Span`] is a `(start, end)` byte
//! range into that buffer; spans are the sole input to diagnostic
//! rendering, carried by every AST node and IR value.

use std::fmt;

/// A byte-offset range in source text.
///
/// No validation is performed at construction; callers combine spans with
/// [`Span::merge`] to build compound expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Per-line metadata precomputed once when a [`File`] is loaded.
#[derive(Debug, Clone, Copy)]
struct LineInfo {
    start: usize,
    is_empty: bool,
    indent_columns: usize,
}

/// An immutable source buffer plus its line index.
///
/// Loaded once per compilation unit (or spoofed in-memory for the REPL),
/// `File` never mutates after construction: the parser, typechecker, and
/// lowering pass all borrow spans back into it for diagnostics.
pub struct File {
    name: String,
    source: String,
    lines: Vec<LineInfo>,
}

impl File {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        let lines = Self::index_lines(&source);
        File {
            name: name.into(),
            source,
            lines,
        }
    }

    /// Loads a file's contents into a named `File` for diagnostics.
    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self::new(path.display().to_string(), source))
    }

    /// Builds an in-memory buffer with a synthetic label, used by the REPL.
    pub fn spoofed(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(label, source)
    }

    fn index_lines(source: &str) -> Vec<LineInfo> {
        let mut lines = Vec::new();
        let mut start = 0usize;
        for (offset, ch) in source.char_indices() {
            if ch == '\n' {
                lines.push(Self::line_info(source, start, offset));
                start = offset + 1;
            }
        }
        if start <= source.len() {
            lines.push(Self::line_info(source, start, source.len()));
        }
        lines
    }

    fn line_info(source: &str, start: usize, end: usize) -> LineInfo {
        let content = &source[start..end];
        let is_empty = content.trim().is_empty();
        let indent_columns = content.chars().take_while(|c| *c == ' ' || *c == '\t').count();
        LineInfo { start, is_empty, indent_columns }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn text(&self, span: Span) -> &str {
        let start = span.start.min(self.source.len());
        let end = span.end.min(self.source.len()).max(start);
        &self.source[start..end]
    }

    /// 1-based line number containing byte offset `ptr`.
    pub fn line_number(&self, ptr: usize) -> usize {
        match self.lines.binary_search_by(|line| line.start.cmp(&ptr)) {
            Ok(idx) => idx + 1,
            Err(idx) => idx.max(1),
        }
    }

    /// Indentation (in columns) of the line containing byte offset `ptr`.
    pub fn indent(&self, ptr: usize) -> usize {
        let line_idx = self.line_number(ptr).saturating_sub(1);
        self.lines.get(line_idx).map(|l| l.indent_columns).unwrap_or(0)
    }

    pub fn line_is_empty(&self, line_number: usize) -> bool {
        self.lines
            .get(line_number.saturating_sub(1))
            .map(|l| l.is_empty)
            .unwrap_or(true)
    }

    fn line_bounds(&self, line_idx: usize) -> (usize, usize) {
        let start = self.lines[line_idx].start;
        let end = self
            .lines
            .get(line_idx + 1)
            .map(|l| l.start.saturating_sub(1))
            .unwrap_or(self.source.len());
        (start, end.max(start))
    }

    /// Prints the lines enclosing `start..end`, underlined, with `context_lines`
    /// lines of context on either side. `color_prefix` labels the underline
    /// (e.g. `"error"`); pass `colorize: false` for plain-text output.
    pub fn fprint_span<W: fmt::Write>(
        &self,
        out: &mut W,
        start: usize,
        end: usize,
        color_prefix: &str,
        context_lines: usize,
        colorize: bool,
    ) -> fmt::Result {
        let first_line = self.line_number(start).saturating_sub(1);
        let last_line = self.line_number(end.max(start)).saturating_sub(1);
        let lo = first_line.saturating_sub(context_lines);
        let hi = (last_line + context_lines).min(self.lines.len().saturating_sub(1));

        for idx in lo..=hi {
            let (line_start, line_end) = self.line_bounds(idx);
            let content = &self.source[line_start..line_end];
            writeln!(out, "{:>5} | {}", idx + 1, content)?;
            if idx >= first_line && idx <= last_line {
                let underline_start = start.max(line_start) - line_start;
                let underline_end = end.min(line_end).max(start.max(line_start)) - line_start;
                let underline_len = (underline_end - underline_start).max(1);
                let underline = format!(
                    "{}{}",
                    " ".repeat(underline_start),
                    "^".repeat(underline_len)
                );
                if colorize {
                    writeln!(out, "      | \x1b[1;31m{} {}\x1b[0m", underline, color_prefix)?;
                } else {
                    writeln!(out, "      | {} {}", underline, color_prefix)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_merge_combines_ranges() {
        let a = Span::new(5, 10);
        let b = Span::new(8, 15);
        assert_eq!(a.merge(b), Span::new(5, 15));
    }

    #[test]
    fn line_number_tracks_newlines() {
        let file = File::new("t", "abc\ndef\nghi");
        assert_eq!(file.line_number(0), 1);
        assert_eq!(file.line_number(4), 2);
        assert_eq!(file.line_number(9), 3);
    }

    #[test]
    fn indent_counts_leading_whitespace() {
        let file = File::new("t", "for x in y:\n    say(x)\n");
        assert_eq!(file.indent(0), 0);
        let body_offset = file.source().find("say").unwrap();
        assert_eq!(file.indent(body_offset), 4);
    }

    #[test]
    fn fprint_span_underlines_offending_range() {
        let file = File::new("t", "nums := [1,2,3]\nsay(nums[4])\n");
        let offset = file.source().find('4').unwrap();
        let mut out = String::new();
        file.fprint_span(&mut out, offset, offset + 1, "error", 0, false).unwrap();
        assert!(out.contains("say(nums[4])"));
        assert!(out.contains('^'));
    }
}
