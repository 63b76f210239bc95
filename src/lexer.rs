//! Hand-written lexer: whitespace/comment skipping, indentation-aware
//! block boundaries, operator/punctuation tokens, numeric literals with
//! suffix and unit annotations, and the six string delimiter pairs with
//! interpolation.
//!
//! Indentation is tracked with an explicit stack of column widths, the
//! same shape `hardparse.c`'s line-oriented pass uses: a line whose
//! indentation exceeds the top of the stack opens a block (`Indent`), one
//! that is less closes zero or more (`Dedent` per level popped), and one
//! that matches continues the current block.

use crate::intern::Interner;
use crate::span::Span;
use crate::token::{Token, TokenKind};
use std::collections::VecDeque;

pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    indent_stack: Vec<usize>,
    pending_dedents: usize,
    at_line_start: bool,
    paren_depth: i32,
    pending_tokens: VecDeque<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            indent_stack: vec![0],
            pending_dedents: 0,
            at_line_start: true,
            paren_depth: 0,
            pending_tokens: VecDeque::new(),
        }
    }

    pub fn tokenize(source: &'a str, interner: &mut Interner) -> Result<Vec<Token>, LexError> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token(interner)?;
            let done = matches!(tok.kind, TokenKind::Eof);
            tokens.push(tok);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek2(&self) -> Option<char> {
        let mut it = self.source[self.pos..].chars();
        it.next();
        it.next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn bump_if(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn column_at_line_start(&self) -> usize {
        let mut col = 0;
        let mut it = self.source[self.pos..].chars();
        while let Some(c) = it.clone().next() {
            if c == ' ' {
                col += 1;
                it.next();
            } else {
                break;
            }
        }
        col
    }

    fn skip_blank_and_comment_lines(&mut self) {
        loop {
            let save = self.pos;
            let mut scan = self.pos;
            while scan < self.bytes.len() && self.bytes[scan] == b' ' {
                scan += 1;
            }
            let is_comment = self.source[scan..].starts_with("//");
            let at_newline_or_eof = scan >= self.bytes.len() || self.bytes[scan] == b'\n';
            if is_comment || (at_newline_or_eof && scan > self.pos) || at_newline_or_eof {
                if let Some(nl) = self.source[scan..].find('\n') {
                    self.pos = scan + nl + 1;
                } else {
                    self.pos = self.source.len();
                    return;
                }
                if save == self.pos {
                    return;
                }
                continue;
            }
            return;
        }
    }

    fn handle_indentation(&mut self) -> Option<TokenKind> {
        if self.pending_dedents > 0 {
            self.pending_dedents -= 1;
            return Some(TokenKind::Dedent);
        }
        if !self.at_line_start || self.paren_depth > 0 {
            return None;
        }
        self.skip_blank_and_comment_lines();
        if self.pos >= self.source.len() {
            let top = *self.indent_stack.last().unwrap_or(&0);
            if top > 0 {
                self.pending_dedents = self.indent_stack.len() - 1;
                self.indent_stack.truncate(1);
                if self.pending_dedents > 0 {
                    self.pending_dedents -= 1;
                    return Some(TokenKind::Dedent);
                }
            }
            return None;
        }
        let col = self.column_at_line_start();
        self.at_line_start = false;
        let current = *self.indent_stack.last().unwrap();
        if col > current {
            self.indent_stack.push(col);
            return Some(TokenKind::Indent);
        } else if col < current {
            let mut popped = 0;
            while *self.indent_stack.last().unwrap() > col {
                self.indent_stack.pop();
                popped += 1;
            }
            if popped > 0 {
                self.pending_dedents = popped - 1;
                return Some(TokenKind::Dedent);
            }
        }
        None
    }

    fn skip_inline_space(&mut self) {
        while let Some(c) = self.peek() {
            if c == ' ' || c == '\t' {
                self.advance();
            } else if self.source[self.pos..].starts_with("//") {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    pub fn next_token(&mut self, interner: &mut Interner) -> Result<Token, LexError> {
        if let Some(tok) = self.pending_tokens.pop_front() {
            return Ok(tok);
        }
        if let Some(kind) = self.handle_indentation() {
            return Ok(Token::new(kind, Span::new(self.pos, self.pos)));
        }
        self.skip_inline_space();

        let start = self.pos;
        let Some(ch) = self.peek() else {
            if self.indent_stack.len() > 1 {
                self.indent_stack.pop();
                return Ok(Token::new(TokenKind::Dedent, Span::new(start, start)));
            }
            return Ok(Token::new(TokenKind::Eof, Span::new(start, start)));
        };

        if ch == '\n' {
            self.advance();
            self.at_line_start = true;
            return Ok(Token::new(TokenKind::Newline, Span::new(start, self.pos)));
        }

        if ch.is_ascii_digit() {
            return self.lex_number(start);
        }

        if ch == '"' || ch == '\'' {
            return self.lex_string(ch, start, interner);
        }

        if ch.is_alphabetic() || ch == '_' {
            return self.lex_ident_or_keyword(start, interner);
        }

        self.lex_punct(ch, start)
    }

    fn lex_number(&mut self, start: usize) -> Result<Token, LexError> {
        let mut text = String::new();
        if self.peek() == Some('0') && matches!(self.peek2(), Some('x') | Some('b') | Some('o')) {
            text.push(self.advance().unwrap());
            text.push(self.advance().unwrap());
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    text.push(self.advance().unwrap());
                } else {
                    break;
                }
            }
            let precision = self.lex_int_suffix();
            let unit = self.lex_unit_suffix();
            return Ok(Token::new(
                TokenKind::Int { text, precision, unit },
                Span::new(start, self.pos),
            ));
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                text.push(self.advance().unwrap());
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek2().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            is_float = true;
            text.push(self.advance().unwrap());
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() || c == '_' {
                    text.push(self.advance().unwrap());
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            is_float = true;
            text.push(self.advance().unwrap());
            if matches!(self.peek(), Some('+') | Some('-')) {
                text.push(self.advance().unwrap());
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(self.advance().unwrap());
                } else {
                    break;
                }
            }
        }

        if is_float {
            let precision = if self.bump_if('f') {
                let mut digits = String::new();
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        digits.push(self.advance().unwrap());
                    } else {
                        break;
                    }
                }
                digits.parse().unwrap_or(64)
            } else {
                64
            };
            let unit = self.lex_unit_suffix();
            Ok(Token::new(TokenKind::Num { text, precision, unit }, Span::new(start, self.pos)))
        } else {
            let precision = self.lex_int_suffix();
            let unit = self.lex_unit_suffix();
            Ok(Token::new(TokenKind::Int { text, precision, unit }, Span::new(start, self.pos)))
        }
    }

    fn lex_int_suffix(&mut self) -> Option<u8> {
        if self.peek() == Some('i') {
            let save = self.pos;
            self.advance();
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    digits.push(self.advance().unwrap());
                } else {
                    break;
                }
            }
            match digits.parse::<u8>() {
                Ok(n) if matches!(n, 8 | 16 | 32 | 64) => return Some(n),
                _ => self.pos = save,
            }
        }
        None
    }

    fn lex_unit_suffix(&mut self) -> Option<String> {
        if self.peek() == Some('<') {
            self.advance();
            let mut unit = String::new();
            while let Some(c) = self.peek() {
                if c == '>' {
                    self.advance();
                    return Some(unit);
                }
                unit.push(self.advance().unwrap());
            }
        }
        None
    }

    fn lex_ident_or_keyword(&mut self, start: usize, interner: &mut Interner) -> Result<Token, LexError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(self.advance().unwrap());
            } else {
                break;
            }
        }
        let span = Span::new(start, self.pos);
        let kind = match text.as_str() {
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            "nil" => TokenKind::Nil,
            "fail" => TokenKind::Fail,
            "skip" => TokenKind::Skip,
            "stop" => TokenKind::Stop,
            "return" => TokenKind::Return,
            "use" => TokenKind::Use,
            "extern" => TokenKind::Extern,
            "struct" => TokenKind::Struct,
            "enum" => TokenKind::Enum,
            "if" => TokenKind::If,
            "then" => TokenKind::Then,
            "else" => TokenKind::Else,
            "when" => TokenKind::When,
            "is" => TokenKind::Is,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "between" => TokenKind::Between,
            "empty" => TokenKind::Empty,
            "first" => TokenKind::First,
            "while" => TokenKind::While,
            "repeat" => TokenKind::Repeat,
            "do" => TokenKind::Do,
            "func" => TokenKind::Func,
            "lambda" => TokenKind::Lambda,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "xor" => TokenKind::Xor,
            "not" => TokenKind::Not,
            _ => TokenKind::Ident(interner.intern(&text)),
        };
        Ok(Token::new(kind, span))
    }

    fn lex_punct(&mut self, ch: char, start: usize) -> Result<Token, LexError> {
        self.advance();
        let kind = match ch {
            '(' => { self.paren_depth += 1; TokenKind::LParen }
            ')' => { self.paren_depth -= 1; TokenKind::RParen }
            '[' => { self.paren_depth += 1; TokenKind::LBracket }
            ']' => { self.paren_depth -= 1; TokenKind::RBracket }
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ':' => {
                if self.bump_if('=') { TokenKind::Walrus } else { TokenKind::Colon }
            }
            '.' => {
                if self.bump_if('.') { TokenKind::DotDot } else { TokenKind::Dot }
            }
            '#' => TokenKind::Len,
            '?' => TokenKind::Maybe,
            '@' => TokenKind::At,
            '&' => TokenKind::Amp,
            '^' => TokenKind::Caret,
            '|' => TokenKind::Pipe,
            '!' => { if self.bump_if('=') { TokenKind::Ne } else { TokenKind::Bang } }
            '<' => { if self.bump_if('=') { TokenKind::Lte } else { TokenKind::Lt } }
            '>' => { if self.bump_if('=') { TokenKind::Gte } else { TokenKind::Gt } }
            '=' => {
                if self.bump_if('=') { TokenKind::EqEq }
                else if self.bump_if('>') { TokenKind::FatArrow }
                else { TokenKind::Assign }
            }
            '+' => { if self.bump_if('=') { TokenKind::PlusEq } else { TokenKind::Plus } }
            '-' => {
                if self.bump_if('=') { TokenKind::MinusEq }
                else if self.bump_if('>') { TokenKind::Arrow }
                else { TokenKind::Minus }
            }
            '*' => {
                if self.bump_if('*') { TokenKind::StarStar }
                else if self.bump_if('=') { TokenKind::StarEq }
                else { TokenKind::Star }
            }
            '/' => { if self.bump_if('=') { TokenKind::SlashEq } else { TokenKind::Slash } }
            '%' => TokenKind::Percent,
            other => return Err(LexError::UnexpectedChar { ch: other, span: Span::new(start, self.pos) }),
        };
        Ok(Token::new(kind, Span::new(start, self.pos)))
    }

    /// Scans a delimited string literal, splitting it into `StringPiece`
    /// text segments and `$name` / `$(expr)` interpolations. Escapes
    /// (`\n`, `\t`, `\x{HH}`, `\{NNN}`, `\"`, …) are resolved into the
    /// piece text; interpolated expressions are re-lexed recursively with
    /// a fresh [`Lexer`] over the bracketed substring.
    fn lex_string(&mut self, quote: char, start: usize, interner: &mut Interner) -> Result<Token, LexError> {
        self.advance(); // opening quote
        let mut out = Vec::new();
        let mut piece = String::new();
        out.push(Token::new(TokenKind::StringStart { indented: false }, Span::new(start, self.pos)));
        loop {
            match self.peek() {
                None => return Err(LexError::UnterminatedString { span: Span::new(start, self.pos) }),
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    piece.push(self.lex_escape()?);
                }
                Some('$') => {
                    if !piece.is_empty() {
                        out.push(Token::new(TokenKind::StringPiece(std::mem::take(&mut piece)), Span::new(start, self.pos)));
                    }
                    self.advance();
                    out.push(Token::new(TokenKind::InterpStart, Span::new(self.pos, self.pos)));
                    if self.peek() == Some('(') {
                        self.advance();
                        let inner_start = self.pos;
                        let mut depth = 1;
                        while depth > 0 {
                            match self.advance() {
                                Some('(') => depth += 1,
                                Some(')') => depth -= 1,
                                Some(_) => {}
                                None => return Err(LexError::UnterminatedString { span: Span::new(start, self.pos) }),
                            }
                        }
                        let inner = &self.source[inner_start..self.pos - 1];
                        let mut sub = Lexer::new(inner);
                        loop {
                            let tok = sub.next_token(interner)?;
                            if matches!(tok.kind, TokenKind::Eof) {
                                break;
                            }
                            let offset = inner_start;
                            out.push(Token::new(tok.kind, Span::new(tok.span.start + offset, tok.span.end + offset)));
                        }
                    } else {
                        let ident_start = self.pos;
                        while let Some(c) = self.peek() {
                            if c.is_alphanumeric() || c == '_' || c == '.' {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                        let name = &self.source[ident_start..self.pos];
                        out.push(Token::new(TokenKind::Ident(interner.intern(name)), Span::new(ident_start, self.pos)));
                    }
                    out.push(Token::new(TokenKind::InterpEnd, Span::new(self.pos, self.pos)));
                }
                Some(c) => {
                    piece.push(c);
                    self.advance();
                }
            }
        }
        if !piece.is_empty() {
            out.push(Token::new(TokenKind::StringPiece(piece), Span::new(start, self.pos)));
        }
        out.push(Token::new(TokenKind::StringEnd, Span::new(self.pos, self.pos)));
        self.pending_tokens.extend(out);
        Ok(self.pending_tokens.pop_front().expect("string always yields StringStart"))
    }

    fn lex_escape(&mut self) -> Result<char, LexError> {
        let c = self.advance().ok_or(LexError::UnterminatedString { span: Span::new(self.pos, self.pos) })?;
        Ok(match c {
            'a' => '\x07',
            'b' => '\x08',
            'e' => '\x1b',
            'f' => '\x0c',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\x0b',
            '"' => '"',
            '\'' => '\'',
            '\\' => '\\',
            '$' => '$',
            'x' => {
                self.bump_if('{');
                let mut hex = String::new();
                while self.peek().map(|c| c != '}').unwrap_or(false) {
                    hex.push(self.advance().unwrap());
                }
                self.bump_if('}');
                u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32).unwrap_or('\u{FFFD}')
            }
            other => other,
        })
    }
}

#[derive(Debug, Clone)]
pub enum LexError {
    UnexpectedChar { ch: char, span: Span },
    UnterminatedString { span: Span },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut interner = Interner::new();
        Lexer::tokenize(src, &mut interner).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_int_with_suffix_and_unit() {
        let ks = kinds("3i16<s>");
        assert_eq!(
            ks[0],
            TokenKind::Int { text: "3".into(), precision: Some(16), unit: Some("s".into()) }
        );
    }

    #[test]
    fn lexes_walrus_and_arrow() {
        let ks = kinds("x := 1\nf := () -> 2");
        assert!(ks.contains(&TokenKind::Walrus));
        assert!(ks.contains(&TokenKind::Arrow));
    }

    #[test]
    fn indentation_emits_indent_and_dedent() {
        let ks = kinds("if x:\n    y\nz\n");
        assert!(ks.contains(&TokenKind::Indent));
        assert!(ks.contains(&TokenKind::Dedent));
    }

    #[test]
    fn string_with_interpolation_splits_pieces() {
        let ks = kinds("\"a$(1+2)b\"");
        assert!(ks.iter().any(|k| matches!(k, TokenKind::StringPiece(s) if s == "a")));
        assert!(ks.contains(&TokenKind::InterpStart));
        assert!(ks.contains(&TokenKind::Plus));
        assert!(ks.iter().any(|k| matches!(k, TokenKind::StringPiece(s) if s == "b")));
    }

    #[test]
    fn line_comment_is_skipped() {
        let ks = kinds("1 // comment\n2");
        assert_eq!(
            ks.iter().filter(|k| matches!(k, TokenKind::Int { .. })).count(),
            2
        );
    }
}
