//! Hand-written recursive-descent parser with precedence climbing for
//! binary operators. Mirrors the term-dispatch-by-leading-token shape of
//! a classic single-pass parser: [`Parser::parse_primary`] switches on
//! the current token kind, postfix and infix operators are folded on
//! top by [`Parser::parse_postfix`] / the precedence ladder below it.

use crate::ast::{
    BinaryOp, Block, EnumDef, Expr, ExprKind, ForLoop, FunctionArg, IfArm, KeywordArg, NodeIdGen,
    StructDef, StructField, TableEntry, UnaryOp, WhenCase,
};
use crate::ast::ty::{TypeAst, TypeAstKind};
use crate::error::Diagnostic;
use crate::intern::{Interner, Symbol};
use crate::span::Span;
use crate::token::{Token, TokenKind};

pub type ParseResult<T> = Result<T, Diagnostic>;

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    interner: &'a mut Interner,
    ids: NodeIdGen,
}

/// Parses a full program: a flat sequence of top-level statements
/// terminated by end-of-file (no leading `Indent` expected).
pub fn parse_program(tokens: &[Token], interner: &mut Interner) -> ParseResult<Block> {
    let mut parser = Parser { tokens, pos: 0, interner, ids: NodeIdGen::default() };
    let start = parser.current_span();
    let mut statements = Vec::new();
    parser.skip_newlines();
    while !parser.at(TokenKind::Eof) {
        statements.push(parser.parse_statement()?);
        parser.skip_newlines();
    }
    let end = parser.current_span();
    Ok(Block { statements, span: start.merge(end) })
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or_else(|| self.tokens.last().expect("non-empty token stream"))
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn current_span(&self) -> Span {
        self.peek().span
    }

    fn at(&self, kind: TokenKind) -> bool {
        *self.peek_kind() == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn bump_if(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token> {
        if self.at(kind.clone()) {
            Ok(self.advance())
        } else {
            Err(Diagnostic::error(format!("expected {}, found {:?}", what, self.peek_kind()), self.current_span()))
        }
    }

    fn expect_ident(&mut self) -> ParseResult<Symbol> {
        match self.peek_kind().clone() {
            TokenKind::Ident(sym) => {
                self.advance();
                Ok(sym)
            }
            other => Err(Diagnostic::error(format!("expected identifier, found {:?}", other), self.current_span())),
        }
    }

    fn skip_newlines(&mut self) {
        while self.bump_if(TokenKind::Newline) {}
    }

    fn next_id(&mut self) -> crate::ast::NodeId {
        self.ids.next()
    }

    // ---- blocks & statements ----

    fn parse_block(&mut self) -> ParseResult<Block> {
        let start = self.current_span();
        self.expect(TokenKind::Indent, "an indented block")?;
        let mut statements = Vec::new();
        self.skip_newlines();
        while !self.at(TokenKind::Dedent) && !self.at(TokenKind::Eof) {
            statements.push(self.parse_statement()?);
            self.skip_newlines();
        }
        let end = self.current_span();
        self.expect(TokenKind::Dedent, "end of block")?;
        Ok(Block { statements, span: start.merge(end) })
    }

    fn parse_statement(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        match self.peek_kind().clone() {
            TokenKind::Fail => {
                self.advance();
                let value = self.parse_optional_trailing_expr()?;
                Ok(Expr::new(self.next_id(), start, ExprKind::Fail(value.map(Box::new))))
            }
            TokenKind::Skip => {
                self.advance();
                let label = self.parse_optional_label()?;
                Ok(Expr::new(self.next_id(), start, ExprKind::Skip(label)))
            }
            TokenKind::Stop => {
                self.advance();
                let label = self.parse_optional_label()?;
                Ok(Expr::new(self.next_id(), start, ExprKind::Stop(label)))
            }
            TokenKind::Return => {
                self.advance();
                let value = self.parse_optional_trailing_expr()?;
                Ok(Expr::new(self.next_id(), start, ExprKind::Return(value.map(Box::new))))
            }
            TokenKind::Use => {
                self.advance();
                let path = self.parse_use_path()?;
                Ok(Expr::new(self.next_id(), start, ExprKind::Use(path)))
            }
            TokenKind::Extern => self.parse_extern(start),
            TokenKind::Struct => self.parse_struct_def(start),
            TokenKind::Enum => self.parse_enum_def(start),
            TokenKind::Func => self.parse_function_def(start),
            TokenKind::If => self.parse_if(start),
            TokenKind::When => self.parse_when(start),
            TokenKind::For => self.parse_for(start),
            TokenKind::While => self.parse_while(start, None),
            TokenKind::Repeat => self.parse_repeat(start, None),
            TokenKind::Do => self.parse_do(start),
            TokenKind::Ident(name) if self.peek_is_label_prefix() => {
                self.advance();
                self.expect(TokenKind::Colon, "`:` after a loop label")?;
                match self.peek_kind().clone() {
                    TokenKind::While => self.parse_while(start, Some(name)),
                    TokenKind::Repeat => self.parse_repeat(start, Some(name)),
                    _ => Err(Diagnostic::error("a label must be followed by `while` or `repeat`", self.current_span())),
                }
            }
            _ => self.parse_expr_statement(start),
        }
    }

    /// A label prefix looks like `IDENT COLON (WHILE|REPEAT)`; distinguished
    /// from a struct literal (`IDENT LBRACE`) by lookahead.
    fn peek_is_label_prefix(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Ident(_))
            && matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Colon))
            && matches!(
                self.tokens.get(self.pos + 2).map(|t| &t.kind),
                Some(TokenKind::While) | Some(TokenKind::Repeat)
            )
    }

    fn parse_optional_label(&mut self) -> ParseResult<Option<Symbol>> {
        if let TokenKind::Ident(sym) = self.peek_kind().clone() {
            self.advance();
            Ok(Some(sym))
        } else {
            Ok(None)
        }
    }

    fn parse_optional_trailing_expr(&mut self) -> ParseResult<Option<Expr>> {
        if self.at(TokenKind::Newline) || self.at(TokenKind::Dedent) || self.at(TokenKind::Eof) {
            Ok(None)
        } else {
            Ok(Some(self.parse_expr()?))
        }
    }

    fn parse_use_path(&mut self) -> ParseResult<String> {
        let mut segments = vec![self.expect_ident()?];
        while self.bump_if(TokenKind::Dot) {
            segments.push(self.expect_ident()?);
        }
        Ok(segments.iter().map(|s| self.interner.resolve(*s)).collect::<Vec<_>>().join("."))
    }

    fn parse_extern(&mut self, start: Span) -> ParseResult<Expr> {
        self.advance();
        let name = self.expect_ident()?;
        self.expect(TokenKind::Colon, "`:` before an extern's type")?;
        let type_ann = self.parse_type()?;
        Ok(Expr::new(self.next_id(), start, ExprKind::Extern { name, type_ann }))
    }

    fn parse_struct_def(&mut self, start: Span) -> ParseResult<Expr> {
        self.advance();
        let name = self.expect_ident()?;
        let mut field_names = Vec::new();
        let mut field_types = Vec::new();
        self.expect(TokenKind::Indent, "a struct body")?;
        self.skip_newlines();
        while !self.at(TokenKind::Dedent) {
            field_names.push(self.expect_ident()?);
            self.expect(TokenKind::Colon, "`:` before a field's type")?;
            field_types.push(self.parse_type()?);
            self.skip_newlines();
        }
        self.expect(TokenKind::Dedent, "end of struct body")?;
        Ok(Expr::new(self.next_id(), start, ExprKind::StructDef(StructDef { name, field_names, field_types })))
    }

    fn parse_enum_def(&mut self, start: Span) -> ParseResult<Expr> {
        self.advance();
        let name = self.expect_ident()?;
        let mut variants = Vec::new();
        self.expect(TokenKind::Indent, "an enum body")?;
        self.skip_newlines();
        while !self.at(TokenKind::Dedent) {
            let variant_name = self.expect_ident()?;
            let mut names = Vec::new();
            let mut types = Vec::new();
            if self.bump_if(TokenKind::LBrace) {
                while !self.at(TokenKind::RBrace) {
                    names.push(self.expect_ident()?);
                    self.expect(TokenKind::Colon, "`:` before a payload field's type")?;
                    types.push(self.parse_type()?);
                    if !self.bump_if(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBrace, "`}` after enum payload fields")?;
            }
            variants.push((variant_name, names, types));
            self.skip_newlines();
        }
        self.expect(TokenKind::Dedent, "end of enum body")?;
        Ok(Expr::new(self.next_id(), start, ExprKind::EnumDef(EnumDef { name, variants })))
    }

    fn parse_function_def(&mut self, start: Span) -> ParseResult<Expr> {
        self.advance();
        let name = self.expect_ident()?;
        let args = self.parse_function_args()?;
        let ret = if self.bump_if(TokenKind::Arrow) { Some(self.parse_type()?) } else { None };
        let body = self.parse_block()?;
        Ok(Expr::new(self.next_id(), start, ExprKind::FunctionDef { name, args, ret, body }))
    }

    fn parse_function_args(&mut self) -> ParseResult<Vec<FunctionArg>> {
        self.expect(TokenKind::LParen, "`(` to start a parameter list")?;
        let mut args = Vec::new();
        while !self.at(TokenKind::RParen) {
            let name = self.expect_ident()?;
            let type_ann = if self.bump_if(TokenKind::Colon) { Some(self.parse_type()?) } else { None };
            let default = if self.bump_if(TokenKind::Assign) { Some(self.parse_expr()?) } else { None };
            args.push(FunctionArg { name, type_ann, default });
            if !self.bump_if(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "`)` to close a parameter list")?;
        Ok(args)
    }

    fn parse_if(&mut self, start: Span) -> ParseResult<Expr> {
        self.advance();
        let mut arms = Vec::new();
        loop {
            let condition = self.parse_expr()?;
            self.bump_if(TokenKind::Then);
            let body = self.parse_block()?;
            arms.push(IfArm { condition, body });
            self.skip_newlines();
            if self.bump_if(TokenKind::Else) {
                if self.at(TokenKind::If) {
                    self.advance();
                    continue;
                }
                let else_block = self.parse_block()?;
                return Ok(Expr::new(self.next_id(), start, ExprKind::If { arms, else_block: Some(else_block) }));
            }
            break;
        }
        Ok(Expr::new(self.next_id(), start, ExprKind::If { arms, else_block: None }))
    }

    fn parse_when(&mut self, start: Span) -> ParseResult<Expr> {
        self.advance();
        let subject = Box::new(self.parse_expr()?);
        self.expect(TokenKind::Indent, "a `when` body")?;
        self.skip_newlines();
        let mut cases = Vec::new();
        let mut default = None;
        while !self.at(TokenKind::Dedent) {
            if self.bump_if(TokenKind::Else) {
                default = Some(self.parse_block()?);
            } else {
                self.expect(TokenKind::Is, "`is` to start a `when` case")?;
                let pattern = self.parse_expr()?;
                let body = self.parse_block()?;
                cases.push(WhenCase { pattern, body });
            }
            self.skip_newlines();
        }
        self.expect(TokenKind::Dedent, "end of `when` body")?;
        Ok(Expr::new(self.next_id(), start, ExprKind::When { subject, cases, default }))
    }

    fn parse_for(&mut self, start: Span) -> ParseResult<Expr> {
        self.advance();
        let first_name = self.expect_ident()?;
        let (key, value) = if self.bump_if(TokenKind::Comma) {
            (Some(first_name), Some(self.expect_ident()?))
        } else {
            (None, Some(first_name))
        };
        self.expect(TokenKind::In, "`in` after a `for` loop's variables")?;
        let iter = Box::new(self.parse_expr()?);
        let body = Some(self.parse_block()?);
        self.skip_newlines();
        let first = if self.bump_if(TokenKind::First) { Some(self.parse_block()?) } else { None };
        self.skip_newlines();
        let between = if self.bump_if(TokenKind::Between) { Some(self.parse_block()?) } else { None };
        self.skip_newlines();
        let empty = if self.bump_if(TokenKind::Empty) { Some(self.parse_block()?) } else { None };
        Ok(Expr::new(
            self.next_id(),
            start,
            ExprKind::For(ForLoop { iter, key, value, first, body, between, empty, label: None }),
        ))
    }

    fn parse_while(&mut self, start: Span, label: Option<Symbol>) -> ParseResult<Expr> {
        self.advance();
        let cond = Box::new(self.parse_expr()?);
        let body = self.parse_block()?;
        self.skip_newlines();
        let between = if self.bump_if(TokenKind::Between) { Some(self.parse_block()?) } else { None };
        Ok(Expr::new(self.next_id(), start, ExprKind::While { cond, body, between, label }))
    }

    fn parse_repeat(&mut self, start: Span, label: Option<Symbol>) -> ParseResult<Expr> {
        self.advance();
        let body = self.parse_block()?;
        self.skip_newlines();
        let between = if self.bump_if(TokenKind::Between) { Some(self.parse_block()?) } else { None };
        Ok(Expr::new(self.next_id(), start, ExprKind::Repeat { body, between, label }))
    }

    fn parse_do(&mut self, start: Span) -> ParseResult<Expr> {
        self.advance();
        let mut blocks = vec![self.parse_block()?];
        self.skip_newlines();
        while self.bump_if(TokenKind::Do) {
            blocks.push(self.parse_block()?);
            self.skip_newlines();
        }
        Ok(Expr::new(self.next_id(), start, ExprKind::Do(blocks)))
    }

    fn parse_expr_statement(&mut self, start: Span) -> ParseResult<Expr> {
        let mut lhs = vec![self.parse_expr()?];
        while self.bump_if(TokenKind::Comma) {
            lhs.push(self.parse_expr()?);
        }
        if self.bump_if(TokenKind::Walrus) {
            if lhs.len() != 1 {
                return Err(Diagnostic::error("`:=` declares a single variable at a time", start));
            }
            let var = match lhs.into_iter().next().unwrap().kind {
                ExprKind::Var(sym) => sym,
                _ => return Err(Diagnostic::error("left of `:=` must be a plain variable name", start)),
            };
            let value = Box::new(self.parse_expr()?);
            return Ok(Expr::new(self.next_id(), start, ExprKind::Declare { var, value, is_global: false }));
        }
        if self.bump_if(TokenKind::Assign) {
            let mut rhs = vec![self.parse_expr()?];
            while self.bump_if(TokenKind::Comma) {
                rhs.push(self.parse_expr()?);
            }
            return Ok(Expr::new(self.next_id(), start, ExprKind::Assign { lhs, rhs }));
        }
        for (op_tok, op) in [
            (TokenKind::PlusEq, BinaryOp::Add),
            (TokenKind::MinusEq, BinaryOp::Sub),
            (TokenKind::StarEq, BinaryOp::Mul),
            (TokenKind::SlashEq, BinaryOp::Div),
        ] {
            if self.at(op_tok) {
                self.advance();
                if lhs.len() != 1 {
                    return Err(Diagnostic::error("compound assignment takes a single target", start));
                }
                let lhs = Box::new(lhs.into_iter().next().unwrap());
                let rhs = Box::new(self.parse_expr()?);
                return Ok(Expr::new(self.next_id(), start, ExprKind::CompoundAssign { op, lhs, rhs }));
            }
        }
        if lhs.len() != 1 {
            return Err(Diagnostic::error("a comma-separated list is only valid before `=` or `:=`", start));
        }
        Ok(lhs.into_iter().next().unwrap())
    }

    // ---- expressions: precedence climbing ----

    pub fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_and()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Or => BinaryOp::Or,
                TokenKind::Xor => BinaryOp::Xor,
                _ => break,
            };
            let start = lhs.span;
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::new(self.next_id(), start.merge(rhs.span), ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_not()?;
        while self.at(TokenKind::And) {
            let start = lhs.span;
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::new(self.next_id(), start.merge(rhs.span), ExprKind::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.at(TokenKind::Not) {
            let start = self.current_span();
            self.advance();
            let operand = Box::new(self.parse_not()?);
            return Ok(Expr::new(self.next_id(), start, ExprKind::Unary { op: UnaryOp::Not, operand }));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_range()?;
        let op = match self.peek_kind() {
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::Ne => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Lte => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Gte => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        let start = lhs.span;
        self.advance();
        let rhs = self.parse_range()?;
        Ok(Expr::new(self.next_id(), start.merge(rhs.span), ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }))
    }

    fn parse_range(&mut self) -> ParseResult<Expr> {
        let first = self.parse_add()?;
        if !self.at(TokenKind::DotDot) {
            return Ok(first);
        }
        let start = first.span;
        self.advance();
        let second = self.parse_add()?;
        let (step, last) = if self.bump_if(TokenKind::DotDot) {
            (Some(Box::new(second)), Some(Box::new(self.parse_add()?)))
        } else {
            (None, Some(Box::new(second)))
        };
        Ok(Expr::new(self.next_id(), start, ExprKind::Range { first: Some(Box::new(first)), step, last }))
    }

    fn parse_add(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let start = lhs.span;
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::new(self.next_id(), start.merge(rhs.span), ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_pow()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let start = lhs.span;
            self.advance();
            let rhs = self.parse_pow()?;
            lhs = Expr::new(self.next_id(), start.merge(rhs.span), ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }
        Ok(lhs)
    }

    fn parse_pow(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_unary()?;
        if !self.at(TokenKind::StarStar) {
            return Ok(lhs);
        }
        let start = lhs.span;
        self.advance();
        let rhs = self.parse_pow()?; // right-associative
        Ok(Expr::new(self.next_id(), start.merge(rhs.span), ExprKind::Binary { op: BinaryOp::Power, lhs: Box::new(lhs), rhs: Box::new(rhs) }))
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        match self.peek_kind() {
            TokenKind::Minus => {
                self.advance();
                let operand = Box::new(self.parse_unary()?);
                Ok(Expr::new(self.next_id(), start, ExprKind::Unary { op: UnaryOp::Negative, operand }))
            }
            TokenKind::Len => {
                self.advance();
                let operand = Box::new(self.parse_unary()?);
                Ok(Expr::new(self.next_id(), start, ExprKind::Unary { op: UnaryOp::Len, operand }))
            }
            TokenKind::Maybe => {
                self.advance();
                let operand = Box::new(self.parse_unary()?);
                Ok(Expr::new(self.next_id(), start, ExprKind::Unary { op: UnaryOp::Maybe, operand }))
            }
            TokenKind::At => {
                self.advance();
                let operand = Box::new(self.parse_unary()?);
                Ok(Expr::new(self.next_id(), start, ExprKind::HeapAllocate(operand)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind().clone() {
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect_ident()?;
                    let span = expr.span.merge(self.current_span());
                    expr = Expr::new(self.next_id(), span, ExprKind::FieldAccess { receiver: Box::new(expr), field });
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = Box::new(self.parse_expr()?);
                    let end = self.expect(TokenKind::RBracket, "`]` to close an index expression")?.span;
                    expr = Expr::new(self.next_id(), expr.span.merge(end), ExprKind::Index { receiver: Box::new(expr), index });
                }
                TokenKind::LParen => {
                    self.advance();
                    let args = self.parse_call_args()?;
                    let end = self.expect(TokenKind::RParen, "`)` to close a call")?.span;
                    expr = Expr::new(self.next_id(), expr.span.merge(end), ExprKind::Call { callee: Box::new(expr), args });
                }
                TokenKind::Caret => {
                    self.advance();
                    let span = expr.span;
                    expr = Expr::new(self.next_id(), span, ExprKind::Dereference(Box::new(expr)));
                }
                TokenKind::Colon if self.colon_starts_cast() => {
                    self.advance();
                    let type_ann = self.parse_type()?;
                    let span = expr.span;
                    expr = Expr::new(self.next_id(), span, ExprKind::Cast { value: Box::new(expr), type_ann });
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// `expr:Type` casts; only fires outside contexts where `:` already
    /// has a grammatical role (statement and argument lists handle those
    /// themselves before ever calling into postfix parsing of the callee).
    fn colon_starts_cast(&self) -> bool {
        matches!(
            self.tokens.get(self.pos + 1).map(|t| &t.kind),
            Some(TokenKind::Ident(_))
        )
    }

    fn parse_call_args(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.at(TokenKind::RParen) {
            if let TokenKind::Ident(name) = self.peek_kind().clone() {
                if matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Assign)) {
                    self.advance();
                    self.advance();
                    let arg = Box::new(self.parse_expr()?);
                    args.push(Expr::new(self.next_id(), self.current_span(), ExprKind::KeywordArg(KeywordArg { name, arg })));
                    if !self.bump_if(TokenKind::Comma) {
                        break;
                    }
                    continue;
                }
            }
            args.push(self.parse_expr()?);
            if !self.bump_if(TokenKind::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        match self.peek_kind().clone() {
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::new(self.next_id(), start, ExprKind::Nil(None)))
            }
            TokenKind::Bool(b) => {
                self.advance();
                Ok(Expr::new(self.next_id(), start, ExprKind::Bool(b)))
            }
            TokenKind::Char(c) => {
                self.advance();
                Ok(Expr::new(self.next_id(), start, ExprKind::Char(c)))
            }
            TokenKind::Int { text, precision, unit } => {
                self.advance();
                let value: i64 = text.replace('_', "").parse().map_err(|_| {
                    Diagnostic::error(format!("invalid integer literal `{}`", text), start)
                })?;
                Ok(Expr::new(self.next_id(), start, ExprKind::Int { value, precision: precision.unwrap_or(64), units: unit }))
            }
            TokenKind::Num { text, precision, unit } => {
                self.advance();
                let value: f64 = text.replace('_', "").parse().map_err(|_| {
                    Diagnostic::error(format!("invalid numeric literal `{}`", text), start)
                })?;
                Ok(Expr::new(self.next_id(), start, ExprKind::Num { value, precision, units: unit }))
            }
            TokenKind::Ident(sym) => {
                self.advance();
                if self.at(TokenKind::LBrace) {
                    return self.parse_struct_literal(start, Some(sym));
                }
                Ok(Expr::new(self.next_id(), start, ExprKind::Var(sym)))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "`)` to close a parenthesized expression")?;
                Ok(inner)
            }
            TokenKind::LBracket => self.parse_array_literal(start),
            TokenKind::LBrace => self.parse_struct_literal(start, None),
            TokenKind::Func => self.parse_lambda(start),
            TokenKind::StringStart { .. } => self.parse_string(start),
            other => Err(Diagnostic::error(format!("expected an expression, found {:?}", other), start)),
        }
    }

    fn parse_array_literal(&mut self, start: Span) -> ParseResult<Expr> {
        self.advance();
        // `{` after `[` marks a table literal: `[{k:v, ...}]`.
        if self.at(TokenKind::LBrace) {
            let table = self.parse_table_body()?;
            self.expect(TokenKind::RBracket, "`]` to close a table literal")?;
            return Ok(table);
        }
        let mut items = Vec::new();
        while !self.at(TokenKind::RBracket) {
            items.push(self.parse_expr()?);
            if !self.bump_if(TokenKind::Comma) {
                break;
            }
        }
        let item_type = if self.bump_if(TokenKind::Colon) { Some(self.parse_type()?) } else { None };
        self.expect(TokenKind::RBracket, "`]` to close an array literal")?;
        Ok(Expr::new(self.next_id(), start, ExprKind::Array { items, item_type }))
    }

    fn parse_table_body(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        self.advance(); // `{`
        let mut entries = Vec::new();
        let fallback = None;
        let mut default = None;
        while !self.at(TokenKind::RBrace) {
            if self.bump_if(TokenKind::Colon) {
                default = Some(Box::new(self.parse_expr()?));
            } else {
                let key = self.parse_expr()?;
                self.expect(TokenKind::Colon, "`:` between a table key and its value")?;
                let value = self.parse_expr()?;
                entries.push(TableEntry { key, value });
            }
            if !self.bump_if(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "`}` to close a table literal")?;
        Ok(Expr::new(self.next_id(), start, ExprKind::Table { entries, fallback, default }))
    }

    fn parse_struct_literal(&mut self, start: Span, type_name: Option<Symbol>) -> ParseResult<Expr> {
        self.advance(); // `{`
        let mut members = Vec::new();
        while !self.at(TokenKind::RBrace) {
            let name = self.expect_ident()?;
            self.expect(TokenKind::Colon, "`:` between a field name and its value")?;
            let value = self.parse_expr()?;
            members.push(StructField { name, value });
            if !self.bump_if(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "`}` to close a struct literal")?;
        Ok(Expr::new(self.next_id(), start, ExprKind::Struct { type_name, members }))
    }

    fn parse_lambda(&mut self, start: Span) -> ParseResult<Expr> {
        self.advance();
        let args = self.parse_function_args()?;
        let body = self.parse_block()?;
        Ok(Expr::new(self.next_id(), start, ExprKind::Lambda { args, body }))
    }

    fn parse_string(&mut self, start: Span) -> ParseResult<Expr> {
        let indented = matches!(self.peek_kind(), TokenKind::StringStart { indented: true });
        self.advance();
        let mut pieces = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::StringPiece(text) => {
                    self.advance();
                    pieces.push(Expr::new(self.next_id(), self.current_span(), ExprKind::StringLiteral(text)));
                }
                TokenKind::InterpStart => {
                    self.advance();
                    let inner = self.parse_expr()?;
                    self.expect(TokenKind::InterpEnd, "`)` to close a string interpolation")?;
                    let span = inner.span;
                    pieces.push(Expr::new(self.next_id(), span, ExprKind::Interp(Box::new(inner))));
                }
                TokenKind::StringEnd => {
                    self.advance();
                    break;
                }
                other => return Err(Diagnostic::error(format!("unterminated string (found {:?})", other), start)),
            }
        }
        let _ = indented;
        if pieces.len() == 1 {
            if let ExprKind::StringLiteral(_) = &pieces[0].kind {
                return Ok(Expr::new(self.next_id(), start, pieces.into_iter().next().unwrap().kind));
            }
        }
        Ok(Expr::new(self.next_id(), start, ExprKind::StringJoin(pieces)))
    }

    // ---- types ----

    pub fn parse_type(&mut self) -> ParseResult<TypeAst> {
        let start = self.current_span();
        let mut base = match self.peek_kind().clone() {
            TokenKind::Ident(sym) => {
                self.advance();
                TypeAst::new(start, TypeAstKind::Named(sym))
            }
            TokenKind::LBracket => {
                self.advance();
                let item = self.parse_type()?;
                if self.bump_if(TokenKind::Colon) {
                    let value = self.parse_type()?;
                    self.expect(TokenKind::RBracket, "`]` to close a table type")?;
                    TypeAst::new(start, TypeAstKind::Table { key: Box::new(item), value: Box::new(value) })
                } else {
                    self.expect(TokenKind::RBracket, "`]` to close an array type")?;
                    TypeAst::new(start, TypeAstKind::Array(Box::new(item)))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let mut items = Vec::new();
                while !self.at(TokenKind::RParen) {
                    items.push(self.parse_type()?);
                    if !self.bump_if(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen, "`)` to close a tuple type")?;
                TypeAst::new(start, TypeAstKind::Tuple(items))
            }
            TokenKind::At => {
                self.advance();
                let pointed = Box::new(self.parse_type()?);
                TypeAst::new(start, TypeAstKind::Pointer { pointed, optional: false })
            }
            TokenKind::Question => {
                self.advance();
                let pointed = Box::new(self.parse_type()?);
                TypeAst::new(start, TypeAstKind::Pointer { pointed, optional: true })
            }
            TokenKind::Func => {
                self.advance();
                self.expect(TokenKind::LParen, "`(` in a function type")?;
                let mut args = Vec::new();
                while !self.at(TokenKind::RParen) {
                    args.push(self.parse_type()?);
                    if !self.bump_if(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen, "`)` to close a function type's parameters")?;
                self.expect(TokenKind::Arrow, "`->` in a function type")?;
                let ret = Box::new(self.parse_type()?);
                TypeAst::new(start, TypeAstKind::Function { args, ret })
            }
            other => return Err(Diagnostic::error(format!("expected a type, found {:?}", other), start)),
        };
        if self.at(TokenKind::Lt) {
            if let TypeAstKind::Named(name) = &base.kind {
                let label = self.interner.resolve(*name);
                if label == "Int8" || label == "Int16" || label == "Int32" || label == "Int64" || label == "Num32" || label == "Num64" {
                    self.advance();
                    let units = self.parse_unit_string()?;
                    self.expect(TokenKind::Gt, "`>` to close a unit annotation")?;
                    base = TypeAst::new(start, TypeAstKind::Measure { base: Box::new(base), units });
                }
            }
        }
        Ok(base)
    }

    fn parse_unit_string(&mut self) -> ParseResult<String> {
        let mut text = String::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::Ident(sym) => {
                    self.advance();
                    text.push_str(self.interner.resolve(sym));
                }
                TokenKind::Slash => {
                    self.advance();
                    text.push('/');
                }
                TokenKind::Star => {
                    self.advance();
                    text.push('*');
                }
                _ => break,
            }
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> (Block, Interner) {
        let mut interner = Interner::new();
        let tokens = Lexer::tokenize(source, &mut interner).expect("lex");
        let block = parse_program(&tokens, &mut interner).expect("parse");
        (block, interner)
    }

    #[test]
    fn parses_declaration_and_arithmetic() {
        let (block, _) = parse("x := 1 + 2 * 3\n");
        assert_eq!(block.statements.len(), 1);
        match &block.statements[0].kind {
            ExprKind::Declare { value, .. } => match &value.kind {
                ExprKind::Binary { op: BinaryOp::Add, .. } => {}
                other => panic!("expected addition at the top, got {:?}", other),
            },
            other => panic!("expected a declaration, got {:?}", other),
        }
    }

    #[test]
    fn power_is_right_associative() {
        let (block, _) = parse("x := 2 ** 3 ** 2\n");
        match &block.statements[0].kind {
            ExprKind::Declare { value, .. } => match &value.kind {
                ExprKind::Binary { op: BinaryOp::Power, rhs, .. } => {
                    assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Power, .. }));
                }
                other => panic!("expected power, got {:?}", other),
            },
            other => panic!("expected a declaration, got {:?}", other),
        }
    }

    #[test]
    fn parses_if_else_block() {
        let (block, _) = parse("if x > 0\n\ty := 1\nelse\n\ty := 2\n");
        assert!(matches!(block.statements[0].kind, ExprKind::If { .. }));
    }

    #[test]
    fn every_parsed_span_stays_inside_the_source() {
        let source = "x := 1 + 2 * 3\nif x > 0\n\tsay(\"big\")\nelse\n\tsay(\"small\")\n";
        let (block, _) = parse(source);
        for stmt in &block.statements {
            assert!(stmt.span.start <= stmt.span.end);
            assert!(stmt.span.end <= source.len());
        }
        match &block.statements[0].kind {
            ExprKind::Declare { value, .. } => {
                assert!(value.span.start <= value.span.end);
                assert!(value.span.start >= block.statements[0].span.start);
            }
            other => panic!("expected a declaration, got {:?}", other),
        }
    }

    #[test]
    fn parses_function_definition_with_return_type() {
        let (block, _) = parse("func add(a: Int64, b: Int64) -> Int64\n\treturn a + b\n");
        match &block.statements[0].kind {
            ExprKind::FunctionDef { args, ret, .. } => {
                assert_eq!(args.len(), 2);
                assert!(ret.is_some());
            }
            other => panic!("expected a function definition, got {:?}", other),
        }
    }
}
