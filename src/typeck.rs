//! Bidirectional typechecker. `infer_expr` synthesizes a type by
//! structural recursion; `check_expr` pushes an expected type down into
//! a node (used for literals against a declared type, function bodies
//! against a return type, and `nil` against whatever optional pointer
//! type it needs to become). Resolved types are recorded in a
//! [`TypeTable`] keyed by [`NodeId`] rather than written back into the
//! tree, so the AST stays immutable after parsing.

use crate::ast::ty::{TypeAst, TypeAstKind};
use crate::ast::{BinaryOp, Block, Expr, ExprKind, NodeId, UnaryOp};
use crate::env::{register_builtins, Binding, Environment};
use crate::error::Diagnostic;
use crate::intern::{Interner, Symbol};
use crate::types::{TableLayout, TypeData, TypeId, TypeInterner};
use crate::units::Unit;
use std::collections::HashMap;

pub type TypeTable = HashMap<NodeId, TypeId>;

pub struct TypeChecker<'a> {
    types: &'a mut TypeInterner,
    interner: &'a mut Interner,
    env: Environment<()>,
    table: TypeTable,
}

pub fn check_program(block: &Block, types: &mut TypeInterner, interner: &mut Interner) -> Result<TypeTable, Diagnostic> {
    let mut env = Environment::new();
    register_builtins(&mut env, types, interner);
    let mut checker = TypeChecker { types, interner, env, table: HashMap::new() };
    checker.check_block(block)?;
    Ok(checker.table)
}

impl<'a> TypeChecker<'a> {
    fn record(&mut self, id: NodeId, ty: TypeId) -> TypeId {
        self.table.insert(id, ty);
        ty
    }

    /// `Void`, `Abort`, or `Generator<Void|Abort>` — the types a statement
    /// may have without its value being discarded silently.
    fn is_discardable(&self, ty: TypeId) -> bool {
        if ty == self.types.void_ty || ty == self.types.abort_ty {
            return true;
        }
        match self.types.get(ty) {
            TypeData::Generator { generated } => *generated == self.types.void_ty || *generated == self.types.abort_ty,
            _ => false,
        }
    }

    fn check_block(&mut self, block: &Block) -> Result<TypeId, Diagnostic> {
        let mut last = self.types.void_ty;
        let len = block.statements.len();
        for (i, stmt) in block.statements.iter().enumerate() {
            last = self.infer_expr(stmt)?;
            let is_declaration = matches!(
                stmt.kind,
                ExprKind::FunctionDef { .. } | ExprKind::StructDef(_) | ExprKind::EnumDef(_) | ExprKind::Extern { .. } | ExprKind::Use(_)
            );
            if i + 1 < len && !is_declaration && !self.is_discardable(last) {
                return Err(Diagnostic::error(
                    format!("result of type {} is discarded; assign it or ignore it explicitly", self.types.pretty(last, self.interner)),
                    stmt.span,
                )
                .with_help("bind it with `_ := ...` or use its value"));
            }
        }
        Ok(last)
    }

    /// The join used for `if`/`when` result types: equal types join to
    /// themselves; `Generator<X>` joins with `X` to `Generator<X>`; `Abort`
    /// joins with anything to that thing; numeric types join to the wider
    /// one; an optional and non-optional pointer to the same pointee join
    /// to the optional. Anything else fails to join.
    fn type_or_type(&mut self, a: TypeId, b: TypeId) -> Option<TypeId> {
        if a == b {
            return Some(a);
        }
        if a == self.types.abort_ty {
            return Some(b);
        }
        if b == self.types.abort_ty {
            return Some(a);
        }
        if let TypeData::Generator { generated } = self.types.get(a).clone() {
            if generated == b {
                return Some(a);
            }
        }
        if let TypeData::Generator { generated } = self.types.get(b).clone() {
            if generated == a {
                return Some(b);
            }
        }
        if self.types.is_numeric(a) && self.types.is_numeric(b) {
            let ap = self.types.numeric_priority(a);
            let bp = self.types.numeric_priority(b);
            if let (Some(ap), Some(bp)) = (ap, bp) {
                return Some(if ap > bp { a } else { b });
            }
        }
        if let (TypeData::Pointer { pointed: ap, optional: ao, is_stack: a_stack }, TypeData::Pointer { pointed: bp, optional: bo, is_stack: _ }) =
            (self.types.get(a).clone(), self.types.get(b).clone())
        {
            if ap == bp && ao != bo {
                return Some(self.types.intern(TypeData::Pointer { pointed: ap, optional: true, is_stack: a_stack }));
            }
        }
        None
    }

    /// Folds `type_or_type` across a non-empty set of arm result types,
    /// wrapping in `Generator` when there's no catch-all arm (matching the
    /// spec's "If/When with no else/default produces Generator<T>" rule).
    fn join_arms(&mut self, arms: &[TypeId], has_catch_all: bool, span: crate::span::Span) -> Result<TypeId, Diagnostic> {
        let mut result = match arms.first() {
            Some(&first) => first,
            None => self.types.void_ty,
        };
        for &arm in &arms[1..] {
            result = self
                .type_or_type(result, arm)
                .ok_or_else(|| Diagnostic::error("arms produce incompatible types", span))?;
        }
        if has_catch_all {
            Ok(result)
        } else {
            Ok(self.types.intern(TypeData::Generator { generated: result }))
        }
    }

    pub fn infer_expr(&mut self, expr: &Expr) -> Result<TypeId, Diagnostic> {
        let ty = self.infer_expr_kind(expr)?;
        Ok(self.record(expr.id, ty))
    }

    fn infer_expr_kind(&mut self, expr: &Expr) -> Result<TypeId, Diagnostic> {
        match &expr.kind {
            ExprKind::Nil(type_ann) => match type_ann {
                Some(ast) => {
                    let pointed = self.resolve_type_ast(ast)?;
                    Ok(self.types.intern(TypeData::Pointer { pointed, optional: true, is_stack: false }))
                }
                None => Err(Diagnostic::error("cannot infer the type of `nil` without context", expr.span)
                    .with_help("annotate it, e.g. `nil:@Int64`")),
            },
            ExprKind::Bool(_) => Ok(self.types.bool_ty),
            ExprKind::Char(_) => Ok(self.types.char_ty),
            ExprKind::Int { units, .. } => {
                let unit = units.as_deref().map(|u| Unit::normalize(u, self.interner)).unwrap_or_else(Unit::dimensionless);
                Ok(self.types.intern(TypeData::Int { bits: 64, units: unit, unsigned: false }))
            }
            ExprKind::Num { units, .. } => {
                let unit = units.as_deref().map(|u| Unit::normalize(u, self.interner)).unwrap_or_else(Unit::dimensionless);
                Ok(self.types.intern(TypeData::Num { bits: 64, units: unit }))
            }
            ExprKind::StringLiteral(_) => self.string_type(),
            ExprKind::StringJoin(pieces) => {
                for piece in pieces {
                    self.infer_expr(piece)?;
                }
                self.string_type()
            }
            ExprKind::Interp(inner) => self.infer_expr(inner),
            ExprKind::Range { first, step, last } => {
                for part in [first, step, last].into_iter().flatten() {
                    self.infer_expr(part)?;
                }
                Ok(self.types.range_ty)
            }
            ExprKind::Var(sym) => self
                .env
                .lookup(*sym)
                .map(|b| b.ty)
                .ok_or_else(|| Diagnostic::error(format!("undefined name `{}`", self.interner.resolve(*sym)), expr.span)),
            ExprKind::FieldAccess { receiver, field } => self.infer_field_access(receiver, *field, expr),
            ExprKind::Index { receiver, index } => {
                let recv_ty = self.infer_expr(receiver)?;
                let index_ty = self.infer_expr(index)?;
                match self.types.get(recv_ty).clone() {
                    TypeData::Array { item } => {
                        if !self.types.is_numeric(index_ty) {
                            return Err(Diagnostic::error("array indices must be numeric", index.span));
                        }
                        Ok(item)
                    }
                    TypeData::Table { key, value } => {
                        if index_ty != key {
                            return Err(Diagnostic::error(
                                format!("table key type mismatch: expected {}, found {}", self.types.pretty(key, self.interner), self.types.pretty(index_ty, self.interner)),
                                index.span,
                            ));
                        }
                        Ok(value)
                    }
                    other => Err(Diagnostic::error(format!("cannot index a value of type {:?}", other), receiver.span)),
                }
            }
            ExprKind::Dereference(inner) => {
                let inner_ty = self.infer_expr(inner)?;
                match self.types.get(inner_ty).clone() {
                    TypeData::Pointer { pointed, optional: false, .. } => Ok(pointed),
                    TypeData::Pointer { optional: true, .. } => {
                        Err(Diagnostic::error("cannot dereference an optional pointer without a null check", inner.span))
                    }
                    _ => Err(Diagnostic::error("cannot dereference a non-pointer value", inner.span)),
                }
            }
            ExprKind::HeapAllocate(inner) => {
                let inner_ty = self.infer_expr(inner)?;
                Ok(self.types.intern(TypeData::Pointer { pointed: inner_ty, optional: false, is_stack: false }))
            }
            ExprKind::Array { items, item_type } => {
                let declared = item_type.as_ref().map(|t| self.resolve_type_ast(t)).transpose()?;
                let mut item_ty = declared;
                for item in items {
                    let ty = self.infer_expr(item)?;
                    item_ty = Some(match item_ty {
                        None => ty,
                        Some(expected) if expected == ty => expected,
                        Some(expected) => {
                            return Err(Diagnostic::error(
                                format!("array item type mismatch: expected {}, found {}", self.types.pretty(expected, self.interner), self.types.pretty(ty, self.interner)),
                                item.span,
                            ))
                        }
                    });
                }
                let item_ty = item_ty.unwrap_or(self.types.void_ty);
                Ok(self.types.intern(TypeData::Array { item: item_ty }))
            }
            ExprKind::Table { entries, default, fallback } => {
                let mut key_ty = None;
                let mut value_ty = None;
                for entry in entries {
                    let k = self.infer_expr(&entry.key)?;
                    let v = self.infer_expr(&entry.value)?;
                    key_ty.get_or_insert(k);
                    value_ty.get_or_insert(v);
                }
                if let Some(default) = default {
                    let v = self.infer_expr(default)?;
                    value_ty.get_or_insert(v);
                }
                if let Some(fallback) = fallback {
                    self.infer_expr(fallback)?;
                }
                let key = key_ty.unwrap_or(self.types.void_ty);
                let value = value_ty.unwrap_or(self.types.void_ty);
                let table = self.types.intern(TypeData::Table { key, value });
                if self.types.table_layout(table).is_none() {
                    self.types.set_table_layout(table, TableLayout { entry_size: 0, value_offset: 0 });
                }
                Ok(table)
            }
            ExprKind::Struct { type_name, members } => {
                for member in members {
                    self.infer_expr(&member.value)?;
                }
                match type_name {
                    Some(name) => self
                        .env
                        .lookup(*name)
                        .and_then(|b| b.type_value)
                        .ok_or_else(|| Diagnostic::error(format!("unknown struct type `{}`", self.interner.resolve(*name)), expr.span)),
                    None => {
                        let field_names: Vec<Symbol> = members.iter().map(|m| m.name).collect();
                        let field_types = members.iter().map(|m| self.infer_expr(&m.value)).collect::<Result<Vec<_>, _>>()?;
                        Ok(self.types.intern(TypeData::Struct { name: None, field_names, field_types, units: Unit::dimensionless() }))
                    }
                }
            }
            ExprKind::KeywordArg(arg) => self.infer_expr(&arg.arg),
            ExprKind::Unary { op, operand } => self.infer_unary(*op, operand),
            ExprKind::Binary { op, lhs, rhs } => self.infer_binary(*op, lhs, rhs, expr),
            ExprKind::CompoundAssign { op, lhs, rhs } => {
                let result = self.infer_binary(*op, lhs, rhs, expr)?;
                let lhs_ty = self.infer_expr(lhs)?;
                if lhs_ty != result {
                    return Err(Diagnostic::error("compound assignment changes the variable's type", expr.span));
                }
                Ok(self.types.void_ty)
            }
            ExprKind::Block(block) => {
                self.env.push_scope();
                let ty = self.check_block(block);
                self.env.pop_scope();
                ty
            }
            ExprKind::Do(blocks) => {
                let mut ty = self.types.void_ty;
                for block in blocks {
                    self.env.push_scope();
                    ty = self.check_block(block)?;
                    self.env.pop_scope();
                }
                Ok(ty)
            }
            ExprKind::If { arms, else_block } => {
                let mut arm_types = Vec::new();
                for arm in arms {
                    let cond_ty = self.infer_expr(&arm.condition)?;
                    if cond_ty != self.types.bool_ty {
                        return Err(Diagnostic::error("an `if` condition must be Bool", arm.condition.span));
                    }
                    self.env.push_scope();
                    let body_ty = self.check_block(&arm.body)?;
                    self.env.pop_scope();
                    arm_types.push(body_ty);
                }
                if let Some(else_block) = else_block {
                    self.env.push_scope();
                    let else_ty = self.check_block(else_block)?;
                    self.env.pop_scope();
                    arm_types.push(else_ty);
                }
                self.join_arms(&arm_types, else_block.is_some(), expr.span)
            }
            ExprKind::When { subject, cases, default } => {
                let subject_ty = self.infer_expr(subject)?;
                let mut arm_types = Vec::new();
                for case in cases {
                    self.env.push_scope();
                    // A bare, unbound name binds the subject rather than
                    // comparing against an existing value of that name.
                    let is_fresh_binder = matches!(&case.pattern.kind, ExprKind::Var(sym) if self.env.lookup(*sym).is_none());
                    if is_fresh_binder {
                        if let ExprKind::Var(sym) = &case.pattern.kind {
                            self.env.declare(*sym, Binding::variable(subject_ty, false));
                        }
                        self.record(case.pattern.id, subject_ty);
                    } else {
                        let pattern_ty = self.infer_expr(&case.pattern)?;
                        let comparable = pattern_ty == subject_ty || (self.types.is_numeric(pattern_ty) && self.types.is_numeric(subject_ty));
                        if !comparable {
                            return Err(Diagnostic::error("pattern does not match the `when` subject's type", case.pattern.span));
                        }
                    }
                    let body_ty = self.check_block(&case.body)?;
                    self.env.pop_scope();
                    arm_types.push(body_ty);
                }
                if let Some(default) = default {
                    self.env.push_scope();
                    let default_ty = self.check_block(default)?;
                    self.env.pop_scope();
                    arm_types.push(default_ty);
                }
                self.join_arms(&arm_types, default.is_some(), expr.span)
            }
            ExprKind::For(for_loop) => {
                let iter_ty = self.infer_expr(&for_loop.iter)?;
                self.env.push_scope();
                match self.types.get(iter_ty).clone() {
                    TypeData::Array { item } => {
                        if let Some(value) = for_loop.value {
                            self.env.declare(value, Binding::variable(item, false));
                        }
                        if let Some(key) = for_loop.key {
                            let idx_ty = self.types.intern(TypeData::Int { bits: 64, units: Unit::dimensionless(), unsigned: false });
                            self.env.declare(key, Binding::variable(idx_ty, false));
                        }
                    }
                    TypeData::Table { key, value } => {
                        if let Some(key_sym) = for_loop.key {
                            self.env.declare(key_sym, Binding::variable(key, false));
                        }
                        if let Some(value_sym) = for_loop.value {
                            self.env.declare(value_sym, Binding::variable(value, false));
                        }
                    }
                    TypeData::Range => {
                        if let Some(value) = for_loop.value {
                            let num_ty = self.types.intern(TypeData::Int { bits: 64, units: Unit::dimensionless(), unsigned: false });
                            self.env.declare(value, Binding::variable(num_ty, false));
                        }
                    }
                    _ => return Err(Diagnostic::error("`for` requires an array, table, or range", for_loop.iter.span)),
                }
                for block in [&for_loop.first, &for_loop.between, &for_loop.empty].into_iter().flatten() {
                    self.check_block(block)?;
                }
                let body_ty = match &for_loop.body {
                    Some(body) => self.check_block(body)?,
                    None => self.types.void_ty,
                };
                self.env.pop_scope();
                Ok(self.types.intern(TypeData::Generator { generated: body_ty }))
            }
            ExprKind::While { cond, body, between, .. } => {
                let cond_ty = self.infer_expr(cond)?;
                if cond_ty != self.types.bool_ty {
                    return Err(Diagnostic::error("a `while` condition must be Bool", cond.span));
                }
                self.env.push_scope();
                let body_ty = self.check_block(body)?;
                self.env.pop_scope();
                if let Some(between) = between {
                    self.check_block(between)?;
                }
                Ok(self.types.intern(TypeData::Generator { generated: body_ty }))
            }
            ExprKind::Repeat { body, between, .. } => {
                self.env.push_scope();
                let body_ty = self.check_block(body)?;
                self.env.pop_scope();
                if let Some(between) = between {
                    self.check_block(between)?;
                }
                Ok(self.types.intern(TypeData::Generator { generated: body_ty }))
            }
            ExprKind::Skip(_) | ExprKind::Stop(_) => Ok(self.types.abort_ty),
            ExprKind::Return(value) | ExprKind::Fail(value) => {
                if let Some(value) = value {
                    self.infer_expr(value)?;
                }
                Ok(self.types.abort_ty)
            }
            ExprKind::Declare { var, value, is_global } => {
                let value_ty = self.infer_expr(value)?;
                let target_global = *is_global || self.env.at_global_scope();
                self.env.declare(*var, Binding::variable(value_ty, target_global));
                Ok(self.types.void_ty)
            }
            ExprKind::Assign { lhs, rhs } => {
                if lhs.len() != rhs.len() {
                    return Err(Diagnostic::error("assignment has a different number of targets and values", expr.span));
                }
                for (l, r) in lhs.iter().zip(rhs) {
                    let lhs_ty = self.infer_expr(l)?;
                    let rhs_ty = self.infer_expr(r)?;
                    if lhs_ty != rhs_ty && !self.is_nil_into_optional(r, rhs_ty, lhs_ty) {
                        return Err(Diagnostic::error(
                            format!("cannot assign {} to a variable of type {}", self.types.pretty(rhs_ty, self.interner), self.types.pretty(lhs_ty, self.interner)),
                            r.span,
                        ));
                    }
                }
                Ok(self.types.void_ty)
            }
            ExprKind::FunctionDef { name, args, ret, body } => {
                let (fn_ty, ret_ty) = self.declare_function_signature(*name, args, ret.as_ref())?;
                self.env.push_scope();
                for arg in args {
                    let arg_ty = match &arg.type_ann {
                        Some(ast) => self.resolve_type_ast(ast)?,
                        None => self.types.void_ty,
                    };
                    self.env.declare(arg.name, Binding::variable(arg_ty, false));
                }
                let body_ty = self.check_block(body)?;
                self.env.pop_scope();
                if ret.is_some() && body_ty != ret_ty && body_ty != self.types.abort_ty {
                    return Err(Diagnostic::error(
                        format!("function body's type {} doesn't match its declared return type {}", self.types.pretty(body_ty, self.interner), self.types.pretty(ret_ty, self.interner)),
                        body.span,
                    ));
                }
                Ok(fn_ty)
            }
            ExprKind::Lambda { args, body } => {
                self.env.push_scope();
                let mut arg_types = Vec::new();
                let mut arg_names = Vec::new();
                let mut arg_defaults = Vec::new();
                for arg in args {
                    let arg_ty = match &arg.type_ann {
                        Some(ast) => self.resolve_type_ast(ast)?,
                        None => self.types.void_ty,
                    };
                    self.env.declare(arg.name, Binding::variable(arg_ty, false));
                    arg_names.push(arg.name);
                    arg_types.push(arg_ty);
                    arg_defaults.push(arg.default.is_some());
                }
                let ret = self.check_block(body)?;
                self.env.pop_scope();
                Ok(self.types.intern(TypeData::Function { arg_names, arg_types, arg_defaults, ret }))
            }
            ExprKind::StructDef(def) => {
                let field_types = def.field_types.iter().map(|t| self.resolve_type_ast(t)).collect::<Result<Vec<_>, _>>()?;
                let struct_ty = self.types.intern(TypeData::Struct {
                    name: Some(def.name),
                    field_names: def.field_names.clone(),
                    field_types,
                    units: Unit::dimensionless(),
                });
                let type_value_ty = self.types.intern(TypeData::TypeValue { of: Some(struct_ty) });
                self.env.declare(def.name, Binding::type_binding(type_value_ty, struct_ty));
                Ok(self.types.void_ty)
            }
            ExprKind::EnumDef(def) => {
                let names: Vec<Symbol> = def.variants.iter().map(|(n, _, _)| *n).collect();
                let values: Vec<i64> = (0..def.variants.len() as i64).collect();
                let tag_ty = self.types.intern(TypeData::Tag { name: def.name, names: names.clone(), values });
                let all_bare = def.variants.iter().all(|(_, fields, _)| fields.is_empty());
                let result_ty = if all_bare {
                    tag_ty
                } else {
                    let mut field_names = Vec::new();
                    let mut field_types = Vec::new();
                    for (variant, names, types) in &def.variants {
                        field_names.push(*variant);
                        let resolved = types.iter().map(|t| self.resolve_type_ast(t)).collect::<Result<Vec<_>, _>>()?;
                        let payload = self.types.intern(TypeData::Struct { name: Some(*variant), field_names: names.clone(), field_types: resolved, units: Unit::dimensionless() });
                        field_types.push(payload);
                    }
                    let data = self.types.intern(TypeData::Union { field_names, field_types });
                    self.types.intern(TypeData::TaggedUnion { name: def.name, tag_type: tag_ty, data })
                };
                let type_value_ty = self.types.intern(TypeData::TypeValue { of: Some(result_ty) });
                self.env.declare(def.name, Binding::type_binding(type_value_ty, result_ty));
                Ok(self.types.void_ty)
            }
            ExprKind::Extern { name, type_ann } => {
                let ty = self.resolve_type_ast(type_ann)?;
                self.env.declare(*name, Binding::variable(ty, true));
                Ok(self.types.void_ty)
            }
            ExprKind::Use(_) => Ok(self.types.module_ty),
            ExprKind::DocTest { expr, .. } => self.infer_expr(expr),
            ExprKind::Call { callee, args } => self.infer_call(callee, args, expr),
            ExprKind::Cast { value, type_ann } | ExprKind::Bitcast { value, type_ann } => {
                self.infer_expr(value)?;
                self.resolve_type_ast(type_ann)
            }
            ExprKind::TypeExpr(ast) => {
                let named = self.resolve_type_ast(ast)?;
                Ok(self.types.intern(TypeData::TypeValue { of: Some(named) }))
            }
        }
    }

    fn string_type(&mut self) -> Result<TypeId, Diagnostic> {
        let bytes = self.types.intern(TypeData::Int { bits: 8, units: Unit::dimensionless(), unsigned: true });
        Ok(self.types.intern(TypeData::Array { item: bytes }))
    }

    fn is_nil_into_optional(&self, rhs: &Expr, _rhs_ty: TypeId, lhs_ty: TypeId) -> bool {
        matches!(rhs.kind, ExprKind::Nil(_)) && self.types.is_optional_pointer(lhs_ty)
    }

    fn infer_field_access(&mut self, receiver: &Expr, field: Symbol, expr: &Expr) -> Result<TypeId, Diagnostic> {
        let recv_ty = self.infer_expr(receiver)?;
        match self.types.get(recv_ty).clone() {
            TypeData::Struct { field_names, field_types, .. } => field_names
                .iter()
                .position(|n| *n == field)
                .map(|i| field_types[i])
                .ok_or_else(|| Diagnostic::error(format!("no field `{}` on this struct", self.interner.resolve(field)), expr.span)),
            TypeData::Pointer { pointed, optional: false, .. } => {
                let pointed_field = Expr::new(receiver.id, receiver.span, ExprKind::Dereference(Box::new(receiver.clone())));
                let _ = pointed;
                self.infer_field_access(&pointed_field, field, expr)
            }
            _ => self
                .env
                .namespace(recv_ty)
                .and_then(|ns| ns.get(&field))
                .map(|b| b.ty)
                .ok_or_else(|| Diagnostic::error(format!("no method `{}` on this type", self.interner.resolve(field)), expr.span)),
        }
    }

    fn infer_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<TypeId, Diagnostic> {
        let ty = self.infer_expr(operand)?;
        match op {
            UnaryOp::Not => {
                if ty != self.types.bool_ty {
                    return Err(Diagnostic::error("`not` requires a Bool operand", operand.span));
                }
                Ok(self.types.bool_ty)
            }
            UnaryOp::Negative => {
                if !self.types.is_numeric(ty) {
                    return Err(Diagnostic::error("unary `-` requires a numeric operand", operand.span));
                }
                Ok(ty)
            }
            UnaryOp::Len => Ok(self.types.intern(TypeData::Int { bits: 64, units: Unit::dimensionless(), unsigned: false })),
            UnaryOp::Maybe => Ok(self.types.bool_ty),
        }
    }

    fn infer_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, expr: &Expr) -> Result<TypeId, Diagnostic> {
        let lhs_ty = self.infer_expr(lhs)?;
        let rhs_ty = self.infer_expr(rhs)?;
        match op {
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                if lhs_ty != self.types.bool_ty || rhs_ty != self.types.bool_ty {
                    return Err(Diagnostic::error("logical operators require Bool operands", expr.span));
                }
                Ok(self.types.bool_ty)
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let comparable = lhs_ty == rhs_ty || (self.types.is_numeric(lhs_ty) && self.types.is_numeric(rhs_ty));
                if !comparable {
                    return Err(Diagnostic::error("cannot compare values of different types", expr.span));
                }
                Ok(self.types.bool_ty)
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                self.require_same_units(lhs_ty, rhs_ty, expr)?;
                Ok(self.types.bool_ty)
            }
            BinaryOp::Add | BinaryOp::Sub => {
                self.require_same_units(lhs_ty, rhs_ty, expr)?;
                self.promote(lhs_ty, rhs_ty, expr)
            }
            BinaryOp::Mul => self.combine_units(lhs_ty, rhs_ty, expr, Unit::mul),
            BinaryOp::Div => self.combine_units(lhs_ty, rhs_ty, expr, Unit::div),
            BinaryOp::Mod | BinaryOp::Power => self.promote(lhs_ty, rhs_ty, expr),
        }
    }

    /// `+`/`-`/comparisons never convert units implicitly (§ numeric rules,
    /// lifted verbatim from the reference compiler's typecheck pass).
    fn require_same_units(&self, lhs: TypeId, rhs: TypeId, expr: &Expr) -> Result<(), Diagnostic> {
        if !self.types.is_numeric(lhs) || !self.types.is_numeric(rhs) {
            return Err(Diagnostic::error("arithmetic requires numeric operands", expr.span));
        }
        if self.types.units_of(lhs) != self.types.units_of(rhs) {
            return Err(Diagnostic::error("mismatched units; there is no implicit unit conversion", expr.span)
                .with_help("convert explicitly with a cast"));
        }
        Ok(())
    }

    fn combine_units(&mut self, lhs: TypeId, rhs: TypeId, expr: &Expr, combine: impl Fn(&Unit, &Unit) -> Unit) -> Result<TypeId, Diagnostic> {
        if !self.types.is_numeric(lhs) || !self.types.is_numeric(rhs) {
            return Err(Diagnostic::error("arithmetic requires numeric operands", expr.span));
        }
        let units = combine(&self.types.units_of(lhs), &self.types.units_of(rhs));
        let promoted = self.promote(lhs, rhs, expr)?;
        Ok(self.retag_units(promoted, units))
    }

    fn retag_units(&mut self, ty: TypeId, units: Unit) -> TypeId {
        match self.types.get(ty).clone() {
            TypeData::Int { bits, unsigned, .. } => self.types.intern(TypeData::Int { bits, units, unsigned }),
            TypeData::Num { bits, .. } => self.types.intern(TypeData::Num { bits, units }),
            _ => ty,
        }
    }

    /// Promotes along `Int8<Int16<Int32<Int64<Num32<Num64`; equal
    /// priority ties resolve to the right-hand operand.
    fn promote(&self, lhs: TypeId, rhs: TypeId, expr: &Expr) -> Result<TypeId, Diagnostic> {
        let lp = self.types.numeric_priority(lhs);
        let rp = self.types.numeric_priority(rhs);
        match (lp, rp) {
            (Some(l), Some(r)) => Ok(if l > r { lhs } else { rhs }),
            _ => Err(Diagnostic::error("arithmetic requires numeric operands", expr.span)),
        }
    }

    fn declare_function_signature(&mut self, name: Symbol, args: &[crate::ast::FunctionArg], ret: Option<&TypeAst>) -> Result<(TypeId, TypeId), Diagnostic> {
        let arg_names: Vec<Symbol> = args.iter().map(|a| a.name).collect();
        let mut arg_types = Vec::new();
        for arg in args {
            arg_types.push(match &arg.type_ann {
                Some(ast) => self.resolve_type_ast(ast)?,
                None => self.types.void_ty,
            });
        }
        let arg_defaults: Vec<bool> = args.iter().map(|a| a.default.is_some()).collect();
        let ret_ty = match ret {
            Some(ast) => self.resolve_type_ast(ast)?,
            None => self.types.void_ty,
        };
        let fn_ty = self.types.intern(TypeData::Function { arg_names, arg_types, arg_defaults, ret: ret_ty });
        self.env.declare(name, Binding::variable(fn_ty, true));
        Ok((fn_ty, ret_ty))
    }

    fn infer_call(&mut self, callee: &Expr, args: &[Expr], expr: &Expr) -> Result<TypeId, Diagnostic> {
        let callee_ty = self.infer_expr(callee)?;
        match self.types.get(callee_ty).clone() {
            TypeData::Function { arg_types, ret, .. } => {
                let positional: Vec<&Expr> = args.iter().filter(|a| !matches!(a.kind, ExprKind::KeywordArg(_))).collect();
                if positional.len() > arg_types.len() {
                    return Err(Diagnostic::error("too many arguments", expr.span));
                }
                for (arg, &expected) in positional.iter().zip(&arg_types) {
                    let actual = self.infer_expr(arg)?;
                    if actual != expected {
                        return Err(Diagnostic::error(
                            format!("argument type mismatch: expected {}, found {}", self.types.pretty(expected, self.interner), self.types.pretty(actual, self.interner)),
                            arg.span,
                        ));
                    }
                }
                for arg in args {
                    if let ExprKind::KeywordArg(kw) = &arg.kind {
                        self.infer_expr(&kw.arg)?;
                    }
                }
                Ok(ret)
            }
            TypeData::TypeValue { of: Some(target) } => {
                for arg in args {
                    self.infer_expr(arg)?;
                }
                Ok(target)
            }
            _ => Err(Diagnostic::error("this expression is not callable", callee.span)),
        }
    }

    pub fn resolve_type_ast(&mut self, ast: &TypeAst) -> Result<TypeId, Diagnostic> {
        match &ast.kind {
            TypeAstKind::Named(sym) => {
                let name = self.interner.resolve(*sym);
                if let Some(ty) = builtin_named_type(self.types, name) {
                    return Ok(ty);
                }
                self.env
                    .lookup(*sym)
                    .and_then(|b| b.type_value)
                    .ok_or_else(|| Diagnostic::error(format!("unknown type `{}`", name), ast.span))
            }
            TypeAstKind::Array(item) => {
                let item = self.resolve_type_ast(item)?;
                Ok(self.types.intern(TypeData::Array { item }))
            }
            TypeAstKind::Table { key, value } => {
                let key = self.resolve_type_ast(key)?;
                let value = self.resolve_type_ast(value)?;
                Ok(self.types.intern(TypeData::Table { key, value }))
            }
            TypeAstKind::Pointer { pointed, optional } => {
                let pointed = self.resolve_type_ast(pointed)?;
                Ok(self.types.intern(TypeData::Pointer { pointed, optional: *optional, is_stack: false }))
            }
            TypeAstKind::Optional(inner) => {
                let pointed = self.resolve_type_ast(inner)?;
                Ok(self.types.intern(TypeData::Pointer { pointed, optional: true, is_stack: false }))
            }
            TypeAstKind::Function { args, ret } => {
                let arg_types = args.iter().map(|a| self.resolve_type_ast(a)).collect::<Result<Vec<_>, _>>()?;
                let arg_names = vec![Symbol::EMPTY; arg_types.len()];
                let arg_defaults = vec![false; arg_types.len()];
                let ret = self.resolve_type_ast(ret)?;
                Ok(self.types.intern(TypeData::Function { arg_names, arg_types, arg_defaults, ret }))
            }
            TypeAstKind::Tuple(items) => {
                let field_types = items.iter().map(|t| self.resolve_type_ast(t)).collect::<Result<Vec<_>, _>>()?;
                let field_names = vec![Symbol::EMPTY; field_types.len()];
                Ok(self.env.intern_tuple(field_types.clone(), || {
                    self.types.intern(TypeData::Struct { name: None, field_names: field_names.clone(), field_types: field_types.clone(), units: Unit::dimensionless() })
                }))
            }
            TypeAstKind::Measure { base, units } => {
                let base_ty = self.resolve_type_ast(base)?;
                let unit = Unit::normalize(units, self.interner);
                Ok(self.retag_units(base_ty, unit))
            }
        }
    }
}

fn builtin_named_type(types: &mut TypeInterner, name: &str) -> Option<TypeId> {
    let int = |types: &mut TypeInterner, bits, unsigned| types.intern(TypeData::Int { bits, units: Unit::dimensionless(), unsigned });
    let num = |types: &mut TypeInterner, bits| types.intern(TypeData::Num { bits, units: Unit::dimensionless() });
    Some(match name {
        "Bool" => types.bool_ty,
        "Void" => types.void_ty,
        "Char" => types.char_ty,
        "Range" => types.range_ty,
        "Int8" => int(types, 8, false),
        "Int16" => int(types, 16, false),
        "Int32" => int(types, 32, false),
        "Int64" => int(types, 64, false),
        "UInt8" => int(types, 8, true),
        "UInt16" => int(types, 16, true),
        "UInt32" => int(types, 32, true),
        "UInt64" => int(types, 64, true),
        "Num32" => num(types, 32),
        "Num64" => num(types, 64),
        "String" => {
            let bytes = int(types, 8, true);
            types.intern(TypeData::Array { item: bytes })
        }
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::parse_program;

    fn check(source: &str) -> Result<(TypeTable, TypeInterner, Interner), Diagnostic> {
        let mut interner = Interner::new();
        let tokens = Lexer::tokenize(source, &mut interner).expect("lex");
        let block = parse_program(&tokens, &mut interner).expect("parse");
        let mut types = TypeInterner::new();
        let table = check_program(&block, &mut types, &mut interner)?;
        Ok((table, types, interner))
    }

    #[test]
    fn infers_int_literal_type() {
        let (table, types, _) = check("x := 5\n").unwrap();
        let ty = *table.values().next().unwrap();
        assert!(matches!(types.get(ty), TypeData::Void) == false);
    }

    #[test]
    fn rejects_mismatched_units_in_addition() {
        let err = check("x := 1:Int64<m> + 1:Int64<s>\n");
        assert!(err.is_err());
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let err = check("x := y + 1\n");
        assert!(err.is_err());
    }

    #[test]
    fn numeric_promotion_picks_the_wider_type() {
        let (_, mut types, _) = check("x := 1:Int64 + 2.0:Num64\n").unwrap();
        let n64 = types.intern(TypeData::Num { bits: 64, units: Unit::dimensionless() });
        assert!(types.numeric_priority(n64).is_some());
    }

    #[test]
    fn equality_accepts_different_numeric_types() {
        let (_, types, _) = check("x := 1 == 1.0\n").unwrap();
        assert!(types.numeric_priority(types.bool_ty).is_none());
    }

    #[test]
    fn discarding_a_non_void_statement_is_an_error() {
        let err = check("1 + 2\nx := 3\n");
        assert!(err.is_err());
    }

    #[test]
    fn a_block_result_is_not_required_to_be_discardable() {
        check("1 + 2\n").expect("the last statement's value is the block's result, not discarded");
    }

    #[test]
    fn for_loop_produces_a_generator_of_the_body_type() {
        let (table, types, _) = check("for i in 1..3\n\ti\n").unwrap();
        let for_ty = *table
            .iter()
            .find_map(|(_, ty)| matches!(types.get(*ty), TypeData::Generator { .. }).then_some(ty))
            .unwrap();
        assert!(matches!(types.get(for_ty), TypeData::Generator { .. }));
    }

    #[test]
    fn if_without_else_wraps_the_result_in_a_generator() {
        let (table, types, _) = check("if 1 == 1\n\t1\n").unwrap();
        let if_ty = *table.values().last().unwrap();
        assert!(matches!(types.get(if_ty), TypeData::Generator { .. }));
    }

    #[test]
    fn string_method_call_resolves_through_the_namespace() {
        check("x := \"hi\".uppercased()\n").expect("uppercased is a registered String method");
    }
}
