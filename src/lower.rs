//! Lowers the AST to [`crate::ir`] once the typechecker has populated a
//! [`TypeTable`]. Each function body lowers independently; top-level
//! statements outside a function become the implicit `main` function's
//! body, matching how the driver treats a source file as a script.

use crate::ast::{BinaryOp, Block, Expr, ExprKind, UnaryOp};
use crate::env::{Binding, Environment, LoopLabel};
use crate::error::Diagnostic;
use crate::intern::{Interner, Symbol};
use crate::ir::{ArithOp, BlockId, CmpOp, FunctionBuilder, Inst, Module, Terminator, ValueId};
use crate::types::{TypeData, TypeId, TypeInterner};
use crate::typeck::TypeTable;

/// Lowers a whole compiled unit: top-level `FunctionDef`s each become
/// their own independent [`crate::ir::Function`], and every other
/// top-level statement lowers into the implicit `main`.
pub fn lower_program(
    block: &Block,
    table: &TypeTable,
    types: &mut TypeInterner,
    interner: &mut Interner,
) -> Result<Module, Diagnostic> {
    let main_name = interner.intern("main");
    let mut functions = Vec::new();
    let mut main_statements = Vec::new();
    for stmt in &block.statements {
        if let ExprKind::FunctionDef { name, args, body, .. } = &stmt.kind {
            let fn_ty = *table.get(&stmt.id).unwrap_or(&types.void_ty);
            functions.push(lower_function(*name, args, body, fn_ty, table, types, interner)?);
        } else {
            main_statements.push(stmt.clone());
        }
    }
    let main_block = Block { statements: main_statements, span: block.span };
    let mut fb = FunctionBuilder::new(main_name, vec![], types.void_ty);
    let mut lowering = Lowering { table, types, interner, env: Environment::new(), loops: Vec::new(), fb: &mut fb };
    let result = lowering.lower_block(&main_block)?;
    if !lowering.fb.block_terminated(lowering.fb.current_block()) {
        lowering.fb.terminate(Terminator::Return(result));
    }
    functions.push(fb.finish());
    Ok(Module { functions })
}

/// Lowers one user-defined function independently. Parameters are bound
/// the same way a local `:=` declaration is: an `Inst::Param` read into
/// an `Alloca` slot, so ordinary `Var` lookups inside the body work
/// unchanged whether a name is a parameter or a local.
fn lower_function(
    name: Symbol,
    args: &[crate::ast::FunctionArg],
    body: &Block,
    fn_ty: TypeId,
    table: &TypeTable,
    types: &mut TypeInterner,
    interner: &mut Interner,
) -> Result<crate::ir::Function, Diagnostic> {
    let (arg_types, ret) = match types.get(fn_ty).clone() {
        TypeData::Function { arg_types, ret, .. } => (arg_types, ret),
        _ => (vec![types.void_ty; args.len()], types.void_ty),
    };
    let params: Vec<(Symbol, TypeId)> = args.iter().zip(arg_types.iter()).map(|(a, t)| (a.name, *t)).collect();
    let mut fb = FunctionBuilder::new(name, params.clone(), ret);
    let mut lowering = Lowering { table, types, interner, env: Environment::new(), loops: Vec::new(), fb: &mut fb };
    for (i, (sym, ty)) in params.iter().enumerate() {
        let param_v = lowering.fb.push(Inst::Param(i));
        let slot = lowering.fb.push(Inst::Alloca(*ty));
        lowering.fb.push(Inst::Store { addr: slot, value: param_v });
        let mut binding = Binding::variable(*ty, false);
        binding.lvalue = Some(slot);
        lowering.env.declare(*sym, binding);
    }
    let result = lowering.lower_block(body)?;
    if !lowering.fb.block_terminated(lowering.fb.current_block()) {
        lowering.fb.terminate(Terminator::Return(result));
    }
    Ok(fb.finish())
}

struct Lowering<'a> {
    table: &'a TypeTable,
    types: &'a mut TypeInterner,
    interner: &'a mut Interner,
    env: Environment<ValueId>,
    loops: Vec<LoopLabel<BlockId>>,
    fb: &'a mut FunctionBuilder,
}

impl<'a> Lowering<'a> {
    fn find_loop_label(&self, label: Option<Symbol>) -> Option<BlockId> {
        match label {
            None => self.loops.last().map(|l| l.skip_target),
            Some(_) => self.loops.iter().rev().find(|l| l.label == label).map(|l| l.skip_target),
        }
    }

    fn find_loop_label_stop(&self, label: Option<Symbol>) -> Option<BlockId> {
        match label {
            None => self.loops.last().map(|l| l.stop_target),
            Some(_) => self.loops.iter().rev().find(|l| l.label == label).map(|l| l.stop_target),
        }
    }

    fn expr_type(&self, expr: &Expr) -> TypeId {
        *self.table.get(&expr.id).unwrap_or(&self.types.void_ty)
    }

    /// Declares `name` as a value-only binding (no backing stack slot):
    /// used for loop-bound variables, which are rebound each iteration
    /// rather than assigned through.
    fn bind_rvalue(&mut self, name: Symbol, ty: TypeId, value: ValueId) {
        let mut binding = Binding::variable(ty, false);
        binding.rvalue = Some(value);
        self.env.declare(name, binding);
    }

    fn lower_block(&mut self, block: &Block) -> Result<Option<ValueId>, Diagnostic> {
        let mut last = None;
        for stmt in &block.statements {
            last = self.lower_expr(stmt)?;
        }
        Ok(last)
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<Option<ValueId>, Diagnostic> {
        match &expr.kind {
            ExprKind::Int { value, .. } => {
                let units = self.types.units_of(self.expr_type(expr));
                if units.is_percent(self.interner) {
                    Ok(Some(self.fb.push(Inst::ConstPercent(*value as f64))))
                } else {
                    Ok(Some(self.fb.push(Inst::ConstInt(*value))))
                }
            }
            ExprKind::Num { value, .. } => {
                let units = self.types.units_of(self.expr_type(expr));
                if units.is_percent(self.interner) {
                    Ok(Some(self.fb.push(Inst::ConstPercent(*value))))
                } else {
                    Ok(Some(self.fb.push(Inst::ConstNum(*value))))
                }
            }
            ExprKind::Bool(b) => Ok(Some(self.fb.push(Inst::ConstBool(*b)))),
            ExprKind::Char(c) => Ok(Some(self.fb.push(Inst::ConstChar(*c)))),
            ExprKind::StringLiteral(s) => Ok(Some(self.fb.push(Inst::ConstString(s.clone())))),
            ExprKind::StringJoin(pieces) => {
                let mut joined = String::new();
                for piece in pieces {
                    if let ExprKind::StringLiteral(s) = &piece.kind {
                        joined.push_str(s);
                    } else {
                        self.lower_expr(piece)?;
                    }
                }
                Ok(Some(self.fb.push(Inst::ConstString(joined))))
            }
            ExprKind::Interp(inner) => self.lower_expr(inner),
            ExprKind::Nil(_) => Ok(Some(self.fb.push(Inst::ConstInt(0)))),
            ExprKind::Var(sym) => {
                let binding = self
                    .env
                    .lookup(*sym)
                    .ok_or_else(|| Diagnostic::error("undefined name during lowering", expr.span))?
                    .clone();
                match binding.lvalue {
                    Some(slot) => Ok(Some(self.fb.push(Inst::Load(slot)))),
                    None => Ok(binding.rvalue),
                }
            }
            ExprKind::Unary { op, operand } => self.lower_unary(*op, operand),
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(*op, lhs, rhs),
            ExprKind::Declare { var, value, .. } => {
                let value_ty = self.expr_type(value);
                let rvalue = self.lower_expr(value)?;
                let slot = self.fb.push(Inst::Alloca(value_ty));
                if let Some(v) = rvalue {
                    self.fb.push(Inst::Store { addr: slot, value: v });
                }
                let mut binding = Binding::variable(value_ty, self.env.at_global_scope());
                binding.lvalue = Some(slot);
                self.env.declare(*var, binding);
                Ok(None)
            }
            ExprKind::Assign { lhs, rhs } => {
                for (l, r) in lhs.iter().zip(rhs) {
                    let value = self.lower_expr(r)?;
                    if let (ExprKind::Var(sym), Some(value)) = (&l.kind, value) {
                        if let Some(slot) = self.env.lookup(*sym).and_then(|b| b.lvalue) {
                            self.fb.push(Inst::Store { addr: slot, value });
                        }
                    }
                }
                Ok(None)
            }
            ExprKind::CompoundAssign { op, lhs, rhs } => {
                let result = self.lower_binary(*op, lhs, rhs)?;
                if let (ExprKind::Var(sym), Some(value)) = (&lhs.kind, result) {
                    if let Some(slot) = self.env.lookup(*sym).and_then(|b| b.lvalue) {
                        self.fb.push(Inst::Store { addr: slot, value });
                    }
                }
                Ok(None)
            }
            ExprKind::Block(block) => {
                self.env.push_scope();
                let result = self.lower_block(block)?;
                self.env.pop_scope();
                Ok(result)
            }
            ExprKind::If { arms, else_block } => self.lower_if(arms, else_block.as_ref()),
            ExprKind::When { subject, cases, default } => self.lower_when(subject, cases, default.as_ref()),
            ExprKind::For(for_loop) => self.lower_for(for_loop),
            ExprKind::While { cond, body, between, label } => self.lower_while(cond, body, between.as_ref(), *label),
            ExprKind::Repeat { body, between, label } => self.lower_repeat(body, between.as_ref(), *label),
            ExprKind::Range { first, step, last } => {
                let first = first.as_deref().map(|e| self.lower_expr(e)).transpose()?.flatten();
                let step = step.as_deref().map(|e| self.lower_expr(e)).transpose()?.flatten();
                let last = last.as_deref().map(|e| self.lower_expr(e)).transpose()?.flatten();
                Ok(Some(self.fb.push(Inst::MakeRange { first, step, last })))
            }
            ExprKind::Dereference(inner) => {
                let v = self.lower_expr(inner)?;
                Ok(v.map(|v| self.fb.push(Inst::Dereference(v))))
            }
            ExprKind::HeapAllocate(inner) => {
                let v = self.lower_expr(inner)?;
                Ok(v.map(|v| self.fb.push(Inst::HeapAlloc(v))))
            }
            ExprKind::Table { entries, .. } => {
                let mut pairs = Vec::new();
                for entry in entries {
                    let key = self.lower_expr(&entry.key)?;
                    let value = self.lower_expr(&entry.value)?;
                    if let (Some(key), Some(value)) = (key, value) {
                        pairs.push((key, value));
                    }
                }
                Ok(Some(self.fb.push(Inst::MakeTable { entries: pairs })))
            }
            ExprKind::KeywordArg(kw) => self.lower_expr(&kw.arg),
            ExprKind::Array { items, .. } => {
                let mut values = Vec::new();
                for item in items {
                    if let Some(v) = self.lower_expr(item)? {
                        values.push(v);
                    }
                }
                Ok(Some(self.fb.push(Inst::ArrayLiteral(values))))
            }
            ExprKind::Index { receiver, index } => {
                let recv_ty = self.expr_type(receiver);
                let is_table = matches!(self.types.get(recv_ty), TypeData::Table { .. });
                let recv_v = self.lower_expr(receiver)?;
                let index_v = self.lower_expr(index)?;
                match (recv_v, index_v) {
                    (Some(recv_v), Some(index_v)) if is_table => Ok(Some(self.fb.push(Inst::TableIndex { table: recv_v, key: index_v }))),
                    (Some(recv_v), Some(index_v)) => Ok(Some(self.fb.push(Inst::ArrayIndex { array: recv_v, index: index_v }))),
                    _ => Ok(None),
                }
            }
            ExprKind::Call { callee, args } => {
                let (func, receiver) = match &callee.kind {
                    ExprKind::Var(sym) => (*sym, None),
                    // `receiver.method(args)` desugars to `method(receiver, args)`.
                    ExprKind::FieldAccess { receiver, field } => (*field, Some(receiver.as_ref())),
                    _ => return Err(Diagnostic::error("only direct calls are lowered", callee.span)),
                };
                let mut values = Vec::new();
                if let Some(receiver) = receiver {
                    if let Some(v) = self.lower_expr(receiver)? {
                        values.push(v);
                    }
                }
                for arg in args {
                    if let Some(v) = self.lower_expr(arg)? {
                        values.push(v);
                    }
                }
                Ok(Some(self.fb.push(Inst::Call { func, args: values })))
            }
            ExprKind::Return(value) | ExprKind::Fail(value) => {
                let v = match value {
                    Some(value) => self.lower_expr(value)?,
                    None => None,
                };
                self.fb.terminate(Terminator::Return(v));
                Ok(None)
            }
            ExprKind::Skip(label) => {
                if let Some(target) = self.find_loop_label(*label) {
                    self.fb.terminate(Terminator::Branch(target));
                }
                Ok(None)
            }
            ExprKind::Stop(label) => {
                if let Some(target) = self.find_loop_label_stop(*label) {
                    self.fb.terminate(Terminator::Branch(target));
                }
                Ok(None)
            }
            ExprKind::FunctionDef { .. }
            | ExprKind::Lambda { .. }
            | ExprKind::StructDef(_)
            | ExprKind::EnumDef(_)
            | ExprKind::Extern { .. }
            | ExprKind::Use(_) => Ok(None),
            ExprKind::Cast { value, .. } | ExprKind::Bitcast { value, .. } => self.lower_expr(value),
            ExprKind::FieldAccess { receiver, field } => {
                let recv_ty = self.expr_type(receiver);
                let base = self.lower_expr(receiver)?;
                let index = match self.types.get(recv_ty) {
                    TypeData::Struct { field_names, .. } => field_names.iter().position(|n| n == field).unwrap_or(0),
                    _ => 0,
                };
                Ok(base.map(|base| self.fb.push(Inst::StructField { base, index })))
            }
            ExprKind::Struct { members, .. } => {
                let mut fields = Vec::new();
                for member in members {
                    if let Some(v) = self.lower_expr(&member.value)? {
                        fields.push(v);
                    }
                }
                Ok(Some(self.fb.push(Inst::StructLiteral { fields })))
            }
            ExprKind::DocTest { expr, .. } => self.lower_expr(expr),
            // Type-level syntax and multi-arm `do` blocks have no
            // lowering-time effect in this subset.
            ExprKind::TypeExpr(_) | ExprKind::Do(_) => Ok(None),
        }
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<Option<ValueId>, Diagnostic> {
        let value = self.lower_expr(operand)?;
        Ok(match (op, value) {
            (UnaryOp::Not, Some(v)) => Some(self.fb.push(Inst::Not(v))),
            (UnaryOp::Negative, Some(v)) => Some(self.fb.push(Inst::Negate(v))),
            (UnaryOp::Len, Some(v)) => Some(self.fb.push(Inst::ArrayLen(v))),
            (UnaryOp::Maybe, Some(v)) => Some(v),
            _ => None,
        })
    }

    fn lower_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Option<ValueId>, Diagnostic> {
        let lhs_v = self.lower_expr(lhs)?;
        let rhs_v = self.lower_expr(rhs)?;
        let (lhs_v, rhs_v) = match (lhs_v, rhs_v) {
            (Some(l), Some(r)) => (l, r),
            _ => return Ok(None),
        };
        let inst = match op {
            BinaryOp::Add => Inst::Arith { op: ArithOp::Add, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::Sub => Inst::Arith { op: ArithOp::Sub, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::Mul => Inst::Arith { op: ArithOp::Mul, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::Div => Inst::Arith { op: ArithOp::Div, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::Mod => Inst::Arith { op: ArithOp::Mod, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::Power => Inst::Arith { op: ArithOp::Pow, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::Eq => Inst::Cmp { op: CmpOp::Eq, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::Ne => Inst::Cmp { op: CmpOp::Ne, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::Lt => Inst::Cmp { op: CmpOp::Lt, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::Le => Inst::Cmp { op: CmpOp::Le, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::Gt => Inst::Cmp { op: CmpOp::Gt, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::Ge => Inst::Cmp { op: CmpOp::Ge, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::And => Inst::Arith { op: ArithOp::Mul, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::Or => Inst::Arith { op: ArithOp::Add, lhs: lhs_v, rhs: rhs_v },
            BinaryOp::Xor => Inst::Cmp { op: CmpOp::Ne, lhs: lhs_v, rhs: rhs_v },
        };
        Ok(Some(self.fb.push(inst)))
    }

    fn lower_if(&mut self, arms: &[crate::ast::IfArm], else_block: Option<&Block>) -> Result<Option<ValueId>, Diagnostic> {
        let join = self.fb.new_block();
        let mut phi_inputs = Vec::new();
        for arm in arms {
            let cond = self.lower_expr(&arm.condition)?.expect("condition lowers to a value");
            let then_block = self.fb.new_block();
            let next_check = self.fb.new_block();
            self.fb.terminate(Terminator::CondBranch { cond, then_block, else_block: next_check });
            self.fb.switch_to(then_block);
            self.env.push_scope();
            let result = self.lower_block(&arm.body)?;
            self.env.pop_scope();
            if !self.fb.block_terminated(self.fb.current_block()) {
                if let Some(v) = result {
                    phi_inputs.push((self.fb.current_block(), v));
                }
                self.fb.terminate(Terminator::Branch(join));
            }
            self.fb.switch_to(next_check);
        }
        if let Some(else_block) = else_block {
            self.env.push_scope();
            let result = self.lower_block(else_block)?;
            self.env.pop_scope();
            if !self.fb.block_terminated(self.fb.current_block()) {
                if let Some(v) = result {
                    phi_inputs.push((self.fb.current_block(), v));
                }
                self.fb.terminate(Terminator::Branch(join));
            }
        } else if !self.fb.block_terminated(self.fb.current_block()) {
            self.fb.terminate(Terminator::Branch(join));
        }
        self.fb.switch_to(join);
        if phi_inputs.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.fb.push(Inst::Phi(phi_inputs))))
        }
    }

    fn lower_while(
        &mut self,
        cond: &Expr,
        body: &Block,
        between: Option<&Block>,
        label: Option<Symbol>,
    ) -> Result<Option<ValueId>, Diagnostic> {
        let header = self.fb.new_block();
        let body_block = self.fb.new_block();
        let advance = self.fb.new_block();
        let after = self.fb.new_block();
        self.fb.terminate(Terminator::Branch(header));
        self.fb.switch_to(header);
        let cond_v = self.lower_expr(cond)?.expect("loop condition lowers to a value");
        self.fb.terminate(Terminator::CondBranch { cond: cond_v, then_block: body_block, else_block: after });
        self.fb.switch_to(body_block);
        self.loops.push(LoopLabel { label, skip_target: advance, stop_target: after });
        self.env.push_scope();
        self.lower_block(body)?;
        self.env.pop_scope();
        self.loops.pop();
        if !self.fb.block_terminated(self.fb.current_block()) {
            self.fb.terminate(Terminator::Branch(advance));
        }
        self.fb.switch_to(advance);
        if let Some(between) = between {
            self.lower_block(between)?;
        }
        if !self.fb.block_terminated(self.fb.current_block()) {
            self.fb.terminate(Terminator::Branch(header));
        }
        self.fb.switch_to(after);
        Ok(None)
    }

    /// Runs `body` unconditionally, looping until a `stop` breaks out;
    /// `between` runs after each iteration, matching a `for` loop's
    /// advance step but with no condition to recheck.
    fn lower_repeat(&mut self, body: &Block, between: Option<&Block>, label: Option<Symbol>) -> Result<Option<ValueId>, Diagnostic> {
        let header = self.fb.new_block();
        let advance = self.fb.new_block();
        let after = self.fb.new_block();
        self.fb.terminate(Terminator::Branch(header));
        self.fb.switch_to(header);
        self.loops.push(LoopLabel { label, skip_target: advance, stop_target: after });
        self.env.push_scope();
        self.lower_block(body)?;
        self.env.pop_scope();
        self.loops.pop();
        if !self.fb.block_terminated(self.fb.current_block()) {
            self.fb.terminate(Terminator::Branch(advance));
        }
        self.fb.switch_to(advance);
        if let Some(between) = between {
            self.lower_block(between)?;
        }
        if !self.fb.block_terminated(self.fb.current_block()) {
            self.fb.terminate(Terminator::Branch(header));
        }
        self.fb.switch_to(after);
        Ok(None)
    }

    /// Drives `Array`, `Range`, and `Table` iteration through one shared
    /// index-based loop shape: the iterable is first materialized into an
    /// array (`RangeToArray`/`TableEntries`, or used as-is), then walked
    /// by a 1-based index compared against its length.
    fn lower_for(&mut self, for_loop: &crate::ast::ForLoop) -> Result<Option<ValueId>, Diagnostic> {
        let iter_ty = self.expr_type(&for_loop.iter);
        let iter_v = self.lower_expr(&for_loop.iter)?.expect("for-loop iterable lowers to a value");
        let is_table = matches!(self.types.get(iter_ty), TypeData::Table { .. });
        let is_range = matches!(self.types.get(iter_ty), TypeData::Range);
        let array_v = if is_range {
            self.fb.push(Inst::RangeToArray(iter_v))
        } else if is_table {
            self.fb.push(Inst::TableEntries(iter_v))
        } else {
            iter_v
        };

        let idx_ty = self.types.intern(TypeData::Int { bits: 64, units: crate::units::Unit::dimensionless(), unsigned: false });
        let one = self.fb.push(Inst::ConstInt(1));
        let idx_slot = self.fb.push(Inst::Alloca(idx_ty));
        self.fb.push(Inst::Store { addr: idx_slot, value: one });
        let len = self.fb.push(Inst::ArrayLen(array_v));
        if let Some(first) = &for_loop.first {
            self.lower_block(first)?;
        }

        let header = self.fb.new_block();
        let body_block = self.fb.new_block();
        let advance = self.fb.new_block();
        let after = self.fb.new_block();
        let empty_target = match &for_loop.empty {
            Some(_) => self.fb.new_block(),
            None => after,
        };

        let zero = self.fb.push(Inst::ConstInt(0));
        let is_empty = self.fb.push(Inst::Cmp { op: CmpOp::Le, lhs: len, rhs: zero });
        self.fb.terminate(Terminator::CondBranch { cond: is_empty, then_block: empty_target, else_block: header });

        if let Some(empty) = &for_loop.empty {
            self.fb.switch_to(empty_target);
            self.lower_block(empty)?;
            if !self.fb.block_terminated(self.fb.current_block()) {
                self.fb.terminate(Terminator::Branch(after));
            }
        }

        self.fb.switch_to(header);
        let idx = self.fb.push(Inst::Load(idx_slot));
        let in_range = self.fb.push(Inst::Cmp { op: CmpOp::Le, lhs: idx, rhs: len });
        self.fb.terminate(Terminator::CondBranch { cond: in_range, then_block: body_block, else_block: after });

        self.fb.switch_to(body_block);
        self.env.push_scope();
        let idx = self.fb.push(Inst::Load(idx_slot));
        let item = self.fb.push(Inst::ArrayIndex { array: array_v, index: idx });
        if is_table {
            if let Some(key) = for_loop.key {
                let k = self.fb.push(Inst::StructField { base: item, index: 0 });
                self.bind_rvalue(key, self.types.void_ty, k);
            }
            if let Some(value) = for_loop.value {
                let v = self.fb.push(Inst::StructField { base: item, index: 1 });
                self.bind_rvalue(value, self.types.void_ty, v);
            }
        } else {
            if let Some(value) = for_loop.value {
                self.bind_rvalue(value, self.types.void_ty, item);
            }
            if let Some(key) = for_loop.key {
                self.bind_rvalue(key, idx_ty, idx);
            }
        }
        self.loops.push(LoopLabel { label: for_loop.label, skip_target: advance, stop_target: after });
        if let Some(body) = &for_loop.body {
            self.lower_block(body)?;
        }
        self.loops.pop();
        self.env.pop_scope();
        if !self.fb.block_terminated(self.fb.current_block()) {
            self.fb.terminate(Terminator::Branch(advance));
        }

        self.fb.switch_to(advance);
        if let Some(between) = &for_loop.between {
            self.lower_block(between)?;
        }
        let idx = self.fb.push(Inst::Load(idx_slot));
        let next_idx = self.fb.push(Inst::Arith { op: ArithOp::Add, lhs: idx, rhs: one });
        self.fb.push(Inst::Store { addr: idx_slot, value: next_idx });
        if !self.fb.block_terminated(self.fb.current_block()) {
            self.fb.terminate(Terminator::Branch(header));
        }

        self.fb.switch_to(after);
        Ok(None)
    }

    /// A `when` compiles to a chained conditional: each case either binds
    /// the subject (a bare, as-yet-unbound `Var` pattern) or tests it for
    /// equality, falling through to the next case's entry on no match and
    /// to `default` (or nothing) once every case has failed.
    fn lower_when(&mut self, subject: &Expr, cases: &[crate::ast::WhenCase], default: Option<&Block>) -> Result<Option<ValueId>, Diagnostic> {
        let subject_v = self.lower_expr(subject)?.expect("when subject lowers to a value");
        let join = self.fb.new_block();
        let mut phi_inputs = Vec::new();

        for case in cases {
            let match_block = self.fb.new_block();
            let no_match = self.fb.new_block();
            self.env.push_scope();
            let is_fresh_binder = matches!(&case.pattern.kind, ExprKind::Var(sym) if self.env.lookup(*sym).is_none());
            if is_fresh_binder {
                if let ExprKind::Var(sym) = &case.pattern.kind {
                    self.bind_rvalue(*sym, self.types.void_ty, subject_v);
                }
                self.fb.terminate(Terminator::Branch(match_block));
            } else {
                let pattern_v = self.lower_expr(&case.pattern)?.expect("when pattern lowers to a value");
                let eq = self.fb.push(Inst::Cmp { op: CmpOp::Eq, lhs: subject_v, rhs: pattern_v });
                self.fb.terminate(Terminator::CondBranch { cond: eq, then_block: match_block, else_block: no_match });
            }
            self.fb.switch_to(match_block);
            let result = self.lower_block(&case.body)?;
            self.env.pop_scope();
            if !self.fb.block_terminated(self.fb.current_block()) {
                if let Some(v) = result {
                    phi_inputs.push((self.fb.current_block(), v));
                }
                self.fb.terminate(Terminator::Branch(join));
            }
            self.fb.switch_to(no_match);
        }

        if let Some(default) = default {
            let result = self.lower_block(default)?;
            if !self.fb.block_terminated(self.fb.current_block()) {
                if let Some(v) = result {
                    phi_inputs.push((self.fb.current_block(), v));
                }
                self.fb.terminate(Terminator::Branch(join));
            }
        } else if !self.fb.block_terminated(self.fb.current_block()) {
            self.fb.terminate(Terminator::Branch(join));
        }

        self.fb.switch_to(join);
        if phi_inputs.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.fb.push(Inst::Phi(phi_inputs))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::parse_program;
    use crate::typeck::check_program;

    fn lower(source: &str) -> Module {
        let mut interner = Interner::new();
        let tokens = Lexer::tokenize(source, &mut interner).expect("lex");
        let block = parse_program(&tokens, &mut interner).expect("parse");
        let mut types = TypeInterner::new();
        let table = check_program(&block, &mut types, &mut interner).expect("typecheck");
        lower_program(&block, &table, &mut types, &mut interner).expect("lower")
    }

    #[test]
    fn lowers_declaration_and_arithmetic_to_one_block() {
        let module = lower("x := 1 + 2\n");
        let main = &module.functions[0];
        assert!(main.blocks[0].instructions.len() >= 3);
    }

    #[test]
    fn lowers_if_into_multiple_blocks() {
        let module = lower("x := 1\nif x > 0\n\ty := 2\nelse\n\ty := 3\n");
        let main = &module.functions[0];
        assert!(main.blocks.len() > 1);
    }

    #[test]
    fn while_loop_forms_a_back_edge_to_its_header() {
        let module = lower("x := 0\nwhile x < 3\n\tx += 1\n");
        let main = &module.functions[0];
        assert!(main.blocks.len() >= 3);
    }

    #[test]
    fn for_loop_over_a_range_materializes_it_into_an_array_first() {
        let module = lower("for i in 1..3\n\ti\n");
        let main = &module.functions[0];
        let has_range_to_array = main.blocks.iter().any(|b| b.instructions.iter().any(|(_, i)| matches!(i, Inst::RangeToArray(_))));
        assert!(has_range_to_array);
    }

    #[test]
    fn for_loop_over_a_table_reads_key_and_value_from_its_entries() {
        let module = lower("t := {1: 2, 3: 4}\nfor k, v in t\n\tk + v\n");
        let main = &module.functions[0];
        let has_table_entries = main.blocks.iter().any(|b| b.instructions.iter().any(|(_, i)| matches!(i, Inst::TableEntries(_))));
        assert!(has_table_entries);
    }

    #[test]
    fn when_lowers_to_a_chain_of_equality_tests() {
        let module = lower("x := 2\nwhen x\n\tis 1\n\t\t\"one\"\n\telse\n\t\t\"other\"\n");
        let main = &module.functions[0];
        let has_eq = main.blocks.iter().any(|b| b.instructions.iter().any(|(_, i)| matches!(i, Inst::Cmp { op: CmpOp::Eq, .. })));
        assert!(has_eq);
    }

    #[test]
    fn when_case_with_an_unbound_name_binds_rather_than_compares() {
        let module = lower("x := 2\nwhen x\n\tis n\n\t\tn\n");
        let main = &module.functions[0];
        let has_eq = main.blocks.iter().any(|b| b.instructions.iter().any(|(_, i)| matches!(i, Inst::Cmp { op: CmpOp::Eq, .. })));
        assert!(!has_eq);
    }

    #[test]
    fn repeat_loops_unconditionally_until_stop() {
        let module = lower("x := 0\nrepeat\n\tx += 1\n\tif x == 3\n\t\tstop\n");
        let main = &module.functions[0];
        assert!(main.blocks.len() >= 3);
    }

    #[test]
    fn dereference_and_heap_allocate_round_trip_through_the_ir() {
        let module = lower("p := @5\nv := p^\n");
        let main = &module.functions[0];
        let has_alloc = main.blocks.iter().any(|b| b.instructions.iter().any(|(_, i)| matches!(i, Inst::HeapAlloc(_))));
        let has_deref = main.blocks.iter().any(|b| b.instructions.iter().any(|(_, i)| matches!(i, Inst::Dereference(_))));
        assert!(has_alloc && has_deref);
    }

    #[test]
    fn a_table_literal_lowers_to_make_table() {
        let module = lower("t := {1: 2, 3: 4}\n");
        let main = &module.functions[0];
        let has_table = main.blocks.iter().any(|b| b.instructions.iter().any(|(_, i)| matches!(i, Inst::MakeTable { .. })));
        assert!(has_table);
    }

    #[test]
    fn indexing_a_table_lowers_to_table_index_not_array_index() {
        let module = lower("t := {1: 2, 3: 4}\nx := t[1]\n");
        let main = &module.functions[0];
        let has_table_index = main.blocks.iter().any(|b| b.instructions.iter().any(|(_, i)| matches!(i, Inst::TableIndex { .. })));
        let has_array_index = main.blocks.iter().any(|b| b.instructions.iter().any(|(_, i)| matches!(i, Inst::ArrayIndex { .. })));
        assert!(has_table_index);
        assert!(!has_array_index);
    }

    #[test]
    fn a_percent_literal_lowers_to_const_percent() {
        let module = lower("x := 50<%>\n");
        let main = &module.functions[0];
        let has_percent = main.blocks.iter().any(|b| b.instructions.iter().any(|(_, i)| matches!(i, Inst::ConstPercent(_))));
        assert!(has_percent);
    }

    #[test]
    fn a_top_level_function_def_lowers_independently_of_main() {
        let module = lower("func add(a: Int64, b: Int64) -> Int64\n\treturn a + b\nx := add(1, 2)\n");
        assert_eq!(module.functions.len(), 2);
        let add = module.functions.iter().find(|f| f.params.len() == 2).expect("add has two parameters");
        assert!(add.blocks.iter().any(|b| b.instructions.iter().any(|(_, i)| matches!(i, Inst::Param(_)))));
    }

    #[test]
    fn a_method_call_desugars_to_a_function_call_with_the_receiver_first() {
        let module = lower("x := \"hi\".uppercased()\n");
        let main = &module.functions[0];
        let call = main.blocks.iter().find_map(|b| b.instructions.iter().find_map(|(_, i)| match i {
            Inst::Call { args, .. } => Some(args.len()),
            _ => None,
        }));
        assert_eq!(call, Some(1));
    }
}
