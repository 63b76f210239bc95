//! The backend contract and a reference implementation.
//!
//! [`Backend`] is the minimal trait surface lowering targets: build a
//! basic block, emit an instruction into it, wire up a terminator. A
//! real ahead-of-time backend (native codegen) would implement this by
//! emitting machine IR instead; [`Interpreter`] implements it by
//! executing the constant-folded IR directly, so the whole pipeline
//! (parse → typecheck → lower → run) works without any native codegen
//! dependency.

use crate::intern::{Interner, Symbol};
use crate::ir::{ArithOp, BasicBlock, BlockId, CmpOp, Function, Inst, Module, Terminator, ValueId};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    Int(i64),
    Num(f64),
    /// A numeric value whose unit is the display-only `%` atom.
    Percent(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Array(Vec<RuntimeValue>),
    Struct(Vec<RuntimeValue>),
    Table(Vec<(RuntimeValue, RuntimeValue)>),
    Range { start: i64, step: i64, stop: i64 },
    Pointer(Box<RuntimeValue>),
    Void,
}

impl RuntimeValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            RuntimeValue::Bool(b) => *b,
            RuntimeValue::Int(n) => *n != 0,
            _ => true,
        }
    }
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeValue::Int(n) => write!(f, "{}", n),
            RuntimeValue::Num(n) => write!(f, "{}", n),
            RuntimeValue::Percent(n) => write!(f, "{}", n * 100.0),
            RuntimeValue::Bool(b) => write!(f, "{}", b),
            RuntimeValue::Char(c) => write!(f, "{}", c),
            RuntimeValue::Str(s) => write!(f, "{}", s),
            RuntimeValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            RuntimeValue::Struct(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, "}}")
            }
            RuntimeValue::Table(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}=>{}", k, v)?;
                }
                write!(f, "}}")
            }
            RuntimeValue::Range { start, step, stop } => {
                if *step == 1 {
                    write!(f, "{}..{}", start, stop)
                } else {
                    write!(f, "{}..{}..{}", start, step, stop)
                }
            }
            RuntimeValue::Pointer(inner) => write!(f, "@{}", inner),
            RuntimeValue::Void => write!(f, "void"),
        }
    }
}

/// A backend executes (or emits) one [`BasicBlock`] at a time. Lowering
/// never calls into a backend directly — it only builds [`crate::ir`]
/// values — so the same IR can drive an interpreter during REPL use and
/// a native codegen backend during ahead-of-time compilation.
pub trait Backend {
    type Output;

    fn run_function(&mut self, module: &Module, func: &Function) -> Result<Self::Output, BackendError>;
}

#[derive(Debug, Clone)]
pub struct BackendError(pub String);

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BackendError {}

/// Executes IR directly: each basic block's instructions populate a
/// `ValueId -> RuntimeValue` table, terminators pick the next block.
pub struct Interpreter<'a> {
    interner: &'a Interner,
}

impl<'a> Interpreter<'a> {
    pub fn new(interner: &'a Interner) -> Self {
        Interpreter { interner }
    }

    /// Runs `func` with `args` bound to its `Inst::Param`s, recursing into
    /// `module.functions` for any call it makes along the way.
    fn call(&self, module: &Module, func: &Function, args: &[RuntimeValue]) -> Result<RuntimeValue, BackendError> {
        let mut values = HashMap::new();
        let mut block_id = func.entry;
        loop {
            let block = func.blocks.iter().find(|b| b.id == block_id).ok_or_else(|| BackendError("missing block".into()))?;
            match self.eval_block(module, func, block, &mut values, args)? {
                ControlFlow::Jump(next) => block_id = next,
                ControlFlow::Return(v) => return Ok(v),
            }
        }
    }

    fn eval_block(
        &self,
        module: &Module,
        func: &Function,
        block: &BasicBlock,
        values: &mut HashMap<ValueId, RuntimeValue>,
        args: &[RuntimeValue],
    ) -> Result<ControlFlow, BackendError> {
        for (id, inst) in &block.instructions {
            let value = self.eval_inst(module, inst, values, args)?;
            values.insert(*id, value);
        }
        match &block.terminator {
            Terminator::Return(v) => Ok(ControlFlow::Return(v.and_then(|id| values.get(&id).cloned()).unwrap_or(RuntimeValue::Void))),
            Terminator::Branch(target) => Ok(ControlFlow::Jump(*target)),
            Terminator::CondBranch { cond, then_block, else_block } => {
                let cond = values.get(cond).cloned().unwrap_or(RuntimeValue::Bool(false));
                Ok(ControlFlow::Jump(if cond.is_truthy() { *then_block } else { *else_block }))
            }
            Terminator::Unreachable => Err(BackendError(format!("reached an unterminated block in `{}`", self.interner.resolve(func.name)))),
        }
    }

    fn eval_inst(
        &self,
        module: &Module,
        inst: &Inst,
        values: &HashMap<ValueId, RuntimeValue>,
        args: &[RuntimeValue],
    ) -> Result<RuntimeValue, BackendError> {
        let get = |id: &ValueId| values.get(id).cloned().unwrap_or(RuntimeValue::Void);
        Ok(match inst {
            Inst::ConstInt(n) => RuntimeValue::Int(*n),
            Inst::ConstNum(n) => RuntimeValue::Num(*n),
            Inst::ConstPercent(n) => RuntimeValue::Percent(*n),
            Inst::ConstBool(b) => RuntimeValue::Bool(*b),
            Inst::ConstChar(c) => RuntimeValue::Char(*c),
            Inst::ConstString(s) => RuntimeValue::Str(s.clone()),
            Inst::Param(index) => args.get(*index).cloned().unwrap_or(RuntimeValue::Void),
            Inst::Arith { op, lhs, rhs } => self.eval_arith(*op, get(lhs), get(rhs))?,
            Inst::Cmp { op, lhs, rhs } => RuntimeValue::Bool(self.eval_cmp(*op, get(lhs), get(rhs))?),
            Inst::Not(v) => RuntimeValue::Bool(!get(v).is_truthy()),
            Inst::Negate(v) => match get(v) {
                RuntimeValue::Int(n) => RuntimeValue::Int(-n),
                RuntimeValue::Num(n) => RuntimeValue::Num(-n),
                other => return Err(BackendError(format!("cannot negate {}", other))),
            },
            Inst::Alloca(_) => RuntimeValue::Void,
            Inst::Load(slot) => get(slot),
            Inst::Store { value, .. } => get(value),
            Inst::ArrayLiteral(items) => RuntimeValue::Array(items.iter().map(get).collect()),
            Inst::ArrayIndex { array, index } => match (get(array), get(index)) {
                (RuntimeValue::Array(items), RuntimeValue::Int(i)) => {
                    let i = i as usize;
                    if i == 0 || i > items.len() {
                        return Err(BackendError(format!("index {} is not inside the array (1..{})", i, items.len())));
                    }
                    items[i - 1].clone()
                }
                (other, _) => return Err(BackendError(format!("cannot index {}", other))),
            },
            Inst::ArrayLen(v) => match get(v) {
                RuntimeValue::Array(items) => RuntimeValue::Int(items.len() as i64),
                RuntimeValue::Str(s) => RuntimeValue::Int(s.len() as i64),
                other => return Err(BackendError(format!("cannot take the length of {}", other))),
            },
            Inst::StructLiteral { fields } => RuntimeValue::Struct(fields.iter().map(get).collect()),
            Inst::StructField { base, index } => match get(base) {
                RuntimeValue::Struct(fields) => fields.get(*index).cloned().unwrap_or(RuntimeValue::Void),
                other => return Err(BackendError(format!("cannot access a field of {}", other))),
            },
            Inst::MakeRange { first, step, last } => {
                let start = first.map(|id| as_i64(&get(&id))).transpose()?.unwrap_or(0);
                let step = step.map(|id| as_i64(&get(&id))).transpose()?.unwrap_or(1);
                let stop = last.map(|id| as_i64(&get(&id))).transpose()?.unwrap_or(i64::MAX);
                RuntimeValue::Range { start, step, stop }
            }
            Inst::RangeToArray(v) => match get(v) {
                RuntimeValue::Range { start, step, stop } => {
                    if step == 0 {
                        return Err(BackendError("range step cannot be zero".into()));
                    }
                    let mut items = Vec::new();
                    let mut x = start;
                    while (step > 0 && x <= stop) || (step < 0 && x >= stop) {
                        items.push(RuntimeValue::Int(x));
                        x += step;
                    }
                    RuntimeValue::Array(items)
                }
                other => return Err(BackendError(format!("cannot iterate {}", other))),
            },
            Inst::MakeTable { entries } => RuntimeValue::Table(entries.iter().map(|(k, v)| (get(k), get(v))).collect()),
            Inst::TableEntries(v) => match get(v) {
                RuntimeValue::Table(entries) => RuntimeValue::Array(entries.into_iter().map(|(k, v)| RuntimeValue::Struct(vec![k, v])).collect()),
                other => return Err(BackendError(format!("cannot iterate {}", other))),
            },
            Inst::TableIndex { table, key } => match get(table) {
                RuntimeValue::Table(entries) => {
                    let key = get(key);
                    entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone()).unwrap_or(RuntimeValue::Void)
                }
                other => return Err(BackendError(format!("cannot index {}", other))),
            },
            Inst::HeapAlloc(v) => RuntimeValue::Pointer(Box::new(get(v))),
            Inst::Dereference(v) => match get(v) {
                RuntimeValue::Pointer(inner) => *inner,
                other => return Err(BackendError(format!("cannot dereference {}", other))),
            },
            Inst::Call { func, args: call_args } => {
                let call_args: Vec<RuntimeValue> = call_args.iter().map(get).collect();
                match module.functions.iter().find(|f| f.name == *func) {
                    Some(target) => self.call(module, target, &call_args)?,
                    None => self.call_builtin(*func, &call_args)?,
                }
            }
            Inst::Phi(inputs) => inputs.iter().find_map(|(_, id)| values.get(id).cloned()).unwrap_or(RuntimeValue::Void),
        })
    }

    /// Dispatches the backend-linked functions registered at environment
    /// construction (see [`crate::env::register_builtins`]) that have no
    /// user-defined function body to look up.
    fn call_builtin(&self, func: Symbol, args: &[RuntimeValue]) -> Result<RuntimeValue, BackendError> {
        let name = self.interner.resolve(func);
        match name {
            "say" => {
                let value = args.first().cloned().unwrap_or(RuntimeValue::Void);
                let end = match args.get(1) {
                    Some(RuntimeValue::Str(s)) => s.clone(),
                    _ => "\n".to_string(),
                };
                print!("{}{}", value, end);
                Ok(RuntimeValue::Void)
            }
            "uppercased" => Ok(RuntimeValue::Str(as_str(args.first())?.to_uppercase())),
            "lowercased" => Ok(RuntimeValue::Str(as_str(args.first())?.to_lowercase())),
            "trimmed" => Ok(RuntimeValue::Str(as_str(args.first())?.trim().to_string())),
            "starts_with" => Ok(RuntimeValue::Bool(as_str(args.first())?.starts_with(as_str(args.get(1))?))),
            "ends_with" => Ok(RuntimeValue::Bool(as_str(args.first())?.ends_with(as_str(args.get(1))?))),
            "sin" => Ok(RuntimeValue::Num(as_f64(args.first().unwrap_or(&RuntimeValue::Void))?.sin())),
            "cos" => Ok(RuntimeValue::Num(as_f64(args.first().unwrap_or(&RuntimeValue::Void))?.cos())),
            "sqrt" => Ok(RuntimeValue::Num(as_f64(args.first().unwrap_or(&RuntimeValue::Void))?.sqrt())),
            _ => Err(BackendError(format!("undefined function `{}`", name))),
        }
    }

    fn eval_arith(&self, op: ArithOp, lhs: RuntimeValue, rhs: RuntimeValue) -> Result<RuntimeValue, BackendError> {
        Ok(match (lhs, rhs) {
            (RuntimeValue::Int(a), RuntimeValue::Int(b)) => RuntimeValue::Int(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a.checked_div(b).ok_or_else(|| BackendError("division by zero".into()))?,
                ArithOp::Mod => a.checked_rem(b).ok_or_else(|| BackendError("division by zero".into()))?,
                ArithOp::Pow => a.pow(b.max(0) as u32),
            }),
            (a, b) => {
                let (a, b) = (as_f64(&a)?, as_f64(&b)?);
                RuntimeValue::Num(match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                    ArithOp::Mod => a % b,
                    ArithOp::Pow => a.powf(b),
                })
            }
        })
    }

    fn eval_cmp(&self, op: CmpOp, lhs: RuntimeValue, rhs: RuntimeValue) -> Result<bool, BackendError> {
        let ordering = match (&lhs, &rhs) {
            (RuntimeValue::Int(a), RuntimeValue::Int(b)) => a.partial_cmp(b),
            (RuntimeValue::Char(a), RuntimeValue::Char(b)) => a.partial_cmp(b),
            (RuntimeValue::Str(a), RuntimeValue::Str(b)) => a.partial_cmp(b),
            _ => as_f64(&lhs)?.partial_cmp(&as_f64(&rhs)?),
        };
        Ok(match op {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => matches!(ordering, Some(std::cmp::Ordering::Less)),
            CmpOp::Le => matches!(ordering, Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)),
            CmpOp::Gt => matches!(ordering, Some(std::cmp::Ordering::Greater)),
            CmpOp::Ge => matches!(ordering, Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)),
        })
    }
}

fn as_f64(v: &RuntimeValue) -> Result<f64, BackendError> {
    match v {
        RuntimeValue::Int(n) => Ok(*n as f64),
        RuntimeValue::Num(n) => Ok(*n),
        RuntimeValue::Percent(n) => Ok(*n),
        other => Err(BackendError(format!("expected a number, found {}", other))),
    }
}

fn as_i64(v: &RuntimeValue) -> Result<i64, BackendError> {
    match v {
        RuntimeValue::Int(n) => Ok(*n),
        other => Err(BackendError(format!("expected an integer, found {}", other))),
    }
}

fn as_str(v: Option<&RuntimeValue>) -> Result<&str, BackendError> {
    match v {
        Some(RuntimeValue::Str(s)) => Ok(s.as_str()),
        Some(other) => Err(BackendError(format!("expected a string, found {}", other))),
        None => Err(BackendError("expected a string argument".into())),
    }
}

enum ControlFlow {
    Jump(BlockId),
    Return(RuntimeValue),
}

impl<'a> Backend for Interpreter<'a> {
    type Output = RuntimeValue;

    fn run_function(&mut self, module: &Module, func: &Function) -> Result<RuntimeValue, BackendError> {
        self.call(module, func, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;
    use crate::lexer::Lexer;
    use crate::lower::lower_program;
    use crate::parser::parse_program;
    use crate::typeck::check_program;
    use crate::types::TypeInterner;

    fn run(source: &str) -> RuntimeValue {
        let mut interner = Interner::new();
        let tokens = Lexer::tokenize(source, &mut interner).expect("lex");
        let block = parse_program(&tokens, &mut interner).expect("parse");
        let mut types = TypeInterner::new();
        let table = check_program(&block, &mut types, &mut interner).expect("typecheck");
        let module = lower_program(&block, &table, &mut types, &mut interner).expect("lower");
        let mut interp = Interpreter::new(&interner);
        interp.run_function(&module, &module.functions[0]).expect("run")
    }

    #[test]
    fn evaluates_arithmetic() {
        let result = run("x := 1 + 2 * 3\nreturn x\n");
        assert_eq!(result, RuntimeValue::Int(7));
    }

    #[test]
    fn array_index_out_of_bounds_reports_one_based_range() {
        let mut interner = Interner::new();
        let tokens = Lexer::tokenize("x := [10, 20]\nreturn x[5]\n", &mut interner).unwrap();
        let block = parse_program(&tokens, &mut interner).unwrap();
        let mut types = TypeInterner::new();
        let table = check_program(&block, &mut types, &mut interner);
        // indices aren't statically checked; this exercises the interpreter's bound check instead.
        if let Ok(table) = table {
            let module = lower_program(&block, &table, &mut types, &mut interner).unwrap();
            let mut interp = Interpreter::new(&interner);
            let err = interp.run_function(&module, &module.functions[0]).unwrap_err();
            assert!(err.0.contains("is not inside the array"));
        }
    }

    #[test]
    fn while_loop_sums_to_the_expected_total() {
        let result = run("x := 0\ni := 0\nwhile i < 5\n\tx += i\n\ti += 1\nreturn x\n");
        assert_eq!(result, RuntimeValue::Int(10));
    }
}
