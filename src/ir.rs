//! Backend-agnostic intermediate representation: basic blocks ending in
//! a single terminator, SSA-style value ids referencing either a
//! constant or the result of a prior instruction. [`crate::lower`]
//! builds this from the AST; [`crate::backend`] consumes it.

use crate::intern::Symbol;
use crate::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub enum Inst {
    ConstInt(i64),
    ConstNum(f64),
    ConstBool(bool),
    ConstChar(char),
    ConstString(String),
    /// A numeric literal whose unit is the display-only `%` atom: the
    /// backend prints its value multiplied by 100.
    ConstPercent(f64),
    /// The `index`-th parameter of the enclosing function.
    Param(usize),
    Arith { op: ArithOp, lhs: ValueId, rhs: ValueId },
    Cmp { op: CmpOp, lhs: ValueId, rhs: ValueId },
    Not(ValueId),
    Negate(ValueId),
    /// Stack slot for a local; `Load`/`Store` read and write through it.
    Alloca(TypeId),
    Load(ValueId),
    Store { addr: ValueId, value: ValueId },
    ArrayLiteral(Vec<ValueId>),
    ArrayIndex { array: ValueId, index: ValueId },
    ArrayLen(ValueId),
    StructLiteral { fields: Vec<ValueId> },
    StructField { base: ValueId, index: usize },
    Call { func: Symbol, args: Vec<ValueId> },
    /// Merges values coming from distinct predecessor blocks.
    Phi(Vec<(BlockId, ValueId)>),

    /// Builds a `Range` value from (optional) first/step/last operands.
    MakeRange { first: Option<ValueId>, step: Option<ValueId>, last: Option<ValueId> },
    /// Materializes a `Range` into an array of its elements so `for` can
    /// drive every iterable kind through one array-walking loop shape.
    RangeToArray(ValueId),
    MakeTable { entries: Vec<(ValueId, ValueId)> },
    /// A table's `{key, value}` pairs as an array of 2-field structs, for
    /// `for key, value in table`.
    TableEntries(ValueId),
    TableIndex { table: ValueId, key: ValueId },
    HeapAlloc(ValueId),
    Dereference(ValueId),
}

#[derive(Debug, Clone)]
pub enum Terminator {
    Return(Option<ValueId>),
    Branch(BlockId),
    CondBranch { cond: ValueId, then_block: BlockId, else_block: BlockId },
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instructions: Vec<(ValueId, Inst)>,
    pub terminator: Terminator,
}

impl BasicBlock {
    fn new(id: BlockId) -> Self {
        BasicBlock { id, instructions: Vec::new(), terminator: Terminator::Unreachable }
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Symbol,
    pub params: Vec<(Symbol, TypeId)>,
    pub ret: TypeId,
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
}

#[derive(Debug, Default)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    /// Finds the function named `main` by symbol identity — the implicit
    /// entry point is no longer guaranteed to be first once a program
    /// defines its own top-level functions (see [`crate::lower`]).
    pub fn main_function(&self, main: Symbol) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == main)
    }
}

/// Incrementally builds one [`Function`]'s blocks and instructions,
/// handing out fresh [`ValueId`]s/[`BlockId`]s as it goes.
pub struct FunctionBuilder {
    name: Symbol,
    params: Vec<(Symbol, TypeId)>,
    ret: TypeId,
    blocks: Vec<BasicBlock>,
    next_value: u32,
    current: BlockId,
}

impl FunctionBuilder {
    pub fn new(name: Symbol, params: Vec<(Symbol, TypeId)>, ret: TypeId) -> Self {
        let entry = BlockId(0);
        FunctionBuilder { name, params, ret, blocks: vec![BasicBlock::new(entry)], next_value: 0, current: entry }
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id));
        id
    }

    pub fn push(&mut self, inst: Inst) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        let block = self.block_mut(self.current);
        block.instructions.push((id, inst));
        id
    }

    pub fn terminate(&mut self, term: Terminator) {
        self.block_mut(self.current).terminator = term;
    }

    pub fn block_terminated(&self, block: BlockId) -> bool {
        !matches!(self.block_ref(block).terminator, Terminator::Unreachable)
    }

    fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0 as usize]
    }

    fn block_ref(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn finish(self) -> Function {
        Function { name: self.name, params: self.params, ret: self.ret, blocks: self.blocks, entry: BlockId(0) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;
    use crate::types::TypeInterner;

    #[test]
    fn builder_assigns_increasing_value_ids() {
        let mut interner = Interner::new();
        let types = TypeInterner::new();
        let name = interner.intern("f");
        let mut fb = FunctionBuilder::new(name, vec![], types.void_ty);
        let a = fb.push(Inst::ConstInt(1));
        let b = fb.push(Inst::ConstInt(2));
        assert_ne!(a, b);
        fb.terminate(Terminator::Return(None));
        let func = fb.finish();
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(func.blocks[0].instructions.len(), 2);
    }

    #[test]
    fn new_block_gets_a_fresh_id() {
        let mut interner = Interner::new();
        let types = TypeInterner::new();
        let name = interner.intern("f");
        let mut fb = FunctionBuilder::new(name, vec![], types.void_ty);
        let b1 = fb.new_block();
        let b2 = fb.new_block();
        assert_ne!(b1, b2);
    }
}
