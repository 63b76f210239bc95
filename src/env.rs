//! Compile-time environment: the chain of lexical scopes the typechecker
//! and lowering pass share, plus the handful of process-global tables
//! (per-type method namespaces, tuple-type interning, synthesized
//! print/compare/hash function caches, and the loop-label stack for
//! `skip`/`stop` target resolution).
//!
//! Generic over `H`, the opaque handle type lowering uses for an IR
//! value or basic block (see [`crate::ir`]). Keeping `Environment`
//! generic lets the typechecker reuse the same scope-chain machinery
//! before any backend handle type exists.

use crate::intern::{Interner, Symbol};
use crate::types::{TypeData, TypeId, TypeInterner};
use crate::units::Unit;
use std::collections::HashMap;

/// What a name in scope resolves to: its type, and — once lowering has
/// run — the backend handles used to read (`rvalue`) and write
/// (`lvalue`) it, or the function value if it names a callable.
#[derive(Debug, Clone)]
pub struct Binding<H: Clone> {
    pub ty: TypeId,
    pub lvalue: Option<H>,
    pub rvalue: Option<H>,
    pub func: Option<H>,
    pub is_global: bool,
    /// Set when this name is itself a type (`Int32`, a struct name, ...),
    /// so expressions like `Int32.max` can be typechecked.
    pub type_value: Option<TypeId>,
}

impl<H: Clone> Binding<H> {
    pub fn variable(ty: TypeId, is_global: bool) -> Self {
        Binding { ty, lvalue: None, rvalue: None, func: None, is_global, type_value: None }
    }

    pub fn function(ty: TypeId, func: H, is_global: bool) -> Self {
        Binding { ty, lvalue: None, rvalue: None, func: Some(func), is_global, type_value: None }
    }

    pub fn type_binding(type_value_ty: TypeId, named: TypeId) -> Self {
        Binding { ty: type_value_ty, lvalue: None, rvalue: None, func: None, is_global: true, type_value: Some(named) }
    }
}

/// A `skip <label>` / `stop <label>` target: the basic blocks a labeled
/// loop jumps to, plus the label name used to disambiguate nested loops.
#[derive(Debug, Clone)]
pub struct LoopLabel<H: Clone> {
    pub label: Option<Symbol>,
    pub skip_target: H,
    pub stop_target: H,
}

pub struct Environment<H: Clone> {
    scopes: Vec<HashMap<Symbol, Binding<H>>>,
    namespaces: HashMap<TypeId, HashMap<Symbol, Binding<H>>>,
    tuple_types: HashMap<Vec<TypeId>, TypeId>,
    print_funcs: HashMap<TypeId, H>,
    compare_funcs: HashMap<TypeId, H>,
    hash_funcs: HashMap<TypeId, H>,
    functions: HashMap<Symbol, H>,
    loop_labels: Vec<LoopLabel<H>>,
    current_file: Option<String>,
}

impl<H: Clone> Environment<H> {
    pub fn new() -> Self {
        Environment {
            scopes: vec![HashMap::new()],
            namespaces: HashMap::new(),
            tuple_types: HashMap::new(),
            print_funcs: HashMap::new(),
            compare_funcs: HashMap::new(),
            hash_funcs: HashMap::new(),
            functions: HashMap::new(),
            loop_labels: Vec::new(),
            current_file: None,
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn declare(&mut self, name: Symbol, binding: Binding<H>) {
        self.scopes.last_mut().expect("root scope always present").insert(name, binding);
    }

    pub fn lookup(&self, name: Symbol) -> Option<&Binding<H>> {
        self.scopes.iter().rev().find_map(|scope| scope.get(&name))
    }

    pub fn lookup_mut(&mut self, name: Symbol) -> Option<&mut Binding<H>> {
        self.scopes.iter_mut().rev().find_map(|scope| scope.get_mut(&name))
    }

    /// Whether declaring `name` right now would bind at module scope
    /// (scope depth 1), per the REPL's "promote to global" rule.
    pub fn at_global_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    pub fn namespace(&self, ty: TypeId) -> Option<&HashMap<Symbol, Binding<H>>> {
        self.namespaces.get(&ty)
    }

    pub fn namespace_mut(&mut self, ty: TypeId) -> &mut HashMap<Symbol, Binding<H>> {
        self.namespaces.entry(ty).or_default()
    }

    pub fn intern_tuple(&mut self, fields: Vec<TypeId>, make: impl FnOnce() -> TypeId) -> TypeId {
        if let Some(&id) = self.tuple_types.get(&fields) {
            return id;
        }
        let id = make();
        self.tuple_types.insert(fields, id);
        id
    }

    pub fn print_func(&self, ty: TypeId) -> Option<&H> {
        self.print_funcs.get(&ty)
    }

    pub fn set_print_func(&mut self, ty: TypeId, func: H) {
        self.print_funcs.insert(ty, func);
    }

    pub fn compare_func(&self, ty: TypeId) -> Option<&H> {
        self.compare_funcs.get(&ty)
    }

    pub fn set_compare_func(&mut self, ty: TypeId, func: H) {
        self.compare_funcs.insert(ty, func);
    }

    pub fn hash_func(&self, ty: TypeId) -> Option<&H> {
        self.hash_funcs.get(&ty)
    }

    pub fn set_hash_func(&mut self, ty: TypeId, func: H) {
        self.hash_funcs.insert(ty, func);
    }

    pub fn global_function(&self, name: Symbol) -> Option<&H> {
        self.functions.get(&name)
    }

    pub fn declare_global_function(&mut self, name: Symbol, func: H) {
        self.functions.insert(name, func);
    }

    pub fn push_loop_label(&mut self, label: LoopLabel<H>) {
        self.loop_labels.push(label);
    }

    pub fn pop_loop_label(&mut self) {
        self.loop_labels.pop();
    }

    /// Resolves a `skip`/`stop` target: an unlabeled jump targets the
    /// innermost loop, a labeled one walks outward to the matching label.
    pub fn find_loop_label(&self, label: Option<Symbol>) -> Option<&LoopLabel<H>> {
        match label {
            None => self.loop_labels.last(),
            Some(_) => self.loop_labels.iter().rev().find(|l| l.label == label),
        }
    }

    pub fn current_file(&self) -> Option<&str> {
        self.current_file.as_deref()
    }

    pub fn set_current_file(&mut self, file: String) {
        self.current_file = Some(file);
    }
}

impl<H: Clone> Default for Environment<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers the fixed set of backend-linked functions every program gets
/// for free: `say`, and method namespaces on `String`, `Num64`, `Num32`.
/// Called once at the start of typechecking, before the program's own
/// declarations are processed, so user code can shadow a builtin name the
/// same way it would shadow any other global.
pub fn register_builtins(env: &mut Environment<()>, types: &mut TypeInterner, interner: &mut Interner) {
    let byte = types.intern(TypeData::Int { bits: 8, units: Unit::dimensionless(), unsigned: true });
    let string_ty = types.intern(TypeData::Array { item: byte });
    let num64 = types.intern(TypeData::Num { bits: 64, units: Unit::dimensionless() });
    let num32 = types.intern(TypeData::Num { bits: 32, units: Unit::dimensionless() });
    let void = types.void_ty;
    let bool_ty = types.bool_ty;

    let say_ty = types.intern(TypeData::Function {
        arg_names: vec![interner.intern("value")],
        arg_types: vec![string_ty],
        arg_defaults: vec![false],
        ret: void,
    });
    let say = interner.intern("say");
    env.declare(say, Binding::variable(say_ty, true));

    // Method namespaces carry the signature as seen from the call site
    // (receiver excluded): `s.starts_with(other)` typechecks `other`
    // against `arg_types`, and lowering supplies the receiver as the
    // desugared call's first argument (see `crate::lower`).
    for name in ["uppercased", "lowercased", "trimmed"] {
        let ty = types.intern(TypeData::Function { arg_names: vec![], arg_types: vec![], arg_defaults: vec![], ret: string_ty });
        let sym = interner.intern(name);
        env.namespace_mut(string_ty).insert(sym, Binding::variable(ty, true));
    }
    for name in ["starts_with", "ends_with"] {
        let ty = types.intern(TypeData::Function {
            arg_names: vec![interner.intern("other")],
            arg_types: vec![string_ty],
            arg_defaults: vec![false],
            ret: bool_ty,
        });
        let sym = interner.intern(name);
        env.namespace_mut(string_ty).insert(sym, Binding::variable(ty, true));
    }
    for &num_ty in &[num64, num32] {
        for name in ["sin", "cos", "sqrt"] {
            let ty = types.intern(TypeData::Function { arg_names: vec![], arg_types: vec![], arg_defaults: vec![], ret: num_ty });
            let sym = interner.intern(name);
            env.namespace_mut(num_ty).insert(sym, Binding::variable(ty, true));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeInterner;

    #[test]
    fn lookup_walks_scope_chain_innermost_first() {
        let mut types = TypeInterner::new();
        let mut env: Environment<u32> = Environment::new();
        let x = Symbol::EMPTY;
        env.declare(x, Binding::variable(types.bool_ty, true));
        env.push_scope();
        env.declare(x, Binding::variable(types.char_ty, false));
        assert_eq!(env.lookup(x).unwrap().ty, types.char_ty);
        env.pop_scope();
        assert_eq!(env.lookup(x).unwrap().ty, types.bool_ty);
    }

    #[test]
    fn loop_label_resolves_unlabeled_to_innermost() {
        let mut env: Environment<u32> = Environment::new();
        env.push_loop_label(LoopLabel { label: None, skip_target: 1, stop_target: 2 });
        env.push_loop_label(LoopLabel { label: Some(Symbol::EMPTY), skip_target: 3, stop_target: 4 });
        assert_eq!(env.find_loop_label(None).unwrap().skip_target, 3);
        assert_eq!(env.find_loop_label(Some(Symbol::EMPTY)).unwrap().stop_target, 4);
    }

    #[test]
    fn register_builtins_declares_say_and_string_methods() {
        let mut types = TypeInterner::new();
        let mut interner = Interner::new();
        let mut env: Environment<()> = Environment::new();
        register_builtins(&mut env, &mut types, &mut interner);
        let say = interner.intern("say");
        assert!(env.lookup(say).is_some());
        let byte = types.intern(TypeData::Int { bits: 8, units: Unit::dimensionless(), unsigned: true });
        let string_ty = types.intern(TypeData::Array { item: byte });
        let uppercased = interner.intern("uppercased");
        assert!(env.namespace(string_ty).and_then(|ns| ns.get(&uppercased)).is_some());
    }

    #[test]
    fn tuple_interning_returns_same_id_for_same_fields() {
        let mut types = TypeInterner::new();
        let mut env: Environment<u32> = Environment::new();
        let fields = vec![types.bool_ty, types.char_ty];
        let mut counter = 100;
        let a = env.intern_tuple(fields.clone(), || {
            counter += 1;
            types.module_ty
        });
        let b = env.intern_tuple(fields, || {
            counter += 1;
            types.module_ty
        });
        assert_eq!(a, b);
        assert_eq!(counter, 101);
    }
}
