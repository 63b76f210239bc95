//! The type system: a hash-consed sum-of-variants `Type`, interned so
//! equality is a single `TypeId` comparison (invariant: two types are
//! equal iff they hash-cons to the same handle — see `tests::` below for
//! the property test from spec §8.1).
//!
//! Table layout (`entry_size`/`value_offset`) is intentionally kept out
//! of the hash-consing key: those are derived, backend-specific numbers
//! computed once during lowering (see [`crate::lower`]) and cached in
//! [`TypeInterner::table_layout`] keyed by the already-interned
//! `TypeId`. Folding them into `TypeData` would let two structurally
//! identical tables hash to different ids depending on lowering order,
//! which would violate hash-consing.

use crate::intern::Symbol;
use crate::units::Unit;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeData {
    Bool,
    Void,
    Abort,
    Char,
    Int { bits: u8, units: Unit, unsigned: bool },
    Num { bits: u8, units: Unit },
    Range,
    Pointer { pointed: TypeId, optional: bool, is_stack: bool },
    Array { item: TypeId },
    Table { key: TypeId, value: TypeId },
    Struct { name: Option<Symbol>, field_names: Vec<Symbol>, field_types: Vec<TypeId>, units: Unit },
    Union { field_names: Vec<Symbol>, field_types: Vec<TypeId> },
    Tag { name: Symbol, names: Vec<Symbol>, values: Vec<i64> },
    TaggedUnion { name: Symbol, tag_type: TypeId, data: TypeId },
    Function { arg_names: Vec<Symbol>, arg_types: Vec<TypeId>, arg_defaults: Vec<bool>, ret: TypeId },
    Generator { generated: TypeId },
    TypeValue { of: Option<TypeId> },
    Variant { name: Symbol, variant_of: TypeId },
    Module,
}

#[derive(Debug, Clone, Copy)]
pub struct TableLayout {
    pub entry_size: usize,
    pub value_offset: usize,
}

/// Hash-consing interner for [`TypeData`]: `intern` always returns the same
/// `TypeId` for structurally equal data, and flattens `Generator<Generator<T>>`
/// into `Generator<T>` per spec invariant 3.
pub struct TypeInterner {
    map: HashMap<TypeData, TypeId>,
    vec: Vec<TypeData>,
    table_layout: HashMap<TypeId, TableLayout>,

    pub bool_ty: TypeId,
    pub void_ty: TypeId,
    pub abort_ty: TypeId,
    pub char_ty: TypeId,
    pub range_ty: TypeId,
    pub module_ty: TypeId,
}

impl TypeInterner {
    pub fn new() -> Self {
        let mut interner = TypeInterner {
            map: HashMap::new(),
            vec: Vec::new(),
            table_layout: HashMap::new(),
            bool_ty: TypeId(0),
            void_ty: TypeId(0),
            abort_ty: TypeId(0),
            char_ty: TypeId(0),
            range_ty: TypeId(0),
            module_ty: TypeId(0),
        };
        interner.bool_ty = interner.intern(TypeData::Bool);
        interner.void_ty = interner.intern(TypeData::Void);
        interner.abort_ty = interner.intern(TypeData::Abort);
        interner.char_ty = interner.intern(TypeData::Char);
        interner.range_ty = interner.intern(TypeData::Range);
        interner.module_ty = interner.intern(TypeData::Module);
        interner
    }

    pub fn intern(&mut self, data: TypeData) -> TypeId {
        // Generator<Generator<T>> flattens to Generator<T>.
        let data = if let TypeData::Generator { generated } = data {
            match self.get(generated) {
                TypeData::Generator { generated: inner } => TypeData::Generator { generated: *inner },
                _ => TypeData::Generator { generated },
            }
        } else {
            data
        };
        if let Some(&id) = self.map.get(&data) {
            return id;
        }
        let id = TypeId(self.vec.len() as u32);
        self.vec.push(data.clone());
        self.map.insert(data, id);
        id
    }

    pub fn get(&self, id: TypeId) -> &TypeData {
        &self.vec[id.index()]
    }

    pub fn set_table_layout(&mut self, table: TypeId, layout: TableLayout) {
        self.table_layout.insert(table, layout);
    }

    pub fn table_layout(&self, table: TypeId) -> Option<TableLayout> {
        self.table_layout.get(&table).copied()
    }

    pub fn is_numeric(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeData::Int { .. } | TypeData::Num { .. })
    }

    pub fn units_of(&self, id: TypeId) -> Unit {
        match self.get(id) {
            TypeData::Int { units, .. } | TypeData::Num { units, .. } => units.clone(),
            _ => Unit::dimensionless(),
        }
    }

    /// `Int8 < Int16 < Int32 < Int64 < Num32 < Num64`.
    pub fn numeric_priority(&self, id: TypeId) -> Option<u8> {
        match self.get(id) {
            TypeData::Int { bits: 8, .. } => Some(0),
            TypeData::Int { bits: 16, .. } => Some(1),
            TypeData::Int { bits: 32, .. } => Some(2),
            TypeData::Int { bits: 64, .. } => Some(3),
            TypeData::Num { bits: 32, .. } => Some(4),
            TypeData::Num { bits: 64, .. } => Some(5),
            _ => None,
        }
    }

    pub fn is_optional_pointer(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeData::Pointer { optional: true, .. })
    }

    pub fn pretty(&self, id: TypeId, interner: &crate::intern::Interner) -> String {
        match self.get(id) {
            TypeData::Bool => "Bool".into(),
            TypeData::Void => "Void".into(),
            TypeData::Abort => "Abort".into(),
            TypeData::Char => "Char".into(),
            TypeData::Range => "Range".into(),
            TypeData::Module => "Module".into(),
            TypeData::Int { bits, units, unsigned } => {
                let base = format!("{}Int{}", if *unsigned { "U" } else { "" }, bits);
                if units.is_dimensionless() { base } else { format!("{}<{}>", base, units.display(interner)) }
            }
            TypeData::Num { bits, units } => {
                let base = format!("Num{}", bits);
                if units.is_dimensionless() { base } else { format!("{}<{}>", base, units.display(interner)) }
            }
            TypeData::Pointer { pointed, optional, .. } => {
                format!("{}{}", if *optional { "?" } else { "@" }, self.pretty(*pointed, interner))
            }
            TypeData::Array { item } => format!("[{}]", self.pretty(*item, interner)),
            TypeData::Table { key, value } => {
                format!("{{{}:{}}}", self.pretty(*key, interner), self.pretty(*value, interner))
            }
            TypeData::Struct { name, field_names, field_types, .. } => {
                let label = name.map(|s| interner.resolve(s).to_string()).unwrap_or_default();
                let fields: Vec<String> = field_names
                    .iter()
                    .zip(field_types)
                    .map(|(n, t)| format!("{}:{}", interner.resolve(*n), self.pretty(*t, interner)))
                    .collect();
                format!("{}{{{}}}", label, fields.join(","))
            }
            TypeData::Union { field_names, field_types } => {
                let fields: Vec<String> = field_names
                    .iter()
                    .zip(field_types)
                    .map(|(n, t)| format!("{}:{}", interner.resolve(*n), self.pretty(*t, interner)))
                    .collect();
                format!("Union({})", fields.join(","))
            }
            TypeData::Tag { name, .. } => interner.resolve(*name).to_string(),
            TypeData::TaggedUnion { name, .. } => interner.resolve(*name).to_string(),
            TypeData::Function { arg_types, ret, .. } => {
                let args: Vec<String> = arg_types.iter().map(|t| self.pretty(*t, interner)).collect();
                format!("func({})->{}", args.join(","), self.pretty(*ret, interner))
            }
            TypeData::Generator { generated } => format!("Generator<{}>", self.pretty(*generated, interner)),
            TypeData::TypeValue { of } => match of {
                Some(t) => format!("Type<{}>", self.pretty(*t, interner)),
                None => "Type".into(),
            },
            TypeData::Variant { name, .. } => interner.resolve(*name).to_string(),
        }
    }
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_consing_same_data_returns_same_id() {
        let mut types = TypeInterner::new();
        let a = types.intern(TypeData::Int { bits: 32, units: Unit::dimensionless(), unsigned: false });
        let b = types.intern(TypeData::Int { bits: 32, units: Unit::dimensionless(), unsigned: false });
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_units_produce_distinct_types() {
        let mut types = TypeInterner::new();
        let mut interner = crate::intern::Interner::new();
        let m = Unit::normalize("m", &mut interner);
        let s = Unit::normalize("s", &mut interner);
        let a = types.intern(TypeData::Int { bits: 64, units: m, unsigned: false });
        let b = types.intern(TypeData::Int { bits: 64, units: s, unsigned: false });
        assert_ne!(a, b);
    }

    #[test]
    fn generator_of_generator_flattens() {
        let mut types = TypeInterner::new();
        let inner = types.intern(TypeData::Generator { generated: types.void_ty });
        let outer = types.intern(TypeData::Generator { generated: inner });
        assert_eq!(outer, inner);
    }

    #[test]
    fn numeric_priority_orders_int_before_num() {
        let mut types = TypeInterner::new();
        let i8 = types.intern(TypeData::Int { bits: 8, units: Unit::dimensionless(), unsigned: false });
        let n32 = types.intern(TypeData::Num { bits: 32, units: Unit::dimensionless() });
        assert!(types.numeric_priority(i8) < types.numeric_priority(n32));
    }
}
