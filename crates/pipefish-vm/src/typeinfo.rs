//! The concrete-type registry.
//!
//! Every concrete type in a service is a slot in a flat vector, indexed by
//! `ValueType`. Relationships between types — a clone's parent, a parent's
//! is-cloned-by set, a struct's field types — are expressed as indices and
//! abstract types, never as references, so the registry has no ownership
//! cycles and can be shared freely once initialization freezes it.
//!
//! # Design
//!
//! - `TypeInfo` — closed sum over builtin / enum / clone / struct / wrapper
//! - `TypeCheck` — descriptor for jumping into a generated runtime validator
//! - `TypeRegistry` — the vector, label interning, and memoization of
//!   parameterized-type instances by the literal form of their arguments

use crate::values::{self, AbstractType, Value, ValueType};
use indexmap::IndexSet;
use std::collections::HashMap;

/// Descriptor for a generated runtime type-check.
///
/// The validator is generated as an entry in the VM's function table;
/// `call_address` is its slot. Its single input lands at frame slot
/// `in_loc`, its verdict (the validated value, a boolean, or an error)
/// comes back through the frame slot `result_loc` names, and `tok_loc` is
/// the token-table index used to blame failures on the construction site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeCheck {
    pub call_address: usize,
    pub in_loc: u32,
    pub result_loc: u32,
    pub tok_loc: u32,
}

/// Information about one concrete type.
#[derive(Debug, Clone)]
pub enum TypeInfo {
    Builtin {
        name: String,
        /// The clones declared over this type, for `clones{…}` queries.
        cloned_by: AbstractType,
    },
    Enum {
        name: String,
        /// Namespace path prefix, e.g. `"zort."`; empty at the root.
        path: String,
        element_names: Vec<String>,
        private: bool,
    },
    Clone {
        name: String,
        path: String,
        parent: ValueType,
        private: bool,
        is_sliceable: bool,
        is_filterable: bool,
        is_mappable: bool,
        type_check: Option<TypeCheck>,
        type_arguments: Vec<Value>,
    },
    Struct {
        name: String,
        path: String,
        /// Interned label numbers, in declaration order.
        label_numbers: Vec<usize>,
        /// Abstract type of each field, same order.
        fields: Vec<AbstractType>,
        /// label number → field position.
        resolving_map: HashMap<usize, usize>,
        is_snippet: bool,
        private: bool,
        type_check: Option<TypeCheck>,
        type_arguments: Vec<Value>,
    },
    /// An opaque host handle, named but structureless.
    Wrapper { name: String, path: String },
}

impl TypeInfo {
    pub fn name(&self) -> &str {
        match self {
            TypeInfo::Builtin { name, .. }
            | TypeInfo::Enum { name, .. }
            | TypeInfo::Clone { name, .. }
            | TypeInfo::Struct { name, .. }
            | TypeInfo::Wrapper { name, .. } => name,
        }
    }

    /// The name with its namespace path, as printed in literals.
    pub fn literal_name(&self) -> String {
        match self {
            TypeInfo::Builtin { name, .. } => name.clone(),
            TypeInfo::Enum { name, path, .. }
            | TypeInfo::Clone { name, path, .. }
            | TypeInfo::Struct { name, path, .. }
            | TypeInfo::Wrapper { name, path } => format!("{}{}", path, name),
        }
    }

    pub fn is_enum(&self) -> bool {
        matches!(self, TypeInfo::Enum { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, TypeInfo::Struct { .. })
    }

    pub fn is_clone(&self) -> bool {
        matches!(self, TypeInfo::Clone { .. })
    }

    pub fn type_check(&self) -> Option<TypeCheck> {
        match self {
            TypeInfo::Clone { type_check, .. } | TypeInfo::Struct { type_check, .. } => *type_check,
            _ => None,
        }
    }
}

/// The registry: a vector of `TypeInfo` indexed by concrete-type number,
/// plus label interning and parameterized-instance memoization.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    infos: Vec<TypeInfo>,
    labels: IndexSet<String>,
    /// Literal form of a parameterized instance (`"Z{5}"`) → its index.
    instances: HashMap<String, ValueType>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// A registry primed with the builtin types, in the order the constants
    /// in `values` assume.
    pub fn new() -> Self {
        let mut registry = TypeRegistry {
            infos: Vec::new(),
            labels: IndexSet::new(),
            instances: HashMap::new(),
        };
        for name in [
            "undefined value",
            "bling",
            "unsatisfied conditional",
            "ok",
            "null",
            "error",
            "int",
            "bool",
            "string",
            "rune",
            "float",
            "type",
            "func",
            "pair",
            "list",
            "map",
            "set",
            "tuple",
            "label",
            "snippet",
        ] {
            registry.register(TypeInfo::Builtin {
                name: name.to_string(),
                cloned_by: AbstractType::new(),
            });
        }
        registry
    }

    /// Register a type and return its index.
    pub fn register(&mut self, info: TypeInfo) -> ValueType {
        let ix = ValueType(self.infos.len() as u16);
        self.infos.push(info);
        ix
    }

    /// Register a clone, recording it in the parent's is-cloned-by set.
    #[allow(clippy::too_many_arguments)]
    pub fn register_clone(
        &mut self,
        name: &str,
        path: &str,
        parent: ValueType,
        private: bool,
        is_sliceable: bool,
        is_filterable: bool,
        is_mappable: bool,
        type_arguments: Vec<Value>,
    ) -> ValueType {
        let ix = self.register(TypeInfo::Clone {
            name: name.to_string(),
            path: path.to_string(),
            parent,
            private,
            is_sliceable,
            is_filterable,
            is_mappable,
            type_check: None,
            type_arguments,
        });
        if let TypeInfo::Builtin { cloned_by, .. } = &mut self.infos[parent.0 as usize] {
            cloned_by.insert(ix);
        }
        ix
    }

    /// Register a struct, computing its label→position resolving map.
    pub fn register_struct(
        &mut self,
        name: &str,
        path: &str,
        labels: Vec<usize>,
        fields: Vec<AbstractType>,
        is_snippet: bool,
        private: bool,
        type_arguments: Vec<Value>,
    ) -> ValueType {
        let resolving_map = labels
            .iter()
            .enumerate()
            .map(|(pos, &label)| (label, pos))
            .collect();
        self.register(TypeInfo::Struct {
            name: name.to_string(),
            path: path.to_string(),
            label_numbers: labels,
            fields,
            resolving_map,
            is_snippet,
            private,
            type_check: None,
            type_arguments,
        })
    }

    /// Attach a runtime type-check to a clone or struct.
    pub fn set_type_check(&mut self, ty: ValueType, check: TypeCheck) {
        match &mut self.infos[ty.0 as usize] {
            TypeInfo::Clone { type_check, .. } | TypeInfo::Struct { type_check, .. } => {
                *type_check = Some(check)
            }
            other => panic!("type check attached to {}", other.name()),
        }
    }

    /// Memoized lookup/registration of a parameterized instance.
    ///
    /// The key is the literal form of the instance (`"Z{5}"`,
    /// `"list{string}"`); `build` runs only on the first mention.
    pub fn instantiate(
        &mut self,
        literal: &str,
        build: impl FnOnce(&mut TypeRegistry) -> ValueType,
    ) -> ValueType {
        if let Some(&ix) = self.instances.get(literal) {
            return ix;
        }
        let ix = build(self);
        self.instances.insert(literal.to_string(), ix);
        ix
    }

    /// Look up an already-materialized parameterized instance.
    pub fn instance(&self, literal: &str) -> Option<ValueType> {
        self.instances.get(literal).copied()
    }

    /// A sorted, deduplicated abstract type over the given concrete types.
    pub fn abstract_of(&self, types: &[ValueType]) -> AbstractType {
        AbstractType::of(types)
    }

    pub fn info(&self, ty: ValueType) -> &TypeInfo {
        &self.infos[ty.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Find a type by its bare name. Linear scan: only used at compile time.
    pub fn by_name(&self, name: &str) -> Option<ValueType> {
        self.infos
            .iter()
            .position(|i| i.name() == name)
            .map(|ix| ValueType(ix as u16))
    }

    /// The underlying representation type: a clone's ultimate parent,
    /// anything else itself.
    pub fn underlying(&self, ty: ValueType) -> ValueType {
        match self.info(ty) {
            TypeInfo::Clone { parent, .. } => self.underlying(*parent),
            _ => ty,
        }
    }

    /// Intern a label name, returning its stable number.
    pub fn intern_label(&mut self, name: &str) -> usize {
        self.labels.insert_full(name.to_string()).0
    }

    pub fn label_name(&self, number: usize) -> &str {
        self.labels
            .get_index(number)
            .map(|s| s.as_str())
            .unwrap_or("?")
    }

    pub fn label_number(&self, name: &str) -> Option<usize> {
        self.labels.get_index_of(name)
    }

    /// Field position of a label in a struct, if the struct has it.
    pub fn resolve_field(&self, ty: ValueType, label: usize) -> Option<usize> {
        match self.info(ty) {
            TypeInfo::Struct { resolving_map, .. } => resolving_map.get(&label).copied(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::{FLOAT, INT, LIST, STRING};

    #[test]
    fn test_builtins_land_on_their_constants() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.info(INT).name(), "int");
        assert_eq!(registry.info(STRING).name(), "string");
        assert_eq!(registry.info(FLOAT).name(), "float");
        assert_eq!(registry.len(), values::FIRST_USER_TYPE as usize);
    }

    #[test]
    fn test_clone_registration_updates_parent() {
        let mut registry = TypeRegistry::new();
        let apples =
            registry.register_clone("apples", "", INT, false, false, false, false, Vec::new());
        match registry.info(INT) {
            TypeInfo::Builtin { cloned_by, .. } => assert!(cloned_by.contains(apples)),
            _ => panic!("int is not builtin"),
        }
        assert_eq!(registry.underlying(apples), INT);
    }

    #[test]
    fn test_struct_resolving_map() {
        let mut registry = TypeRegistry::new();
        let name = registry.intern_label("name");
        let age = registry.intern_label("age");
        let person = registry.register_struct(
            "Person",
            "",
            vec![name, age],
            vec![AbstractType::single(STRING), AbstractType::single(INT)],
            false,
            false,
            Vec::new(),
        );
        assert_eq!(registry.resolve_field(person, name), Some(0));
        assert_eq!(registry.resolve_field(person, age), Some(1));
        let other = registry.intern_label("height");
        assert_eq!(registry.resolve_field(person, other), None);
    }

    #[test]
    fn test_labels_intern_once() {
        let mut registry = TypeRegistry::new();
        let a = registry.intern_label("name");
        let b = registry.intern_label("name");
        assert_eq!(a, b);
        assert_eq!(registry.label_name(a), "name");
    }

    #[test]
    fn test_instantiate_memoizes_by_literal_form() {
        let mut registry = TypeRegistry::new();
        let mut builds = 0;
        let first = registry.instantiate("Strings{string}", |r| {
            builds += 1;
            r.register_clone("Strings{string}", "", LIST, false, true, true, true, Vec::new())
        });
        let second = registry.instantiate("Strings{string}", |_| {
            unreachable!("second mention must hit the memo")
        });
        assert_eq!(first, second);
        assert_eq!(builds, 1);
    }
}
