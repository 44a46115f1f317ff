//! Runtime value representation.
//!
//! A `Value` is a pair of concrete-type index and payload. The type index
//! points into the VM's type registry; the payload is a closed enum over the
//! representations a Pipefish value can have. Clone types reuse their
//! parent's payload variant and differ only in the type index.
//!
//! # Design
//!
//! - Containers are `Arc`-shared. Updates go through `Arc::make_mut`, so a
//!   "mutation" copies the spine and the old value keeps observing its
//!   pre-update contents.
//! - Maps and sets are insertion-ordered (`indexmap`), which is the
//!   iteration order the language guarantees.
//! - `AbstractType` is a sorted, deduplicated vector of concrete-type
//!   indices; the empty vector is bottom.

use indexmap::{IndexMap, IndexSet};
use pipefish_foundation::error::Error;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Index of a concrete type in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueType(pub u16);

// The builtin types, in registration order. The registry's constructor
// must register them in exactly this order.
pub const UNDEFINED: ValueType = ValueType(0);
pub const BLING: ValueType = ValueType(1);
pub const UNSATISFIED_CONDITIONAL: ValueType = ValueType(2);
pub const OK: ValueType = ValueType(3);
pub const NULL: ValueType = ValueType(4);
pub const ERROR: ValueType = ValueType(5);
pub const INT: ValueType = ValueType(6);
pub const BOOL: ValueType = ValueType(7);
pub const STRING: ValueType = ValueType(8);
pub const RUNE: ValueType = ValueType(9);
pub const FLOAT: ValueType = ValueType(10);
pub const TYPE: ValueType = ValueType(11);
pub const FUNC: ValueType = ValueType(12);
pub const PAIR: ValueType = ValueType(13);
pub const LIST: ValueType = ValueType(14);
pub const MAP: ValueType = ValueType(15);
pub const SET: ValueType = ValueType(16);
pub const TUPLE: ValueType = ValueType(17);
pub const LABEL: ValueType = ValueType(18);
pub const SNIPPET: ValueType = ValueType(19);

/// Index of the first user-declared type.
pub const FIRST_USER_TYPE: u16 = 20;

/// The payload of a runtime value.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Used by `OK`, `NULL`, the unsatisfied conditional, and undefined.
    None,
    /// A bling pseudo-argument: the literal word.
    Bling(String),
    Int(i64),
    Bool(bool),
    Float(f64),
    Str(String),
    Rune(char),
    /// A type value: the abstract type it denotes.
    Type(AbstractType),
    Func(Arc<Closure>),
    Pair(Arc<(Value, Value)>),
    List(Arc<Vec<Value>>),
    Map(Arc<IndexMap<Value, Value>>),
    Set(Arc<IndexSet<Value>>),
    /// Struct fields in declaration order.
    Struct(Arc<Vec<Value>>),
    /// A tuple; unlike a list it flattens into argument positions.
    Tuple(Arc<Vec<Value>>),
    /// An interned struct-field label.
    Label(usize),
    Err(Arc<RuntimeError>),
}

/// A function value: entry point plus captured environment.
#[derive(Debug, Clone)]
pub struct Closure {
    /// Index into the VM's function table.
    pub func: usize,
    /// Captured values, in the layout the compiler decided.
    pub captures: Vec<Value>,
}

/// A runtime error value.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub error: Error,
    /// Values attached by `error` expressions for the user to inspect.
    pub values: Vec<Value>,
}

/// A runtime value: concrete type index plus payload.
#[derive(Debug, Clone)]
pub struct Value {
    pub ty: ValueType,
    pub payload: Payload,
}

impl Value {
    pub fn new(ty: ValueType, payload: Payload) -> Self {
        Value { ty, payload }
    }

    pub fn int(i: i64) -> Self {
        Value::new(INT, Payload::Int(i))
    }

    pub fn float(f: f64) -> Self {
        Value::new(FLOAT, Payload::Float(f))
    }

    pub fn bool(b: bool) -> Self {
        Value::new(BOOL, Payload::Bool(b))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::new(STRING, Payload::Str(s.into()))
    }

    pub fn rune(c: char) -> Self {
        Value::new(RUNE, Payload::Rune(c))
    }

    pub fn ok() -> Self {
        Value::new(OK, Payload::None)
    }

    pub fn null() -> Self {
        Value::new(NULL, Payload::None)
    }

    /// The value produced by a conditional whose guard was false.
    pub fn unsat() -> Self {
        Value::new(UNSATISFIED_CONDITIONAL, Payload::None)
    }

    pub fn undefined() -> Self {
        Value::new(UNDEFINED, Payload::None)
    }

    pub fn bling(word: impl Into<String>) -> Self {
        Value::new(BLING, Payload::Bling(word.into()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::new(LIST, Payload::List(Arc::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::new(TUPLE, Payload::Tuple(Arc::new(items)))
    }

    pub fn pair(k: Value, v: Value) -> Self {
        Value::new(PAIR, Payload::Pair(Arc::new((k, v))))
    }

    pub fn error(error: Error) -> Self {
        Value::new(
            ERROR,
            Payload::Err(Arc::new(RuntimeError {
                error,
                values: Vec::new(),
            })),
        )
    }

    pub fn error_with_values(error: Error, values: Vec<Value>) -> Self {
        Value::new(ERROR, Payload::Err(Arc::new(RuntimeError { error, values })))
    }

    pub fn is_error(&self) -> bool {
        self.ty == ERROR
    }

    pub fn is_unsat(&self) -> bool {
        self.ty == UNSATISFIED_CONDITIONAL
    }

    /// The boolean inside, if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self.payload {
            Payload::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.payload {
            Payload::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.payload {
            Payload::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The runtime error inside, if this is an error value.
    pub fn as_error(&self) -> Option<&RuntimeError> {
        match &self.payload {
            Payload::Err(e) => Some(e),
            _ => None,
        }
    }
}

// Structural equality. Errors never compare equal to anything, including
// themselves: comparisons against errors are caught upstream and reported.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.ty != other.ty {
            return false;
        }
        match (&self.payload, &other.payload) {
            (Payload::None, Payload::None) => true,
            (Payload::Bling(a), Payload::Bling(b)) => a == b,
            (Payload::Int(a), Payload::Int(b)) => a == b,
            (Payload::Bool(a), Payload::Bool(b)) => a == b,
            (Payload::Float(a), Payload::Float(b)) => a.to_bits() == b.to_bits(),
            (Payload::Str(a), Payload::Str(b)) => a == b,
            (Payload::Rune(a), Payload::Rune(b)) => a == b,
            (Payload::Type(a), Payload::Type(b)) => a == b,
            (Payload::Func(a), Payload::Func(b)) => Arc::ptr_eq(a, b),
            (Payload::Pair(a), Payload::Pair(b)) => a == b,
            (Payload::List(a), Payload::List(b)) => a == b,
            (Payload::Map(a), Payload::Map(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Payload::Set(a), Payload::Set(b)) => {
                a.len() == b.len() && a.iter().all(|v| b.contains(v))
            }
            (Payload::Struct(a), Payload::Struct(b)) => a == b,
            (Payload::Tuple(a), Payload::Tuple(b)) => a == b,
            (Payload::Label(a), Payload::Label(b)) => a == b,
            (Payload::Err(_), Payload::Err(_)) => false,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ty.hash(state);
        match &self.payload {
            Payload::None => {}
            Payload::Bling(s) => s.hash(state),
            Payload::Int(i) => i.hash(state),
            Payload::Bool(b) => b.hash(state),
            Payload::Float(f) => f.to_bits().hash(state),
            Payload::Str(s) => s.hash(state),
            Payload::Rune(c) => c.hash(state),
            Payload::Type(t) => t.hash(state),
            Payload::Func(f) => (Arc::as_ptr(f) as usize).hash(state),
            Payload::Pair(p) => p.hash(state),
            Payload::List(l) => l.hash(state),
            Payload::Map(m) => {
                // Order-independent: maps equal as sets of pairs must hash equal.
                let mut acc: u64 = 0;
                for (k, v) in m.iter() {
                    let mut h = std::collections::hash_map::DefaultHasher::new();
                    k.hash(&mut h);
                    v.hash(&mut h);
                    acc ^= h.finish();
                }
                acc.hash(state);
            }
            Payload::Set(s) => {
                let mut acc: u64 = 0;
                for v in s.iter() {
                    let mut h = std::collections::hash_map::DefaultHasher::new();
                    v.hash(&mut h);
                    acc ^= h.finish();
                }
                acc.hash(state);
            }
            Payload::Struct(fields) => fields.hash(state),
            Payload::Tuple(items) => items.hash(state),
            Payload::Label(l) => l.hash(state),
            Payload::Err(e) => e.error.id.hash(state),
        }
    }
}

/// A finite union of concrete types: the static type of any expression
/// position. Kept sorted and deduplicated so equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AbstractType(Vec<ValueType>);

impl AbstractType {
    /// The empty union: bottom, used for unreachable positions.
    pub fn new() -> Self {
        AbstractType(Vec::new())
    }

    pub fn single(ty: ValueType) -> Self {
        AbstractType(vec![ty])
    }

    pub fn of(types: &[ValueType]) -> Self {
        let mut v: Vec<ValueType> = types.to_vec();
        v.sort();
        v.dedup();
        AbstractType(v)
    }

    pub fn insert(&mut self, ty: ValueType) {
        if let Err(pos) = self.0.binary_search(&ty) {
            self.0.insert(pos, ty);
        }
    }

    pub fn contains(&self, ty: ValueType) -> bool {
        self.0.binary_search(&ty).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The sole member, if there is exactly one.
    pub fn only(&self) -> Option<ValueType> {
        if self.0.len() == 1 {
            Some(self.0[0])
        } else {
            None
        }
    }

    pub fn union(&self, other: &AbstractType) -> AbstractType {
        let mut v = self.0.clone();
        v.extend(other.0.iter().copied());
        v.sort();
        v.dedup();
        AbstractType(v)
    }

    pub fn intersect(&self, other: &AbstractType) -> AbstractType {
        AbstractType(
            self.0
                .iter()
                .copied()
                .filter(|t| other.contains(*t))
                .collect(),
        )
    }

    pub fn without(&self, ty: ValueType) -> AbstractType {
        AbstractType(self.0.iter().copied().filter(|t| *t != ty).collect())
    }

    pub fn is_subtype_of(&self, other: &AbstractType) -> bool {
        self.0.iter().all(|t| other.contains(*t))
    }

    pub fn iter(&self) -> impl Iterator<Item = ValueType> + '_ {
        self.0.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abstract_type_is_sorted_and_deduplicated() {
        let t = AbstractType::of(&[STRING, INT, STRING, BOOL]);
        assert_eq!(t.len(), 3);
        let members: Vec<ValueType> = t.iter().collect();
        assert_eq!(members, vec![INT, BOOL, STRING]);
    }

    #[test]
    fn test_abstract_type_set_operations() {
        let a = AbstractType::of(&[INT, STRING]);
        let b = AbstractType::of(&[STRING, BOOL]);
        assert_eq!(a.union(&b).len(), 3);
        assert_eq!(a.intersect(&b), AbstractType::single(STRING));
        assert!(AbstractType::single(INT).is_subtype_of(&a));
        assert!(!a.is_subtype_of(&b));
    }

    #[test]
    fn test_empty_abstract_type_is_bottom() {
        let bottom = AbstractType::new();
        assert!(bottom.is_empty());
        assert!(bottom.is_subtype_of(&AbstractType::single(INT)));
        assert!(!bottom.contains(INT));
    }

    #[test]
    fn test_value_equality_is_structural() {
        assert_eq!(Value::int(5), Value::int(5));
        assert_ne!(Value::int(5), Value::float(5.0));
        assert_eq!(
            Value::list(vec![Value::int(1), Value::int(2)]),
            Value::list(vec![Value::int(1), Value::int(2)])
        );
        assert_ne!(
            Value::list(vec![Value::int(1)]),
            Value::list(vec![Value::int(1), Value::int(2)])
        );
    }

    #[test]
    fn test_errors_never_compare_equal() {
        use pipefish_foundation::token::{Token, TokenType};
        let tok = Token::synthetic(TokenType::Ident, "x");
        let e = Value::error(Error::new("vm/div/zero", &tok, &[]));
        assert_ne!(e.clone(), e);
    }

    #[test]
    fn test_shared_container_survives_update() {
        let original = Value::list(vec![Value::int(1), Value::int(2)]);
        let mut updated = original.clone();
        if let Payload::List(items) = &mut updated.payload {
            Arc::make_mut(items).push(Value::int(3));
        }
        // The pre-update value still observes its old contents.
        if let Payload::List(items) = &original.payload {
            assert_eq!(items.len(), 2);
        } else {
            panic!("expected list");
        }
        if let Payload::List(items) = &updated.payload {
            assert_eq!(items.len(), 3);
        }
    }
}
