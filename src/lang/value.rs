use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::bytecode::op::Instructions;

/// Runtime value in the Cinder language.
///
/// Values live on the VM's operand stack, in the globals slab, in the
/// constant pool, and inside containers and closures. Heap-backed
/// variants share their payload through `Rc`, so cloning a value is a
/// reference bump, and object identity is `Rc` pointer identity.
#[derive(Debug, Clone)]
pub enum Value {
    /// 64-bit signed integer.
    Integer(i64),

    /// Boolean value. `true` and `false` behave as singletons: identity
    /// comparison collapses to payload comparison.
    Boolean(bool),

    /// Immutable string value.
    String(Rc<str>),

    /// The absence of a value. Also the result of a falsy `if` without
    /// an `else`, and of out-of-range indexing.
    Null,

    /// Ordered sequence of values: `[1, "two", true]`.
    Array(Rc<Vec<Value>>),

    /// Mapping from hashable keys to values: `{ "a": 1 }`.
    ///
    /// Keyed by `HashKey` so that keys of different kinds never collide;
    /// each entry keeps the original key value for display.
    Hash(Rc<HashMap<HashKey, HashPair>>),

    /// A compiled function body, produced by the compiler and stored in
    /// the constant pool. Never executed directly; the VM only calls
    /// closures.
    Function(Rc<CompiledFunction>),

    /// A compiled function bundled with its captured free values.
    Closure(Rc<Closure>),
}

/// The null singleton.
pub const NULL: Value = Value::Null;
/// The boolean `true` singleton.
pub const TRUE: Value = Value::Boolean(true);
/// The boolean `false` singleton.
pub const FALSE: Value = Value::Boolean(false);

/// Type tag of a value, used for operator dispatch and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Integer,
    Boolean,
    String,
    Null,
    Array,
    Hash,
    Function,
    Closure,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Integer => "INTEGER",
            ValueKind::Boolean => "BOOLEAN",
            ValueKind::String => "STRING",
            ValueKind::Null => "NULL",
            ValueKind::Array => "ARRAY",
            ValueKind::Hash => "HASH",
            ValueKind::Function => "COMPILED_FUNCTION",
            ValueKind::Closure => "CLOSURE",
        };
        write!(f, "{}", name)
    }
}

/// Key derived from a hashable value.
///
/// The pair (kind, content hash) keeps keys of different kinds apart:
/// `1` and `"1"` hash to different keys even if their content hashes
/// were to coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKey {
    pub kind: ValueKind,
    pub value: u64,
}

/// An entry of a hash value. Keeps the original key alongside the value
/// so lookups and display can recover it.
#[derive(Debug, Clone)]
pub struct HashPair {
    pub key: Value,
    pub value: Value,
}

/// Bytecode of one function: its instruction stream plus the frame
/// geometry the VM needs to reserve local slots.
///
/// `num_locals` counts every definition in the function's scope,
/// parameters included; `num_parameters` is checked against the call
/// site's argument count.
#[derive(Debug)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
}

/// A function value as the VM calls it: the compiled body plus the free
/// values captured when the closure was built.
///
/// The free vector is data, not host-language capture: `OpGetFree n`
/// reads `free[n]`. It is immutable once the closure exists.
#[derive(Debug)]
pub struct Closure {
    pub func: Rc<CompiledFunction>,
    pub free: Vec<Value>,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::String(_) => ValueKind::String,
            Value::Null => ValueKind::Null,
            Value::Array(_) => ValueKind::Array,
            Value::Hash(_) => ValueKind::Hash,
            Value::Function(_) => ValueKind::Function,
            Value::Closure(_) => ValueKind::Closure,
        }
    }

    /// Hash key for this value, or `None` for unhashable kinds.
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Integer(n) => Some(HashKey {
                kind: ValueKind::Integer,
                value: *n as u64,
            }),
            Value::Boolean(b) => Some(HashKey {
                kind: ValueKind::Boolean,
                value: *b as u64,
            }),
            Value::String(s) => {
                let mut hasher = DefaultHasher::new();
                s.hash(&mut hasher);
                Some(HashKey {
                    kind: ValueKind::String,
                    value: hasher.finish(),
                })
            }
            _ => None,
        }
    }

    /// Object identity, the semantics behind `OpEqual` for non-integer
    /// operands.
    ///
    /// Booleans and null are singletons, so identity collapses to tag
    /// and payload. Heap variants compare by shared-allocation pointer:
    /// two separately-built strings are *not* the same object even when
    /// their contents match.
    pub fn same_object(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Hash(a), Value::Hash(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    /// Format a value using Cinder surface syntax.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
            Value::Null => write!(f, "null"),
            Value::Array(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, "]")
            }
            Value::Hash(pairs) => {
                write!(f, "{{")?;
                for (i, pair) in pairs.values().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", pair.key, pair.value)?;
                }
                write!(f, "}}")
            }
            Value::Function(func) => {
                write!(f, "CompiledFunction[{:p}]", Rc::as_ptr(func))
            }
            Value::Closure(closure) => write!(f, "Closure[{:p}]", Rc::as_ptr(closure)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_hash_key() {
        let hello1 = Value::String(Rc::from("Hello World"));
        let hello2 = Value::String(Rc::from("Hello World"));
        let diff = Value::String(Rc::from("My name is johnny"));

        assert_eq!(
            hello1.hash_key(),
            hello2.hash_key(),
            "strings with same content have different hash keys"
        );
        assert_ne!(
            hello1.hash_key(),
            diff.hash_key(),
            "strings with different content have same hash keys"
        );
    }

    #[test]
    fn test_hash_keys_keep_kinds_apart() {
        let one = Value::Integer(1);
        let one_str = Value::String(Rc::from("1"));

        assert_ne!(one.hash_key(), one_str.hash_key());
    }

    #[test]
    fn test_unhashable_kinds() {
        assert!(Value::Null.hash_key().is_none());
        assert!(Value::Array(Rc::new(vec![])).hash_key().is_none());
    }

    #[test]
    fn test_identity_of_singletons() {
        assert!(TRUE.same_object(&Value::Boolean(true)));
        assert!(!TRUE.same_object(&FALSE));
        assert!(NULL.same_object(&Value::Null));
        assert!(!NULL.same_object(&FALSE));
    }

    #[test]
    fn test_identity_of_strings_is_by_allocation() {
        let shared: Rc<str> = Rc::from("mon");
        let a = Value::String(Rc::clone(&shared));
        let b = Value::String(shared);
        let c = Value::String(Rc::from("mon"));

        assert!(a.same_object(&b), "clones of one allocation are the same object");
        assert!(!a.same_object(&c), "equal content is not identity");
    }

    #[test]
    fn test_display_containers() {
        let array = Value::Array(Rc::new(vec![
            Value::Integer(1),
            Value::String(Rc::from("two")),
            TRUE,
        ]));
        assert_eq!(array.to_string(), "[1, two, true]");
    }
}
