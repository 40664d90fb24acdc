//! The tagged value representation shared by the compiler and the emitted
//! function objects.
//!
//! Small immediate values (`Null`, booleans, numbers) are stored inline;
//! everything else lives in the [`Heap`] arena and is referenced through
//! `Obj(HeapId)`. `Undefined` is an internal sentinel: it marks vacant map
//! slots and never escapes into user-visible results.

use crate::{
    heap::{Heap, HeapData, HeapId},
    types::str::fnv1a,
};

/// Primary value type: a tagged union over the language's immediates plus a
/// handle into the heap arena.
///
/// `PartialEq` is identity-shallow (`Obj` compares by handle); the language's
/// equality relation is [`value_eq`], which chases string and range contents
/// through the heap.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    /// Internal sentinel, distinct from `Null`. Never produced by user code.
    Undefined,
    Null,
    False,
    True,
    /// IEEE-754 double; the language's only number type.
    Num(f64),
    /// Handle to a heap object.
    Obj(HeapId),
}

impl Value {
    #[must_use]
    pub fn from_bool(b: bool) -> Self {
        if b { Self::True } else { Self::False }
    }

    #[must_use]
    pub fn is_num(&self) -> bool {
        matches!(self, Self::Num(_))
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_obj(&self) -> Option<HeapId> {
        match self {
            Self::Obj(id) => Some(*id),
            _ => None,
        }
    }
}

/// Folds the 64 bits of a double into 32. Equal numbers hash equally because
/// the fold works on the exact bit pattern.
#[must_use]
pub(crate) fn hash_num(num: f64) -> u32 {
    let bits = num.to_bits();
    (bits as u32) ^ ((bits >> 32) as u32)
}

/// The language's equality relation.
///
/// Two values are equal when their variants match and either they are the
/// same number, strings of equal bytes, ranges with equal endpoints, or the
/// same object identity.
#[must_use]
pub fn value_eq(heap: &Heap, a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Num(x), Value::Num(y)) => x == y,
        (Value::Obj(x), Value::Obj(y)) => {
            if x == y {
                return true;
            }
            match (heap.data(x), heap.data(y)) {
                (HeapData::Str(s1), HeapData::Str(s2)) => s1.as_str() == s2.as_str(),
                (HeapData::Range(r1), HeapData::Range(r2)) => r1.from == r2.from && r1.to == r2.to,
                _ => false,
            }
        }
        _ => std::mem::discriminant(&a) == std::mem::discriminant(&b),
    }
}

/// Hashes a value for use as a map key. `None` means the value is not
/// hashable (mutable containers, functions, instances, and `Undefined`).
#[must_use]
pub fn value_hash(heap: &Heap, value: Value) -> Option<u32> {
    match value {
        Value::Undefined => None,
        Value::Null => Some(1),
        Value::False => Some(2),
        Value::True => Some(3),
        Value::Num(n) => Some(hash_num(n)),
        Value::Obj(id) => match heap.data(id) {
            HeapData::Str(s) => Some(s.hash()),
            HeapData::Range(r) => Some(hash_num(f64::from(r.from)) ^ hash_num(f64::from(r.to))),
            HeapData::Class(c) => Some(fnv1a(c.name.as_bytes())),
            _ => None,
        },
    }
}
