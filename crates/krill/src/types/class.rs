//! Class, instance, and range objects, plus the method table entries.

use crate::{heap::HeapId, value::Value};

/// Native function signature for methods implemented by the host.
pub type Primitive = fn(heap: &mut crate::heap::Heap, args: &mut [Value]) -> bool;

/// One slot of a class's dense method table, indexed by the VM-global
/// method-name symbol.
#[derive(Clone, Copy)]
pub enum Method {
    /// No method bound at this symbol (not the same as `Null`).
    None,
    /// A host-implemented method.
    Primitive(Primitive),
    /// A method compiled from source; the handle is a `Closure`.
    Script(HeapId),
    /// The closure invoked when a function object itself is called.
    FnCall(HeapId),
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Primitive(_) => f.write_str("Primitive(..)"),
            Self::Script(id) => f.debug_tuple("Script").field(id).finish(),
            Self::FnCall(id) => f.debug_tuple("FnCall").field(id).finish(),
        }
    }
}

/// A class object.
#[derive(Debug)]
pub struct ObjClass {
    pub name: String,
    pub superclass: Option<HeapId>,
    /// Number of instance fields, inherited fields included. Fixed at class
    /// creation time.
    pub field_num: u32,
    /// Dense method table indexed by the global method-name symbol; unbound
    /// slots are `Method::None`.
    pub methods: Vec<Method>,
}

impl ObjClass {
    /// A raw class: no superclass, no methods, no metadata beyond the name.
    /// The VM's bootstrap creates the built-in classes this way and patches
    /// their headers afterwards.
    #[must_use]
    pub fn new_raw(name: &str, field_num: u32) -> Self {
        Self {
            name: name.to_owned(),
            superclass: None,
            field_num,
            methods: Vec::new(),
        }
    }

    /// Binds `method` at `symbol`, padding the table with `Method::None`.
    pub fn bind_method(&mut self, symbol: u32, method: Method) {
        let index = symbol as usize;
        if index >= self.methods.len() {
            self.methods.resize(index + 1, Method::None);
        }
        self.methods[index] = method;
    }

    /// The method bound at `symbol`, or `Method::None` past the table end.
    #[must_use]
    pub fn method(&self, symbol: u32) -> Method {
        self.methods.get(symbol as usize).copied().unwrap_or(Method::None)
    }
}

/// An instance: its class lives in the object header; the fields are
/// initialized to `Null`.
#[derive(Debug)]
pub struct ObjInstance {
    pub fields: Vec<Value>,
}

impl ObjInstance {
    #[must_use]
    pub fn new(field_num: u32) -> Self {
        Self {
            fields: vec![Value::Null; field_num as usize],
        }
    }
}

/// A range: inclusive endpoints, direction encoded by the sign of
/// `to - from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ObjRange {
    pub from: i32,
    pub to: i32,
}

impl ObjRange {
    #[must_use]
    pub fn new(from: i32, to: i32) -> Self {
        Self { from, to }
    }
}
