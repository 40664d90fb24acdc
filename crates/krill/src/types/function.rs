//! Function, upvalue, and closure objects — the compiler's output and the
//! interpreter's input.

use crate::{heap::HeapId, value::Value};

/// Debug companion to a function: its name and a per-byte line table.
///
/// `line_at[i]` is the source line of the byte at offset `i` in the
/// instruction stream; the interpreter indexes it by an opcode's position.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FnDebug {
    pub name: Option<String>,
    pub line_at: Vec<u32>,
}

/// A compiled function.
///
/// This layout is the contract with the interpreter: a contiguous
/// instruction stream (always terminated by the `End` opcode), an indexable
/// constant table, the owning module, and the statically computed frame
/// requirements. `max_stack_slots` lets the interpreter allocate one
/// contiguous frame at call time with no growth checks; every local slot
/// index in the stream is below it.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ObjFn {
    /// Instruction stream in the encoding of [`crate::bytecode::Opcode`].
    pub code: Vec<u8>,
    /// Constant table; `LoadConstant` and `CreateClosure` index into it.
    pub constants: Vec<Value>,
    /// The module this function was compiled into.
    pub module: HeapId,
    /// Peak operand-stack depth, locals included.
    pub max_stack_slots: u32,
    /// Number of upvalues the function captures.
    pub upvalue_num: u32,
    /// Number of declared parameters.
    pub arg_num: u8,
    pub debug: FnDebug,
}

/// An upvalue: the indirection cell a closure uses to reach a variable of an
/// enclosing function.
///
/// While the variable's frame is live the upvalue is *open* and aliases a
/// thread stack slot; when the frame unwinds (or a scope with captured
/// locals closes) the value migrates into the cell and the upvalue is
/// *closed*.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjUpvalue {
    Open { slot: usize },
    Closed(Value),
}

impl ObjUpvalue {
    /// The stack slot this upvalue aliases, if still open.
    #[must_use]
    pub fn open_slot(&self) -> Option<usize> {
        match self {
            Self::Open { slot } => Some(*slot),
            Self::Closed(_) => None,
        }
    }

    /// Converts an open upvalue into a closed one owning `value`.
    pub fn close(&mut self, value: Value) {
        *self = Self::Closed(value);
    }
}

/// A closure: a function paired with its captured upvalues. The vector's
/// length always equals the function's `upvalue_num`.
#[derive(Debug)]
pub struct ObjClosure {
    pub function: HeapId,
    pub upvalues: Vec<HeapId>,
}

impl ObjClosure {
    #[must_use]
    pub fn new(function: HeapId, upvalues: Vec<HeapId>) -> Self {
        Self { function, upvalues }
    }
}
