//! Compilation core and object model for the krill scripting language.
//!
//! krill is a small, dynamically typed, class-based language: numbers,
//! booleans, null, strings with interpolation, lists, maps, ranges,
//! first-class functions with closures, single-inheritance classes with
//! operator overloading, and cooperative threads.
//!
//! This crate is the front end and the heap it emits against: a hand-written
//! lexer, a single-pass Pratt compiler producing stack-machine bytecode, and
//! the tagged value / object model those functions are bound to. Executing
//! the emitted functions (the dispatch loop, arithmetic primitives, garbage
//! collection) is the consumer's concern; the emitted [`ObjFn`] layout and
//! the [`Opcode`] encoding are the contract.
//!
//! ```
//! use krill::Vm;
//!
//! let mut vm = Vm::new();
//! let entry = vm.load_module("main", "var greeting = \"hi\";").unwrap();
//! let function = vm.heap.closure(entry).function;
//! assert!(!vm.heap.function(function).code.is_empty());
//! ```

mod bytecode;
mod compiler;
mod error;
mod heap;
mod intern;
mod lexer;
mod signature;
mod tracer;
mod types;
mod value;
mod vm;

pub use bytecode::{EmitError, FnBuilder, JumpLabel, Opcode, UpvalueDesc};
pub use compiler::{MAX_FIELD_NUM, MAX_LOCAL_VAR_NUM, MAX_UPVALUE_NUM};
pub use error::{CompileError, CompileResult, ErrorKind, ObjectError};
pub use heap::{Heap, HeapData, HeapId, HeapStats};
pub use intern::SymbolTable;
pub use lexer::{Lexer, Literal, Token, TokenKind};
pub use signature::{MAX_ARG_NUM, MAX_METHOD_NAME_LEN, MAX_SIGN_LEN, Signature, SignatureKind};
pub use tracer::{CompileTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent};
pub use types::{
    CAPACITY_GROW_FACTOR, MIN_CAPACITY,
    class::{Method, ObjClass, ObjInstance, ObjRange, Primitive},
    function::{FnDebug, ObjClosure, ObjFn, ObjUpvalue},
    list::{ObjList, list_insert, list_push, list_remove},
    map::{MAP_LOAD_PERCENT, MapEntry, ObjMap, map_clear, map_get, map_remove, map_set},
    module::{ModuleVar, ObjModule},
    str::{ObjStr, fnv1a},
    thread::{Frame, INITIAL_FRAME_NUM, ObjThread},
};
pub use value::{Value, value_eq, value_hash};
pub use vm::{CoreClasses, MAX_ID_LEN, Vm};
