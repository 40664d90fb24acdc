//! Bytecode: the opcode set and the per-function emission buffer.
//!
//! The compiler lowers source into a variable-length instruction stream;
//! the interpreter consumes it. `op` defines the opcode taxonomy and each
//! opcode's static stack effect; `builder` owns emission, operand encoding,
//! jump patching, and the stack-depth bookkeeping that lets frames be
//! allocated in one piece at call time.

pub use builder::{EmitError, FnBuilder, JumpLabel, UpvalueDesc};
pub use op::Opcode;

mod builder;
mod op;
