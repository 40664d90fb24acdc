//! Error types for compilation and object-model operations.
//!
//! The compiler reports the first error it hits and unwinds the whole
//! compilation; there is no recovery or resync. Symbol-table and module-var
//! effects committed before the error remain (those tables are append-only),
//! and the caller discards the partial function.

use std::fmt;

/// Result alias for anything that can fail with a [`CompileError`].
pub type CompileResult<T> = Result<T, CompileError>;

/// Broad classification of a compile-time failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    /// Tokenization failure: bad character, escape, number, or an
    /// unterminated string or comment.
    #[strum(serialize = "lex error")]
    Lex,
    /// The token stream does not match the grammar.
    #[strum(serialize = "parse error")]
    Parse,
    /// The program is grammatical but ill-formed: redefinition, limits
    /// exceeded, misplaced `this`/`return`/`break`, and so on.
    #[strum(serialize = "compile error")]
    Compile,
}

/// A compile-time error with its source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: ErrorKind,
    /// The file (or module name) being compiled.
    pub file: String,
    /// 1-based source line.
    pub line: u32,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}: {}", self.file, self.line, self.kind, self.message)
    }
}

impl std::error::Error for CompileError {}

/// Failure of an object-model operation (list indexing, map keys). These are
/// the object model's contract with the interpreter, not compile errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectError {
    /// List index past the last element.
    IndexOutOfBounds,
    /// The value cannot be used as a map key.
    UnhashableKey,
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexOutOfBounds => write!(f, "index out of bounds"),
            Self::UnhashableKey => write!(f, "the key is not hashable"),
        }
    }
}

impl std::error::Error for ObjectError {}
