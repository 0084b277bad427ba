use std::fmt;

/// Top-level error for decoding and compiling patch documents.
#[derive(Debug)]
pub enum PatchError {
    Decode(serde_json::Error),
    Compile(CompileError),
}

/// Errors raised while compiling a patch tree into a live signal graph.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// A `lib` reference names a subtree missing from the library.
    UnknownReference { name: String },
    /// A `lib` reference cycles back into itself during resolution.
    RecursiveReference { name: String },
    /// A chorus names a constant that its child subtree never registers.
    UnknownParam { name: String },
    /// A `lib` node survived to compilation (the caller skipped resolution).
    Unresolved { name: String },
}

/// Errors from the arithmetic expression language.
///
/// These are recoverable at the compiler level: an `expr` node that fails
/// to parse falls back to a zero constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprError {
    UnexpectedChar { ch: char, pos: usize },
    InvalidNumber { text: String, pos: usize },
    UnexpectedToken { expected: String, found: String, pos: usize },
    UnexpectedEnd { expected: String },
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::Decode(e) => write!(f, "Decode error: {e}"),
            PatchError::Compile(e) => write!(f, "Compile error: {e}"),
        }
    }
}

impl std::error::Error for PatchError {}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnknownReference { name } => {
                write!(f, "Unknown library reference '{name}'")
            }
            CompileError::RecursiveReference { name } => {
                write!(f, "Library reference '{name}' is recursive")
            }
            CompileError::UnknownParam { name } => {
                write!(f, "Chorus target '{name}' is not a registered constant")
            }
            CompileError::Unresolved { name } => {
                write!(f, "Library reference '{name}' was not resolved before compilation")
            }
        }
    }
}

impl std::error::Error for CompileError {}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprError::UnexpectedChar { ch, pos } => write!(f, "Unexpected char '{ch}' at pos {pos}"),
            ExprError::InvalidNumber { text, pos } => write!(f, "Invalid number '{text}' at pos {pos}"),
            ExprError::UnexpectedToken { expected, found, pos } => {
                write!(f, "Expected {expected}, found {found} at pos {pos}")
            }
            ExprError::UnexpectedEnd { expected } => {
                write!(f, "Unexpected end of expression, expected {expected}")
            }
        }
    }
}

impl std::error::Error for ExprError {}

impl From<serde_json::Error> for PatchError {
    fn from(e: serde_json::Error) -> Self {
        PatchError::Decode(e)
    }
}

impl From<CompileError> for PatchError {
    fn from(e: CompileError) -> Self {
        PatchError::Compile(e)
    }
}
