//! Closed error taxonomy for the APX/RMF core.
//!
//! Every fallible core operation (parsing, VM pack/unpack, wire codec,
//! routing, file management) returns `ApxResult<T>`. Adapter code (CLI
//! front-ends, socket transports) wraps this in `anyhow::Result` at the
//! boundary, since `ErrorKind` implements `std::error::Error`.

/// The closed set of error kinds produced by the core.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory")]
    Memory,

    #[error("parse error at line {line}: {message}")]
    Parse { line: u32, message: String },

    #[error("value {value} out of range [{lo}, {hi}]")]
    ValueRange { value: i64, lo: i64, hi: i64 },

    #[error("array length {actual} exceeds maximum {max}")]
    ArrayLength { actual: u32, max: u32 },

    #[error("name '{0}' exceeds 256 bytes")]
    NameTooLong(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unresolved type reference: {0}")]
    UnresolvedReference(String),

    #[error("cyclic type reference: {0}")]
    CyclicReference(String),

    #[error("message too large: {size} > {max}")]
    MsgTooLarge { size: usize, max: usize },

    #[error("invalid instruction opcode {0:#04x}")]
    InvalidInstruction(u8),

    #[error("unexpected end of buffer")]
    UnexpectedEnd,

    #[error("stray characters after parse, line {0}")]
    StrayCharacters(u32),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ErrorKind {
    fn from(e: std::io::Error) -> Self {
        ErrorKind::Io(e.to_string())
    }
}

/// Result alias used throughout the core.
pub type ApxResult<T> = Result<T, ErrorKind>;
