//! Crate-wide error taxonomy.
//!
//! Each subsystem owns a narrow error enum for the failures it can actually
//! produce; [`CoreError`] composes them so the REPL layer has one `Result`
//! to match on. Arithmetic never appears here — it saturates instead of
//! failing.

use thiserror::Error;

/// Errors raised while loading or validating a configuration file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("unknown configuration key {0:?}")]
    UnknownKey(String),

    #[error("invalid value {value:?} for key {key:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("missing required configuration key {0:?}")]
    MissingKey(&'static str),
}

/// Errors raised by the memory manager.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum MemoryError {
    #[error("allocation size must be a power of two in [64, 65536] and >= frame size")]
    InvalidSize,

    #[error("process name already has an active allocation")]
    NameInUse,

    #[error("no free frame and nothing left to evict")]
    OutOfMemory,
}

/// Errors raised while parsing an instruction stream.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ParseError {
    #[error("empty instruction")]
    Empty,

    #[error("unrecognized instruction: {0:?}")]
    UnknownOpcode(String),

    #[error("malformed instruction {instr:?}: {reason}")]
    Malformed { instr: String, reason: String },

    #[error("FOR nesting exceeds the maximum depth of {max}")]
    NestingTooDeep { max: u32 },

    #[error("instruction list must contain between 1 and {max} items, got {actual}")]
    ListSizeOutOfRange { max: usize, actual: usize },
}

/// Errors raised while creating or addressing a process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessError {
    #[error("a process named {0:?} already exists")]
    NameInUse(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("no process named {0:?}")]
    NotFound(String),

    #[error("process {0:?} has already finished")]
    AlreadyFinished(String),
}

/// Fatal runtime fault confined to a single process.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum FaultKind {
    #[error("access outside the process's address space")]
    AccessViolation,
}

/// Umbrella error for the crate's public API.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("system has not been initialized; run `initialize` first")]
    NotInitialized,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
