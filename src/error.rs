use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::error_log::LogEntry;
use crate::tree::NodeKind;

/// Main library error type that encompasses all possible failure modes
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Schematron(#[from] SchematronError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Schematron-specific error types
#[derive(Error, Debug)]
pub enum SchematronError {
    #[error("Schematron unavailable: {0}")]
    Configuration(String),

    #[error("Schematron parse error: {message}")]
    Parse {
        message: String,
        log: Vec<LogEntry>,
    },

    #[error("Schematron validation internal error (code {code})")]
    Validate { code: i32, log: Vec<LogEntry> },

    #[error("Memory allocation failed in libxml2: {0}")]
    Memory(&'static str),

    #[error("Document has no root element")]
    NoRootElement,

    #[error("Only elements can be validated, found a {kind} node")]
    NotAnElement { kind: NodeKind },
}

impl SchematronError {
    /// Error log entries collected while the failing call ran
    pub fn log(&self) -> &[LogEntry] {
        match self {
            SchematronError::Parse { log, .. } | SchematronError::Validate { log, .. } => log,
            _ => &[],
        }
    }
}

/// Document construction error types
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("XML syntax error: {message}")]
    Syntax {
        message: String,
        log: Vec<LogEntry>,
    },

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("Invalid document path: {path}")]
    InvalidPath { path: PathBuf },

    #[error("Input too large for libxml2: {size} bytes")]
    InputTooLarge { size: usize },

    #[error("Expected an element, found a {kind} node")]
    NotAnElement { kind: NodeKind },

    #[error(transparent)]
    Lookup(#[from] LookupError),
}

/// Element class lookup error types
#[derive(Error, Debug)]
pub enum LookupError {
    #[error(transparent)]
    Hook(anyhow::Error),

    #[error("Class '{class}' is a {found} class, expected a {expected} class")]
    IncompatibleClass {
        class: String,
        expected: NodeKind,
        found: NodeKind,
    },
}

/// Proxy access error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProxyError {
    #[error("Child index {index} out of range for element with {len} children")]
    IndexOutOfRange { index: isize, len: usize },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

/// Schematron result type alias
pub type SchematronResult<T> = std::result::Result<T, SchematronError>;

/// Document result type alias
pub type DocumentResult<T> = std::result::Result<T, DocumentError>;

/// Lookup result type alias
pub type LookupResult<T> = std::result::Result<T, LookupError>;

/// Join log messages into a single line for error display.
pub(crate) fn summarize(log: &[LogEntry], fallback: &str) -> String {
    let messages: Vec<&str> = log
        .iter()
        .map(|entry| entry.message.as_str())
        .filter(|message| !message.is_empty())
        .collect();
    if messages.is_empty() {
        fallback.to_string()
    } else {
        messages.join("; ")
    }
}
