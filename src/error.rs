// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Represents errors that can occur while reading or writing relations
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Malformed input data (line and column are 1-based)
    InvalidInput {
        /// Line the error was detected on
        line: usize,
        /// Column the error was detected on
        column: usize,
        /// What went wrong
        message: String,
    },

    /// A cell failed to parse for its column's declared type
    TypeMismatch {
        /// 1-based column index
        column: usize,
        /// The offending cell content
        value: String,
    },

    /// Invalid reader/writer configuration
    Configuration(String),

    /// The `IO=` key does not name a registered stream format
    UnknownIoType(String),

    /// The `IO=` key names a format this build does not provide
    Unsupported(&'static str),

    /// CSV layer error
    Csv(csv::Error),

    /// JSON layer error
    Json(serde_json::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidInput {
                line,
                column,
                message,
            } => {
                write!(f, "invalid input at line {line}, column {column}: {message}")
            }
            Self::TypeMismatch { column, value } => {
                write!(f, "cannot parse {value:?} in column {column}")
            }
            Self::Configuration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::UnknownIoType(key) => write!(f, "unknown IO type {key:?}"),
            Self::Unsupported(key) => write!(f, "IO type {key:?} is not supported by this build"),
            Self::Csv(e) => write!(f, "CSV error: {e}"),
            Self::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Csv(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<csv::Error> for Error {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Crate result type
pub type Result<T> = std::result::Result<T, Error>;
