//! Error types for profile loading

use std::path::PathBuf;

/// Conditions a caller may want to match on
#[derive(thiserror::Error, Debug)]
pub enum ProfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a callgrind/cachegrind profile: {path}")]
    UnrecognizedFormat { path: PathBuf },
    #[error("{dump}:{line}: cost data found before an 'events:' header")]
    MissingEventHeader { dump: String, line: u64 },
    #[error("load cancelled")]
    Cancelled,
}

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
