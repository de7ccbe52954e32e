//! Output sink traits and types
//!
//! This module defines the trait interface for record sinks and the
//! associated error type.

use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write {stream} record: {source}")]
    Write {
        stream: Stream,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to format record: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// The two output streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    /// One record per valid game
    Games,

    /// One record per review, tagged with its game's identifier
    Reviews,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Games => "games",
            Self::Reviews => "reviews",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for record sinks
///
/// A record handed to `append` is durable when the call returns. Records
/// are never split or interleaved with other records, even when many
/// workers append to the same stream at once. Implementations must be
/// thread-safe.
pub trait RecordSink: Send + Sync {
    /// Appends one record
    fn append(&self, stream: Stream, record: &Value) -> OutputResult<()>;

    /// Appends several records as one unit
    ///
    /// The default implementation appends them one at a time.
    fn append_all(&self, stream: Stream, records: &[Value]) -> OutputResult<()> {
        for record in records {
            self.append(stream, record)?;
        }
        Ok(())
    }

    /// Identifiers (`appid` fields) present in a stream
    fn written_ids(&self, stream: Stream) -> OutputResult<BTreeSet<u64>>;
}
