//! Error types for privacylens-core

use thiserror::Error;

/// Main error type for the privacylens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A report line could not be imported. Carries the 1-based line number
    /// and the raw line so the caller can see exactly what was rejected.
    #[error("line {line}: {message}: {content}")]
    Parse {
        line: usize,
        message: String,
        content: String,
    },

    /// Record did not match any known shape for its generation
    #[error("schema mismatch: {0}")]
    Schema(String),

    /// Timestamp could not be parsed or normalized
    #[error("bad timestamp {value:?}: {message}")]
    Timestamp { value: String, message: String },

    /// An insert or delete touched an unexpected number of rows
    #[error("store invariant violated on {table}: expected 1 row affected, got {affected}")]
    StoreInvariant { table: &'static str, affected: usize },

    /// The store refused one record of a batch write, e.g. on a key collision.
    /// `index` is the record's position within its table's batch.
    #[error("{table} record #{index} rejected: {message}")]
    RecordRejected {
        table: &'static str,
        index: usize,
        message: String,
    },

    /// Report file name is not usable as a file identifier
    #[error("bad report file name: {0}")]
    InvalidFileName(String),

    /// Icon lookup error
    #[error("icon error: {0}")]
    Icon(String),
}

impl Error {
    /// Attach line context to an error raised while processing one report line.
    ///
    /// Storage errors pass through untouched; everything else becomes a
    /// [`Error::Parse`] naming the offending line.
    pub fn at_line(self, line: usize, content: &str) -> Self {
        match self {
            Error::Parse { .. }
            | Error::Database(_)
            | Error::StoreInvariant { .. }
            | Error::RecordRejected { .. }
            | Error::Io(_) => self,
            other => Error::Parse {
                line,
                message: other.to_string(),
                content: content.to_string(),
            },
        }
    }
}

/// Result type alias for privacylens-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_line_wraps_schema_errors() {
        let err = Error::Schema("unknown field `extra`".to_string()).at_line(4, r#"{"extra":1}"#);
        let msg = err.to_string();
        assert!(msg.starts_with("line 4:"));
        assert!(msg.contains("unknown field `extra`"));
        assert!(msg.ends_with(r#"{"extra":1}"#));
    }

    #[test]
    fn test_at_line_keeps_store_errors() {
        let err = Error::StoreInvariant {
            table: "access",
            affected: 0,
        }
        .at_line(2, "{}");
        assert!(matches!(err, Error::StoreInvariant { .. }));
    }
}
