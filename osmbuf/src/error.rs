use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or truncated input, either from an input source or from
    /// serialized bytes.
    #[error("Cannot decode data at byte offset {}{}: {}", .offset, entity_suffix(.entity), .message)]
    Decode {
        offset: u64,
        entity: Option<u64>,
        message: String,
    },

    #[error("Buffer capacity exceeded: record needs {needed} bytes, {capacity} bytes available")]
    Capacity { needed: usize, capacity: usize },

    #[error("Value of `{field}` is {length} characters long, at most {limit} are allowed")]
    Validation {
        field: &'static str,
        length: usize,
        limit: usize,
    },

    #[error("Value of `{field}` is {value}, at most {limit} is allowed")]
    OutOfRange {
        field: &'static str,
        value: u64,
        limit: u64,
    },

    #[error("Cannot rewind input `{name}` for a second pass")]
    UnseekableSource { name: String },

    #[error("Parse aborted by handler: {reason}")]
    HandlerAbort { reason: String },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn entity_suffix(entity: &Option<u64>) -> String {
    match entity {
        Some(idx) => format!(" (entity #{})", idx),
        None => String::new(),
    }
}

impl Error {
    pub fn decode<S: Into<String>>(offset: u64, message: S) -> Self {
        Error::Decode {
            offset,
            entity: None,
            message: message.into(),
        }
    }

    pub fn abort<S: Into<String>>(reason: S) -> Self {
        Error::HandlerAbort {
            reason: reason.into(),
        }
    }

    /// Whether the error is a cancellation requested by a handler.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::HandlerAbort { .. })
    }

    /// Attaches the index of the entity being decoded, if not yet known.
    pub(crate) fn with_entity(self, idx: u64) -> Self {
        match self {
            Error::Decode {
                offset,
                entity: None,
                message,
            } => Error::Decode {
                offset,
                entity: Some(idx),
                message,
            },
            other => other,
        }
    }
}
