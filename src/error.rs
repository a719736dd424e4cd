use std::io;
use std::path::PathBuf;

use rayon::ThreadPoolBuildError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid analysis or index settings.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Failure reading or writing a segment, the manifest or the lock file.
    #[error("storage error while {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: io::Error,
    },

    /// On-disk bytes that could not be decoded, or could not be encoded.
    #[error("corrupt or unencodable index data: {0}")]
    Codec(String),

    #[error("could not parse query at {position}: {message}")]
    QueryParse { position: usize, message: String },

    /// A single field could not be obtained or indexed. The rest of the
    /// document is unaffected.
    #[error("field {field} omitted: {reason}")]
    PartialField { field: String, reason: String },

    #[error("index at {0:?} is locked by another writer")]
    LockHeld(PathBuf),
}

impl Error {
    pub fn storage(context: impl Into<String>, source: io::Error) -> Error {
        Error::Storage {
            context: context.into(),
            source,
        }
    }

    pub fn query_parse(position: usize, message: impl Into<String>) -> Error {
        Error::QueryParse {
            position,
            message: message.into(),
        }
    }

    pub fn partial_field(field: impl Into<String>, reason: impl ToString) -> Error {
        Error::PartialField {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_storage(&self) -> bool {
        match self {
            Error::Storage { .. } | Error::Codec(_) | Error::LockHeld(_) => true,
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::storage("accessing index files", e)
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<fst::Error> for Error {
    fn from(e: fst::Error) -> Self {
        match e {
            fst::Error::Io(io) => Error::storage("accessing terms dictionary", io),
            other => Error::Codec(other.to_string()),
        }
    }
}

impl From<ThreadPoolBuildError> for Error {
    fn from(e: ThreadPoolBuildError) -> Self {
        Error::Configuration(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Configuration(e.to_string())
    }
}
