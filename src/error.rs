//! Crate error type.

use std::io;

use thiserror::Error;

/// Errors produced by `osmio`.
#[derive(Debug, Error)]
pub enum Error {
    /// The call itself was malformed: an empty path, an unknown format
    /// string, an empty handler list.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("location for node {0} not found")]
    LocationNotFound(i64),

    #[error("reader is closed")]
    Closed,

    #[error("reader is exhausted")]
    Exhausted,
}

impl Error {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }

    /// Whether the error was caused by the shape of the call rather than by
    /// the data or the file system.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
