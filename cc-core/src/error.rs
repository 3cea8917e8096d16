//! Infrastructure errors, kept separate from the per-transaction [`crate::cc::TaskError`]
//! control flow. An `Error` means the surrounding process cannot make progress
//! (a file could not be mapped, a lock was poisoned); a `TaskError::Retry` just
//! means a transaction lost a race and should be attempted again.

use thiserror::Error;

pub type CResult<T> = Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid value: {0}")]
    Value(String),

    #[error("allocator exhausted: requested {requested} bytes, extent is {extent} bytes")]
    AllocatorExhausted { requested: usize, extent: usize },

    #[error("lock poisoned: {0}")]
    Poisoned(String),
}

impl Error {
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn value(msg: impl Into<String>) -> Self {
        Error::Value(msg.into())
    }
}
