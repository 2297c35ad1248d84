use std::time::Duration;

use thiserror::Error;

use crate::db::StoreError;
use crate::multisig::MultisigError;
use crate::rate_limit::RateLimitError;
use crate::sources::SourceError;
use crate::validation::ValidationError;

/// Coarse classification every layer's error collapses into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    SourceUnavailable,
    RateLimited,
    Cancelled,
    Internal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Multisig(#[from] MultisigError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::InvalidInput,
            Error::Store(e) => store_kind(e),
            Error::Source(e) => source_kind(e),
            Error::Multisig(e) => match e {
                MultisigError::Store(store) => store_kind(store),
                MultisigError::Script(_) => ErrorKind::Internal,
                _ => ErrorKind::InvalidInput,
            },
            Error::RateLimit(RateLimitError::Cancelled) => ErrorKind::Cancelled,
            Error::RateLimit(RateLimitError::Stopped) => ErrorKind::SourceUnavailable,
            Error::RateLimit(RateLimitError::InvalidQuota { .. }) => ErrorKind::Internal,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Suggested back-off for rate-limited failures.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Source(SourceError::RateLimited { retry_after }) => *retry_after,
            _ => None,
        }
    }
}

fn store_kind(err: &StoreError) -> ErrorKind {
    match err {
        StoreError::NotFound(_) => ErrorKind::NotFound,
        StoreError::Conflict(_) => ErrorKind::Conflict,
        StoreError::Invalid(_) | StoreError::ForeignKey(_) => ErrorKind::InvalidInput,
        StoreError::Database(_) => ErrorKind::Internal,
    }
}

fn source_kind(err: &SourceError) -> ErrorKind {
    match err {
        SourceError::RateLimited { .. } => ErrorKind::RateLimited,
        SourceError::NotFound(_) => ErrorKind::NotFound,
        SourceError::Cancelled => ErrorKind::Cancelled,
        _ => ErrorKind::SourceUnavailable,
    }
}

pub type Result<T> = std::result::Result<T, Error>;
