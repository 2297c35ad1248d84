//! Adapters over the external systems balances are observed from.
//!
//! Adapters hold no mutable state after construction and never touch the
//! store; they turn a request into a typed observation or a [`SourceError`].

pub mod bitcoind;
pub mod command;
pub mod lightning;
pub mod mempool;
pub mod strike;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;

use crate::amount::AmountError;
use crate::models::{AddressObservation, AddressTransaction, Utxo};
use crate::rate_limit::RateLimitError;

pub use bitcoind::BitcoinNodeAdapter;
pub use command::{CommandRunner, ProcessRunner};
pub use lightning::LightningNodeAdapter;
pub use mempool::MempoolAdapter;
pub use strike::StrikeAdapter;

/// Longest response body excerpt carried in an HTTP error.
const ERROR_BODY_PREFIX: usize = 200;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rate limited{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("{program} exited with status {status}: {stderr}")]
    Command {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SourceError::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound(_))
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(err.to_string())
    }
}

impl From<AmountError> for SourceError {
    fn from(err: AmountError) -> Self {
        SourceError::Parse(err.to_string())
    }
}

impl From<RateLimitError> for SourceError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Cancelled => SourceError::Cancelled,
            other => SourceError::Unavailable(other.to_string()),
        }
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(", retry after {}s", delay.as_secs()),
        None => String::new(),
    }
}

/// Per-address capability shared by the on-chain sources. The collector picks
/// an implementation by policy (node first, HTTP fallback).
#[async_trait]
pub trait AddressSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn balance(&self, address: &str) -> Result<AddressObservation, SourceError>;

    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, SourceError>;

    /// Every transaction touching `address`, with its net effect on it.
    async fn transactions(&self, address: &str) -> Result<Vec<AddressTransaction>, SourceError>;

    async fn validate(&self, address: &str) -> Result<bool, SourceError>;
}

/// Seconds from a `Retry-After` header, when it carries a delay in seconds.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success response onto the error taxonomy.
pub(crate) async fn error_for_response(response: reqwest::Response, what: &str) -> SourceError {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return SourceError::RateLimited {
            retry_after: retry_after(response.headers()),
        };
    }
    if status == StatusCode::NOT_FOUND {
        return SourceError::NotFound(what.to_string());
    }

    let body = response.text().await.unwrap_or_default();
    SourceError::Http {
        status: status.as_u16(),
        body: body_prefix(&body),
    }
}

pub(crate) fn body_prefix(body: &str) -> String {
    body.chars().take(ERROR_BODY_PREFIX).collect()
}
