//! Unified error type for the resolver core.

use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the query-path engine and its supporting components.
///
/// Most of these are internal control-flow signals (`KeyNotFound`,
/// `KeyExpired`, `CacheFull`) that the handler translates into a DNS rcode
/// rather than propagating to the caller as a hard failure.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("{0} not found")]
    KeyNotFound(String),
    #[error("{0} expired")]
    KeyExpired(String),
    #[error("cache is full")]
    CacheFull,

    #[error("malformed DNS message: {0}")]
    MalformedMessage(String),

    #[error("{qname} resolve failed on {transport} ({nameservers:?})")]
    ResolveFailed {
        qname: String,
        transport: &'static str,
        nameservers: Vec<String>,
    },

    #[error("DoH request failed: {0}")]
    DohFailed(String),

    #[error("invalid blocklist regex {pattern:?}: {source}")]
    InvalidBlocklistRegex {
        pattern: String,
        source: regex::Error,
    },

    #[error("failed to fetch blocklist source {url}: {reason}")]
    SourceFetchError { url: String, reason: String },

    #[error("bind error on {addr}: {source}")]
    ListenBindError {
        addr: String,
        source: Arc<std::io::Error>,
    },

    #[error("blocklist sources directory {0:?} is not writable")]
    BlocklistDirectoryUnwritable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}
