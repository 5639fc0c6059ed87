//! Error types for screening operations.
//!
//! This module defines [`ScreenError`], which covers every failure that can occur
//! while fetching, caching, or evaluating fundamentals, and [`ErrorKind`], the
//! closed classification that batch handling matches on.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during screening operations.
#[derive(Error, Debug)]
pub enum ScreenError {
    /// The provider has no usable records for the requested entity and window.
    #[error("Data not available for {entity} in range {start} to {end}")]
    DataUnavailable {
        /// The entity that was requested.
        entity: String,
        /// Start of the requested window.
        start: String,
        /// End of the requested window.
        end: String,
    },

    /// Network-related errors (connection failures, HTTP status errors, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit exceeded by a provider.
    #[error("Rate limited by {provider}: retry after {retry_after:?}")]
    RateLimited {
        /// The provider that rate limited the request.
        provider: String,
        /// Suggested time to wait before retrying.
        retry_after: Option<Duration>,
    },

    /// Authentication failed for a provider.
    #[error("Authentication failed for provider {0}")]
    AuthenticationFailed(String),

    /// The provider answered with an application-level error code.
    #[error("{provider} API error {code}: {message}")]
    Api {
        /// The provider that reported the error.
        provider: String,
        /// Provider-specific error code.
        code: i64,
        /// Provider-supplied message.
        message: String,
    },

    /// An outbound call did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The call that timed out.
        operation: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// Error parsing data from a provider.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A stored cache entry could not be decoded.
    #[error("Corrupt cache entry {key}: {reason}")]
    CacheCorruption {
        /// Key of the corrupt entry.
        key: String,
        /// Why decoding failed.
        reason: String,
    },

    /// Error interacting with the cache storage.
    #[error("Cache error: {0}")]
    Cache(String),

    /// A caller supplied an empty or otherwise unusable cache key.
    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

/// Closed classification of [`ScreenError`] used for batch-level handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The provider has no data for the entity/window. Recoverable per entity.
    DataUnavailable,
    /// Transient provider, network, or auth failure. Recoverable per entity.
    Upstream,
    /// Cache storage failure or undecodable entry. Always recovered locally.
    CacheCorruption,
    /// Programming error on the caller's side. Never swallowed.
    InvalidKey,
}

impl ScreenError {
    /// Returns the closed classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::DataUnavailable { .. } => ErrorKind::DataUnavailable,
            Self::Network(_)
            | Self::RateLimited { .. }
            | Self::AuthenticationFailed(_)
            | Self::Api { .. }
            | Self::Timeout { .. }
            | Self::Parse(_)
            | Self::Other(_) => ErrorKind::Upstream,
            Self::CacheCorruption { .. } | Self::Cache(_) => ErrorKind::CacheCorruption,
            Self::InvalidKey(_) | Self::InvalidParameter(_) => ErrorKind::InvalidKey,
        }
    }

    /// Returns true if a batch can record this error against one entity and continue.
    #[must_use]
    pub const fn is_entity_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DataUnavailable | ErrorKind::Upstream | ErrorKind::CacheCorruption
        )
    }
}

/// Result type alias using [`ScreenError`].
pub type Result<T> = std::result::Result<T, ScreenError>;
