//! Errors that abort a discovery call.

/// Boxed error from the underlying cluster client.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for discovery operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fatal discovery errors.
///
/// Lookup misses and malformed URLs are not errors; they degrade to missing
/// entries and are reported on the [`DiscoveryResult`](crate::DiscoveryResult).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The control plane was unreachable or rejected a query.
    #[error("cluster query failed: {source}")]
    Connectivity {
        /// The client error.
        #[source]
        source: BoxError,
    },

    /// The control-plane endpoint could not be turned into a client.
    #[error("invalid control-plane endpoint: {0}")]
    InvalidEndpoint(String),
}

impl Error {
    /// Wraps a client error as a connectivity failure.
    #[must_use]
    pub fn connectivity(source: impl Into<BoxError>) -> Self {
        Self::Connectivity {
            source: source.into(),
        }
    }
}
