use thiserror::Error;

/// Error taxonomy surfaced by name across the relay pipeline.
///
/// `DuplicateSuppressed` is not really an error: it is logged at debug and
/// never propagated past the ingestion pipeline, but it is represented here
/// so every component reports outcomes through the same enum.
#[derive(Debug, Error, Clone)]
pub enum RelayError {
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    #[error("no healthy endpoint available for {chain}")]
    EndpointUnavailable { chain: String },

    #[error("operation timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("handshake failed for {url}: {reason}")]
    HandshakeFailure { url: String, reason: String },

    #[error("transport lost for {url}: {reason}")]
    TransportLost { url: String, reason: String },

    #[error("duplicate event suppressed for {chain}:{hash}")]
    DuplicateSuppressed { chain: String, hash: String },

    #[error("subscriber {id} is slow, event skipped")]
    SubscriberSlow { id: u64 },

    #[error("unsupported: {what}")]
    Unsupported { what: String },

    #[error("authentication rejected")]
    AuthRejected,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream call failed: {0}")]
    Upstream(String),
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;
