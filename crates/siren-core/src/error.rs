//! Error taxonomy for the dispatch pipeline.
//!
//! Provider soft failures (timeouts, bad payloads, rate limits) never show
//! up here: they are absorbed inside the adapters and replaced by the next
//! provider or the deterministic fallback. What remains is what a caller
//! can actually act on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Bad input from the operator; never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// No coordinates were given and the address could not be resolved.
    #[error("geocoding failed for address: {0}")]
    GeocodingFailed(String),

    /// Data integrity violation: impossible status transition or duplicate
    /// dispatch. The enclosing transaction was rolled back.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The cloud triage provider was explicitly selected but its
    /// credentials are absent.
    #[error("misconfigured provider: {0}")]
    MisconfiguredProvider(String),

    /// The storage backend cannot be reached.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
