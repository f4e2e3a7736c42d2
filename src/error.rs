// Error types module

use thiserror::Error;

use crate::pipeline::PipelineError;
use crate::store::StoreError;

/// Centralized error type for the service
///
/// Categorizes failures for debugging, monitoring, and HTTP status mapping.
/// `AuthorizationFailure` and `NotFound` deliberately share a caller-visible
/// message and status so responses never reveal whether an image exists.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Request rejected before any I/O (bad extension, missing length, ...)
    #[error("Invalid input '{field}': {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// The requested image or variant does not exist
    #[error("Image not found")]
    NotFound,

    /// Hash mismatch or denied original; indistinguishable from NotFound
    #[error("Image not found")]
    AuthorizationFailure,

    /// URL import failed (network error or non-2xx status)
    #[error("Upstream fetch failed for {url}: {reason}")]
    UpstreamFetch { url: String, reason: String },

    /// Transform pipeline failure; nothing was persisted
    #[error("Transform failed: {0}")]
    Transform(#[from] PipelineError),

    /// Store backend failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ServiceError {
    /// Maps service errors to HTTP status codes
    ///
    /// Status mapping:
    /// - InvalidInput → 400 (Bad Request)
    /// - NotFound, AuthorizationFailure → 404 (Not Found)
    /// - UpstreamFetch → 502 (Bad Gateway)
    /// - Transform, Store → 500 (Internal Server Error)
    pub fn to_http_status(&self) -> u16 {
        match self {
            ServiceError::InvalidInput { .. } => 400,
            ServiceError::NotFound | ServiceError::AuthorizationFailure => 404,
            ServiceError::UpstreamFetch { .. } => 502,
            ServiceError::Transform(_) | ServiceError::Store(_) => 500,
        }
    }

    pub fn invalid_input(field: &'static str, reason: impl Into<String>) -> Self {
        ServiceError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_display() {
        let err = ServiceError::invalid_input("width", "must be a number");
        assert_eq!(err.to_string(), "Invalid input 'width': must be a number");
        assert_eq!(err.to_http_status(), 400);
    }

    #[test]
    fn test_auth_failure_indistinguishable_from_not_found() {
        let auth = ServiceError::AuthorizationFailure;
        let missing = ServiceError::NotFound;
        assert_eq!(auth.to_string(), missing.to_string());
        assert_eq!(auth.to_http_status(), missing.to_http_status());
    }

    #[test]
    fn test_upstream_fetch_status() {
        let err = ServiceError::UpstreamFetch {
            url: "http://example.com/a.jpg".to_string(),
            reason: "status 503".to_string(),
        };
        assert_eq!(err.to_http_status(), 502);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ServiceError>();
    }
}
