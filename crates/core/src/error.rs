//! Unified error types for tabsync.
//!
//! `FetchError` is the failure taxonomy of a single retrieval. `Error` wraps it
//! together with the failures raised outside the retrieval path.

/// Why a retrieval produced no usable payload.
///
/// Transient failures (rate limiting, server errors, transport failures) only
/// surface here when no cached payload was available to fall back on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The origin denied anonymous access to the document.
    #[error("NOT_PUBLISHED: {0}")]
    NotPublished(String),

    /// The document or tab does not exist.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// Transport failure or an unclassified non-success status.
    #[error("NETWORK: {0}")]
    Network(String),

    /// The body could not be decoded into rows, or the origin answered
    /// inconsistently (not-modified with nothing cached).
    #[error("PARSE_ERROR: {0}")]
    ParseError(String),

    /// Rate limited or 5xx from the origin.
    #[error("SERVER_ERROR: {0}")]
    ServerError(String),
}

impl FetchError {
    /// Stable machine-readable code, matching the display prefix.
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::NotPublished(_) => "NOT_PUBLISHED",
            FetchError::NotFound(_) => "NOT_FOUND",
            FetchError::Network(_) => "NETWORK",
            FetchError::ParseError(_) => "PARSE_ERROR",
            FetchError::ServerError(_) => "SERVER_ERROR",
        }
    }
}

/// Unified error type for tabsync.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A retrieval failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A `document:tab` source reference is malformed.
    #[error("INVALID_SOURCE: {0}")]
    InvalidSource(String),

    /// A refresh operation failed for a reason other than a retrieval.
    #[error("REFRESH_FAILED: {0}")]
    Refresh(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::NotFound("doc:0".to_string());
        assert!(err.to_string().starts_with("NOT_FOUND"));
        assert!(err.to_string().contains("doc:0"));
    }

    #[test]
    fn test_fetch_error_code_matches_display() {
        let errors = [
            FetchError::NotPublished("x".into()),
            FetchError::NotFound("x".into()),
            FetchError::Network("x".into()),
            FetchError::ParseError("x".into()),
            FetchError::ServerError("x".into()),
        ];
        for err in errors {
            assert!(err.to_string().starts_with(err.code()));
        }
    }

    #[test]
    fn test_error_from_fetch_error_is_transparent() {
        let err: Error = FetchError::ServerError("status 503".into()).into();
        assert_eq!(err.to_string(), "SERVER_ERROR: status 503");
        assert!(matches!(err, Error::Fetch(FetchError::ServerError(_))));
    }
}
