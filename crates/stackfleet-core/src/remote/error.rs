//! Classified errors reported by the control plane.

use thiserror::Error;

/// Error code used for transport-level failures (timeouts, DNS, TLS).
pub const REQUEST_ERROR: &str = "RequestError";
/// Error code used when the control plane rate-limits a caller.
pub const THROTTLING: &str = "Throttling";
/// Error code used for request validation failures.
pub const VALIDATION_ERROR: &str = "ValidationError";
/// Error code used when a freshly created changeset is not visible yet.
pub const CHANGE_SET_NOT_FOUND: &str = "ChangeSetNotFound";
/// Error code used for local failures no retry can fix, such as a request
/// that could not be built.
pub const CLIENT_ERROR: &str = "ClientError";

/// An error returned by a remote call, carrying the service code and the
/// remote message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Transport failure that never reached the service.
    pub fn request(message: impl Into<String>) -> Self {
        Self::new(REQUEST_ERROR, message)
    }

    /// Local failure that was never sent or cannot succeed when resent.
    pub fn client(message: impl Into<String>) -> Self {
        Self::new(CLIENT_ERROR, message)
    }

    pub fn throttling() -> Self {
        Self::new(THROTTLING, "Rate exceeded")
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(VALIDATION_ERROR, message)
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_keeps_code_and_message() {
        let err = RemoteError::validation("Stack with id api does not exist");
        assert_eq!(
            err.to_string(),
            "ValidationError: Stack with id api does not exist"
        );
    }

    #[test]
    fn request_errors_use_the_request_code() {
        assert_eq!(RemoteError::request("connection reset").code, REQUEST_ERROR);
    }
}
