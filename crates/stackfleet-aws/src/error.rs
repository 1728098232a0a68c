//! Mapping of SDK errors onto [`RemoteError`].

use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use stackfleet_core::remote::RemoteError;

/// Convert an SDK error, keeping the service code and message verbatim.
///
/// Timeouts, I/O dispatch failures and unreadable responses become request
/// errors. Any other local failure becomes a client error.
pub(crate) fn remote_error<E, R>(err: SdkError<E, R>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let rendered = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ServiceError(_) => from_metadata(err.code(), err.message(), rendered),
        SdkError::TimeoutError(_) | SdkError::ResponseError(_) => RemoteError::request(rendered),
        SdkError::DispatchFailure(failure) if failure.is_io() || failure.is_timeout() => {
            RemoteError::request(rendered)
        }
        _ => RemoteError::client(rendered),
    }
}

fn from_metadata(code: Option<&str>, message: Option<&str>, rendered: String) -> RemoteError {
    match code {
        Some(code) => RemoteError::new(code, message.map(str::to_string).unwrap_or(rendered)),
        None => RemoteError::request(rendered),
    }
}
