//! Errors produced while configuring or executing a request.
//!
//! Configuration errors ([`ErrorKind::InvalidArgument`] and
//! [`ErrorKind::MissingCapability`]) are returned directly from the fluent
//! [`Request`][crate::Request] methods, before any I/O happens. Everything
//! else surfaces as the failure of the request future.

use std::time::Duration;

use http::StatusCode;
use thiserror::Error;
use url::Url;

use crate::BoxError;
use crate::Method;

/// Request error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The URL could not be parsed, or is not absolute.
    #[error("malformed URL {input:?}: {source}")]
    InvalidUrl {
        /// The offending input.
        input: String,

        /// Why parsing failed.
        #[source]
        source: url::ParseError,
    },

    /// The URL uses a scheme the engine cannot send to.
    #[error("unsupported URL scheme in {0}")]
    UnsupportedScheme(Url),

    /// The method is not one of the supported HTTP methods.
    #[error("invalid method: {0:?}")]
    InvalidMethod(String),

    /// The timeout is not a finite, positive duration.
    #[error("timeout must be a finite positive duration, got {0}")]
    InvalidTimeout(String),

    /// A header name or value could not be used.
    #[error("invalid header {name:?}: {message}")]
    InvalidHeader {
        /// Header name as supplied.
        name: String,

        /// Description of the problem.
        message: String,
    },

    /// A behaviour was enabled without registering the middleware it needs.
    #[error("missing the `{name}` middleware")]
    MissingCapability {
        /// Name of the middleware which must be registered.
        name: &'static str,
    },

    /// The transport could not complete the call (DNS, refused, reset).
    #[error("unable to make a {method} request to {url} ({source})")]
    Transport {
        /// Method of the failed attempt.
        method: Method,

        /// URL of the failed attempt.
        url: Url,

        /// Underlying transport error.
        #[source]
        source: BoxError,
    },

    /// Reading, decoding or serialising a body failed.
    #[error("tried to serialise data, was unsuccessful ({source})")]
    Serialization {
        /// Underlying error.
        #[source]
        source: BoxError,
    },

    /// The terminal response status was outside of the 2xx range.
    #[error("{} {reason} from {url}", status.as_u16())]
    Status {
        /// Status code of the terminal response.
        status: StatusCode,

        /// Reason phrase of the terminal response.
        reason: String,

        /// URL of the final hop.
        url: Url,
    },

    /// The configured timeout elapsed before the call completed.
    #[error("request to {url} timed out after {}ms", timeout.as_millis())]
    Timeout {
        /// URL of the attempt which timed out.
        url: Url,

        /// The configured timeout.
        timeout: Duration,
    },

    /// The redirect chain exceeded the configured hop limit.
    #[error("too many redirects (limit {limit}) at {url}")]
    TooManyRedirects {
        /// URL of the hop which would have exceeded the limit.
        url: Url,

        /// The configured limit.
        limit: usize,
    },

    /// A middleware hook failed; the error is passed through unchanged.
    #[error(transparent)]
    Middleware(BoxError),
}

/// Stable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Malformed URL, method, timeout or header.
    InvalidArgument,

    /// A capability was enabled without its middleware.
    MissingCapability,

    /// Connection level failure.
    TransportFailure,

    /// Failure reading or writing body data.
    SerializationFailure,

    /// Terminal status outside of the success range.
    HttpStatusFailure,

    /// The configured timeout elapsed.
    TimeoutFailure,

    /// Redirect hop limit exceeded.
    TooManyRedirects,

    /// Failure raised by a middleware hook.
    Middleware,
}

impl Error {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidUrl { .. }
            | Error::UnsupportedScheme(_)
            | Error::InvalidMethod(_)
            | Error::InvalidTimeout(_)
            | Error::InvalidHeader { .. } => ErrorKind::InvalidArgument,
            Error::MissingCapability { .. } => ErrorKind::MissingCapability,
            Error::Transport { .. } => ErrorKind::TransportFailure,
            Error::Serialization { .. } => ErrorKind::SerializationFailure,
            Error::Status { .. } => ErrorKind::HttpStatusFailure,
            Error::Timeout { .. } => ErrorKind::TimeoutFailure,
            Error::TooManyRedirects { .. } => ErrorKind::TooManyRedirects,
            Error::Middleware(_) => ErrorKind::Middleware,
        }
    }

    /// Numeric error code.
    ///
    /// Status failures use the HTTP status code itself, every other kind has
    /// a fixed code above 1000.
    pub fn code(&self) -> u16 {
        if let Error::Status { status, .. } = self {
            return status.as_u16();
        }

        match self.kind() {
            ErrorKind::InvalidArgument => 1001,
            ErrorKind::MissingCapability => 1002,
            ErrorKind::SerializationFailure => 1003,
            ErrorKind::TransportFailure => 1004,
            ErrorKind::TimeoutFailure => 1005,
            ErrorKind::TooManyRedirects => 1006,
            ErrorKind::Middleware | ErrorKind::HttpStatusFailure => 1007,
        }
    }

    /// The status code of a [`Error::Status`] failure.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error was raised while configuring the request, rather
    /// than while executing it.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidArgument | ErrorKind::MissingCapability
        )
    }

    pub(crate) fn serialization<E: Into<BoxError>>(error: E) -> Self {
        Error::Serialization {
            source: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(Error: std::error::Error, Send, Sync, Into<BoxError>);

    #[test]
    fn status_code_is_error_code() {
        let error = Error::Status {
            status: StatusCode::NOT_FOUND,
            reason: "Not Found".into(),
            url: "http://a/x".parse().unwrap(),
        };

        assert_eq!(error.kind(), ErrorKind::HttpStatusFailure);
        assert_eq!(error.code(), 404);
        assert_eq!(error.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(error.to_string(), "404 Not Found from http://a/x");
    }

    #[test]
    fn transport_message_names_method_and_url() {
        let error = Error::Transport {
            method: Method::Post,
            url: "http://a/x".parse().unwrap(),
            source: "connection refused".into(),
        };

        assert_eq!(error.code(), 1004);
        assert_eq!(
            error.to_string(),
            "unable to make a POST request to http://a/x (connection refused)"
        );
    }

    #[test]
    fn configuration_errors() {
        assert!(Error::MissingCapability { name: "stream" }.is_configuration());
        assert!(Error::InvalidTimeout("NaN".into()).is_configuration());
        assert!(!Error::serialization("boom").is_configuration());
        assert_eq!(Error::serialization("boom").code(), 1003);
    }

    #[test]
    fn timeout_message() {
        let error = Error::Timeout {
            url: "http://a/".parse().unwrap(),
            timeout: Duration::from_millis(50),
        };
        assert_eq!(error.to_string(), "request to http://a/ timed out after 50ms");
        assert_eq!(error.kind(), ErrorKind::TimeoutFailure);
    }
}
