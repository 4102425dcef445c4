//! HTTP Client error types.

use std::time::Duration;

use http::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::headers::HeaderStore;
use crate::response::{ResponseBody, ResponseEnvelope};

/// Result type for HTTP client operations.
pub type Result<T> = std::result::Result<T, HttpClientError>;

/// Boxed error returned by interceptor hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// HTTP client errors.
///
/// Every failure that happens after a request left the builder keeps the
/// call's `url` and `method`, so the envelope-shaped projection returned by
/// [`HttpClientError::to_envelope`] is always addressable.
#[derive(Debug, Clone, Error)]
pub enum HttpClientError {
    /// A body was attached to a method that does not carry one.
    #[error("can't add body on method '{method}'")]
    BodyNotAllowed {
        /// The offending method.
        method: Method,
    },

    /// The caller's abort signal fired before the exchange settled.
    #[error("Request aborted: {method} {url}")]
    Aborted {
        /// Request URL.
        url: String,
        /// Request method.
        method: Method,
    },

    /// The per-call timeout fired before the exchange settled.
    #[error("Request timed out after {after:?}: {method} {url}")]
    Timeout {
        /// Request URL.
        url: String,
        /// Request method.
        method: Method,
        /// The configured timeout.
        after: Duration,
    },

    /// Transport-level failure reported by the socket transport.
    #[error("Network error: {message}")]
    Network {
        /// Request URL.
        url: String,
        /// Request method.
        method: Method,
        /// Failure description.
        message: String,
    },

    /// Transport-level failure reported by the fetch transport.
    #[error("Failed to fetch: {message}")]
    Fetch {
        /// Request URL.
        url: String,
        /// Request method.
        method: Method,
        /// Failure description.
        message: String,
    },

    /// The exchange completed but the status failed the validator.
    #[error("Response status {} rejected by validator", display_status(.0.status()))]
    Validation(Box<ResponseEnvelope>),

    /// A `before` hook failed; the request was never transmitted.
    #[error("Interceptor '{id}' failed: {message}")]
    Interceptor {
        /// Interceptor id.
        id: String,
        /// Request URL.
        url: String,
        /// Request method.
        method: Method,
        /// Hook error message.
        message: String,
    },

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A body payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request pipeline panicked.
    #[error("Internal error: {message}")]
    Internal {
        /// Request URL.
        url: String,
        /// Request method.
        method: Method,
        /// Panic message.
        message: String,
    },
}

fn display_status(status: Option<u16>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

/// The `{name, message}` pair carried by envelope-shaped errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Error name, e.g. `TimeoutError`.
    pub name: String,
    /// Human readable message.
    pub message: String,
}

impl ErrorData {
    /// Create a new error payload.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl HttpClientError {
    /// The error's wire-level name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BodyNotAllowed { .. } => "BodyNotAllowed",
            Self::Aborted { .. } => "AbortError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Network { .. } => "NetworkError",
            Self::Fetch { .. } => "FetchError",
            Self::Validation(_) => "ValidationFailure",
            Self::Interceptor { .. } => "InterceptorError",
            Self::InvalidUrl(_) => "InvalidUrl",
            Self::Serialization(_) => "SerializationError",
            Self::Json(_) => "JsonError",
            Self::Config(_) => "ConfigError",
            Self::Internal { .. } => "InternalError",
        }
    }

    /// The `{name, message}` payload for this error.
    pub fn error_data(&self) -> ErrorData {
        let message = match self {
            Self::Aborted { .. } => "Request aborted".to_string(),
            Self::Timeout { .. } => "Timeout error".to_string(),
            Self::Network { message, .. }
            | Self::Fetch { message, .. }
            | Self::Interceptor { message, .. }
            | Self::Internal { message, .. } => message.clone(),
            other => other.to_string(),
        };
        ErrorData::new(self.name(), message)
    }

    /// Request URL, when the failure happened after the URL was resolved.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Aborted { url, .. }
            | Self::Timeout { url, .. }
            | Self::Network { url, .. }
            | Self::Fetch { url, .. }
            | Self::Interceptor { url, .. }
            | Self::Internal { url, .. } => Some(url),
            Self::Validation(envelope) => Some(envelope.url()),
            _ => None,
        }
    }

    /// Request method, when known.
    pub fn method(&self) -> Option<&Method> {
        match self {
            Self::BodyNotAllowed { method }
            | Self::Aborted { method, .. }
            | Self::Timeout { method, .. }
            | Self::Network { method, .. }
            | Self::Fetch { method, .. }
            | Self::Interceptor { method, .. }
            | Self::Internal { method, .. } => Some(method),
            Self::Validation(envelope) => Some(envelope.method()),
            _ => None,
        }
    }

    /// HTTP status, only available for validation failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Validation(envelope) => envelope.status(),
            _ => None,
        }
    }

    /// The rejected envelope of a validation failure.
    pub fn envelope(&self) -> Option<&ResponseEnvelope> {
        match self {
            Self::Validation(envelope) => Some(envelope),
            _ => None,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this is a caller abort.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Check if this is a transport-level failure.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Fetch { .. })
    }

    /// Project this error into the envelope shape delivered to error
    /// observers and `after` hooks.
    ///
    /// Validation failures return the real envelope; everything else gets
    /// `status: None`, empty headers and an [`ResponseBody::Error`] body.
    pub fn to_envelope(&self) -> ResponseEnvelope {
        if let Self::Validation(envelope) = self {
            return envelope.as_ref().clone();
        }
        ResponseEnvelope::failed(
            self.url().unwrap_or_default().to_string(),
            self.method().cloned().unwrap_or(Method::GET),
            HeaderStore::new(),
            ResponseBody::Error(self.error_data()),
        )
    }
}

impl From<serde_json::Error> for HttpClientError {
    fn from(err: serde_json::Error) -> Self {
        HttpClientError::Json(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names() {
        let timeout = HttpClientError::Timeout {
            url: "http://h/x".to_string(),
            method: Method::GET,
            after: Duration::from_millis(50),
        };
        assert_eq!(timeout.name(), "TimeoutError");
        assert!(timeout.is_timeout());
        assert!(!timeout.is_abort());

        let aborted = HttpClientError::Aborted {
            url: "http://h/x".to_string(),
            method: Method::POST,
        };
        assert_eq!(aborted.name(), "AbortError");
        assert_eq!(aborted.error_data().message, "Request aborted");
    }

    #[test]
    fn test_envelope_projection_keeps_url_and_method() {
        let err = HttpClientError::Network {
            url: "http://h/x".to_string(),
            method: Method::DELETE,
            message: "connection refused".to_string(),
        };
        let envelope = err.to_envelope();
        assert_eq!(envelope.url(), "http://h/x");
        assert_eq!(envelope.method(), &Method::DELETE);
        assert_eq!(envelope.status(), None);
        assert!(!envelope.ok());
        match envelope.body() {
            ResponseBody::Error(data) => {
                assert_eq!(data.name, "NetworkError");
                assert_eq!(data.message, "connection refused");
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_body_not_allowed_message() {
        let err = HttpClientError::BodyNotAllowed {
            method: Method::GET,
        };
        assert_eq!(err.to_string(), "can't add body on method 'GET'");
        assert_eq!(err.method(), Some(&Method::GET));
        assert!(err.url().is_none());
    }
}
