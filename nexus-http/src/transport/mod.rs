//! Network transports.
//!
//! A [`Transport`] performs one exchange and normalizes the outcome into a
//! [`ResponseEnvelope`] or one of the terminal failures
//! ([`HttpClientError::Aborted`], [`HttpClientError::Timeout`],
//! [`HttpClientError::Network`] / [`HttpClientError::Fetch`]). Two
//! implementations ship with the crate:
//!
//! - [`FetchTransport`] (feature `fetch`): reqwest-backed, races the exchange
//!   against the signal and a timer with `tokio::select!`.
//! - [`SocketTransport`]: plain HTTP/1.1 over a tokio `TcpStream`, parses the
//!   raw header block itself and wires timeout/abort to an internal token.
//!
//! Both must be observably identical; the pipeline never knows which one ran.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use tokio_util::sync::CancellationToken;

use crate::{Body, HeaderStore, ResponseEnvelope, ResponseType, Result, StatusValidator};

#[cfg(feature = "fetch")]
mod fetch;
mod socket;

#[cfg(feature = "fetch")]
pub use fetch::FetchTransport;
pub use socket::SocketTransport;

/// Performs the actual network exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name, used in logs.
    fn name(&self) -> &'static str;

    /// Execute one request.
    async fn execute(&self, request: TransportRequest) -> Result<ResponseEnvelope>;
}

/// Everything a transport needs for one exchange.
#[derive(Clone)]
pub struct TransportRequest {
    /// Absolute request URL.
    pub url: String,
    /// Request method.
    pub method: Method,
    /// Final outgoing headers.
    pub headers: HeaderStore,
    /// Optional body.
    pub body: Option<Body>,
    /// Negotiated response decoding.
    pub response_type: ResponseType,
    /// `None` means no timeout.
    pub timeout: Option<Duration>,
    /// Caller cancellation.
    pub signal: Option<AbortSignal>,
    /// Success predicate applied to the status.
    pub validator: StatusValidator,
}

impl TransportRequest {
    /// Decode `payload` and wrap everything into an envelope.
    pub fn envelope(&self, status: u16, headers: HeaderStore, payload: Bytes) -> ResponseEnvelope {
        let body = if self.method == Method::HEAD {
            crate::ResponseBody::Empty
        } else {
            self.response_type.decode(payload)
        };
        ResponseEnvelope::new(
            self.url.clone(),
            self.method.clone(),
            status,
            headers,
            body,
            &self.validator,
        )
    }

    /// The timeout, with zero treated as "no timeout".
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|t| !t.is_zero())
    }

    pub(crate) fn aborted(&self) -> crate::HttpClientError {
        crate::HttpClientError::Aborted {
            url: self.url.clone(),
            method: self.method.clone(),
        }
    }

    pub(crate) fn timed_out(&self, after: Duration) -> crate::HttpClientError {
        crate::HttpClientError::Timeout {
            url: self.url.clone(),
            method: self.method.clone(),
            after,
        }
    }
}

impl std::fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRequest")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("response_type", &self.response_type)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Owner side of a cancellation signal.
///
/// Aborting is idempotent: the first call wins, later calls do nothing.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    token: CancellationToken,
}

impl AbortController {
    /// Create a new controller.
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal observing this controller.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            token: self.token.clone(),
        }
    }

    /// Fire the signal.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Check if the signal fired.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Observer side of an [`AbortController`].
#[derive(Debug, Clone)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    /// Check if the signal fired.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal fires.
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_validator;

    fn request(method: Method, response_type: ResponseType) -> TransportRequest {
        TransportRequest {
            url: "http://h/x".to_string(),
            method,
            headers: HeaderStore::new(),
            body: None,
            response_type,
            timeout: Some(Duration::ZERO),
            signal: None,
            validator: default_validator(),
        }
    }

    #[test]
    fn test_abort_is_idempotent() {
        let controller = AbortController::new();
        let signal = controller.signal();
        assert!(!signal.is_aborted());
        controller.abort();
        controller.abort();
        assert!(signal.is_aborted());
        assert!(controller.is_aborted());
    }

    #[tokio::test]
    async fn test_signal_resolves_after_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let waiter = tokio::spawn(async move { signal.aborted().await });
        controller.abort();
        waiter.await.unwrap();
    }

    #[test]
    fn test_zero_timeout_means_none() {
        let req = request(Method::GET, ResponseType::Json);
        assert_eq!(req.effective_timeout(), None);
    }

    #[test]
    fn test_envelope_skips_body_for_head() {
        let req = request(Method::HEAD, ResponseType::Text);
        let envelope = req.envelope(200, HeaderStore::new(), Bytes::from_static(b"ignored"));
        assert!(envelope.body().is_empty());
        assert!(envelope.ok());

        let req = request(Method::GET, ResponseType::Text);
        let envelope = req.envelope(500, HeaderStore::new(), Bytes::from_static(b"boom"));
        assert_eq!(envelope.text().as_deref(), Some("boom"));
        assert!(!envelope.ok());
    }
}
