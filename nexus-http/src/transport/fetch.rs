//! reqwest-backed transport.

use async_trait::async_trait;
use tracing::{debug, trace};

use super::{Transport, TransportRequest};
use crate::{ClientConfig, HeaderStore, HttpClientError, ResponseEnvelope, Result};

/// Transport built on a shared `reqwest::Client`.
///
/// The exchange (send plus body read) is raced against the caller's signal
/// and a timer; whichever settles first decides the outcome and dropping the
/// losing future aborts the underlying request.
#[derive(Debug, Clone)]
pub struct FetchTransport {
    inner: reqwest::Client,
}

impl FetchTransport {
    /// Build a transport from the client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent);

        if config.gzip {
            builder = builder.gzip(true);
        }
        if config.brotli {
            builder = builder.brotli(true);
        }

        if config.follow_redirects {
            builder = builder.redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        } else {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }

        let inner = builder
            .build()
            .map_err(|e| HttpClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { inner })
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }

    fn failure(request: &TransportRequest, message: impl Into<String>) -> HttpClientError {
        HttpClientError::Fetch {
            url: request.url.clone(),
            method: request.method.clone(),
            message: message.into(),
        }
    }

    async fn exchange(&self, request: &TransportRequest) -> Result<ResponseEnvelope> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| Self::failure(request, format!("invalid URL: {e}")))?;

        let mut builder = self
            .inner
            .request(request.method.clone(), url)
            .headers(request.headers.to_native());
        if let Some(body) = &request.body {
            builder = builder.body(body.payload().clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::failure(request, e.to_string()))?;

        let status = response.status().as_u16();
        let headers = HeaderStore::from_native(response.headers());
        trace!(status, url = %request.url, "Fetch transport received headers");

        // body read failures keep status and headers
        let envelope = match response.bytes().await {
            Ok(payload) => request.envelope(status, headers, payload),
            Err(e) => {
                let mut envelope = request.envelope(status, headers, bytes::Bytes::new());
                envelope.set_decode_error(e.to_string());
                envelope
            }
        };
        Ok(envelope)
    }
}

#[async_trait]
impl Transport for FetchTransport {
    fn name(&self) -> &'static str {
        "fetch"
    }

    async fn execute(&self, request: TransportRequest) -> Result<ResponseEnvelope> {
        debug!(method = %request.method, url = %request.url, "Sending request via fetch transport");

        let signal = request.signal.clone();
        let cancelled = async {
            match &signal {
                Some(signal) => signal.aborted().await,
                None => std::future::pending().await,
            }
        };
        let timeout = request.effective_timeout();
        let timer = async {
            match timeout {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(request.aborted()),
            _ = timer => Err(request.timed_out(timeout.unwrap_or_default())),
            result = self.exchange(&request) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{default_validator, AbortController, ResponseType};
    use http::Method;
    use std::time::Duration;

    fn request(url: &str) -> TransportRequest {
        TransportRequest {
            url: url.to_string(),
            method: Method::GET,
            headers: HeaderStore::new(),
            body: None,
            response_type: ResponseType::Json,
            timeout: None,
            signal: None,
            validator: default_validator(),
        }
    }

    #[tokio::test]
    async fn test_invalid_url_is_fetch_error() {
        let transport = FetchTransport::new(&ClientConfig::default()).unwrap();
        let err = transport.execute(request("not a url")).await.unwrap_err();
        assert_eq!(err.name(), "FetchError");
        assert_eq!(err.url(), Some("not a url"));
    }

    #[tokio::test]
    async fn test_pre_aborted_signal_wins() {
        let transport = FetchTransport::new(&ClientConfig::default()).unwrap();
        let controller = AbortController::new();
        controller.abort();

        let mut req = request("http://127.0.0.1:9/never");
        req.signal = Some(controller.signal());
        req.timeout = Some(Duration::from_secs(5));
        let err = transport.execute(req).await.unwrap_err();
        assert!(err.is_abort());
    }
}
