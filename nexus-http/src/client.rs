//! HTTP client implementation.

use std::sync::Arc;

use http::Method;
use tracing::debug;
use url::Url;

use crate::transport::{SocketTransport, Transport};
use crate::interceptor::push_unique;
use crate::{
    ClientConfig, HttpClientError, Interceptor, RequestBuilder, RequestOptions, ResponseEnvelope,
    ResponseType, Result, StatusValidator, default_validator,
};

/// HTTP client entry point.
///
/// Holds the base URL, default response type, global interceptors and the
/// selected transport. Every call snapshots this state when its
/// [`RequestBuilder`] is created, so reconfiguring the client never affects
/// calls already built.
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    interceptors: Vec<Interceptor>,
    validator: StatusValidator,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration.
    ///
    /// The fetch transport is preferred; the socket transport is used when
    /// the `fetch` feature is off or its client cannot be built.
    pub fn new(config: ClientConfig) -> Self {
        let transport = select_transport(&config);
        Self {
            transport,
            config,
            interceptors: Vec::new(),
            validator: default_validator(),
        }
    }

    /// Create a client configured from the environment.
    pub fn from_env() -> Self {
        Self::new(ClientConfig::from_env())
    }

    /// Replace the transport.
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Replace the transport if `activator` returns true. The activator runs
    /// immediately.
    pub fn use_transport(
        &mut self,
        transport: impl Transport + 'static,
        activator: impl FnOnce() -> bool,
    ) -> bool {
        if !activator() {
            debug!(transport = transport.name(), "Transport activator declined");
            return false;
        }
        debug!(transport = transport.name(), "Switching transport");
        self.transport = Arc::new(transport);
        true
    }

    /// Name of the active transport.
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Set the base URL. Only its origin and path are kept.
    pub fn set_base_url(&mut self, base_url: &str) -> Result<()> {
        let parsed = Url::parse(base_url)
            .map_err(|e| HttpClientError::InvalidUrl(format!("{base_url}: {e}")))?;
        let origin = parsed.origin();
        if !origin.is_tuple() {
            return Err(HttpClientError::InvalidUrl(format!(
                "{base_url}: base URL has no origin"
            )));
        }
        self.config.base_url = Some(format!("{}{}", origin.ascii_serialization(), parsed.path()));
        Ok(())
    }

    /// Register a global interceptor. Ignored if its id is already present.
    pub fn add_global_interceptor(&mut self, interceptor: Interceptor) -> &mut Self {
        let id = interceptor.id().to_string();
        if !push_unique(&mut self.interceptors, interceptor) {
            debug!(interceptor = %id, "Interceptor already registered");
        }
        self
    }

    /// Register a global interceptor if `activator` returns true.
    pub fn add_global_interceptor_if(
        &mut self,
        interceptor: Interceptor,
        activator: impl FnOnce() -> bool,
    ) -> &mut Self {
        if activator() {
            self.add_global_interceptor(interceptor);
        }
        self
    }

    /// Register several global interceptors.
    pub fn add_global_interceptors(
        &mut self,
        interceptors: impl IntoIterator<Item = Interceptor>,
    ) -> &mut Self {
        for interceptor in interceptors {
            self.add_global_interceptor(interceptor);
        }
        self
    }

    /// Registered global interceptors.
    pub fn global_interceptors(&self) -> &[Interceptor] {
        &self.interceptors
    }

    /// Set the response type used when a call does not pick one.
    pub fn set_default_response_type(&mut self, response_type: ResponseType) -> &mut Self {
        self.config.default_response_type = response_type;
        self
    }

    /// Set the validator used when a call does not provide one.
    pub fn set_default_validator(
        &mut self,
        validator: impl Fn(u16) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Create a request builder with a custom method.
    pub fn request(&self, method: Method, url: impl AsRef<str>) -> RequestBuilder {
        let url = join_url(self.config.base_url.as_deref(), url.as_ref());
        RequestBuilder::new(
            self.transport.clone(),
            self.interceptors.clone(),
            self.validator.clone(),
            &self.config,
            method,
            url,
        )
    }

    /// Create a GET request builder.
    pub fn get(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Create a POST request builder.
    pub fn post(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Create a PUT request builder.
    pub fn put(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Create a PATCH request builder.
    pub fn patch(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Create a DELETE request builder.
    pub fn delete(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Create a HEAD request builder.
    pub fn head(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Create an OPTIONS request builder.
    pub fn options(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::OPTIONS, url)
    }

    /// Create a TRACE request builder.
    pub fn trace(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::TRACE, url)
    }

    /// Build, configure and send a request in one go.
    pub async fn execute(
        &self,
        method: Method,
        url: impl AsRef<str>,
        options: RequestOptions,
    ) -> Result<ResponseEnvelope> {
        self.request(method, url).configure(options)?.send().await
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("transport", &self.transport.name())
            .field("config", &self.config)
            .field("interceptors", &self.interceptors)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "fetch")]
fn select_transport(config: &ClientConfig) -> Arc<dyn Transport> {
    match crate::transport::FetchTransport::new(config) {
        Ok(transport) => {
            debug!(transport = "fetch", "Selected transport");
            Arc::new(transport)
        }
        Err(error) => {
            tracing::warn!(error = %error, "Fetch transport unavailable, falling back to socket transport");
            Arc::new(SocketTransport::new(config))
        }
    }
}

#[cfg(not(feature = "fetch"))]
fn select_transport(config: &ClientConfig) -> Arc<dyn Transport> {
    debug!(transport = "socket", "Selected transport");
    Arc::new(SocketTransport::new(config))
}

/// Join `path` onto `base` with exactly one `/` between them.
///
/// Absolute paths (`scheme://...`) and a missing base leave `path` as is.
pub fn join_url(base: Option<&str>, path: &str) -> String {
    let base = match base {
        Some(base) if !base.is_empty() => base,
        _ => return path.to_string(),
    };
    if is_absolute(path) {
        return path.to_string();
    }
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn is_absolute(path: &str) -> bool {
    match path.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Append URL-encoded `pairs` to `url`, after any query it already has.
pub fn append_query(url: &str, pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return url.to_string();
    }
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    let separator = if url.ends_with('?') || url.ends_with('&') {
        ""
    } else if url.contains('?') {
        "&"
    } else {
        "?"
    };
    format!("{url}{separator}{encoded}")
}
