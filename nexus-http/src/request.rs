//! Request builder and the per-call lifecycle.
//!
//! A [`RequestBuilder`] owns one [`RequestContext`] plus a snapshot of the
//! client state it was created from, so the call never observes later client
//! reconfiguration. [`RequestBuilder::execute`] spawns the lifecycle on the
//! current tokio runtime and returns a [`ResponseHandle`] right away.
//!
//! Header negotiation follows one rule, "set if absent, append thereafter":
//!
//! 1. client default headers, then caller headers;
//! 2. `before` hooks merge their headers;
//! 3. `Accept` from the response type, if absent;
//! 4. with a body, `Content-Type` from the body if absent; a JSON body under
//!    a foreign `Content-Type` gets `application/json` appended;
//! 5. a JSON `Content-Type` without a charset gets `charset=UTF-8` appended.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures::FutureExt;
use http::Method;
use serde::Serialize;
use tracing::trace;

use crate::client::append_query;
use crate::emitter::{Emitter, Phase, ResponseHandle};
use crate::interceptor::{
    push_unique, resolve_interceptors, run_after, run_before, InterceptorContext, ResponseContext,
};
use crate::transport::{AbortSignal, Transport, TransportRequest};
use crate::{
    Body, BodyKind, ClientConfig, HeaderStore, HeaderValues, HttpClientError, Interceptor,
    ResponseEnvelope, ResponseType, Result, StatusValidator,
};

/// Per-call options, all optional.
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Query parameters appended to the URL.
    pub query: Vec<(String, String)>,
    /// Caller headers.
    pub headers: Option<HeaderStore>,
    /// Request body.
    pub body: Option<Body>,
    /// Response decoding.
    pub response_type: Option<ResponseType>,
    /// Timeout; zero means none.
    pub timeout: Option<Duration>,
    /// Caller cancellation.
    pub signal: Option<AbortSignal>,
    /// Per-call interceptors.
    pub interceptors: Vec<Interceptor>,
    /// Status validator for this call.
    pub validator: Option<StatusValidator>,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("response_type", &self.response_type)
            .field("timeout", &self.timeout)
            .field("interceptors", &self.interceptors)
            .finish_non_exhaustive()
    }
}

/// Mutable state of one call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Resolved URL, without the builder's query parameters.
    pub url: String,
    /// Request method.
    pub method: Method,
    /// Headers negotiated so far.
    pub headers: HeaderStore,
    /// Response decoding.
    pub response_type: ResponseType,
    /// Log lifecycle events at debug level.
    pub is_debug_enabled: bool,
    /// Per-call interceptors, unique by id.
    pub interceptors: Vec<Interceptor>,
}

/// HTTP request builder.
pub struct RequestBuilder {
    context: RequestContext,
    query: Vec<(String, String)>,
    body: Option<Body>,
    timeout: Option<Duration>,
    signal: Option<AbortSignal>,
    validator: StatusValidator,
    transport: Arc<dyn Transport>,
    global_interceptors: Vec<Interceptor>,
}

impl RequestBuilder {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        global_interceptors: Vec<Interceptor>,
        validator: StatusValidator,
        config: &ClientConfig,
        method: Method,
        url: String,
    ) -> Self {
        let mut headers = HeaderStore::new();
        for (name, value) in &config.default_headers {
            headers.append(name, value.as_str());
        }

        Self {
            context: RequestContext {
                url,
                method,
                headers,
                response_type: config.default_response_type,
                is_debug_enabled: config.debug,
                interceptors: Vec::new(),
            },
            query: Vec::new(),
            body: None,
            timeout: config.timeout,
            signal: None,
            validator,
            transport,
            global_interceptors,
        }
    }

    /// Set a header, replacing any value set before for that name.
    pub fn header(mut self, name: &str, values: impl Into<HeaderValues>) -> Self {
        self.context.headers.set(name, values);
        self
    }

    /// Set several headers, each replacing earlier values for its name.
    pub fn headers(mut self, headers: impl Into<HeaderStore>) -> Self {
        let headers: HeaderStore = headers.into();
        for (name, values) in headers.iter() {
            self.context.headers.set(name, values.to_vec());
        }
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Add multiple query parameters.
    pub fn queries<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        for (k, v) in params {
            self.query.push((k.into(), v.to_string()));
        }
        self
    }

    /// Set bearer authentication.
    pub fn bearer_auth(self, token: impl Into<String>) -> Self {
        self.header("Authorization", format!("Bearer {}", token.into()))
    }

    /// Set basic authentication.
    pub fn basic_auth(
        self,
        username: impl Into<String>,
        password: Option<impl Into<String>>,
    ) -> Self {
        let credentials = match password {
            Some(p) => format!("{}:{}", username.into(), p.into()),
            None => format!("{}:", username.into()),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        self.header("Authorization", format!("Basic {}", encoded))
    }

    /// Set how the response body is decoded.
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.context.response_type = response_type;
        self
    }

    /// Set a custom timeout for this request. Zero disables it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a caller abort signal.
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Replace the status validator.
    pub fn validator(mut self, validator: impl Fn(u16) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Toggle lifecycle debug logging.
    pub fn debug(mut self, enable: bool) -> Self {
        self.context.is_debug_enabled = enable;
        self
    }

    /// Add a per-call interceptor, ignored if its id is already present.
    pub fn interceptor(mut self, interceptor: Interceptor) -> Self {
        push_unique(&mut self.context.interceptors, interceptor);
        self
    }

    /// Add several per-call interceptors.
    pub fn interceptors(mut self, interceptors: impl IntoIterator<Item = Interceptor>) -> Self {
        for interceptor in interceptors {
            push_unique(&mut self.context.interceptors, interceptor);
        }
        self
    }

    /// Attach a body. Only POST, PUT and PATCH carry one.
    pub fn body(mut self, body: Body) -> Result<Self> {
        if !matches!(self.context.method, Method::POST | Method::PUT | Method::PATCH) {
            return Err(HttpClientError::BodyNotAllowed {
                method: self.context.method.clone(),
            });
        }
        self.body = Some(body);
        Ok(self)
    }

    /// Attach a JSON body.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let body = Body::json(value)?;
        self.body(body)
    }

    /// Attach a URL-encoded form body.
    pub fn form<T: Serialize + ?Sized>(self, fields: &T) -> Result<Self> {
        let body = Body::form(fields)?;
        self.body(body)
    }

    /// Attach a text body.
    pub fn text(self, text: impl Into<String>) -> Result<Self> {
        self.body(Body::text(text))
    }

    /// Merge transport-level options. A body in `options` goes through
    /// [`body`](Self::body).
    pub fn configure(mut self, options: RequestOptions) -> Result<Self> {
        let RequestOptions {
            query,
            headers,
            body,
            response_type,
            timeout,
            signal,
            interceptors,
            validator,
        } = options;

        self.query.extend(query);
        if let Some(headers) = headers {
            self = self.headers(headers);
        }
        if let Some(response_type) = response_type {
            self.context.response_type = response_type;
        }
        if let Some(timeout) = timeout {
            self.timeout = Some(timeout);
        }
        if let Some(signal) = signal {
            self.signal = Some(signal);
        }
        if let Some(validator) = validator {
            self.validator = validator;
        }
        self = self.interceptors(interceptors);
        match body {
            Some(body) => self.body(body),
            None => Ok(self),
        }
    }

    /// The call's context.
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// The final URL, query parameters included.
    pub fn url(&self) -> String {
        append_query(&self.context.url, &self.query)
    }

    /// Start the call and return its observer handle.
    ///
    /// Must be called within a tokio runtime.
    pub fn execute(self) -> ResponseHandle {
        let url = self.url();
        let method = self.context.method.clone();
        let (handle, emitter) =
            ResponseHandle::new(url.clone(), method.clone(), self.context.is_debug_enabled);

        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(self.run(url.clone(), &emitter))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(HttpClientError::Internal {
                        url,
                        method,
                        message: panic_message(panic),
                    })
                });
            emitter.emit(outcome);
        });

        handle
    }

    /// Start the call and wait for its outcome.
    pub async fn send(self) -> Result<ResponseEnvelope> {
        self.execute().await
    }

    async fn run(self, url: String, emitter: &Emitter) -> Result<ResponseEnvelope> {
        let RequestBuilder {
            context,
            body,
            timeout,
            signal,
            validator,
            transport,
            global_interceptors,
            ..
        } = self;
        let RequestContext {
            method,
            headers,
            response_type,
            is_debug_enabled,
            interceptors,
            ..
        } = context;

        emitter.set_phase(Phase::Configuring);
        let interceptors = resolve_interceptors(&global_interceptors, &interceptors, &method);

        emitter.set_phase(Phase::BeforeDispatch);
        let ctx = run_before(
            &interceptors,
            InterceptorContext {
                url: url.clone(),
                method: method.clone(),
                headers,
                is_debug_enabled,
                response_type,
            },
        )
        .await?;
        let mut headers = ctx.headers;
        negotiate_headers(&mut headers, response_type, body.as_ref());
        ensure_json_charset(&mut headers);

        emitter.set_phase(Phase::Transmitting);
        trace!(transport = transport.name(), method = %method, url = %url, "Dispatching request");
        let outcome = transport
            .execute(TransportRequest {
                url,
                method,
                headers,
                body,
                response_type,
                timeout,
                signal,
                validator,
            })
            .await
            .and_then(|envelope| {
                if envelope.ok() {
                    Ok(envelope)
                } else {
                    Err(HttpClientError::Validation(Box::new(envelope)))
                }
            });

        emitter.set_phase(Phase::AfterDispatch);
        let envelope = match &outcome {
            Ok(envelope) => envelope.clone(),
            Err(error) => error.to_envelope(),
        };
        let response_ctx = ResponseContext::from_envelope(&envelope, is_debug_enabled, response_type);
        run_after(&interceptors, &response_ctx).await;

        outcome
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("context", &self.context)
            .field("query", &self.query)
            .field("body", &self.body)
            .field("timeout", &self.timeout)
            .field("transport", &self.transport.name())
            .finish_non_exhaustive()
    }
}

fn negotiate_headers(headers: &mut HeaderStore, response_type: ResponseType, body: Option<&Body>) {
    if !headers.has("Accept") {
        headers.set("Accept", response_type.accept());
    }
    let Some(body) = body else {
        return;
    };
    if !headers.has("Content-Type") {
        headers.set("Content-Type", body.content_type());
    } else if body.kind() == BodyKind::Json && !has_json_media_type(headers) {
        headers.append("Content-Type", "application/json");
    }
}

fn ensure_json_charset(headers: &mut HeaderStore) {
    let Some(values) = headers.get_all("Content-Type") else {
        return;
    };
    let has_charset = values
        .iter()
        .any(|value| value.trim().to_ascii_lowercase().starts_with("charset="));
    if has_json_media_type(headers) && !has_charset {
        headers.append("Content-Type", "charset=UTF-8");
    }
}

fn has_json_media_type(headers: &HeaderStore) -> bool {
    headers.get_all("Content-Type").is_some_and(|values| {
        values.iter().any(|value| {
            let value = value.trim().to_ascii_lowercase();
            value == "application/json" || (value.starts_with("application/") && value.ends_with("+json"))
        })
    })
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("request pipeline panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("request pipeline panicked: {message}")
    } else {
        "request pipeline panicked".to_string()
    }
}
