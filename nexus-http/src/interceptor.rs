//! Request and response interceptors.
//!
//! An [`Interceptor`] is a plain record: an id, the methods it applies to
//! and two optional hooks. The `before` hook sees the outgoing request
//! metadata and may return a context whose headers are merged into the
//! running header state. The `after` hook observes the finished exchange
//! (or the envelope projection of its failure).
//!
//! Synchronous hooks are wrapped into ready futures on registration, so the
//! dispatcher awaits every hook the same way, one after another.
//!
//! ```
//! use nexus_http::{Interceptor, Method};
//!
//! let request_id = Interceptor::new("request-id")
//!     .method(Method::GET)
//!     .before(|mut ctx| {
//!         ctx.headers.append("X-Request-Id", "42");
//!         Ok(ctx)
//!     });
//! assert!(request_id.has_before());
//! assert!(!request_id.has_after());
//! ```

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use http::Method;
use tracing::{debug, trace, warn};

use crate::{BoxError, HeaderStore, HttpClientError, ResponseBody, ResponseEnvelope, ResponseType, Result};

/// Future returned by a `before` hook.
pub type BeforeFuture = BoxFuture<'static, std::result::Result<InterceptorContext, BoxError>>;

/// Future returned by an `after` hook.
pub type AfterFuture = BoxFuture<'static, std::result::Result<(), BoxError>>;

/// Stored `before` hook.
pub type BeforeHook = Arc<dyn Fn(InterceptorContext) -> BeforeFuture + Send + Sync>;

/// Stored `after` hook.
pub type AfterHook = Arc<dyn Fn(ResponseContext) -> AfterFuture + Send + Sync>;

/// Request metadata handed to `before` hooks.
#[derive(Debug, Clone)]
pub struct InterceptorContext {
    /// Resolved request URL.
    pub url: String,
    /// Request method.
    pub method: Method,
    /// Headers accumulated so far.
    pub headers: HeaderStore,
    /// Whether lifecycle debug logging is on for this call.
    pub is_debug_enabled: bool,
    /// Negotiated response type.
    pub response_type: ResponseType,
}

/// Response metadata handed to `after` hooks.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    /// Request URL.
    pub url: String,
    /// Request method.
    pub method: Method,
    /// Response headers (empty on transport failures).
    pub headers: HeaderStore,
    /// Whether lifecycle debug logging is on for this call.
    pub is_debug_enabled: bool,
    /// Negotiated response type.
    pub response_type: ResponseType,
    /// HTTP status, `None` when the exchange never produced one.
    pub status: Option<u16>,
    /// Whether the status passed the validator.
    pub ok: bool,
    /// Decoded body, or the `{name, message}` error payload.
    pub body: ResponseBody,
}

impl ResponseContext {
    pub(crate) fn from_envelope(
        envelope: &ResponseEnvelope,
        is_debug_enabled: bool,
        response_type: ResponseType,
    ) -> Self {
        Self {
            url: envelope.url().to_string(),
            method: envelope.method().clone(),
            headers: envelope.headers().clone(),
            is_debug_enabled,
            response_type,
            status: envelope.status(),
            ok: envelope.ok(),
            body: envelope.body().clone(),
        }
    }

    /// Check if the status is `status`.
    pub fn is_status(&self, status: u16) -> bool {
        self.status == Some(status)
    }
}

/// A participant in the request lifecycle.
#[derive(Clone)]
pub struct Interceptor {
    id: String,
    allowed_methods: Vec<Method>,
    before: Option<BeforeHook>,
    after: Option<AfterHook>,
}

impl Interceptor {
    /// Create an inert interceptor with no methods.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            allowed_methods: Vec::new(),
            before: None,
            after: None,
        }
    }

    /// Add the methods this interceptor applies to.
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        for method in methods {
            self = self.method(method);
        }
        self
    }

    /// Add a single method.
    pub fn method(mut self, method: Method) -> Self {
        if !self.allowed_methods.contains(&method) {
            self.allowed_methods.push(method);
        }
        self
    }

    /// Install a synchronous `before` hook.
    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(InterceptorContext) -> std::result::Result<InterceptorContext, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.before = Some(Arc::new(move |ctx| futures::future::ready(hook(ctx)).boxed()));
        self
    }

    /// Install an asynchronous `before` hook.
    pub fn before_async<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(InterceptorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<InterceptorContext, BoxError>> + Send + 'static,
    {
        self.before = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    /// Install a synchronous `after` hook.
    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(ResponseContext) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.after = Some(Arc::new(move |ctx| futures::future::ready(hook(ctx)).boxed()));
        self
    }

    /// Install an asynchronous `after` hook.
    pub fn after_async<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ResponseContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.after = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    /// Interceptor id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Methods this interceptor applies to.
    pub fn allowed_methods(&self) -> &[Method] {
        &self.allowed_methods
    }

    /// Check if the interceptor applies to `method`.
    pub fn applies_to(&self, method: &Method) -> bool {
        self.allowed_methods.contains(method)
    }

    /// Check if a `before` hook is installed.
    pub fn has_before(&self) -> bool {
        self.before.is_some()
    }

    /// Check if an `after` hook is installed.
    pub fn has_after(&self) -> bool {
        self.after.is_some()
    }

    /// Interceptor calling `handler` whenever a response carries `status`.
    ///
    /// Applies to GET, POST, PUT, PATCH and DELETE.
    pub fn on_status<F>(id: impl Into<String>, status: u16, handler: F) -> Self
    where
        F: Fn(&ResponseContext) + Send + Sync + 'static,
    {
        Self::new(id)
            .methods(default_status_methods())
            .after(move |ctx| {
                if ctx.is_status(status) {
                    handler(&ctx);
                }
                Ok(())
            })
    }

    /// Handler for `404 Not Found`.
    pub fn not_found<F>(handler: F) -> Self
    where
        F: Fn(&ResponseContext) + Send + Sync + 'static,
    {
        Self::on_status("not-found", 404, handler)
    }

    /// Handler for `401 Unauthorized`.
    pub fn unauthorized<F>(handler: F) -> Self
    where
        F: Fn(&ResponseContext) + Send + Sync + 'static,
    {
        Self::on_status("unauthorized", 401, handler)
    }

    /// Handler for `403 Forbidden`.
    pub fn forbidden<F>(handler: F) -> Self
    where
        F: Fn(&ResponseContext) + Send + Sync + 'static,
    {
        Self::on_status("forbidden", 403, handler)
    }

    /// Handler for `500 Internal Server Error`.
    pub fn internal_server_error<F>(handler: F) -> Self
    where
        F: Fn(&ResponseContext) + Send + Sync + 'static,
    {
        Self::on_status("internal-server-error", 500, handler)
    }

    /// Interceptor that logs every request and response, for all methods.
    pub fn logging() -> Self {
        Self::new("logging")
            .methods(all_methods())
            .before(|ctx| {
                debug!(method = %ctx.method, url = %ctx.url, "Sending HTTP request");
                ctx.headers.for_each(|name, values| {
                    trace!(header = %name, value = ?values, "Request header");
                });
                Ok(ctx)
            })
            .after(|ctx| {
                debug!(
                    method = %ctx.method,
                    url = %ctx.url,
                    status = ?ctx.status,
                    ok = ctx.ok,
                    "Received HTTP response"
                );
                ctx.headers.for_each(|name, values| {
                    trace!(header = %name, value = ?values, "Response header");
                });
                Ok(())
            })
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("id", &self.id)
            .field("allowed_methods", &self.allowed_methods)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

fn default_status_methods() -> [Method; 5] {
    [Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE]
}

fn all_methods() -> [Method; 8] {
    [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::HEAD,
        Method::OPTIONS,
        Method::TRACE,
    ]
}

/// Concatenate, drop repeated ids (first wins), keep those scoped to `method`.
pub fn resolve_interceptors(
    global: &[Interceptor],
    per_call: &[Interceptor],
    method: &Method,
) -> Vec<Interceptor> {
    let mut seen = HashSet::new();
    global
        .iter()
        .chain(per_call)
        .filter(|interceptor| seen.insert(interceptor.id.clone()))
        .filter(|interceptor| interceptor.applies_to(method))
        .cloned()
        .collect()
}

/// Push `interceptor` unless one with the same id is already present.
pub(crate) fn push_unique(list: &mut Vec<Interceptor>, interceptor: Interceptor) -> bool {
    if list.iter().any(|existing| existing.id == interceptor.id) {
        return false;
    }
    list.push(interceptor);
    true
}

/// Invoke a hook and await its future, catching panics from either step.
async fn guarded<T>(call: impl FnOnce() -> BoxFuture<'static, T>) -> std::thread::Result<T> {
    match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
        Err(panic) => Err(panic),
    }
}

/// Run every `before` hook in order, merging returned headers into `ctx`.
///
/// The first failing hook aborts the chain.
pub(crate) async fn run_before(
    interceptors: &[Interceptor],
    mut ctx: InterceptorContext,
) -> Result<InterceptorContext> {
    for interceptor in interceptors {
        let Some(hook) = &interceptor.before else {
            continue;
        };
        trace!(interceptor = %interceptor.id, method = %ctx.method, "Running before hook");

        let failure = |message: String| HttpClientError::Interceptor {
            id: interceptor.id.clone(),
            url: ctx.url.clone(),
            method: ctx.method.clone(),
            message,
        };

        let returned = match guarded(|| hook(ctx.clone())).await {
            Ok(Ok(returned)) => returned,
            Ok(Err(error)) => return Err(failure(error.to_string())),
            Err(_) => return Err(failure("before hook panicked".to_string())),
        };
        ctx.headers.merge(&returned.headers);
    }
    Ok(ctx)
}

/// Run every `after` hook in order. Failures and panics are logged and
/// never stop the remaining hooks.
pub(crate) async fn run_after(interceptors: &[Interceptor], ctx: &ResponseContext) {
    for interceptor in interceptors {
        let Some(hook) = &interceptor.after else {
            continue;
        };
        trace!(interceptor = %interceptor.id, method = %ctx.method, "Running after hook");

        match guarded(|| hook(ctx.clone())).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(
                interceptor = %interceptor.id,
                url = %ctx.url,
                error = %error,
                "After hook failed"
            ),
            Err(_) => warn!(interceptor = %interceptor.id, url = %ctx.url, "After hook panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context(method: Method) -> InterceptorContext {
        InterceptorContext {
            url: "http://api/users".to_string(),
            method,
            headers: HeaderStore::new(),
            is_debug_enabled: false,
            response_type: ResponseType::Json,
        }
    }

    fn response_context(status: Option<u16>) -> ResponseContext {
        ResponseContext {
            url: "http://api/users".to_string(),
            method: Method::GET,
            headers: HeaderStore::new(),
            is_debug_enabled: false,
            response_type: ResponseType::Json,
            status,
            ok: false,
            body: ResponseBody::Empty,
        }
    }

    #[test]
    fn test_resolve_dedups_and_filters() {
        let global = vec![
            Interceptor::new("a").method(Method::GET),
            Interceptor::new("b").method(Method::POST),
        ];
        let per_call = vec![
            Interceptor::new("a").method(Method::POST),
            Interceptor::new("c").methods([Method::GET, Method::POST]),
        ];

        let get: Vec<_> = resolve_interceptors(&global, &per_call, &Method::GET)
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(get, vec!["a", "c"]);

        // the per-call "a" lost to the global one, which only covers GET
        let post: Vec<_> = resolve_interceptors(&global, &per_call, &Method::POST)
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(post, vec!["b", "c"]);
    }

    #[test]
    fn test_inert_interceptor_is_valid() {
        let inert = Interceptor::new("inert").method(Method::GET).method(Method::GET);
        assert!(!inert.has_before());
        assert!(!inert.has_after());
        assert_eq!(inert.allowed_methods(), &[Method::GET]);
    }

    #[tokio::test]
    async fn test_before_hooks_run_in_order_and_merge() {
        let first = Interceptor::new("first").method(Method::GET).before(|mut ctx| {
            ctx.headers.append("X-Trace", "one");
            Ok(ctx)
        });
        let second = Interceptor::new("second")
            .method(Method::GET)
            .before_async(|mut ctx| async move {
                tokio::task::yield_now().await;
                assert_eq!(ctx.headers.get("x-trace"), Some("one"));
                ctx.headers.append("X-Trace", "two");
                Ok(ctx)
            });

        let ctx = run_before(&[first, second], context(Method::GET)).await.unwrap();
        assert_eq!(
            ctx.headers.get_all("X-Trace"),
            Some(&["one".to_string(), "two".to_string()][..])
        );
    }

    #[tokio::test]
    async fn test_before_failure_is_fatal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let failing = Interceptor::new("auth")
            .method(Method::GET)
            .before(|_| Err("token expired".into()));
        let later = Interceptor::new("later").method(Method::GET).before(move |ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ctx)
        });

        let err = run_before(&[failing, later], context(Method::GET)).await.unwrap_err();
        assert_eq!(err.name(), "InterceptorError");
        assert!(err.to_string().contains("token expired"));
        assert_eq!(err.url(), Some("http://api/users"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_after_failures_are_isolated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let failing = Interceptor::new("failing")
            .method(Method::GET)
            .after(|_| Err("boom".into()));
        let panicking = Interceptor::new("panicking")
            .method(Method::GET)
            .after(|_| panic!("hook panic"));
        let counting = Interceptor::new("counting").method(Method::GET).after(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        run_after(&[failing, panicking, counting], &response_context(Some(200))).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_status_matches_only_its_status() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let not_found = Interceptor::not_found(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(not_found.id(), "not-found");
        assert!(not_found.applies_to(&Method::DELETE));
        assert!(!not_found.applies_to(&Method::HEAD));

        let chain = [not_found];
        run_after(&chain, &response_context(Some(404))).await;
        run_after(&chain, &response_context(Some(200))).await;
        run_after(&chain, &response_context(None)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_push_unique() {
        let mut list = vec![Interceptor::new("a")];
        assert!(!push_unique(&mut list, Interceptor::new("a")));
        assert!(push_unique(&mut list, Interceptor::new("b")));
        assert_eq!(list.len(), 2);
    }
}
