//! # Nexus HTTP
//!
//! An HTTP client built around one request/response lifecycle: callers
//! describe a request and get back a normalized [`ResponseEnvelope`] or a
//! normalized error, while method-scoped interceptors may rewrite outgoing
//! headers and observe every finished exchange.
//!
//! ## Features
//!
//! - **Two transports**: reqwest-backed [`FetchTransport`] (feature `fetch`)
//!   and [`SocketTransport`], plain HTTP/1.1 over tokio, with the same
//!   observable behaviour
//! - **Interceptors**: `before`/`after` hooks, sync or async, scoped by method
//! - **Header negotiation**: `Accept` and `Content-Type` derived from the
//!   response type and the body
//! - **Timeouts and cancellation**: per-call timeout and [`AbortController`]
//! - **Observers**: success/error/complete callbacks with replay for late
//!   subscribers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nexus_http::{ClientConfig, HttpClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::new(ClientConfig::builder().base_url("http://api.example.com/").build());
//!
//!     let response = client
//!         .get("/users?active=true")
//!         .query("page", 1)
//!         .send()
//!         .await?;
//!
//!     println!("Status: {:?}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Interceptors and Observers
//!
//! ```rust,no_run
//! use nexus_http::{HttpClient, Interceptor, Method, Observer};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = HttpClient::default();
//!     client.add_global_interceptor(
//!         Interceptor::new("auth")
//!             .methods([Method::GET, Method::POST])
//!             .before(|mut ctx| {
//!                 ctx.headers.set("Authorization", "Bearer token");
//!                 Ok(ctx)
//!             }),
//!     );
//!
//!     let handle = client
//!         .post("http://api.example.com/orders")
//!         .json(&serde_json::json!({"item": "widget", "quantity": 5}))?
//!         .timeout(Duration::from_secs(5))
//!         .execute();
//!
//!     handle.subscribe(
//!         Observer::new()
//!             .on_success(|response| println!("created: {:?}", response.status()))
//!             .on_error(|error| eprintln!("failed: {:?}", error.body()))
//!             .on_complete(|| println!("done")),
//!     );
//!     handle.await?;
//!     Ok(())
//! }
//! ```

mod body;
mod client;
mod config;
mod emitter;
mod error;
mod headers;
mod interceptor;
mod request;
mod response;
pub mod transport;

pub use body::{Body, BodyKind, MultipartField};
pub use client::{append_query, join_url, HttpClient};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use emitter::{Observer, Phase, ResponseHandle};
pub use error::{BoxError, ErrorData, HttpClientError, Result};
pub use headers::{HeaderStore, HeaderValues, VALUE_SEPARATOR};
pub use interceptor::{
    resolve_interceptors, AfterHook, BeforeHook, Interceptor, InterceptorContext, ResponseContext,
};
pub use request::{RequestBuilder, RequestContext, RequestOptions};
pub use response::{default_validator, ResponseBody, ResponseEnvelope, ResponseType, StatusValidator};
#[cfg(feature = "fetch")]
pub use transport::FetchTransport;
pub use transport::{AbortController, AbortSignal, SocketTransport, Transport, TransportRequest};

// Re-export common types
pub use http::{Method, StatusCode};
pub use url::Url;
pub use bytes::Bytes;

/// Prelude for common imports.
///
/// ```
/// use nexus_http::prelude::*;
/// ```
pub mod prelude {
    pub use crate::body::Body;
    pub use crate::client::HttpClient;
    pub use crate::config::{ClientConfig, ClientConfigBuilder};
    pub use crate::emitter::{Observer, ResponseHandle};
    pub use crate::error::{HttpClientError, Result};
    pub use crate::headers::HeaderStore;
    pub use crate::interceptor::Interceptor;
    pub use crate::request::{RequestBuilder, RequestOptions};
    pub use crate::response::{ResponseEnvelope, ResponseType};
    pub use crate::transport::AbortController;
    pub use http::{Method, StatusCode};
}
