//! Normalized HTTP response envelope.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ErrorData;
use crate::{HeaderStore, HttpClientError, Result};

/// Predicate deciding whether a status counts as success.
pub type StatusValidator = Arc<dyn Fn(u16) -> bool + Send + Sync>;

/// The default validator: `200 <= status <= 299`.
pub fn default_validator() -> StatusValidator {
    Arc::new(|status| (200..=299).contains(&status))
}

/// How the response body should be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Decode as JSON.
    #[default]
    Json,
    /// Decode as UTF-8 text.
    Text,
    /// Keep raw bytes.
    Blob,
    /// Keep raw bytes.
    #[serde(rename = "arraybuffer")]
    ArrayBuffer,
    /// Ignore the body.
    None,
}

impl ResponseType {
    /// The `Accept` value negotiated for this response type.
    pub fn accept(&self) -> &'static str {
        match self {
            ResponseType::Json => "application/json",
            ResponseType::Text => "text/*",
            ResponseType::Blob | ResponseType::ArrayBuffer => "application/octet-stream",
            ResponseType::None => "*/*",
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Json => "json",
            ResponseType::Text => "text",
            ResponseType::Blob => "blob",
            ResponseType::ArrayBuffer => "arraybuffer",
            ResponseType::None => "none",
        }
    }

    /// Decode a payload. Decode failures are reported in the body, never raised.
    pub fn decode(&self, payload: Bytes) -> ResponseBody {
        if payload.is_empty() {
            return ResponseBody::Empty;
        }
        match self {
            ResponseType::Json => match serde_json::from_slice(&payload) {
                Ok(value) => ResponseBody::Json(value),
                Err(e) => ResponseBody::DecodeError {
                    error: e.to_string(),
                },
            },
            ResponseType::Text => match String::from_utf8(payload.to_vec()) {
                Ok(text) => ResponseBody::Text(text),
                Err(e) => ResponseBody::DecodeError {
                    error: e.to_string(),
                },
            },
            ResponseType::Blob | ResponseType::ArrayBuffer => ResponseBody::Binary(payload),
            ResponseType::None => ResponseBody::Empty,
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = HttpClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ResponseType::Json),
            "text" => Ok(ResponseType::Text),
            "blob" => Ok(ResponseType::Blob),
            "arraybuffer" | "array_buffer" => Ok(ResponseType::ArrayBuffer),
            "" | "none" => Ok(ResponseType::None),
            other => Err(HttpClientError::Config(format!(
                "unknown response type '{other}'"
            ))),
        }
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// No body, or the response type ignores it.
    Empty,
    /// Parsed JSON.
    Json(serde_json::Value),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Bytes),
    /// The payload could not be decoded as requested.
    DecodeError {
        /// Decoder message.
        error: String,
    },
    /// Envelope-shaped error produced by a failed call.
    Error(ErrorData),
}

impl ResponseBody {
    /// Check if there is no body.
    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }
}

/// A completed exchange (or the envelope-shaped projection of a failure).
#[derive(Clone)]
pub struct ResponseEnvelope {
    url: String,
    method: Method,
    status: Option<u16>,
    headers: HeaderStore,
    body: ResponseBody,
    ok: bool,
}

impl ResponseEnvelope {
    /// Build an envelope for a completed exchange; `ok` is derived from the
    /// validator once, here.
    pub fn new(
        url: impl Into<String>,
        method: Method,
        status: u16,
        headers: HeaderStore,
        body: ResponseBody,
        validator: &StatusValidator,
    ) -> Self {
        Self {
            url: url.into(),
            method,
            status: Some(status),
            headers,
            body,
            ok: validator(status),
        }
    }

    /// Build the envelope of an exchange that produced no status.
    pub(crate) fn failed(
        url: String,
        method: Method,
        headers: HeaderStore,
        body: ResponseBody,
    ) -> Self {
        Self {
            url,
            method,
            status: None,
            headers,
            body,
            ok: false,
        }
    }

    /// Replace the body after the payload could not be read.
    pub(crate) fn set_decode_error(&mut self, error: String) {
        self.body = ResponseBody::DecodeError { error };
    }

    /// Request URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// HTTP status, `None` when the exchange never produced one.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Canonical reason phrase of the status.
    pub fn status_text(&self) -> Option<&'static str> {
        self.status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .and_then(|s| s.canonical_reason())
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderStore {
        &self.headers
    }

    /// Decoded body.
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Whether the status passed the validator.
    pub fn ok(&self) -> bool {
        self.ok
    }

    fn status_in(&self, range: std::ops::RangeInclusive<u16>) -> bool {
        self.status.is_some_and(|s| range.contains(&s))
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        self.status_in(200..=299)
    }

    /// 3xx status.
    pub fn is_redirection(&self) -> bool {
        self.status_in(300..=399)
    }

    /// 4xx status.
    pub fn is_client_error(&self) -> bool {
        self.status_in(400..=499)
    }

    /// 5xx status.
    pub fn is_server_error(&self) -> bool {
        self.status_in(500..=599)
    }

    /// Get a specific header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Deserialize the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.body {
            ResponseBody::Json(value) => Ok(serde_json::from_value(value.clone())?),
            ResponseBody::Text(text) => Ok(serde_json::from_str(text)?),
            ResponseBody::Binary(bytes) => Ok(serde_json::from_slice(bytes)?),
            ResponseBody::Error(data) => Ok(serde_json::from_value(serde_json::to_value(data)?)?),
            ResponseBody::Empty => Err(HttpClientError::Json("empty body".to_string())),
            ResponseBody::DecodeError { error } => Err(HttpClientError::Json(error.clone())),
        }
    }

    /// The body as text, when it was decoded as text or JSON.
    pub fn text(&self) -> Option<String> {
        match &self.body {
            ResponseBody::Text(text) => Some(text.clone()),
            ResponseBody::Json(value) => Some(value.to_string()),
            _ => None,
        }
    }
}

impl fmt::Debug for ResponseEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseEnvelope")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("status", &self.status)
            .field("ok", &self.ok)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}
