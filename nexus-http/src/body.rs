//! Request body descriptors.
//!
//! A [`Body`] tags its payload with a [`BodyKind`] that decides the
//! `Content-Type` negotiated by the request pipeline. Bodies are immutable;
//! the factory functions are the only constructors and every payload is
//! encoded eagerly, so later stages never look at the original value.

use bytes::Bytes;
use serde::Serialize;

use crate::{HttpClientError, Result};

/// Content kind of a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    /// URL-encoded or multipart form data.
    Form,
    /// Pre-serialized JSON text.
    Json,
    /// UTF-8 text.
    Text,
    /// Opaque bytes.
    Binary,
}

/// One field of a multipart form.
#[derive(Debug, Clone)]
pub struct MultipartField {
    name: String,
    filename: Option<String>,
    data: Bytes,
}

impl MultipartField {
    /// A text field.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            data: Bytes::from(value.into()),
        }
    }

    /// A binary field, sent as `application/octet-stream`.
    pub fn bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            data: data.into(),
        }
    }

    /// Attach a file name to the field.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    fn is_binary(&self) -> bool {
        self.filename.is_some() || std::str::from_utf8(&self.data).is_err()
    }
}

/// An immutable, tagged request payload.
#[derive(Debug, Clone)]
pub struct Body {
    kind: BodyKind,
    payload: Bytes,
    content_type: String,
}

impl Body {
    /// URL-encoded form body.
    pub fn form<T: Serialize + ?Sized>(fields: &T) -> Result<Self> {
        let encoded = serde_urlencoded::to_string(fields)
            .map_err(|e| HttpClientError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: BodyKind::Form,
            payload: Bytes::from(encoded),
            content_type: "application/x-www-form-urlencoded".to_string(),
        })
    }

    /// Multipart form body, encoded immediately with a fresh boundary.
    pub fn multipart(fields: impl IntoIterator<Item = MultipartField>) -> Self {
        let boundary = format!(
            "nexus-{:x}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );

        let mut payload = Vec::new();
        for field in fields {
            payload.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", field.name);
            if let Some(filename) = &field.filename {
                disposition.push_str(&format!("; filename=\"{filename}\""));
            }
            payload.extend_from_slice(disposition.as_bytes());
            payload.extend_from_slice(b"\r\n");
            if field.is_binary() {
                payload.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
            }
            payload.extend_from_slice(b"\r\n");
            payload.extend_from_slice(&field.data);
            payload.extend_from_slice(b"\r\n");
        }
        payload.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        Self {
            kind: BodyKind::Form,
            payload: Bytes::from(payload),
            content_type: format!("multipart/form-data; boundary={boundary}"),
        }
    }

    /// JSON body, serialized right away.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let text = serde_json::to_string(value)
            .map_err(|e| HttpClientError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: BodyKind::Json,
            payload: Bytes::from(text),
            content_type: "application/json".to_string(),
        })
    }

    /// UTF-8 text body.
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            kind: BodyKind::Text,
            payload: Bytes::from(value.into()),
            content_type: "text/plain".to_string(),
        }
    }

    /// Raw binary body.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            kind: BodyKind::Binary,
            payload: data.into(),
            content_type: "application/octet-stream".to_string(),
        }
    }

    /// The body kind.
    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    /// The encoded payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The `Content-Type` implied by the kind.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The payload as text, for JSON and text bodies.
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            BodyKind::Json | BodyKind::Text => std::str::from_utf8(&self.payload).ok(),
            _ => None,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
