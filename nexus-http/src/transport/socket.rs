//! Plain HTTP/1.1 transport over a tokio `TcpStream`.
//!
//! Each exchange opens a fresh connection, sends `Connection: close` and
//! reads until EOF. `httparse` validates the response head and finds where it
//! ends; the raw header blob is then rebuilt one line at a time, keyed by the
//! line's leading token. Only the `http` scheme is supported.
//!
//! Redirects are followed the way the fetch transport follows them: up to
//! `max_redirects` hops, 301/302 on POST and every 303 turn into a bodyless
//! GET, and credentials are dropped when the redirect leaves the origin.
//!
//! Timeout and cancellation are wired explicitly: an internal token is
//! cancelled either by a timer task (which flags the timeout first) or by a
//! task watching the caller's signal. Both tasks are aborted as soon as the
//! exchange settles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::{Host, Position, Url};

use super::{Transport, TransportRequest};
use crate::{Body, ClientConfig, HeaderStore, HttpClientError, ResponseEnvelope, Result};

const MAX_RESPONSE_HEADERS: usize = 128;

/// Headers dropped when a redirect crosses to another origin.
const SENSITIVE_HEADERS: [&str; 4] = ["Authorization", "Cookie", "Proxy-Authorization", "WWW-Authenticate"];

/// Transport speaking HTTP/1.1 directly over TCP.
#[derive(Debug, Clone)]
pub struct SocketTransport {
    connect_timeout: Duration,
    user_agent: String,
    follow_redirects: bool,
    max_redirects: usize,
}

/// One request on the wire. Redirects rewrite it hop by hop.
struct Hop {
    url: Url,
    method: Method,
    headers: HeaderStore,
    body: Option<Body>,
}

impl Hop {
    fn redirect(mut self, status: u16, location: Url) -> Self {
        let becomes_get = status == 303 || (matches!(status, 301 | 302) && self.method == Method::POST);
        if becomes_get {
            if self.method != Method::HEAD {
                self.method = Method::GET;
            }
            self.body = None;
            self.headers.delete("Content-Type");
            self.headers.delete("Content-Length");
        }
        if location.origin() != self.url.origin() {
            for name in SENSITIVE_HEADERS {
                self.headers.delete(name);
            }
        }
        self.url = location;
        self
    }
}

impl SocketTransport {
    /// Build a transport from the client configuration.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            user_agent: config.user_agent.clone(),
            follow_redirects: config.follow_redirects,
            max_redirects: config.max_redirects,
        }
    }

    async fn exchange(&self, request: &TransportRequest) -> Result<ResponseEnvelope> {
        let failure = |message: String| network_error(request, message);

        let mut hop = Hop {
            url: Url::parse(&request.url).map_err(|e| failure(format!("invalid URL: {e}")))?,
            method: request.method.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        };
        let mut redirects = 0;

        loop {
            let raw = self.round_trip(&hop).await.map_err(failure)?;
            let (status, blob, rest) = split_response(&raw).map_err(failure)?;
            let headers = parse_header_blob(blob);
            trace!(status, url = %hop.url, "Socket transport received headers");

            if self.follow_redirects && matches!(status, 301 | 302 | 303 | 307 | 308) {
                if let Some(location) = headers.get("Location") {
                    if redirects >= self.max_redirects {
                        return Err(failure(format!(
                            "too many redirects (max {})",
                            self.max_redirects
                        )));
                    }
                    let next = hop.url.join(location.trim()).map_err(|e| {
                        failure(format!("invalid redirect location '{location}': {e}"))
                    })?;
                    debug!(status, from = %hop.url, to = %next, "Following redirect");
                    redirects += 1;
                    hop = hop.redirect(status, next);
                    continue;
                }
            }

            return match read_body(&hop.method, &headers, rest) {
                Ok(payload) => Ok(request.envelope(status, headers, payload)),
                Err(error) => {
                    let mut envelope = request.envelope(status, headers, Bytes::new());
                    envelope.set_decode_error(error);
                    Ok(envelope)
                }
            };
        }
    }

    /// Send one hop and read the raw response until EOF.
    async fn round_trip(&self, hop: &Hop) -> std::result::Result<Vec<u8>, String> {
        if hop.url.scheme() != "http" {
            return Err(format!("unsupported scheme '{}'", hop.url.scheme()));
        }
        let host = match hop.url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err("URL has no host".to_string()),
        };
        let port = hop.url.port_or_known_default().unwrap_or(80);

        let mut stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((host.as_str(), port)),
        )
        .await
        .map_err(|_| format!("connect to {host}:{port} timed out"))?
        .map_err(|e| e.to_string())?;

        let head = self.request_head(hop);
        trace!(url = %hop.url, bytes = head.len(), "Socket transport writing request head");
        stream
            .write_all(head.as_bytes())
            .await
            .map_err(|e| e.to_string())?;
        if let Some(body) = &hop.body {
            stream
                .write_all(body.payload())
                .await
                .map_err(|e| e.to_string())?;
        }
        stream.flush().await.map_err(|e| e.to_string())?;

        let mut raw = Vec::new();
        stream
            .read_to_end(&mut raw)
            .await
            .map_err(|e| e.to_string())?;
        Ok(raw)
    }

    fn request_head(&self, hop: &Hop) -> String {
        let url = &hop.url;
        let target = &url[Position::BeforePath..Position::AfterQuery];
        let authority = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
            None => url.host_str().unwrap_or_default().to_string(),
        };

        let mut head = format!("{} {} HTTP/1.1\r\n", hop.method, target);
        if !hop.headers.has("Host") {
            head.push_str(&format!("Host: {authority}\r\n"));
        }
        if !hop.headers.has("User-Agent") {
            head.push_str(&format!("User-Agent: {}\r\n", self.user_agent));
        }
        for (name, value) in hop.headers.to_wire() {
            if ["content-length", "connection", "transfer-encoding"]
                .iter()
                .any(|reserved| name.eq_ignore_ascii_case(reserved))
            {
                continue;
            }
            if name.contains(['\r', '\n', ':']) || value.contains(['\r', '\n']) {
                warn!(header = %name, "Skipping header with forbidden characters");
                continue;
            }
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        let length = hop.body.as_ref().map_or(0, |body| body.len());
        if length > 0 || matches!(hop.method, Method::POST | Method::PUT | Method::PATCH) {
            head.push_str(&format!("Content-Length: {length}\r\n"));
        }
        head.push_str("Connection: close\r\n\r\n");
        head
    }
}

impl Default for SocketTransport {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

fn network_error(request: &TransportRequest, message: String) -> HttpClientError {
    HttpClientError::Network {
        url: request.url.clone(),
        method: request.method.clone(),
        message,
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn name(&self) -> &'static str {
        "socket"
    }

    async fn execute(&self, request: TransportRequest) -> Result<ResponseEnvelope> {
        debug!(method = %request.method, url = %request.url, "Sending request via socket transport");

        if request.signal.as_ref().is_some_and(|s| s.is_aborted()) {
            return Err(request.aborted());
        }

        let abort = CancellationToken::new();
        let timed_out = Arc::new(AtomicBool::new(false));
        let mut watchers = Vec::new();

        let timeout = request.effective_timeout();
        if let Some(after) = timeout {
            let abort = abort.clone();
            let timed_out = timed_out.clone();
            watchers.push(tokio::spawn(async move {
                tokio::time::sleep(after).await;
                timed_out.store(true, Ordering::SeqCst);
                abort.cancel();
            }));
        }
        if let Some(signal) = request.signal.clone() {
            let abort = abort.clone();
            watchers.push(tokio::spawn(async move {
                signal.aborted().await;
                abort.cancel();
            }));
        }

        let outcome = tokio::select! {
            biased;
            _ = abort.cancelled() => {
                if timed_out.load(Ordering::SeqCst) {
                    Err(request.timed_out(timeout.unwrap_or_default()))
                } else {
                    Err(request.aborted())
                }
            }
            result = self.exchange(&request) => result,
        };

        for watcher in watchers {
            watcher.abort();
        }
        outcome
    }
}

/// Split a raw response into status, header blob and the bytes after it.
fn split_response(raw: &[u8]) -> std::result::Result<(u16, &str, &[u8]), String> {
    let mut parsed = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut parsed);
    let head_len = match response.parse(raw) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            return Err("malformed response: incomplete response head".to_string());
        }
        Err(e) => return Err(format!("malformed response: {e}")),
    };
    let status = response
        .code
        .ok_or_else(|| "malformed response: missing status code".to_string())?;

    let head = std::str::from_utf8(&raw[..head_len])
        .map_err(|_| "malformed response: header block is not UTF-8".to_string())?;
    let blob = head.split_once('\n').map_or("", |(_, blob)| blob);
    Ok((status, blob, &raw[head_len..]))
}

/// Re-assemble a raw header blob, one entry per line keyed by its leading
/// token. Values are kept verbatim.
fn parse_header_blob(blob: &str) -> HeaderStore {
    let mut headers = HeaderStore::new();
    for line in blob.lines() {
        let token_len = line
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
            .count();
        if token_len == 0 {
            continue;
        }
        let (name, rest) = line.split_at(token_len);
        let Some(value) = rest.trim_start().strip_prefix(':') else {
            continue;
        };
        headers.append(name, vec![value.trim().to_string()]);
    }
    headers
}

fn read_body(
    method: &Method,
    headers: &HeaderStore,
    rest: &[u8],
) -> std::result::Result<Bytes, String> {
    if *method == Method::HEAD {
        return Ok(Bytes::new());
    }
    let chunked = headers
        .get_all("Transfer-Encoding")
        .is_some_and(|values| values.iter().any(|v| v.to_ascii_lowercase().contains("chunked")));
    if chunked {
        return dechunk(rest).map(Bytes::from);
    }
    match headers
        .get("Content-Length")
        .and_then(|length| length.trim().parse::<usize>().ok())
    {
        Some(length) if length <= rest.len() => Ok(Bytes::copy_from_slice(&rest[..length])),
        Some(length) => Err(format!(
            "truncated body: expected {length} bytes, received {}",
            rest.len()
        )),
        None => Ok(Bytes::copy_from_slice(rest)),
    }
}

fn dechunk(mut data: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let mut body = Vec::new();
    loop {
        let (consumed, size) = match httparse::parse_chunk_size(data) {
            Ok(httparse::Status::Complete(parsed)) => parsed,
            Ok(httparse::Status::Partial) => {
                return Err("malformed chunked body: missing size line".to_string());
            }
            Err(_) => return Err("malformed chunked body: invalid chunk size".to_string()),
        };
        data = &data[consumed..];
        if size == 0 {
            return Ok(body);
        }
        let size = usize::try_from(size)
            .ok()
            .filter(|size| *size <= data.len())
            .ok_or_else(|| "malformed chunked body: truncated chunk".to_string())?;
        body.extend_from_slice(&data[..size]);
        data = &data[size..];
        data = data
            .strip_prefix(b"\r\n")
            .or_else(|| data.strip_prefix(b"\n"))
            .unwrap_or(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{default_validator, Body, ResponseType};

    fn request(url: &str, method: Method) -> TransportRequest {
        TransportRequest {
            url: url.to_string(),
            method,
            headers: HeaderStore::new(),
            body: None,
            response_type: ResponseType::Text,
            timeout: None,
            signal: None,
            validator: default_validator(),
        }
    }

    #[test]
    fn test_split_response() {
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nX-A: 1\r\n\r\nmissing";
        let (status, blob, rest) = split_response(raw).unwrap();
        assert_eq!(status, 404);
        assert_eq!(parse_header_blob(blob).keys(), vec!["Content-Type", "X-A"]);
        assert_eq!(rest, b"missing");

        assert!(split_response(b"HTTP/1.1 200 OK\r\n").is_err());
        assert!(split_response(b"garbage\r\n\r\n").is_err());
    }

    #[test]
    fn test_split_response_bare_line_feeds() {
        let raw = b"HTTP/1.1 200 OK\nContent-Type: text/plain\nX-A: 1\n\nhello";
        let (status, blob, rest) = split_response(raw).unwrap();
        assert_eq!(status, 200);
        let headers = parse_header_blob(blob);
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("x-a"), Some("1"));
        assert_eq!(rest, b"hello");
    }

    #[test]
    fn test_parse_header_blob() {
        let headers = parse_header_blob(
            "Content-Type: text/plain; charset=utf-8\r\nSet-Cookie: a=1\r\nset-cookie: b=2\r\n: bogus\r\nnocolon\r\n",
        );
        assert_eq!(headers.get("content-type"), Some("text/plain; charset=utf-8"));
        assert_eq!(
            headers.get_all("Set-Cookie"),
            Some(&["a=1".to_string(), "b=2".to_string()][..])
        );
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_read_body_variants() {
        let headers = HeaderStore::from([("Content-Length", "3")]);
        assert_eq!(read_body(&Method::GET, &headers, b"abcdef").unwrap().as_ref(), b"abc");
        assert!(read_body(&Method::GET, &headers, b"ab").is_err());
        assert!(read_body(&Method::HEAD, &headers, b"abc").unwrap().is_empty());

        let chunked = HeaderStore::from([("Transfer-Encoding", "chunked")]);
        let body = read_body(&Method::GET, &chunked, b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\n\r\n").unwrap();
        assert_eq!(body.as_ref(), b"Wikipedia");
        assert!(read_body(&Method::GET, &chunked, b"zz\r\n").is_err());
        assert!(read_body(&Method::GET, &chunked, b"a\r\nshort").is_err());

        let open = HeaderStore::new();
        assert_eq!(read_body(&Method::GET, &open, b"all").unwrap().as_ref(), b"all");
    }

    fn hop(url: &str, method: Method) -> Hop {
        Hop {
            url: Url::parse(url).unwrap(),
            method,
            headers: HeaderStore::new(),
            body: None,
        }
    }

    #[test]
    fn test_request_head() {
        let transport = SocketTransport::default();
        let mut req = hop("http://localhost:8080/users?active=true", Method::POST);
        req.headers.set("Content-Type", ["application/json", "charset=UTF-8"]);
        req.headers.set("Connection", "keep-alive");
        req.body = Some(Body::text("{}"));

        let head = transport.request_head(&req);
        assert!(head.starts_with("POST /users?active=true HTTP/1.1\r\nHost: localhost:8080\r\n"));
        assert!(head.contains("Content-Type: application/json; charset=UTF-8\r\n"));
        assert!(head.contains("Content-Length: 2\r\n"));
        assert!(!head.contains("keep-alive"));
        assert!(head.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn test_redirect_rewrites_hop() {
        let mut post = hop("http://api.local/orders", Method::POST);
        post.headers.set("Content-Type", "application/json");
        post.headers.set("Authorization", "Bearer abc");
        post.body = Some(Body::text("{}"));

        let same_origin = post.redirect(302, Url::parse("http://api.local/orders/1").unwrap());
        assert_eq!(same_origin.method, Method::GET);
        assert!(same_origin.body.is_none());
        assert!(!same_origin.headers.has("Content-Type"));
        assert_eq!(same_origin.headers.get("Authorization"), Some("Bearer abc"));

        let elsewhere = same_origin.redirect(307, Url::parse("http://cdn.local/orders/1").unwrap());
        assert_eq!(elsewhere.method, Method::GET);
        assert!(!elsewhere.headers.has("Authorization"));
        assert_eq!(elsewhere.url.as_str(), "http://cdn.local/orders/1");

        let mut put = hop("http://api.local/orders/1", Method::PUT);
        put.body = Some(Body::text("x"));
        let kept = put.redirect(308, Url::parse("http://api.local/v2/orders/1").unwrap());
        assert_eq!(kept.method, Method::PUT);
        assert!(kept.body.is_some());

        let head = hop("http://api.local/a", Method::HEAD).redirect(303, Url::parse("http://api.local/b").unwrap());
        assert_eq!(head.method, Method::HEAD);
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_network_error() {
        let transport = SocketTransport::default();
        let err = transport
            .execute(request("https://example.com/", Method::GET))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "NetworkError");
        assert_eq!(err.method(), Some(&Method::GET));
    }
}
