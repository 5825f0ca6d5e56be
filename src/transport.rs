//! A single physical HTTP exchange.
//!
//! [`Transport`] is the seam between the retry loop and the network: it sends
//! one [`LogicalRequest`] and hands back a [`RawResponse`] or a
//! [`TransportError`]. It never retries and never interprets status codes.

use crate::error::BoxError;
use crate::options::{ProxyCredential, RequestOptions};
use crate::request::{LogicalRequest, ResponseMode};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use http::{HeaderMap, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Framing marker that prefixes each line-delimited event.
pub const EVENT_PREFIX: &str = "data: ";

/// A live response body.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// A failure below the HTTP layer. Apart from [`TransportError::Config`],
/// every variant is transient and retried.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The connect or read timeout elapsed.
    #[error("Request timed out")]
    Timeout,

    /// The connection could not be established or was dropped.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The response arrived without a readable body.
    #[error("Response body unavailable: {0}")]
    Body(String),

    /// Any other network failure reported by the HTTP stack.
    #[error("Network error: {0}")]
    Network(#[source] BoxError),

    /// The transport could not be set up for this request (bad proxy URL, TLS setup).
    #[error("Transport configuration error: {0}")]
    Config(String),
}

impl TransportError {
    /// Returns `true` if retrying the same request might succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Config(_))
    }

    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout
        } else if error.is_connect() {
            TransportError::Connect(error.to_string())
        } else if error.is_body() || error.is_decode() {
            TransportError::Body(error.to_string())
        } else if error.is_builder() {
            TransportError::Config(error.to_string())
        } else {
            TransportError::Network(Box::new(error))
        }
    }
}

enum ResponseBody {
    Buffered(Vec<u8>),
    Stream(ByteStream),
}

/// The status, headers and body of one physical attempt.
pub struct RawResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    body: ResponseBody,
}

impl RawResponse {
    /// A response whose body has been read completely.
    pub fn buffered(status: StatusCode, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Buffered(body.into()),
        }
    }

    /// A response whose body is still arriving.
    pub fn streaming(status: StatusCode, headers: HeaderMap, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Stream(body),
        }
    }

    /// Returns `true` if the body is a live stream.
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    /// Reads the whole body.
    pub async fn bytes(self) -> Result<Vec<u8>, TransportError> {
        match self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Stream(stream) => {
                stream
                    .try_fold(Vec::new(), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    })
                    .await
            }
        }
    }

    /// Reads the whole body as text.
    ///
    /// Lossy: invalid UTF-8 is replaced with U+FFFD, never rejected. Use
    /// [`RawResponse::bytes`] when the exact bytes matter.
    pub async fn text(self) -> Result<String, TransportError> {
        let bytes = self.bytes().await?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }

    /// Reads the body as line-delimited events.
    ///
    /// Only lines starting with `data: ` are events; the marker is stripped
    /// and every other line is discarded.
    pub async fn events(self) -> Result<Vec<String>, TransportError> {
        let text = self.text().await?;
        Ok(parse_events(&text))
    }

    /// Exposes the body as a live stream.
    pub fn into_stream(self) -> ByteStream {
        match self.body {
            ResponseBody::Buffered(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            ResponseBody::Stream(stream) => stream,
        }
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            ResponseBody::Buffered(bytes) => format!("{} bytes", bytes.len()),
            ResponseBody::Stream(_) => "<stream>".to_string(),
        };
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &body)
            .finish()
    }
}

/// Extracts the payloads of `data: `-prefixed lines.
pub fn parse_events(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.strip_prefix(EVENT_PREFIX))
        .map(str::to_string)
        .collect()
}

/// Performs exactly one physical HTTP exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` once.
    async fn send(&self, request: &LogicalRequest) -> Result<RawResponse, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    connect_timeout: Duration,
    proxy: Option<String>,
    proxy_credential: Option<(String, String)>,
}

impl ClientKey {
    fn for_options(options: &RequestOptions) -> Self {
        Self {
            connect_timeout: options.effective_connect_timeout(),
            proxy: options.proxy.clone(),
            proxy_credential: options
                .proxy_credential
                .as_ref()
                .map(|ProxyCredential { username, password }| (username.clone(), password.clone())),
        }
    }
}

/// [`Transport`] backed by `reqwest`.
///
/// Connect timeout and proxy settings live on the underlying `reqwest::Client`,
/// so one client is built and cached per distinct combination; the read
/// timeout is applied to each request. Redirects are never followed.
#[derive(Default)]
pub struct ReqwestTransport {
    clients: Mutex<HashMap<ClientKey, reqwest::Client>>,
}

impl ReqwestTransport {
    /// Creates a transport with an empty client cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, options: &RequestOptions) -> Result<reqwest::Client, TransportError> {
        let key = ClientKey::for_options(options);
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(key.connect_timeout)
            .redirect(reqwest::redirect::Policy::none());

        if let Some(proxy_url) = &key.proxy {
            let mut proxy = reqwest::Proxy::all(proxy_url.as_str())
                .map_err(|e| TransportError::Config(format!("Invalid proxy: {}", e)))?;
            if let Some((username, password)) = &key.proxy_credential {
                proxy = proxy.basic_auth(username, password);
            }
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Config(format!("Failed to build HTTP client: {}", e)))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("ReqwestTransport")
            .field("cached_clients", &cached)
            .finish()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &LogicalRequest) -> Result<RawResponse, TransportError> {
        let client = self.client_for(request.options())?;

        let mut builder = client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone())
            .timeout(request.options().effective_read_timeout());
        if !request.body().is_empty() {
            builder = builder.body(request.body().to_vec());
        }

        let response = builder.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status();
        let headers = response.headers().clone();

        if request.mode() == ResponseMode::Stream && status.is_success() {
            let body = response
                .bytes_stream()
                .map(|chunk| {
                    chunk
                        .map(|bytes| bytes.to_vec())
                        .map_err(TransportError::from_reqwest)
                })
                .boxed();
            return Ok(RawResponse::streaming(status, headers, body));
        }

        // A body that cannot be read is treated like a dropped connection.
        let body = response
            .bytes()
            .await
            .map_err(|e| match TransportError::from_reqwest(e) {
                TransportError::Timeout => TransportError::Timeout,
                other => TransportError::Body(other.to_string()),
            })?;
        Ok(RawResponse::buffered(status, headers, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_events_strips_marker_and_drops_other_lines() {
        let text = "data: {\"a\":1}\n: keep-alive\nevent: update\ndata: {\"a\":2}\n\ndata:{\"a\":3}\n";
        assert_eq!(parse_events(text), vec!["{\"a\":1}", "{\"a\":2}"]);
    }

    #[test]
    fn test_parse_events_handles_crlf() {
        let text = "data: one\r\ndata: two\r\n";
        assert_eq!(parse_events(text), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_buffered_text() {
        let response = RawResponse::buffered(StatusCode::OK, HeaderMap::new(), "hello");
        assert!(!response.is_streaming());
        assert_eq!(response.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let response =
            RawResponse::buffered(StatusCode::OK, HeaderMap::new(), vec![b'o', b'k', 0xff]);
        assert_eq!(response.text().await.unwrap(), "ok\u{fffd}");
    }

    #[tokio::test]
    async fn test_stream_is_collected_for_events() {
        let chunks: Vec<Result<Vec<u8>, TransportError>> = vec![
            Ok(b"data: fir".to_vec()),
            Ok(b"st\nda".to_vec()),
            Ok(b"ta: second\n".to_vec()),
        ];
        let response = RawResponse::streaming(
            StatusCode::OK,
            HeaderMap::new(),
            stream::iter(chunks).boxed(),
        );
        assert!(response.is_streaming());
        assert_eq!(response.events().await.unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_stream_error_surfaces() {
        let chunks: Vec<Result<Vec<u8>, TransportError>> =
            vec![Ok(b"partial".to_vec()), Err(TransportError::Timeout)];
        let response = RawResponse::streaming(
            StatusCode::OK,
            HeaderMap::new(),
            stream::iter(chunks).boxed(),
        );
        assert!(matches!(response.text().await, Err(TransportError::Timeout)));
    }

    #[tokio::test]
    async fn test_buffered_into_stream() {
        let response = RawResponse::buffered(StatusCode::OK, HeaderMap::new(), "abc");
        let chunks: Vec<_> = response.into_stream().collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), b"abc");
    }

    #[test]
    fn test_only_config_errors_are_permanent() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Connect("refused".into()).is_transient());
        assert!(TransportError::Body("missing".into()).is_transient());
        assert!(!TransportError::Config("bad proxy".into()).is_transient());
    }

    #[test]
    fn test_clients_are_cached_per_settings() {
        let transport = ReqwestTransport::new();
        let defaults = RequestOptions::new();
        let proxied = RequestOptions::new().proxy("http://127.0.0.1:3128");

        transport.client_for(&defaults).unwrap();
        transport.client_for(&defaults).unwrap();
        transport.client_for(&proxied).unwrap();

        assert_eq!(transport.clients.lock().unwrap().len(), 2);
    }
}
