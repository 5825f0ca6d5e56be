//! Construction of the request sent on each physical attempt.
//!
//! A [`LogicalRequest`] is built once per logical call and resent unchanged on
//! every retry. The only part that can change mid-call is the header set,
//! which [`LogicalRequest::rebuild_headers`] recomputes after a credential
//! refresh.

use crate::credentials::Credentials;
use crate::options::RequestOptions;
use crate::{Error, Result};
use http::header::{ACCEPT, ACCEPT_CHARSET, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use url::Url;

/// Header carrying the per-call request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const DEFAULT_ACCEPT: &str = "application/json";
const BOUNDARY_LENGTH: usize = 32;

/// The body of a request.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    /// No body.
    #[default]
    Empty,
    /// UTF-8 JSON text.
    Json(String),
    /// `application/x-www-form-urlencoded` key/value pairs.
    Form(Vec<(String, String)>),
    /// `multipart/form-data` file upload.
    Multipart(MultipartUpload),
}

impl Payload {
    /// Serializes `body` as a JSON payload.
    pub fn json<T: Serialize + ?Sized>(body: &T) -> Result<Self> {
        serde_json::to_string(body)
            .map(Payload::Json)
            .map_err(|e| Error::SerializationFailed(e.to_string()))
    }
}

/// A file upload, optionally accompanied by plain form fields.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    /// Name of the form field holding the file.
    pub field_name: String,
    /// File name reported to the server.
    pub file_name: String,
    /// MIME type of the file.
    pub content_type: String,
    /// File contents.
    pub content: Vec<u8>,
    /// Extra text fields, sent before the file.
    pub fields: Vec<(String, String)>,
}

impl MultipartUpload {
    /// Uploads `content` under the field name `file`.
    pub fn new(file_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            field_name: "file".to_string(),
            file_name: file_name.into(),
            content_type: "application/octet-stream".to_string(),
            content,
            fields: Vec::new(),
        }
    }

    /// Sets the MIME type of the file.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Adds a text field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    fn encode(&self, boundary: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.content.len() + 256);
        for (name, value) in &self.fields {
            out.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{value}\r\n",
                    escape_quotes(name)
                )
                .as_bytes(),
            );
        }
        out.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                escape_quotes(&self.field_name),
                escape_quotes(&self.file_name),
                self.content_type
            )
            .as_bytes(),
        );
        out.extend_from_slice(&self.content);
        out.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        out
    }
}

fn escape_quotes(value: &str) -> String {
    value.replace('"', "%22")
}

fn random_boundary() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_LENGTH)
        .map(char::from)
        .collect()
}

/// How the response body is handed back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseMode {
    /// Read the whole body before returning.
    #[default]
    Buffered,
    /// Return successful responses as a live byte stream.
    Stream,
}

/// One logical call, ready to be sent any number of times.
#[derive(Debug, Clone)]
pub struct LogicalRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Vec<u8>,
    content_type: Option<HeaderValue>,
    accept: HeaderValue,
    mode: ResponseMode,
    options: RequestOptions,
    request_id: String,
}

impl LogicalRequest {
    /// A request without an `Authorization` header, used for token endpoints.
    pub(crate) fn unauthenticated(method: Method, url: Url, payload: Payload) -> Result<Self> {
        RequestBuilder::new(method, url)
            .payload(payload)
            .assemble(None)
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The full URL, including query parameters.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The headers to send.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The encoded body. Empty when there is no payload.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// How the response should be returned.
    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// The effective options of this call.
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// The id shared by every physical attempt of this call.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Recomputes the headers with `credentials`, keeping the request id.
    ///
    /// Calling it repeatedly with the same credentials yields the same headers.
    pub fn rebuild_headers(&mut self, credentials: &Credentials) -> Result<()> {
        self.headers = build_headers(
            &self.request_id,
            &self.options.extra_headers,
            &self.accept,
            self.content_type.as_ref(),
            Some(credentials),
        )?;
        Ok(())
    }
}

fn build_headers(
    request_id: &str,
    extra_headers: &HeaderMap,
    accept: &HeaderValue,
    content_type: Option<&HeaderValue>,
    credentials: Option<&Credentials>,
) -> Result<HeaderMap> {
    // Resolve the credential first so a bad token fails before anything else.
    let authorization = credentials.map(Credentials::authorization).transpose()?;

    let mut headers = HeaderMap::new();
    let request_id = HeaderValue::from_str(request_id)
        .map_err(|e| Error::ConfigurationError(format!("Invalid request id: {}", e)))?;
    headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), request_id);

    for (name, value) in extra_headers {
        headers.append(name.clone(), value.clone());
    }

    headers.insert(ACCEPT, accept.clone());
    headers.insert(ACCEPT_CHARSET, HeaderValue::from_static("UTF-8"));
    if !headers.contains_key(USER_AGENT) {
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("catalog-client/", env!("CARGO_PKG_VERSION"))),
        );
    }
    if let Some(content_type) = content_type {
        headers.insert(CONTENT_TYPE, content_type.clone());
    }
    if let Some(authorization) = authorization {
        headers.insert(AUTHORIZATION, authorization);
    }
    Ok(headers)
}

/// Builds a [`LogicalRequest`].
///
/// # Examples
///
/// ```
/// use catalog_client::{Credentials, RequestBuilder, RequestOptions};
/// use catalog_client::request::Payload;
/// use http::Method;
/// use url::Url;
///
/// let url = Url::parse("https://catalog.example.com/api/meta/search/indexsearch").unwrap();
/// let request = RequestBuilder::new(Method::POST, url)
///     .payload(Payload::json(&serde_json::json!({"dsl": {"size": 10}})).unwrap())
///     .options(RequestOptions::new().max_retries(5))
///     .build(&Credentials::bearer("my-token"))
///     .unwrap();
///
/// assert_eq!(request.headers()["authorization"], "Bearer my-token");
/// assert_eq!(request.headers()["content-type"], "application/json");
/// assert!(!request.request_id().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    url: Url,
    payload: Payload,
    accept: Option<HeaderValue>,
    mode: ResponseMode,
    options: RequestOptions,
}

impl RequestBuilder {
    /// Starts a request for `method` on `url`.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            payload: Payload::Empty,
            accept: None,
            mode: ResponseMode::Buffered,
            options: RequestOptions::default(),
        }
    }

    /// Sets the body.
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Overrides the `Accept` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a valid header value.
    pub fn accept(mut self, accept: impl AsRef<str>) -> Result<Self> {
        let value = HeaderValue::try_from(accept.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.accept = Some(value);
        Ok(self)
    }

    /// Sets how the response body is returned.
    pub fn mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Appends a query parameter to the URL.
    pub fn query(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.url
            .query_pairs_mut()
            .append_pair(key.as_ref(), value.as_ref());
        self
    }

    /// Sets the effective options of the call (already overlaid on client defaults).
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the request, authorizing it with `credentials`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if the credentials are missing or the
    /// token is malformed, without performing any I/O.
    pub fn build(self, credentials: &Credentials) -> Result<LogicalRequest> {
        self.assemble(Some(credentials))
    }

    fn assemble(self, credentials: Option<&Credentials>) -> Result<LogicalRequest> {
        let (body, content_type) = match &self.payload {
            Payload::Empty => (Vec::new(), None),
            Payload::Json(text) => (
                text.clone().into_bytes(),
                Some(HeaderValue::from_static("application/json")),
            ),
            Payload::Form(fields) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields)
                    .finish();
                (
                    encoded.into_bytes(),
                    Some(HeaderValue::from_static(
                        "application/x-www-form-urlencoded",
                    )),
                )
            }
            Payload::Multipart(upload) => {
                let boundary = random_boundary();
                let content_type =
                    HeaderValue::from_str(&format!("multipart/form-data; boundary={boundary}"))
                        .map_err(|e| {
                            Error::ConfigurationError(format!("Invalid boundary: {}", e))
                        })?;
                (upload.encode(&boundary), Some(content_type))
            }
        };

        // Streaming changes how the body is read, not what is asked for.
        let accept = self
            .accept
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_ACCEPT));

        let request_id = uuid::Uuid::new_v4().to_string();
        let headers = build_headers(
            &request_id,
            &self.options.extra_headers,
            &accept,
            content_type.as_ref(),
            credentials,
        )?;

        Ok(LogicalRequest {
            method: self.method,
            url: self.url,
            headers,
            body,
            content_type,
            accept,
            mode: self.mode,
            options: self.options,
            request_id,
        })
    }
}
