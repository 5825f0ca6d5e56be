//! Error types for catalog API calls.
//!
//! Every terminal failure of a logical call surfaces as exactly one [`Error`].
//! Errors that originate from an HTTP response keep the server's status, error
//! code, message and nested causes verbatim in an [`ApiFailure`], together
//! with the raw body text so nothing the server said is ever lost.

use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use std::fmt;

/// Boxed error used as the source of connection failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One entry of the `causes` list the server attaches to an error payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCause {
    /// Kind of the underlying error, as reported by the server.
    #[serde(default)]
    pub error_type: Option<String>,
    /// Human-readable description of the underlying error.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Where in the request the problem was found.
    #[serde(default)]
    pub location: Option<String>,
}

/// Details of a failed HTTP exchange (or of a client-side credential problem).
#[derive(Debug, Clone)]
pub struct ApiFailure {
    /// The HTTP status code of the terminal response.
    pub status: StatusCode,
    /// The server-reported error code, if the body carried one.
    pub code: Option<String>,
    /// The server-reported message, or the raw body when it was not structured.
    pub message: String,
    /// Nested causes reported by the server.
    pub causes: Vec<ErrorCause>,
    /// Identifier the server assigned to this error occurrence.
    pub error_id: Option<String>,
    /// Link to documentation about this error.
    pub doc: Option<String>,
    /// The response body decoded as UTF-8.
    ///
    /// Invalid byte sequences are replaced with U+FFFD, so a body that is not
    /// valid UTF-8 is not reproduced byte for byte.
    pub raw_body: String,
    /// The response headers.
    pub headers: HeaderMap,
    /// Retries performed before giving up.
    pub retries: usize,
    /// The request id sent with the logical call, if one was assigned.
    pub request_id: Option<String>,
}

impl ApiFailure {
    /// Creates a failure carrying only a status and message.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
            causes: Vec::new(),
            error_id: None,
            doc: None,
            raw_body: String::new(),
            headers: HeaderMap::new(),
            retries: 0,
            request_id: None,
        }
    }

    /// Sets the error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status.as_u16())?;
        if let Some(code) = &self.code {
            write!(f, " [{code}]")?;
        }
        write!(f, ": {}", self.message)?;
        for cause in &self.causes {
            if let Some(message) = &cause.error_message {
                write!(f, "; caused by {message}")?;
            }
        }
        Ok(())
    }
}

/// The error type for catalog API calls.
///
/// HTTP-derived kinds follow a fixed status mapping: 400 → [`Error::InvalidRequest`],
/// 401 → [`Error::Authentication`], 403 → [`Error::Permission`], 404 → [`Error::NotFound`],
/// 409 → [`Error::Conflict`], 423 → [`Error::Locked`], 429 → [`Error::RateLimit`], and
/// every 5xx or unmapped status → [`Error::Api`].
///
/// # Examples
///
/// ```no_run
/// use catalog_client::{Client, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://catalog.example.com")?
///     .api_token("my-token")
///     .build()?;
///
/// match client.get::<serde_json::Value>("/api/meta/entity/guid/123").await {
///     Ok(response) => println!("Found: {}", response.data),
///     Err(Error::NotFound(failure)) => eprintln!("No such asset: {}", failure.message),
///     Err(Error::Api(failure)) => {
///         eprintln!("Server said {}: {}", failure.status, failure.raw_body);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A transport-level failure: connect or read timeout, reset, unreadable body.
    #[error("Connection error after {retries} retries: {message}")]
    Connection {
        /// Description of the last failure.
        message: String,
        /// Retries performed before giving up.
        retries: usize,
        /// The underlying transport error.
        #[source]
        source: Option<BoxError>,
    },

    /// Missing or malformed credentials, or a 401 that could not be refreshed.
    #[error("Authentication failed: {0}")]
    Authentication(Box<ApiFailure>),

    /// The server kept refusing access (403) until the retry budget ran out.
    #[error("Permission denied: {0}")]
    Permission(Box<ApiFailure>),

    /// The server rejected the request as malformed (400).
    #[error("Invalid request: {0}")]
    InvalidRequest(Box<ApiFailure>),

    /// The requested object does not exist (404).
    #[error("Not found: {0}")]
    NotFound(Box<ApiFailure>),

    /// The request conflicts with the current state of the object (409).
    #[error("Conflict: {0}")]
    Conflict(Box<ApiFailure>),

    /// The object is locked (423).
    #[error("Locked: {0}")]
    Locked(Box<ApiFailure>),

    /// The server kept throttling (429) until the retry budget ran out.
    #[error("Rate limited: {0}")]
    RateLimit(Box<ApiFailure>),

    /// Any other server failure, or a success body that could not be decoded.
    #[error("API error {0}")]
    Api(Box<ApiFailure>),

    /// Invalid configuration was provided to the client or the request.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Client-side error codes for credential problems detected before any I/O.
pub(crate) const NO_API_TOKEN: &str = "CLIENT-401-001";
pub(crate) const INVALID_API_TOKEN: &str = "CLIENT-401-002";
pub(crate) const IMPERSONATION_FAILED: &str = "CLIENT-401-003";

impl Error {
    /// Builds the typed error for a terminal HTTP status.
    pub fn from_failure(failure: ApiFailure) -> Self {
        let failure = Box::new(failure);
        match failure.status.as_u16() {
            400 => Error::InvalidRequest(failure),
            401 => Error::Authentication(failure),
            403 => Error::Permission(failure),
            404 => Error::NotFound(failure),
            409 => Error::Conflict(failure),
            423 => Error::Locked(failure),
            429 => Error::RateLimit(failure),
            _ => Error::Api(failure),
        }
    }

    /// Builds an authentication error that never reached the server.
    pub(crate) fn credentials(code: &str, message: impl Into<String>) -> Self {
        Error::Authentication(Box::new(
            ApiFailure::new(StatusCode::UNAUTHORIZED, message).with_code(code),
        ))
    }

    /// Returns the HTTP failure details if this error came from a response.
    pub fn failure(&self) -> Option<&ApiFailure> {
        match self {
            Error::Authentication(f)
            | Error::Permission(f)
            | Error::InvalidRequest(f)
            | Error::NotFound(f)
            | Error::Conflict(f)
            | Error::Locked(f)
            | Error::RateLimit(f)
            | Error::Api(f) => Some(f),
            _ => None,
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        self.failure().map(|f| f.status)
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        self.failure().map(|f| f.raw_body.as_str())
    }

    /// Returns the server-reported error code.
    pub fn server_code(&self) -> Option<&str> {
        self.failure()?.code.as_deref()
    }

    /// Returns the server-reported error message.
    pub fn server_message(&self) -> Option<&str> {
        self.failure().map(|f| f.message.as_str())
    }

    /// Returns the nested causes reported by the server.
    pub fn causes(&self) -> &[ErrorCause] {
        self.failure().map(|f| f.causes.as_slice()).unwrap_or(&[])
    }

    /// Returns how many retries were performed before this error became terminal.
    pub fn retries(&self) -> usize {
        match self {
            Error::Connection { retries, .. } => *retries,
            _ => self.failure().map(|f| f.retries).unwrap_or(0),
        }
    }

    pub(crate) fn set_retries(&mut self, count: usize) {
        match self {
            Error::Connection { retries, .. } => *retries = count,
            Error::Authentication(f)
            | Error::Permission(f)
            | Error::InvalidRequest(f)
            | Error::NotFound(f)
            | Error::Conflict(f)
            | Error::Locked(f)
            | Error::RateLimit(f)
            | Error::Api(f) => f.retries = count,
            _ => {}
        }
    }
}

/// A specialized `Result` type for catalog API calls.
pub type Result<T> = std::result::Result<T, Error>;
