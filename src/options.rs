//! Per-call request options.

use http::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;
use std::time::Duration;

/// Default connect timeout for physical attempts.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default read timeout for physical attempts.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(900);
/// Default retry budget for a logical call.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Username and password presented to an authenticating proxy.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredential {
    /// Proxy username.
    pub username: String,
    /// Proxy password.
    pub password: String,
}

impl fmt::Debug for ProxyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Options for one logical call.
///
/// Every field is optional. A call's options are [overlaid](RequestOptions::overlay)
/// on the client-wide defaults; unset fields fall through to the default and the
/// defaults themselves are never modified.
///
/// # Examples
///
/// ```
/// use catalog_client::RequestOptions;
/// use std::time::Duration;
///
/// let defaults = RequestOptions::new()
///     .max_retries(3)
///     .read_timeout(Duration::from_secs(60));
///
/// let call = RequestOptions::new()
///     .max_retries(0)
///     .header("x-trace", "abc")
///     .unwrap();
///
/// let effective = call.overlay(&defaults);
/// assert_eq!(effective.max_retries, Some(0));
/// assert_eq!(effective.read_timeout, Some(Duration::from_secs(60)));
/// assert_eq!(defaults.max_retries, Some(3));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Time allowed to establish a connection for each physical attempt.
    pub connect_timeout: Option<Duration>,
    /// Time allowed for each physical attempt to complete.
    pub read_timeout: Option<Duration>,
    /// Retries allowed after the first attempt.
    pub max_retries: Option<usize>,
    /// Proxy URL to send the request through.
    pub proxy: Option<String>,
    /// Credential for the proxy.
    pub proxy_credential: Option<ProxyCredential>,
    /// Extra headers sent with the request.
    pub extra_headers: HeaderMap,
    /// Suppress per-request debug and info logging.
    pub skip_logging: Option<bool>,
}

impl RequestOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Sets the retry budget.
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Routes the request through a proxy.
    pub fn proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy = Some(url.into());
        self
    }

    /// Sets the proxy credential.
    pub fn proxy_credential(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.proxy_credential = Some(ProxyCredential {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Adds an extra header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> crate::Result<Self> {
        let name = HeaderName::try_from(name.as_ref()).map_err(|e| {
            crate::Error::ConfigurationError(format!("Invalid header name: {}", e))
        })?;
        let value = HeaderValue::try_from(value.as_ref()).map_err(|e| {
            crate::Error::ConfigurationError(format!("Invalid header value: {}", e))
        })?;
        self.extra_headers.insert(name, value);
        Ok(self)
    }

    /// Turns per-request logging on or off.
    pub fn skip_logging(mut self, skip: bool) -> Self {
        self.skip_logging = Some(skip);
        self
    }

    /// Returns these options layered on top of `defaults`.
    ///
    /// Scalar fields set here win. Headers from `defaults` come first and
    /// headers set here replace any default header with the same name.
    pub fn overlay(&self, defaults: &RequestOptions) -> RequestOptions {
        let mut extra_headers = defaults.extra_headers.clone();
        for name in self.extra_headers.keys() {
            extra_headers.remove(name);
        }
        for (name, value) in &self.extra_headers {
            extra_headers.append(name.clone(), value.clone());
        }

        RequestOptions {
            connect_timeout: self.connect_timeout.or(defaults.connect_timeout),
            read_timeout: self.read_timeout.or(defaults.read_timeout),
            max_retries: self.max_retries.or(defaults.max_retries),
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            proxy_credential: self
                .proxy_credential
                .clone()
                .or_else(|| defaults.proxy_credential.clone()),
            extra_headers,
            skip_logging: self.skip_logging.or(defaults.skip_logging),
        }
    }

    /// The effective retry budget.
    pub fn retry_budget(&self) -> usize {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    /// The effective connect timeout.
    pub fn effective_connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    /// The effective read timeout.
    pub fn effective_read_timeout(&self) -> Duration {
        self.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT)
    }

    /// Whether per-request logging is suppressed.
    pub fn logging_skipped(&self) -> bool {
        self.skip_logging.unwrap_or(false)
    }
}
