//! Catalog client with retries, global throttling and credential refresh.
//!
//! The [`Client`] type is the main entry point for calling the catalog.
//! Use [`ClientBuilder`] to configure and create clients.

use crate::backoff::BackoffPolicy;
use crate::credentials::{Credentials, Impersonator, TokenExchangeImpersonator};
use crate::executor::{Completed, RetryExecutor, DEFAULT_MAX_THROTTLE_WAIT};
use crate::options::RequestOptions;
use crate::request::{MultipartUpload, Payload, RequestBuilder, ResponseMode};
use crate::throttle::{GlobalThrottle, Throttle};
use crate::transport::{ByteStream, RawResponse, ReqwestTransport, Transport, TransportError};
use crate::translate::{self, CallSummary};
use crate::{Error, Response, Result};
use http::{HeaderMap, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use url::Url;

const EVENT_STREAM_ACCEPT: &str = "text/event-stream";

/// A client for the catalog REST API.
///
/// The client is cheap to clone and meant to be shared. Every call goes
/// through the same pipeline: the request is built once, sent as many times
/// as the retry policy allows, and the terminal response is translated into
/// a typed [`Response`] or [`Error`].
///
/// # Examples
///
/// ```no_run
/// use catalog_client::{Client, Response};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize)]
/// struct Search {
///     query: String,
/// }
///
/// #[derive(Deserialize)]
/// struct SearchResults {
///     approximate_count: u64,
/// }
///
/// # async fn example() -> Result<(), catalog_client::Error> {
/// let client = Client::builder()
///     .base_url("https://catalog.example.com")?
///     .api_token("my-token")
///     .max_retries(5)
///     .build()?;
///
/// let results: Response<SearchResults> = client
///     .post("/api/meta/search/indexsearch", &Search { query: "orders".into() })
///     .await?;
/// println!("{} hits", results.data.approximate_count);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: Url,
    credentials: RwLock<Credentials>,
    default_options: RequestOptions,
    backoff: BackoffPolicy,
    throttle: Arc<dyn Throttle>,
    transport: Arc<dyn Transport>,
    impersonator: Option<Arc<dyn Impersonator>>,
    user_id: Option<String>,
    sleep_between_retries: bool,
    max_throttle_wait: Duration,
}

/// The terminal response of a logical call, with its body still unread.
struct Dispatched {
    response: RawResponse,
    request_id: String,
    retries: usize,
    started: Instant,
    quiet: bool,
}

impl Dispatched {
    fn summary(&self) -> CallSummary {
        CallSummary {
            request_id: self.request_id.clone(),
            retries: self.retries,
            latency: self.started.elapsed(),
        }
    }

    fn log_received(&self, status: StatusCode) {
        if !self.quiet {
            tracing::info!(
                status = status.as_u16(),
                latency_ms = self.started.elapsed().as_millis(),
                attempts = self.retries + 1,
                request_id = %self.request_id,
                "Received HTTP response"
            );
        }
    }

    /// Reads the body and translates the outcome.
    async fn into_response<Res: DeserializeOwned>(self) -> Result<Response<Res>> {
        let status = self.response.status;
        let headers = self.response.headers.clone();
        self.log_received(status);

        let summary = self.summary();
        let retries = self.retries;
        let body = self
            .response
            .text()
            .await
            .map_err(|e| unreadable(e, retries))?;

        if status.is_success() {
            translate::success(status, headers, body, &summary)
        } else {
            Err(translate::error(status, headers, body, &summary))
        }
    }

    async fn into_events<Res: DeserializeOwned>(self) -> Result<Response<Vec<Res>>> {
        let status = self.response.status;
        let headers = self.response.headers.clone();
        self.log_received(status);

        let summary = self.summary();
        if !status.is_success() {
            return Err(self.into_failure(status, headers, &summary).await);
        }

        let retries = self.retries;
        let events = self
            .response
            .events()
            .await
            .map_err(|e| unreadable(e, retries))?;
        translate::events(status, headers, events, &summary)
    }

    fn into_stream(self) -> Result<Response<ByteStream>> {
        let status = self.response.status;
        let headers = self.response.headers.clone();
        self.log_received(status);

        let summary = self.summary();
        Ok(Response::new(
            self.response.into_stream(),
            String::new(),
            status,
            headers,
            summary.request_id,
            summary.latency,
            summary.retries + 1,
        ))
    }

    async fn into_failure(
        self,
        status: StatusCode,
        headers: HeaderMap,
        summary: &CallSummary,
    ) -> Error {
        match self.response.text().await {
            Ok(body) => translate::error(status, headers, body, summary),
            Err(e) => unreadable(e, summary.retries),
        }
    }
}

fn unreadable(error: TransportError, retries: usize) -> Error {
    Error::Connection {
        message: format!("Failed to read response body: {error}"),
        retries,
        source: Some(Box::new(error)),
    }
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use catalog_client::Client;
    ///
    /// # async fn example() -> Result<(), catalog_client::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://catalog.example.com")?
    ///     .api_token("my-token")
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The catalog base URL.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// A snapshot of the credentials used for new calls.
    ///
    /// After a successful credential refresh this returns the refreshed token.
    pub fn current_credentials(&self) -> Credentials {
        self.inner
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the credentials used for new calls.
    pub fn set_credentials(&self, credentials: Credentials) {
        *self
            .inner
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credentials;
    }

    /// Starts a request for `path`, relative to the base URL.
    ///
    /// Use this with [`Client::execute`] when the call needs query parameters,
    /// a custom `Accept` header or a non-JSON payload.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use catalog_client::{Client, RequestOptions};
    /// use http::Method;
    ///
    /// # async fn example() -> Result<(), catalog_client::Error> {
    /// # let client = Client::builder().base_url("https://catalog.example.com")?.api_token("t").build()?;
    /// let request = client
    ///     .request(Method::GET, "/api/meta/types/typedefs")
    ///     .query("type", "ENTITY");
    /// let typedefs = client
    ///     .execute::<serde_json::Value>(request, RequestOptions::new().max_retries(1))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        RequestBuilder::new(method, self.url_for(path))
    }

    /// Runs a prepared request and decodes the response body into `Res`.
    pub async fn execute<Res>(
        &self,
        request: RequestBuilder,
        options: RequestOptions,
    ) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.dispatch(request, options)
            .await?
            .into_response()
            .await
    }

    /// Makes a typed call with a JSON body.
    ///
    /// # Type Parameters
    ///
    /// * `Req` - The request body type (must implement `Serialize`)
    /// * `Res` - The response body type (must implement `DeserializeOwned`)
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use catalog_client::Client;
    /// use http::Method;
    /// use serde::{Deserialize, Serialize};
    ///
    /// #[derive(Serialize)]
    /// struct Lineage { guid: String, depth: u32 }
    ///
    /// #[derive(Deserialize)]
    /// struct LineageGraph { relations: Vec<serde_json::Value> }
    ///
    /// # async fn example() -> Result<(), catalog_client::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://catalog.example.com")?
    ///     .api_token("my-token")
    ///     .build()?;
    ///
    /// let request = Lineage { guid: "b4113341".to_string(), depth: 3 };
    /// let graph = client
    ///     .call::<_, LineageGraph>(Method::POST, "/api/meta/lineage/list", Some(&request))
    ///     .await?;
    /// println!("Found {} relations", graph.data.relations.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call<Req, Res>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Req>,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.call_with_options(method, path, body, RequestOptions::default())
            .await
    }

    /// Like [`Client::call`], with per-call options layered over the client defaults.
    pub async fn call_with_options<Req, Res>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Req>,
        options: RequestOptions,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let payload = match body {
            Some(body) => Payload::json(body)?,
            None => Payload::Empty,
        };
        self.execute(self.request(method, path).payload(payload), options)
            .await
    }

    /// Makes a GET request to the specified path.
    pub async fn get<Res>(&self, path: &str) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.call::<(), Res>(Method::GET, path, None).await
    }

    /// Makes a POST request to the specified path with a JSON body.
    pub async fn post<Req, Res>(&self, path: &str, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.call(Method::POST, path, Some(body)).await
    }

    /// Makes a PUT request to the specified path with a JSON body.
    pub async fn put<Req, Res>(&self, path: &str, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.call(Method::PUT, path, Some(body)).await
    }

    /// Makes a DELETE request to the specified path.
    pub async fn delete<Res>(&self, path: &str) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.call::<(), Res>(Method::DELETE, path, None).await
    }

    /// Makes a PATCH request to the specified path with a JSON body.
    pub async fn patch<Req, Res>(&self, path: &str, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.call(Method::PATCH, path, Some(body)).await
    }

    /// Posts `application/x-www-form-urlencoded` fields.
    pub async fn post_form<Res>(
        &self,
        path: &str,
        fields: Vec<(String, String)>,
    ) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let request = self.request(Method::POST, path).payload(Payload::Form(fields));
        self.execute(request, RequestOptions::default()).await
    }

    /// Uploads a file as `multipart/form-data`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use catalog_client::Client;
    /// use catalog_client::request::MultipartUpload;
    ///
    /// # async fn example() -> Result<(), catalog_client::Error> {
    /// # let client = Client::builder().base_url("https://catalog.example.com")?.api_token("t").build()?;
    /// let upload = MultipartUpload::new("readme.md", b"# Orders".to_vec())
    ///     .content_type("text/markdown")
    ///     .field("directoryPrefix", "docs");
    /// let stored = client
    ///     .upload::<serde_json::Value>("/api/service/files", upload)
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn upload<Res>(&self, path: &str, upload: MultipartUpload) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let request = self
            .request(Method::POST, path)
            .payload(Payload::Multipart(upload));
        self.execute(request, RequestOptions::default()).await
    }

    /// GETs a body of `data: `-prefixed lines and decodes each event into `Res`.
    ///
    /// The whole body is read before decoding, so an interrupted body is retried
    /// like any other transport failure.
    pub async fn get_events<Res>(&self, path: &str) -> Result<Response<Vec<Res>>>
    where
        Res: DeserializeOwned,
    {
        let request = self
            .request(Method::GET, path)
            .accept(EVENT_STREAM_ACCEPT)?;
        self.dispatch(request, RequestOptions::default())
            .await?
            .into_events()
            .await
    }

    /// GETs `path` and hands back the live body stream of a successful response.
    ///
    /// Failures before the first byte of a 2xx body are retried as usual; errors
    /// while reading the stream are yielded by the stream itself. The usual
    /// `Accept: application/json` is sent; use [`Client::request`] with
    /// [`RequestBuilder::accept`] to ask for another media type.
    pub async fn get_stream(&self, path: &str) -> Result<Response<ByteStream>> {
        let request = self
            .request(Method::GET, path)
            .mode(ResponseMode::Stream);
        let dispatched = self.dispatch(request, RequestOptions::default()).await?;

        let status = dispatched.response.status;
        if status.is_success() {
            return dispatched.into_stream();
        }
        let headers = dispatched.response.headers.clone();
        dispatched.log_received(status);
        let summary = dispatched.summary();
        Err(dispatched.into_failure(status, headers, &summary).await)
    }

    /// Builds the request and runs it to a terminal response.
    async fn dispatch(&self, request: RequestBuilder, options: RequestOptions) -> Result<Dispatched> {
        let options = options.overlay(&self.inner.default_options);
        let quiet = options.logging_skipped();
        let credentials = self.current_credentials();
        let mut request = request.options(options).build(&credentials)?;

        let started = Instant::now();
        let Completed { response, retries } = self.executor().execute(&mut request).await?;

        Ok(Dispatched {
            response,
            request_id: request.request_id().to_string(),
            retries,
            started,
            quiet,
        })
    }

    fn executor(&self) -> RetryExecutor<'_> {
        let inner = &*self.inner;
        let executor = RetryExecutor::new(inner.transport.as_ref(), inner.throttle.as_ref())
            .backoff(inner.backoff)
            .sleep(inner.sleep_between_retries)
            .max_throttle_wait(inner.max_throttle_wait);

        match (&inner.impersonator, &inner.user_id) {
            (Some(impersonator), Some(user_id)) => {
                executor.refresh_with(impersonator.as_ref(), user_id, &inner.credentials)
            }
            _ => executor,
        }
    }

    fn url_for(&self, path: &str) -> Url {
        let mut url = self.inner.base_url.clone();
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_str())
            .field("credentials", &self.current_credentials())
            .field("user_id", &self.inner.user_id)
            .field("backoff", &self.inner.backoff)
            .field("max_retries", &self.inner.default_options.retry_budget())
            .finish()
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use catalog_client::{BackoffPolicy, ClientBuilder};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), catalog_client::Error> {
/// let client = ClientBuilder::new()
///     .base_url("https://catalog.example.com")?
///     .api_token("my-token")
///     .max_retries(5)
///     .read_timeout(Duration::from_secs(120))
///     .backoff(BackoffPolicy::new(Duration::from_millis(200), Duration::from_secs(10)))
///     .default_header("x-catalog-client-origin", "nightly-sync")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    credentials: Credentials,
    default_options: RequestOptions,
    backoff: BackoffPolicy,
    throttle: Option<Arc<dyn Throttle>>,
    transport: Option<Arc<dyn Transport>>,
    impersonator: Option<Arc<dyn Impersonator>>,
    client_credentials: Option<(String, String)>,
    user_id: Option<String>,
    sleep_between_retries: bool,
    max_throttle_wait: Duration,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            credentials: Credentials::None,
            default_options: RequestOptions::default(),
            backoff: BackoffPolicy::default(),
            throttle: None,
            transport: None,
            impersonator: None,
            client_credentials: None,
            user_id: None,
            sleep_between_retries: true,
            max_throttle_wait: DEFAULT_MAX_THROTTLE_WAIT,
        }
    }

    /// Creates a builder from `CATALOG_*` environment variables.
    ///
    /// | Variable                | Effect                                        |
    /// |-------------------------|-----------------------------------------------|
    /// | `CATALOG_BASE_URL`      | base URL (required)                           |
    /// | `CATALOG_API_TOKEN`     | bearer token                                  |
    /// | `CATALOG_USER_ID`       | user to impersonate when the token is refused |
    /// | `CATALOG_CLIENT_ID`     | OAuth client used for impersonation           |
    /// | `CATALOG_CLIENT_SECRET` | secret of that client                         |
    /// | `CATALOG_MAX_RETRIES`   | default retry budget                          |
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is missing or invalid, or if
    /// `CATALOG_MAX_RETRIES` is not a number.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = lookup("CATALOG_BASE_URL").ok_or_else(|| {
            Error::ConfigurationError("CATALOG_BASE_URL is not set".to_string())
        })?;
        let mut builder = Self::new().base_url(base_url)?;

        if let Some(token) = lookup("CATALOG_API_TOKEN") {
            builder = builder.api_token(token);
        }
        if let Some(user_id) = lookup("CATALOG_USER_ID") {
            builder = builder.impersonate_user(user_id);
        }
        if let (Some(id), Some(secret)) = (
            lookup("CATALOG_CLIENT_ID"),
            lookup("CATALOG_CLIENT_SECRET"),
        ) {
            builder = builder.client_credentials(id, secret);
        }
        if let Some(retries) = lookup("CATALOG_MAX_RETRIES") {
            let retries = retries.trim().parse::<usize>().map_err(|e| {
                Error::ConfigurationError(format!("Invalid CATALOG_MAX_RETRIES: {}", e))
            })?;
            builder = builder.max_retries(retries);
        }
        Ok(builder)
    }

    /// Sets the base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Authenticates with a bearer API token.
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.credentials = Credentials::bearer(token);
        self
    }

    /// Authenticates with HTTP Basic credentials.
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Credentials::basic(username, password);
        self
    }

    /// Sets the credentials directly.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        self.default_options = self.default_options.header(name, value)?;
        Ok(self)
    }

    /// Replaces the client-wide default options.
    pub fn default_options(mut self, options: RequestOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Sets the default retry budget.
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.default_options = self.default_options.max_retries(max_retries);
        self
    }

    /// Sets the default connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.default_options = self.default_options.connect_timeout(timeout);
        self
    }

    /// Sets the default read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.default_options = self.default_options.read_timeout(timeout);
        self
    }

    /// Sets the delay between retries.
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Uses `throttle` instead of the process-wide gate.
    pub fn throttle(mut self, throttle: Arc<dyn Throttle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Sends requests through `transport` instead of the default reqwest adapter.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Refreshes rejected credentials with `impersonator`.
    pub fn impersonator(mut self, impersonator: Arc<dyn Impersonator>) -> Self {
        self.impersonator = Some(impersonator);
        self
    }

    /// Refreshes rejected credentials through the catalog's token endpoint
    /// using this OAuth client.
    pub fn client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_credentials = Some((client_id.into(), client_secret.into()));
        self
    }

    /// The user whose identity is used when credentials must be refreshed.
    ///
    /// Without a user a 401 is terminal.
    pub fn impersonate_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Turns sleeping between retries on or off.
    ///
    /// With sleeping off, retries happen immediately. A throttled gate still
    /// holds callers back.
    pub fn sleep_between_retries(mut self, sleep: bool) -> Self {
        self.sleep_between_retries = sleep;
        self
    }

    /// Caps how long a single `Retry-After` may pause callers.
    pub fn max_throttle_wait(mut self, max: Duration) -> Self {
        self.max_throttle_wait = max;
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::ConfigurationError("Base URL is required".to_string()))?;

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));
        let throttle = self
            .throttle
            .unwrap_or_else(|| GlobalThrottle::shared() as Arc<dyn Throttle>);

        let impersonator = match (self.impersonator, self.client_credentials) {
            (Some(impersonator), _) => Some(impersonator),
            (None, Some((client_id, client_secret))) => {
                let exchange = TokenExchangeImpersonator::for_base_url(
                    &base_url,
                    client_id,
                    client_secret,
                    transport.clone(),
                )?;
                Some(Arc::new(exchange) as Arc<dyn Impersonator>)
            }
            (None, None) => None,
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                base_url,
                credentials: RwLock::new(self.credentials),
                default_options: self.default_options,
                backoff: self.backoff,
                throttle,
                transport,
                impersonator,
                user_id: self.user_id,
                sleep_between_retries: self.sleep_between_retries,
                max_throttle_wait: self.max_throttle_wait,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_build_requires_base_url() {
        let err = Client::builder().build().unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            Client::builder().base_url("not a url"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_url_for_keeps_base_path() {
        let client = Client::builder()
            .base_url("https://catalog.example.com/tenant/")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            client.url_for("/api/meta/types").as_str(),
            "https://catalog.example.com/tenant/api/meta/types"
        );

        let client = Client::builder()
            .base_url("https://catalog.example.com")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            client.url_for("api/meta/types").as_str(),
            "https://catalog.example.com/api/meta/types"
        );
    }

    #[test]
    fn test_from_env_reads_catalog_variables() {
        let builder = ClientBuilder::from_lookup(lookup(&[
            ("CATALOG_BASE_URL", "https://catalog.example.com"),
            ("CATALOG_API_TOKEN", "abc"),
            ("CATALOG_USER_ID", "jsmith"),
            ("CATALOG_CLIENT_ID", "sdk"),
            ("CATALOG_CLIENT_SECRET", "s3cret"),
            ("CATALOG_MAX_RETRIES", "7"),
        ]))
        .unwrap();
        let client = builder.build().unwrap();

        assert_eq!(client.current_credentials(), Credentials::bearer("abc"));
        assert_eq!(client.inner.user_id.as_deref(), Some("jsmith"));
        assert!(client.inner.impersonator.is_some());
        assert_eq!(client.inner.default_options.retry_budget(), 7);
    }

    #[test]
    fn test_from_env_errors() {
        assert!(matches!(
            ClientBuilder::from_lookup(lookup(&[])),
            Err(Error::ConfigurationError(_))
        ));
        assert!(matches!(
            ClientBuilder::from_lookup(lookup(&[
                ("CATALOG_BASE_URL", "https://catalog.example.com"),
                ("CATALOG_MAX_RETRIES", "many"),
            ])),
            Err(Error::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let client = Client::builder()
            .base_url("https://catalog.example.com")
            .unwrap()
            .api_token("super-secret")
            .build()
            .unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("catalog.example.com"));
    }

    #[test]
    fn test_set_credentials_applies_to_new_calls() {
        let client = Client::builder()
            .base_url("https://catalog.example.com")
            .unwrap()
            .api_token("old")
            .build()
            .unwrap();
        let clone = client.clone();
        client.set_credentials(Credentials::bearer("new"));
        assert_eq!(clone.current_credentials(), Credentials::bearer("new"));
    }
}
