//! Decoded response plus the metadata of the exchange that produced it.
//!
//! The [`Response`] type wraps the deserialized data together with the status,
//! headers, raw body, request id, latency and attempt count, so callers can
//! inspect what the server actually sent without a second request.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A successfully decoded response.
///
/// # Type Parameters
///
/// * `T` - The type of the deserialized response data
///
/// # Examples
///
/// ```no_run
/// use catalog_client::Client;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Entity {
///     guid: String,
/// }
///
/// # async fn example() -> Result<(), catalog_client::Error> {
/// let client = Client::builder()
///     .base_url("https://catalog.example.com")?
///     .api_token("my-token")
///     .build()?;
///
/// let response = client.get::<Entity>("/api/meta/entity/guid/123").await?;
///
/// println!("Entity: {}", response.data.guid);
/// println!("Request {} took {:?}", response.request_id, response.latency);
/// println!("Attempts: {}", response.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The deserialized response data.
    pub data: T,

    /// The response body decoded as UTF-8, with invalid sequences replaced by
    /// U+FFFD. Empty for streamed responses.
    pub raw_body: String,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The id sent with every attempt of this call.
    pub request_id: String,

    /// Time from the first attempt until the response was received,
    /// including retries and throttling pauses.
    pub latency: Duration,

    /// The number of physical attempts made, `1` when no retry was needed.
    pub attempts: usize,
}

impl<T> Response<T> {
    /// Creates a new `Response`.
    pub fn new(
        data: T,
        raw_body: String,
        status: StatusCode,
        headers: HeaderMap,
        request_id: String,
        latency: Duration,
        attempts: usize,
    ) -> Self {
        Self {
            data,
            raw_body,
            status,
            headers,
            request_id,
            latency,
            attempts,
        }
    }

    /// Maps the response data to a different type, keeping the metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// # use catalog_client::Response;
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let response = Response::new(
    ///     42,
    ///     "42".to_string(),
    ///     StatusCode::OK,
    ///     HeaderMap::new(),
    ///     "req-1".to_string(),
    ///     Duration::from_millis(100),
    ///     1,
    /// );
    ///
    /// let string_response = response.map(|n| n.to_string());
    /// assert_eq!(string_response.data, "42");
    /// assert_eq!(string_response.request_id, "req-1");
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            request_id: self.request_id,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    /// Returns `true` if the call needed more than one attempt.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn response(attempts: usize) -> Response<Vec<u32>> {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        Response::new(
            vec![1, 2, 3],
            "[1,2,3]".to_string(),
            StatusCode::OK,
            headers,
            "req-1".to_string(),
            Duration::from_millis(5),
            attempts,
        )
    }

    #[test]
    fn test_was_retried() {
        assert!(!response(1).was_retried());
        assert!(response(3).was_retried());
    }

    #[test]
    fn test_header_lookup_and_deref() {
        let response = response(1);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("x-missing"), None);
        assert_eq!(response.len(), 3);
    }
}
