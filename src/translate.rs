//! Turns a terminal raw response into a typed result.
//!
//! A 2xx body is decoded into the caller's type; anything else becomes one of
//! the typed [`Error`] kinds. Error bodies are parsed as the catalog's
//! structured error payload when possible, and fall back to the raw text when
//! they are not (an HTML error page from a proxy, say). The raw body is kept
//! in both cases.

use crate::error::{ApiFailure, Error, ErrorCause, Result};
use crate::response::Response;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Error code of a 2xx response whose body could not be decoded.
pub const MALFORMED_RESPONSE: &str = "CLIENT-DECODE-001";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorPayload {
    error_code: Option<String>,
    error_message: Option<String>,
    code: Option<serde_json::Value>,
    message: Option<String>,
    causes: Option<Vec<ErrorCause>>,
    error_id: Option<String>,
    doc: Option<String>,
}

/// Everything about a logical call that a translated outcome reports back.
#[derive(Debug, Clone)]
pub struct CallSummary {
    /// The request id sent with every attempt.
    pub request_id: String,
    /// Retries performed.
    pub retries: usize,
    /// Time since the first attempt started.
    pub latency: Duration,
}

/// Decodes a JSON body. An empty body decodes as JSON `null`.
pub fn decode<T: DeserializeOwned>(body: &str) -> std::result::Result<T, serde_json::Error> {
    if body.trim().is_empty() {
        serde_json::from_str("null")
    } else {
        serde_json::from_str(body)
    }
}

/// Decodes a successful body into `T`, attaching the response metadata.
pub fn success<T: DeserializeOwned>(
    status: StatusCode,
    headers: HeaderMap,
    raw_body: String,
    summary: &CallSummary,
) -> Result<Response<T>> {
    match decode::<T>(&raw_body) {
        Ok(data) => Ok(Response::new(
            data,
            raw_body,
            status,
            headers,
            summary.request_id.clone(),
            summary.latency,
            summary.retries + 1,
        )),
        Err(e) => {
            tracing::error!(
                error = %e,
                raw_response = %raw_body,
                request_id = %summary.request_id,
                "Failed to deserialize response"
            );
            Err(malformed(status, headers, raw_body, &e, summary))
        }
    }
}

/// Decodes each line-delimited event into `T`.
pub fn events<T: DeserializeOwned>(
    status: StatusCode,
    headers: HeaderMap,
    events: Vec<String>,
    summary: &CallSummary,
) -> Result<Response<Vec<T>>> {
    let mut decoded = Vec::with_capacity(events.len());
    for event in &events {
        match serde_json::from_str::<T>(event) {
            Ok(item) => decoded.push(item),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    event = %event,
                    request_id = %summary.request_id,
                    "Failed to deserialize event"
                );
                return Err(malformed(status, headers, event.clone(), &e, summary));
            }
        }
    }

    Ok(Response::new(
        decoded,
        events.join("\n"),
        status,
        headers,
        summary.request_id.clone(),
        summary.latency,
        summary.retries + 1,
    ))
}

fn malformed(
    status: StatusCode,
    headers: HeaderMap,
    raw_body: String,
    error: &serde_json::Error,
    summary: &CallSummary,
) -> Error {
    let mut failure = ApiFailure::new(status, format!("Failed to decode response: {error}"))
        .with_code(MALFORMED_RESPONSE);
    failure.raw_body = raw_body;
    failure.headers = headers;
    failure.retries = summary.retries;
    failure.request_id = Some(summary.request_id.clone());
    Error::Api(Box::new(failure))
}

/// Builds the failure details for a non-2xx response.
///
/// # Examples
///
/// ```
/// use catalog_client::translate::failure;
/// use http::{HeaderMap, StatusCode};
///
/// let body = r#"{"errorCode":"CAT-404-001","errorMessage":"Asset not found"}"#;
/// let details = failure(StatusCode::NOT_FOUND, HeaderMap::new(), body.to_string());
/// assert_eq!(details.code.as_deref(), Some("CAT-404-001"));
/// assert_eq!(details.message, "Asset not found");
/// assert_eq!(details.raw_body, body);
/// ```
pub fn failure(status: StatusCode, headers: HeaderMap, raw_body: String) -> ApiFailure {
    let payload = serde_json::from_str::<ErrorPayload>(&raw_body).unwrap_or_default();

    let code = payload.error_code.or_else(|| {
        payload.code.map(|code| match code {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
    });
    let message = payload
        .error_message
        .or(payload.message)
        .unwrap_or_else(|| raw_body.clone());

    ApiFailure {
        status,
        code,
        message,
        causes: payload.causes.unwrap_or_default(),
        error_id: payload.error_id,
        doc: payload.doc,
        raw_body,
        headers,
        retries: 0,
        request_id: None,
    }
}

/// Builds the typed error for a terminal non-2xx response.
pub fn error(
    status: StatusCode,
    headers: HeaderMap,
    raw_body: String,
    summary: &CallSummary,
) -> Error {
    if status.is_server_error() {
        tracing::warn!(
            status = status.as_u16(),
            response = %raw_body,
            request_id = %summary.request_id,
            "Server error (5xx)"
        );
    } else {
        tracing::error!(
            status = status.as_u16(),
            response = %raw_body,
            request_id = %summary.request_id,
            "Request failed"
        );
    }

    let mut failure = failure(status, headers, raw_body);
    failure.retries = summary.retries;
    failure.request_id = Some(summary.request_id.clone());
    Error::from_failure(failure)
}
