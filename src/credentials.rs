//! Credentials and credential refresh.
//!
//! Two authorization schemes are supported: HTTP Basic for local development
//! deployments, and a Bearer API token for everything else. Tokens are checked
//! before they are used so a malformed token never goes over the wire.
//!
//! When a call is made on behalf of a user and the server answers 401, an
//! [`Impersonator`] can mint a fresh token for that user; the client stores it
//! and retries the call with rebuilt headers.

use crate::error::{Error, Result, IMPERSONATION_FAILED, INVALID_API_TOKEN, NO_API_TOKEN};
use crate::request::{LogicalRequest, Payload};
use crate::transport::Transport;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::{HeaderValue, Method};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// How requests authenticate to the catalog.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    /// No credentials configured. Every call fails with an authentication error.
    #[default]
    None,
    /// HTTP Basic, for local or development deployments.
    Basic {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// Bearer API token.
    Bearer(String),
}

impl Credentials {
    /// Bearer credentials from an API token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Credentials::Bearer(token.into())
    }

    /// Basic credentials from a username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Builds the `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] when no credentials are configured or
    /// the bearer token is empty or contains whitespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use catalog_client::Credentials;
    ///
    /// let header = Credentials::bearer("abc123").authorization().unwrap();
    /// assert_eq!(header, "Bearer abc123");
    ///
    /// assert!(Credentials::bearer("abc 123").authorization().is_err());
    /// ```
    pub fn authorization(&self) -> Result<HeaderValue> {
        let value = match self {
            Credentials::None => {
                return Err(Error::credentials(
                    NO_API_TOKEN,
                    "No API token configured for the client",
                ))
            }
            Credentials::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
            }
            Credentials::Bearer(token) => {
                validate_token(token)?;
                format!("Bearer {token}")
            }
        };

        let mut header = HeaderValue::from_str(&value).map_err(|_| {
            Error::credentials(INVALID_API_TOKEN, "Credentials contain invalid characters")
        })?;
        header.set_sensitive(true);
        Ok(header)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::None => f.write_str("None"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}

/// Checks that an API token is usable: present, non-empty and free of whitespace.
pub fn validate_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(Error::credentials(NO_API_TOKEN, "The API token is empty"));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(Error::credentials(
            INVALID_API_TOKEN,
            "The API token contains whitespace",
        ));
    }
    Ok(())
}

/// Mints a fresh token on behalf of a user after the server rejected the current one.
#[async_trait]
pub trait Impersonator: Send + Sync {
    /// Returns a new bearer token for `user_id`.
    async fn impersonate(&self, user_id: &str) -> Result<String>;
}

/// Standard path of the token endpoint relative to the catalog base URL.
pub const TOKEN_ENDPOINT_PATH: &str = "/auth/realms/default/protocol/openid-connect/token";

const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Impersonates users through an OAuth2 token exchange.
///
/// First obtains a client token with the `client_credentials` grant, then
/// exchanges it for a token whose subject is the requested user.
pub struct TokenExchangeImpersonator {
    token_url: Url,
    client_id: String,
    client_secret: String,
    transport: Arc<dyn Transport>,
}

impl TokenExchangeImpersonator {
    /// Creates an impersonator posting to `token_url` through `transport`.
    pub fn new(
        token_url: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            transport,
        }
    }

    /// Creates an impersonator using the standard token endpoint under `base_url`.
    ///
    /// The endpoint is appended to the base path, so a catalog served under a
    /// prefix such as `/tenant/` keeps it.
    pub fn for_base_url(
        base_url: &Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(Error::ConfigurationError(format!(
                "Base URL {base_url} cannot carry a token endpoint path"
            )));
        }
        let mut token_url = base_url.clone();
        let joined = format!(
            "{}/{}",
            token_url.path().trim_end_matches('/'),
            TOKEN_ENDPOINT_PATH.trim_start_matches('/')
        );
        token_url.set_path(&joined);
        token_url.set_query(None);
        token_url.set_fragment(None);
        Ok(Self::new(token_url, client_id, client_secret, transport))
    }

    async fn request_token(&self, fields: Vec<(String, String)>) -> Result<String> {
        let request = LogicalRequest::unauthenticated(
            Method::POST,
            self.token_url.clone(),
            Payload::Form(fields),
        )?;

        let response = self.transport.send(&request).await.map_err(|e| {
            Error::credentials(
                IMPERSONATION_FAILED,
                format!("Token endpoint unreachable: {e}"),
            )
        })?;
        let status = response.status;
        let body = response.text().await.map_err(|e| {
            Error::credentials(IMPERSONATION_FAILED, format!("Unreadable token response: {e}"))
        })?;

        if !status.is_success() {
            return Err(Error::credentials(
                IMPERSONATION_FAILED,
                format!("Token endpoint returned {}: {body}", status.as_u16()),
            ));
        }

        serde_json::from_str::<TokenResponse>(&body)
            .map(|token| token.access_token)
            .map_err(|e| {
                Error::credentials(IMPERSONATION_FAILED, format!("Malformed token response: {e}"))
            })
    }
}

impl fmt::Debug for TokenExchangeImpersonator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExchangeImpersonator")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Impersonator for TokenExchangeImpersonator {
    async fn impersonate(&self, user_id: &str) -> Result<String> {
        let client_token = self
            .request_token(vec![
                ("grant_type".to_string(), "client_credentials".to_string()),
                ("client_id".to_string(), self.client_id.clone()),
                ("client_secret".to_string(), self.client_secret.clone()),
            ])
            .await?;

        tracing::debug!(user_id = %user_id, "Exchanging client token for user token");

        self.request_token(vec![
            ("grant_type".to_string(), TOKEN_EXCHANGE_GRANT.to_string()),
            ("client_id".to_string(), self.client_id.clone()),
            ("client_secret".to_string(), self.client_secret.clone()),
            ("subject_token".to_string(), client_token),
            ("requested_subject".to_string(), user_id.to_string()),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_header() {
        let header = Credentials::bearer("tok_123").authorization().unwrap();
        assert_eq!(header, "Bearer tok_123");
        assert!(header.is_sensitive());
    }

    #[test]
    fn test_basic_header() {
        let header = Credentials::basic("admin", "admin").authorization().unwrap();
        assert_eq!(header, "Basic YWRtaW46YWRtaW4=");
    }

    #[test]
    fn test_token_endpoint_keeps_base_path() {
        let token_url = |base: &str| {
            let base = Url::parse(base).unwrap();
            let transport = Arc::new(crate::transport::ReqwestTransport::new());
            TokenExchangeImpersonator::for_base_url(&base, "client", "secret", transport)
                .unwrap()
                .token_url
        };

        let prefixed = token_url("https://catalog.example.com/tenant/");
        assert!(prefixed.path().starts_with("/tenant/"), "got {prefixed}");
        assert_eq!(
            prefixed.as_str(),
            "https://catalog.example.com/tenant/auth/realms/default/protocol/openid-connect/token"
        );
        assert_eq!(
            token_url("https://catalog.example.com/tenant").as_str(),
            prefixed.as_str()
        );
        assert_eq!(
            token_url("https://catalog.example.com").path(),
            TOKEN_ENDPOINT_PATH
        );
    }

    #[test]
    fn test_missing_credentials() {
        let err = Credentials::None.authorization().unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(err.server_code(), Some(NO_API_TOKEN));
    }

    #[test]
    fn test_rejects_bad_tokens() {
        for token in ["", " ", "abc def", "abc\n", "\tabc"] {
            let err = validate_token(token).unwrap_err();
            assert!(matches!(err, Error::Authentication(_)), "token {token:?}");
        }
        assert!(validate_token("eyJhbGciOi.abc-DEF_123").is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!(
            "{:?} {:?}",
            Credentials::bearer("secret-token"),
            Credentials::basic("admin", "pa55word")
        );
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("admin"));
        assert!(!debug.contains("secret-token"));
        assert!(!debug.contains("pa55word"));
    }
}
