//! # catalog-client - resilient calls to a metadata-catalog REST API
//!
//! A logical API call becomes as many physical HTTP attempts as it needs.
//! Transient failures are retried with jittered exponential backoff, a 429
//! pauses every caller in the process until the server's `Retry-After` has
//! passed, an expired token can be refreshed by impersonating the configured
//! user, and every terminal failure surfaces as one typed [`Error`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use catalog_client::Client;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize)]
//! struct Search {
//!     query: String,
//! }
//!
//! #[derive(Deserialize)]
//! struct Entity {
//!     guid: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), catalog_client::Error> {
//!     let client = Client::builder()
//!         .base_url("https://catalog.example.com")?
//!         .api_token("my-token")
//!         .max_retries(3)
//!         .build()?;
//!
//!     let entity = client.get::<Entity>("/api/meta/entity/guid/b4113341").await?;
//!     println!("Entity {} took {:?}", entity.data.guid, entity.latency);
//!
//!     let hits = client
//!         .post::<_, Vec<Entity>>("/api/meta/search/indexsearch", &Search { query: "orders".into() })
//!         .await?;
//!     println!("{} hits after {} attempt(s)", hits.data.len(), hits.attempts);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! The server's error code, message and causes are kept verbatim:
//!
//! ```no_run
//! use catalog_client::{Client, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().base_url("https://catalog.example.com")?.api_token("t").build()?;
//! match client.get::<serde_json::Value>("/api/meta/entity/guid/missing").await {
//!     Ok(response) => println!("Found: {}", response.data),
//!     Err(Error::NotFound(failure)) => {
//!         eprintln!("{:?}: {}", failure.code, failure.message);
//!     }
//!     Err(e @ Error::Connection { .. }) => {
//!         eprintln!("Gave up after {} retries: {}", e.retries(), e);
//!     }
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## What gets retried
//!
//! Connection failures, timeouts, 302, 403, 429 and 5xx responses are retried
//! until the budget (`max_retries`, default 3) runs out. A 401 is retried once
//! after a credential refresh when a user to impersonate is configured. All
//! other statuses are returned immediately.

pub mod backoff;
mod client;
pub mod credentials;
mod error;
pub mod executor;
pub mod options;
pub mod request;
mod response;
pub mod throttle;
pub mod transport;
pub mod translate;

pub use backoff::BackoffPolicy;
pub use client::{Client, ClientBuilder};
pub use credentials::{Credentials, Impersonator, TokenExchangeImpersonator};
pub use error::{ApiFailure, Error, ErrorCause, Result};
pub use options::RequestOptions;
pub use request::RequestBuilder;
pub use response::Response;
pub use throttle::{GlobalThrottle, Throttle};
pub use transport::{RawResponse, ReqwestTransport, Transport, TransportError};
