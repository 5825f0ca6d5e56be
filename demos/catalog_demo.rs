//! Fetches a few type definitions from a catalog configured through the environment.
//!
//! ```text
//! CATALOG_BASE_URL=https://catalog.example.com CATALOG_API_TOKEN=... \
//!     RUST_LOG=catalog_client=debug cargo run --example catalog_demo
//! ```

use catalog_client::{ClientBuilder, Error, RequestOptions};
use http::Method;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeDefs {
    #[serde(default)]
    entity_defs: Vec<TypeDef>,
}

#[derive(Debug, Deserialize)]
struct TypeDef {
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let client = ClientBuilder::from_env()?.build()?;

    let request = client
        .request(Method::GET, "/api/meta/types/typedefs")
        .query("type", "ENTITY");
    match client
        .execute::<TypeDefs>(request, RequestOptions::new().max_retries(2))
        .await
    {
        Ok(response) => {
            println!(
                "{} entity types in {:?} ({} attempt(s), request {})",
                response.data.entity_defs.len(),
                response.latency,
                response.attempts,
                response.request_id
            );
            for def in response.data.entity_defs.iter().take(10) {
                println!("  {}", def.name);
            }
        }
        Err(Error::Authentication(failure)) => {
            eprintln!("Check CATALOG_API_TOKEN: {}", failure.message);
        }
        Err(e) => return Err(e),
    }

    Ok(())
}
