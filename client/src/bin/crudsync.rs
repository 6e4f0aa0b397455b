//! Command-line probe for a CRUD backend.
//!
//! Loads the metadata, lists the collections and, given a path argument,
//! prints the rows it reads as JSON.

use crudsync_client::{Cached, Config, HttpTransport, Session};
use crudsync_engine::value::row_to_json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crudsync_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Connecting to {}", config.service_url);

    let session = Session::new(config.clone(), HttpTransport::new(&config));
    let collections = session.connect().await?;

    for collection in &collections {
        println!("{}", collection);
    }

    if let Some(path) = std::env::args().nth(1) {
        let count = session.load(&path, Vec::new()).await?;
        tracing::info!(path = %path, rows = count, "Loaded");

        let output = match session.get(&path) {
            Some(Cached::Collection(rows)) => serde_json::Value::Array(
                rows.iter().map(|(_, row)| row_to_json(row)).collect(),
            ),
            Some(Cached::Row(row)) => row_to_json(&row),
            Some(Cached::Field(value)) => value.to_json(),
            None => serde_json::Value::Null,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    Ok(())
}
