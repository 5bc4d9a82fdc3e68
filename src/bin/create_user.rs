// Create a user and print their API token
//
// Usage: cargo run --bin create_user -- <username>

use anyhow::Context;
use farm_help::{AppConfig, Store};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "farm_help=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let username = std::env::args()
        .nth(1)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .context("usage: create_user <username>")?;

    let config = AppConfig::from_env()?;
    let store = Store::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))?;

    let token = uuid::Uuid::new_v4().simple().to_string();
    let user = store
        .create_user(&username, &token)
        .with_context(|| format!("creating user {}", username))?;

    println!("Created user {} (id {})", user.username, user.id);
    println!("API token: {}", user.api_token);
    Ok(())
}
