//! registry-keys CLI entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use registry_keys::storage::{CredentialStore, PostgresConfig, PostgresStore};
use registry_keys::{CredentialId, Gateway, KeyService, KeysConfig, Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let db_config = match &cli.database_url {
        Some(url) => PostgresConfig::from_url(url).context("Invalid DATABASE_URL")?,
        None => PostgresConfig::from_env().context("DATABASE_URL not set")?,
    };
    let store: Arc<dyn CredentialStore> = Arc::new(PostgresStore::new(db_config).await?);

    let mut keys_config = KeysConfig::from_env();
    if let Some(ms) = cli.lock_timeout_ms {
        keys_config = keys_config.with_lock_timeout(Duration::from_millis(ms));
    }
    let service = KeyService::new(store, keys_config.clone());

    let request = match cli.command {
        Commands::Init { super_key } => {
            let id = match super_key {
                Some(key) => Some(CredentialId::parse(&key)?),
                None => keys_config.super_key,
            };
            return init(&service, id).await;
        }
        Commands::Status => return status(&service).await,
        Commands::Whoami => return whoami(&service, cli.key.as_deref()).await,
        Commands::Issue { namespace } => Request::Issue { namespace },
        Commands::Regenerate { namespace } => Request::Regenerate { namespace },
        Commands::Show { id, .. } if !id.is_empty() => Request::LookupIds { ids: id },
        Commands::Show { namespace, .. } => Request::LookupNamespaces { namespaces: namespace },
        Commands::Delete { id } => Request::DeleteId { id },
        Commands::DeleteNamespace { namespace } => Request::DeleteNamespace { namespace },
    };

    let gateway = Gateway::new(service);
    let response = gateway.handle(cli.key.as_deref(), request).await;
    print_response(&response)
}

async fn init(service: &KeyService, id: Option<CredentialId>) -> Result<()> {
    let admin = service
        .seed_super(id)
        .await
        .context("Failed to seed super key")?;

    info!("Database schema initialized");
    println!("{}", admin.id);
    Ok(())
}

async fn status(service: &KeyService) -> Result<()> {
    let count = service.count().await.context("Failed to count API keys")?;

    println!("Registry Keys Status");
    println!("====================");
    println!("Database: Connected");
    println!("API keys: {}", count);
    Ok(())
}

async fn whoami(service: &KeyService, key: Option<&str>) -> Result<()> {
    let key = key.context("--key or REGISTRY_API_KEY required")?;
    let requester = service
        .authenticate(key)
        .await
        .context("Unknown API key")?;

    println!("Namespace: {}", requester.namespace);
    println!("Level: {}", requester.level);
    Ok(())
}

fn print_response(response: &Response) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&response.body)?);

    if !response.status.is_success() {
        anyhow::bail!("request failed: {} ({})", response.status, response.status.code());
    }
    Ok(())
}
