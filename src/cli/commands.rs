//! CLI command definitions

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "registry-keys")]
#[command(about = "Issue, inspect and revoke schema registry API keys", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// API key to act with
    #[arg(long, env = "REGISTRY_API_KEY", global = true, hide_env_values = true)]
    pub key: Option<String>,

    /// Upper bound on waiting for a namespace lock, in milliseconds
    #[arg(long, env = "REGISTRY_LOCK_TIMEOUT_MS", global = true)]
    pub lock_timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the key table and seed the super key
    Init {
        /// Super key to seed (random if omitted)
        #[arg(long, env = "REGISTRY_SUPER_KEY", value_parser = parse_key)]
        super_key: Option<String>,
    },

    /// Issue a read/write key pair for a new namespace
    ///
    /// Examples:
    ///   registry-keys issue com.acme
    Issue {
        /// Vendor namespace
        namespace: String,
    },

    /// Regenerate the key pair of a namespace
    Regenerate {
        /// Vendor namespace
        namespace: String,
    },

    /// Show keys by id or by namespace
    ///
    /// Examples:
    ///   registry-keys show --namespace com.acme
    ///   registry-keys show --id 9f1c...
    Show {
        /// Key id (can be repeated)
        #[arg(long = "id", conflicts_with = "namespace", required_unless_present = "namespace")]
        id: Vec<String>,

        /// Namespace (can be repeated)
        #[arg(long = "namespace")]
        namespace: Vec<String>,
    },

    /// Delete a single key
    Delete {
        /// Key id
        id: String,
    },

    /// Delete every key of a namespace
    DeleteNamespace {
        /// Vendor namespace
        namespace: String,
    },

    /// Show the namespace and level of the key in use
    Whoami,

    /// Show database status
    Status,
}

fn parse_key(s: &str) -> Result<String, String> {
    registry_keys::CredentialId::parse(s)
        .map(|id| id.to_string())
        .map_err(|e| e.to_string())
}
