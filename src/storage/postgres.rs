//! PostgreSQL storage backend

use crate::auth::{Credential, CredentialId, Level};
use crate::namespace::{self, Namespace};
use crate::storage::{async_trait, Admission, CredentialStore, StorageError};
use deadpool_postgres::{Config, Object, Pool, PoolConfig, PoolError, Runtime, Timeouts};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{GenericClient, NoTls, Row, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_POOL_SIZE: usize = 16;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// First key of the two-key advisory locks taken by compound writes
const ADMISSION_LOCK_CLASS: i32 = 0x5247_4b01;
const NAMESPACE_LOCK_CLASS: i32 = 0x5247_4b02;

/// Postgres configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Connection string, either `postgres://` URL or `key=value` form
    pub url: String,
    /// Maximum number of pooled connections
    pub pool_size: usize,
    /// Bound on connecting, waiting for a pooled connection, recycling it
    /// and waiting for an advisory lock
    pub timeout: Duration,
}

impl PostgresConfig {
    pub fn from_env() -> Option<Self> {
        let mut config = if let Ok(url) = std::env::var("DATABASE_URL") {
            Self::from_url(&url)?
        } else {
            let mut url = format!(
                "host={} port={} user={} dbname={}",
                std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string()),
                std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_string()),
                std::env::var("PGUSER").ok()?,
                std::env::var("PGDATABASE").ok()?,
            );
            if let Ok(password) = std::env::var("PGPASSWORD") {
                url.push_str(&format!(" password={}", password));
            }
            Self::from_url(&url)?
        };

        if let Some(size) = std::env::var("REGISTRY_DB_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.pool_size = size;
        }
        if let Some(ms) = std::env::var("REGISTRY_DB_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout = Duration::from_millis(ms);
        }

        Some(config)
    }

    /// Validate and wrap a connection string
    pub fn from_url(url: &str) -> Option<Self> {
        url.parse::<tokio_postgres::Config>().ok()?;

        Some(Self {
            url: url.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            timeout: DEFAULT_TIMEOUT,
        })
    }
}

/// PostgreSQL storage for API keys
pub struct PostgresStore {
    pool: Pool,
    lock_timeout: Duration,
}

/// Advisory lock serializing a compound write across every instance
enum Scope<'a> {
    /// The set of stored namespaces
    Admission,
    Namespace(&'a str),
}

impl PostgresStore {
    /// Connect and make sure the credential table exists
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url.clone());
        cfg.connect_timeout = Some(config.timeout);
        let mut timeouts = Timeouts::default();
        timeouts.wait = Some(config.timeout);
        timeouts.create = Some(config.timeout);
        timeouts.recycle = Some(config.timeout);
        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts = timeouts;
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let store = Self {
            pool,
            lock_timeout: config.timeout,
        };
        store.ensure_schema().await?;

        Ok(store)
    }

    async fn client(&self) -> Result<Object, StorageError> {
        self.pool.get().await.map_err(pool_error)
    }

    /// Take a transaction-scoped advisory lock, bounded by the lock timeout
    async fn lock(&self, tx: &Transaction<'_>, scope: Scope<'_>) -> Result<(), StorageError> {
        tx.batch_execute(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .await
        .map_err(db_error)?;

        match scope {
            Scope::Admission => {
                tx.execute("SELECT pg_advisory_xact_lock($1, 0)", &[&ADMISSION_LOCK_CLASS])
                    .await
            }
            Scope::Namespace(namespace) => {
                tx.execute(
                    "SELECT pg_advisory_xact_lock($1, hashtext($2))",
                    &[&NAMESPACE_LOCK_CLASS, &namespace],
                )
                .await
            }
        }
        .map_err(db_error)?;

        Ok(())
    }

    /// Ensure database schema exists
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        let client = self.client().await?;

        client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS registry_api_keys (
                    id UUID PRIMARY KEY,
                    namespace TEXT NOT NULL,
                    level TEXT NOT NULL CHECK (level IN ('read', 'write', 'super')),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE INDEX IF NOT EXISTS registry_api_keys_namespace_idx
                    ON registry_api_keys(namespace);

                -- At most one read and one write key per namespace
                CREATE UNIQUE INDEX IF NOT EXISTS registry_api_keys_pair_idx
                    ON registry_api_keys(namespace, level)
                    WHERE level IN ('read', 'write');

                -- At most one super key
                CREATE UNIQUE INDEX IF NOT EXISTS registry_api_keys_super_idx
                    ON registry_api_keys(level)
                    WHERE level = 'super';
                "#,
            )
            .await
            .map_err(db_error)?;

        info!("Database schema initialized");
        Ok(())
    }
}

const COLUMNS: &str = "id, namespace, level, created_at, updated_at";

fn from_row(row: &Row) -> Result<Credential, StorageError> {
    let id: Uuid = row.get(0);
    let namespace: String = row.get(1);
    let level: String = row.get(2);

    Ok(Credential {
        id: CredentialId::from(id),
        namespace: Namespace::parse(&namespace)
            .map_err(|e| StorageError::Serialization(e.to_string()))?,
        level: level
            .parse::<Level>()
            .map_err(|e| StorageError::Serialization(e.to_string()))?,
        created_at: row.get(3),
        updated_at: row.get(4),
    })
}

fn from_rows(rows: &[Row]) -> Result<Vec<Credential>, StorageError> {
    rows.iter().map(from_row).collect()
}

async fn insert_row<C>(client: &C, credential: &Credential) -> Result<(), StorageError>
where
    C: GenericClient + Sync,
{
    client
        .execute(
            "INSERT INTO registry_api_keys (id, namespace, level, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)",
            &[
                credential.id.as_uuid(),
                &credential.namespace.as_str(),
                &credential.level.as_str(),
                &credential.created_at,
                &credential.updated_at,
            ],
        )
        .await
        .map_err(db_error)?;

    debug!(id = %credential.id, namespace = %credential.namespace, level = %credential.level, "Inserted credential");
    Ok(())
}

fn db_error(e: tokio_postgres::Error) -> StorageError {
    match e.code() {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => StorageError::Conflict(e.to_string()),
        Some(code) if *code == SqlState::QUERY_CANCELED || *code == SqlState::LOCK_NOT_AVAILABLE => {
            StorageError::Timeout
        }
        _ => StorageError::Database(e.to_string()),
    }
}

fn pool_error(e: PoolError) -> StorageError {
    match e {
        PoolError::Timeout(_) => StorageError::Timeout,
        PoolError::Backend(e) => db_error(e),
        other => StorageError::Database(other.to_string()),
    }
}

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn insert(&self, credential: &Credential) -> Result<(), StorageError> {
        let client = self.client().await?;
        insert_row(&**client, credential).await
    }

    async fn admit_pair(
        &self,
        read: &Credential,
        write: &Credential,
    ) -> Result<Admission, StorageError> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(db_error)?;
        self.lock(&tx, Scope::Admission).await?;

        let rows = tx
            .query("SELECT DISTINCT namespace FROM registry_api_keys", &[])
            .await
            .map_err(db_error)?;
        let existing: BTreeSet<String> = rows.iter().map(|row| row.get(0)).collect();

        // Dropping the transaction rolls it back
        if let Some(conflict) = namespace::conflicts_with(read.namespace.as_str(), &existing) {
            return Ok(Admission::Conflict(conflict.to_string()));
        }

        insert_row(&*tx, read).await?;
        insert_row(&*tx, write).await?;
        tx.commit().await.map_err(db_error)?;

        Ok(Admission::Admitted)
    }

    async fn rotate(
        &self,
        namespace: &str,
        retired: &[CredentialId],
        issued: &[Credential],
    ) -> Result<(), StorageError> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(db_error)?;
        self.lock(&tx, Scope::Namespace(namespace)).await?;

        let ids: Vec<Uuid> = retired.iter().map(|id| *id.as_uuid()).collect();
        let removed = tx
            .execute(
                "DELETE FROM registry_api_keys WHERE namespace = $1 AND id = ANY($2)",
                &[&namespace, &ids],
            )
            .await
            .map_err(db_error)?;

        if removed != ids.len() as u64 {
            warn!(namespace, expected = ids.len(), removed, "Credentials changed during rotation");
            return Err(StorageError::Conflict(format!(
                "credentials of {} changed during rotation",
                namespace
            )));
        }

        for credential in issued {
            insert_row(&*tx, credential).await?;
        }
        tx.commit().await.map_err(db_error)?;

        debug!(namespace, removed, issued = issued.len(), "Rotated credentials");
        Ok(())
    }

    async fn get_by_id(&self, id: &CredentialId) -> Result<Option<Credential>, StorageError> {
        let client = self.client().await?;

        let row = client
            .query_opt(
                &format!("SELECT {} FROM registry_api_keys WHERE id = $1", COLUMNS),
                &[id.as_uuid()],
            )
            .await
            .map_err(db_error)?;

        row.as_ref().map(from_row).transpose()
    }

    async fn get_by_ids(&self, ids: &HashSet<CredentialId>) -> Result<Vec<Credential>, StorageError> {
        let client = self.client().await?;
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();

        let rows = client
            .query(
                &format!("SELECT {} FROM registry_api_keys WHERE id = ANY($1)", COLUMNS),
                &[&ids],
            )
            .await
            .map_err(db_error)?;

        from_rows(&rows)
    }

    async fn get_by_namespaces(
        &self,
        namespaces: &HashSet<String>,
    ) -> Result<Vec<Credential>, StorageError> {
        let client = self.client().await?;
        let namespaces: Vec<&str> = namespaces.iter().map(String::as_str).collect();

        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM registry_api_keys WHERE namespace = ANY($1)",
                    COLUMNS
                ),
                &[&namespaces],
            )
            .await
            .map_err(db_error)?;

        from_rows(&rows)
    }

    async fn delete_by_id(&self, id: &CredentialId) -> Result<u64, StorageError> {
        let client = self.client().await?;

        let removed = client
            .execute("DELETE FROM registry_api_keys WHERE id = $1", &[id.as_uuid()])
            .await
            .map_err(db_error)?;

        debug!(id = %id, removed, "Deleted credential");
        Ok(removed)
    }

    async fn delete_by_namespace(&self, namespace: &str) -> Result<u64, StorageError> {
        let client = self.client().await?;

        let removed = client
            .execute(
                "DELETE FROM registry_api_keys WHERE namespace = $1",
                &[&namespace],
            )
            .await
            .map_err(db_error)?;

        debug!(namespace, removed, "Deleted namespace credentials");
        Ok(removed)
    }

    async fn all_namespaces(&self) -> Result<BTreeSet<String>, StorageError> {
        let client = self.client().await?;

        let rows = client
            .query("SELECT DISTINCT namespace FROM registry_api_keys", &[])
            .await
            .map_err(db_error)?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn get_super(&self) -> Result<Option<Credential>, StorageError> {
        let client = self.client().await?;

        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM registry_api_keys WHERE level = 'super' LIMIT 1",
                    COLUMNS
                ),
                &[],
            )
            .await
            .map_err(db_error)?;

        row.as_ref().map(from_row).transpose()
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let client = self.client().await?;

        let row = client
            .query_one("SELECT COUNT(*) FROM registry_api_keys", &[])
            .await
            .map_err(db_error)?;

        let count: i64 = row.get(0);
        Ok(count as u64)
    }
}
