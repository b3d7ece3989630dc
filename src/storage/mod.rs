//! Storage backends for API keys
//!
//! - Postgres: durable credential table shared by every registry instance
//! - Memory: process-local table for tests and single-node tooling

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresStore};

use crate::auth::{Credential, CredentialId};
pub use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

/// Storage errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage operation timed out")]
    Timeout,
}

/// Outcome of an atomic pair admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Nothing was written because this stored namespace overlaps the candidate
    Conflict(String),
}

/// Durable, uniquely keyed credential storage
///
/// Every call is atomic: concurrent readers observe either all of its
/// effects or none of them, across every process sharing the store.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a credential, failing with `Conflict` if its id already exists
    async fn insert(&self, credential: &Credential) -> Result<(), StorageError>;

    async fn get_by_id(&self, id: &CredentialId) -> Result<Option<Credential>, StorageError>;

    /// Fetch every stored credential whose id is in `ids`
    async fn get_by_ids(&self, ids: &HashSet<CredentialId>) -> Result<Vec<Credential>, StorageError>;

    /// Fetch every credential whose namespace exactly equals one of `namespaces`
    async fn get_by_namespaces(
        &self,
        namespaces: &HashSet<String>,
    ) -> Result<Vec<Credential>, StorageError>;

    /// Check `read.namespace` against every stored namespace and, if no
    /// stored namespace is a prefix of it or prefixed by it, insert both
    /// credentials
    async fn admit_pair(
        &self,
        read: &Credential,
        write: &Credential,
    ) -> Result<Admission, StorageError>;

    /// Delete `retired` and insert `issued` as one step
    ///
    /// Fails with `Conflict` and changes nothing if any retired id is no
    /// longer stored under `namespace` or an issued credential breaks a
    /// uniqueness constraint.
    async fn rotate(
        &self,
        namespace: &str,
        retired: &[CredentialId],
        issued: &[Credential],
    ) -> Result<(), StorageError>;

    /// Returns the number of rows removed (0 or 1)
    async fn delete_by_id(&self, id: &CredentialId) -> Result<u64, StorageError>;

    /// Returns the number of rows removed
    async fn delete_by_namespace(&self, namespace: &str) -> Result<u64, StorageError>;

    /// Distinct namespaces currently holding credentials
    async fn all_namespaces(&self) -> Result<BTreeSet<String>, StorageError>;

    /// The seeded super credential, if any
    async fn get_super(&self) -> Result<Option<Credential>, StorageError>;

    /// Total number of stored credentials
    async fn count(&self) -> Result<u64, StorageError>;
}
