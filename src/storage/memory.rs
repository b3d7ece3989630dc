//! In-memory credential table

use crate::auth::{Credential, CredentialId, Level};
use crate::namespace;
use crate::storage::{async_trait, Admission, CredentialStore, StorageError};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};

type Table = HashMap<CredentialId, Credential>;

/// Process-local credential storage
///
/// Enforces the same constraints as the Postgres schema: unique ids, at
/// most one read and one write credential per namespace and a single super
/// credential. Compound writes hold the table's write lock throughout.
#[derive(Default)]
pub struct MemoryStore {
    credentials: RwLock<Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_insert(credentials: &Table, credential: &Credential) -> Result<(), StorageError> {
    if credentials.contains_key(&credential.id) {
        return Err(StorageError::Conflict(format!(
            "credential id already exists: {}",
            credential.id
        )));
    }

    let duplicate = credentials.values().any(|c| match credential.level {
        Level::Super => c.level.is_super(),
        level => c.namespace == credential.namespace && c.level == level,
    });
    if duplicate {
        return Err(StorageError::Conflict(format!(
            "{} credential already exists for {}",
            credential.level, credential.namespace
        )));
    }

    Ok(())
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert(&self, credential: &Credential) -> Result<(), StorageError> {
        let mut credentials = self.credentials.write();

        check_insert(&credentials, credential)?;
        credentials.insert(credential.id, credential.clone());
        Ok(())
    }

    async fn admit_pair(
        &self,
        read: &Credential,
        write: &Credential,
    ) -> Result<Admission, StorageError> {
        let mut credentials = self.credentials.write();

        let existing: BTreeSet<String> =
            credentials.values().map(|c| c.namespace.to_string()).collect();
        if let Some(conflict) = namespace::conflicts_with(read.namespace.as_str(), &existing) {
            return Ok(Admission::Conflict(conflict.to_string()));
        }

        check_insert(&credentials, read)?;
        credentials.insert(read.id, read.clone());
        if let Err(e) = check_insert(&credentials, write) {
            credentials.remove(&read.id);
            return Err(e);
        }
        credentials.insert(write.id, write.clone());
        Ok(Admission::Admitted)
    }

    async fn rotate(
        &self,
        namespace: &str,
        retired: &[CredentialId],
        issued: &[Credential],
    ) -> Result<(), StorageError> {
        let mut credentials = self.credentials.write();

        let missing = retired.iter().find(|id| {
            credentials
                .get(*id)
                .map_or(true, |c| c.namespace.as_str() != namespace)
        });
        if let Some(id) = missing {
            return Err(StorageError::Conflict(format!(
                "credential {} is no longer stored for {}",
                id, namespace
            )));
        }

        let removed: Vec<Credential> = retired
            .iter()
            .filter_map(|id| credentials.remove(id))
            .collect();

        for (added, credential) in issued.iter().enumerate() {
            if let Err(e) = check_insert(&credentials, credential) {
                // Put the table back exactly as it was
                for undo in &issued[..added] {
                    credentials.remove(&undo.id);
                }
                for old in removed {
                    credentials.insert(old.id, old);
                }
                return Err(e);
            }
            credentials.insert(credential.id, credential.clone());
        }

        Ok(())
    }

    async fn get_by_id(&self, id: &CredentialId) -> Result<Option<Credential>, StorageError> {
        Ok(self.credentials.read().get(id).cloned())
    }

    async fn get_by_ids(&self, ids: &HashSet<CredentialId>) -> Result<Vec<Credential>, StorageError> {
        let credentials = self.credentials.read();
        Ok(ids.iter().filter_map(|id| credentials.get(id).cloned()).collect())
    }

    async fn get_by_namespaces(
        &self,
        namespaces: &HashSet<String>,
    ) -> Result<Vec<Credential>, StorageError> {
        Ok(self
            .credentials
            .read()
            .values()
            .filter(|c| namespaces.contains(c.namespace.as_str()))
            .cloned()
            .collect())
    }

    async fn delete_by_id(&self, id: &CredentialId) -> Result<u64, StorageError> {
        Ok(self.credentials.write().remove(id).map_or(0, |_| 1))
    }

    async fn delete_by_namespace(&self, namespace: &str) -> Result<u64, StorageError> {
        let mut credentials = self.credentials.write();
        let before = credentials.len();
        credentials.retain(|_, c| c.namespace.as_str() != namespace);
        Ok((before - credentials.len()) as u64)
    }

    async fn all_namespaces(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self
            .credentials
            .read()
            .values()
            .map(|c| c.namespace.to_string())
            .collect())
    }

    async fn get_super(&self) -> Result<Option<Credential>, StorageError> {
        Ok(self
            .credentials
            .read()
            .values()
            .find(|c| c.level.is_super())
            .cloned())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.credentials.read().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;

    fn cred(namespace: &str, level: Level) -> Credential {
        Credential::new(Namespace::parse(namespace).unwrap(), level)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryStore::new();
        let read = cred("com.acme", Level::Read);

        store.insert(&read).await.unwrap();

        assert_eq!(store.get_by_id(&read.id).await.unwrap(), Some(read.clone()));
        assert_eq!(store.get_by_id(&CredentialId::generate()).await.unwrap(), None);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_duplicate_id_conflicts() {
        let store = MemoryStore::new();
        let read = cred("com.acme", Level::Read);
        store.insert(&read).await.unwrap();

        let mut clash = cred("org.other", Level::Write);
        clash.id = read.id;

        assert!(matches!(store.insert(&clash).await, Err(StorageError::Conflict(_))));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_duplicate_level_conflicts() {
        let store = MemoryStore::new();
        store.insert(&cred("com.acme", Level::Write)).await.unwrap();

        let result = store.insert(&cred("com.acme", Level::Write)).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_get_by_ids_collapses_duplicates() {
        let store = MemoryStore::new();
        let read = cred("com.acme", Level::Read);
        let write = cred("com.acme", Level::Write);
        store.insert(&read).await.unwrap();
        store.insert(&write).await.unwrap();

        let ids: HashSet<_> = [read.id, read.id, CredentialId::generate()].into_iter().collect();
        let found = store.get_by_ids(&ids).await.unwrap();

        assert_eq!(found, vec![read]);
    }

    #[tokio::test]
    async fn test_get_by_namespaces_exact_match() {
        let store = MemoryStore::new();
        store.insert(&cred("com.acme", Level::Read)).await.unwrap();
        store.insert(&cred("com.acme", Level::Write)).await.unwrap();
        store.insert(&cred("org.example", Level::Read)).await.unwrap();

        let wanted: HashSet<String> = ["com.acme".to_string()].into_iter().collect();
        assert_eq!(store.get_by_namespaces(&wanted).await.unwrap().len(), 2);

        let prefix: HashSet<String> = ["com".to_string()].into_iter().collect();
        assert!(store.get_by_namespaces(&prefix).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_counts() {
        let store = MemoryStore::new();
        let read = cred("com.acme", Level::Read);
        store.insert(&read).await.unwrap();
        store.insert(&cred("com.acme", Level::Write)).await.unwrap();

        assert_eq!(store.delete_by_id(&read.id).await.unwrap(), 1);
        assert_eq!(store.delete_by_id(&read.id).await.unwrap(), 0);
        assert_eq!(store.delete_by_namespace("com.acme").await.unwrap(), 1);
        assert_eq!(store.delete_by_namespace("com.acme").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_all_namespaces_and_super() {
        let store = MemoryStore::new();
        let admin = Credential::new(Namespace::super_namespace(), Level::Super);
        store.insert(&admin).await.unwrap();
        store.insert(&cred("com.acme", Level::Read)).await.unwrap();
        store.insert(&cred("com.acme", Level::Write)).await.unwrap();

        let namespaces: Vec<_> = store.all_namespaces().await.unwrap().into_iter().collect();
        assert_eq!(namespaces, vec!["*".to_string(), "com.acme".to_string()]);
        assert_eq!(store.get_super().await.unwrap(), Some(admin));
    }

    #[tokio::test]
    async fn test_second_super_conflicts() {
        let store = MemoryStore::new();
        store.insert(&Credential::new(Namespace::super_namespace(), Level::Super)).await.unwrap();

        let result = store
            .insert(&Credential::new(Namespace::super_namespace(), Level::Super))
            .await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_admit_pair() {
        let store = MemoryStore::new();
        let read = cred("com.acme", Level::Read);
        let write = cred("com.acme", Level::Write);

        assert_eq!(store.admit_pair(&read, &write).await.unwrap(), Admission::Admitted);
        assert_eq!(store.count().await.unwrap(), 2);

        let sub = (cred("com.acme.sub", Level::Read), cred("com.acme.sub", Level::Write));
        assert_eq!(
            store.admit_pair(&sub.0, &sub.1).await.unwrap(),
            Admission::Conflict("com.acme".to_string())
        );
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_admit_pair_writes_nothing_on_failure() {
        let store = MemoryStore::new();
        let taken = cred("org.example", Level::Read);
        store.insert(&taken).await.unwrap();

        let read = cred("com.acme", Level::Read);
        let mut write = cred("com.acme", Level::Write);
        write.id = taken.id;

        assert!(matches!(
            store.admit_pair(&read, &write).await,
            Err(StorageError::Conflict(_))
        ));
        assert_eq!(store.get_by_id(&read.id).await.unwrap(), None);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rotate_replaces_pair() {
        let store = MemoryStore::new();
        let read = cred("com.acme", Level::Read);
        let write = cred("com.acme", Level::Write);
        store.admit_pair(&read, &write).await.unwrap();

        let next = [read.reissue(), write.reissue()];
        store.rotate("com.acme", &[read.id, write.id], &next).await.unwrap();

        assert_eq!(store.get_by_id(&read.id).await.unwrap(), None);
        assert_eq!(store.get_by_id(&next[0].id).await.unwrap(), Some(next[0].clone()));
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rotate_is_all_or_nothing() {
        let store = MemoryStore::new();
        let read = cred("com.acme", Level::Read);
        let write = cred("com.acme", Level::Write);
        store.admit_pair(&read, &write).await.unwrap();

        // Retiring only the read key leaves no room for a second write key
        let next = [read.reissue(), cred("com.acme", Level::Write)];
        let result = store.rotate("com.acme", &[read.id], &next).await;

        assert!(matches!(result, Err(StorageError::Conflict(_))));
        assert_eq!(store.get_by_id(&read.id).await.unwrap(), Some(read.clone()));
        assert_eq!(store.get_by_id(&next[0].id).await.unwrap(), None);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rotate_rejects_vanished_key() {
        let store = MemoryStore::new();
        let read = cred("com.acme", Level::Read);
        store.insert(&read).await.unwrap();
        store.delete_by_id(&read.id).await.unwrap();

        let result = store.rotate("com.acme", &[read.id], &[read.reissue()]).await;

        assert!(matches!(result, Err(StorageError::Conflict(_))));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
