//! API key lifecycle
//!
//! `KeyService` issues, regenerates, looks up and deletes credentials. Every
//! mutating operation takes the `Requester` resolved by `authenticate` and
//! checks its level before touching the store:
//!
//! | operation              | required level              |
//! |------------------------|-----------------------------|
//! | issue / regenerate     | super                       |
//! | delete by id/namespace | super                       |
//! | lookup by ids          | super                       |
//! | lookup by namespaces   | write (own subtree) or super |
//! | authenticate           | none                        |

mod config;
mod error;
mod locks;

pub use config::KeysConfig;
pub use error::KeyError;

use crate::auth::{Credential, CredentialId, CredentialRecord, KeyPair, Level, Requester};
use crate::namespace::{Namespace, SUPER_NAMESPACE};
use crate::storage::{Admission, CredentialStore, StorageError};
use locks::NamespaceLocks;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of a regeneration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Regenerated {
    Pair(KeyPair),
    /// The namespace held the super key, which was reissued on its own
    Super(CredentialRecord),
}

/// Credentials currently stored for a non-empty namespace
enum Existing {
    Read(Credential),
    Write(Credential),
    Super(Credential),
    Pair { read: Credential, write: Credential },
}

impl Existing {
    fn classify(namespace: &Namespace, mut found: Vec<Credential>) -> Result<Option<Self>, StorageError> {
        let count = found.len();
        match count {
            0 => return Ok(None),
            1 => {
                let only = found.remove(0);
                return Ok(Some(match only.level {
                    Level::Read => Existing::Read(only),
                    Level::Write => Existing::Write(only),
                    Level::Super => Existing::Super(only),
                }));
            }
            2 => {
                let second = found.remove(1);
                let first = found.remove(0);
                match (first.level, second.level) {
                    (Level::Read, Level::Write) => {
                        return Ok(Some(Existing::Pair { read: first, write: second }))
                    }
                    (Level::Write, Level::Read) => {
                        return Ok(Some(Existing::Pair { read: second, write: first }))
                    }
                    _ => {}
                }
            }
            _ => {}
        }

        error!(namespace = %namespace, count, "Namespace holds an invalid set of credentials");
        Err(StorageError::Conflict(format!(
            "invalid credential set stored for {}",
            namespace
        )))
    }

    fn rotation(self, namespace: &Namespace) -> Rotation {
        match self {
            Existing::Read(old) => Rotation::pair(
                vec![old.id],
                old.reissue(),
                Credential::new(namespace.clone(), Level::Write),
            ),
            Existing::Write(old) => Rotation::pair(
                vec![old.id],
                Credential::new(namespace.clone(), Level::Read),
                old.reissue(),
            ),
            Existing::Super(old) => {
                warn!(namespace = %namespace, "Reissuing the super key through namespace regeneration");
                let next = old.reissue();
                Rotation {
                    retired: vec![old.id],
                    outcome: Regenerated::Super(next.record()),
                    issued: vec![next],
                }
            }
            Existing::Pair { read, write } => {
                Rotation::pair(vec![read.id, write.id], read.reissue(), write.reissue())
            }
        }
    }
}

/// Keys retired and issued by one regeneration, applied in a single store call
struct Rotation {
    retired: Vec<CredentialId>,
    issued: Vec<Credential>,
    outcome: Regenerated,
}

impl Rotation {
    fn pair(retired: Vec<CredentialId>, read: Credential, write: Credential) -> Self {
        Self {
            retired,
            outcome: Regenerated::Pair(pair(&read, &write)),
            issued: vec![read, write],
        }
    }
}

/// The credential lifecycle engine
#[derive(Clone)]
pub struct KeyService {
    store: Arc<dyn CredentialStore>,
    locks: Arc<NamespaceLocks>,
}

impl KeyService {
    pub fn new(store: Arc<dyn CredentialStore>, config: KeysConfig) -> Self {
        Self {
            store,
            locks: Arc::new(NamespaceLocks::new(config.lock_timeout)),
        }
    }

    /// Seed the super key if none exists yet, returning the stored one
    pub async fn seed_super(&self, id: Option<CredentialId>) -> Result<Credential, KeyError> {
        let _admission = self.locks.admission().await?;

        if let Some(existing) = self.store.get_super().await? {
            debug!(id = %existing.id, "Super key already seeded");
            return Ok(existing);
        }

        let mut credential = Credential::new(Namespace::super_namespace(), Level::Super);
        if let Some(id) = id {
            credential.id = id;
        }

        self.store.insert(&credential).await?;
        info!(id = %credential.id, "Seeded super key");
        Ok(credential)
    }

    /// Resolve a caller-supplied key to its namespace and level
    ///
    /// Malformed keys, unknown keys and storage failures all yield `None`.
    pub async fn authenticate(&self, key: &str) -> Option<Requester> {
        let id = CredentialId::parse(key).ok()?;

        match self.store.get_by_id(&id).await {
            Ok(found) => found.as_ref().map(Requester::from),
            Err(e) => {
                error!(error = %e, "Failed to look up API key");
                None
            }
        }
    }

    /// Issue a fresh read/write pair for a namespace that holds no keys yet
    pub async fn issue_read_write(
        &self,
        requester: &Requester,
        namespace: &str,
    ) -> Result<KeyPair, KeyError> {
        require_super(requester, "issue")?;
        let namespace = Namespace::parse(namespace)?;

        self.issue_pair(&namespace).await
    }

    /// Replace the keys of a namespace with new ones
    ///
    /// Missing halves of the pair are issued; a namespace with no keys at
    /// all is treated exactly like `issue_read_write`.
    pub async fn regenerate(
        &self,
        requester: &Requester,
        namespace: &str,
    ) -> Result<Regenerated, KeyError> {
        require_super(requester, "regenerate")?;
        let namespace = Namespace::parse(namespace)?;

        let guard = self.locks.namespace(namespace.as_str()).await?;
        let found = self.store.get_by_namespaces(&single(&namespace)).await?;

        let Some(existing) = Existing::classify(&namespace, found)? else {
            drop(guard);
            return self.issue_pair(&namespace).await.map(Regenerated::Pair);
        };

        let rotation = existing.rotation(&namespace);
        match self
            .store
            .rotate(namespace.as_str(), &rotation.retired, &rotation.issued)
            .await
        {
            Ok(()) => {
                info!(namespace = %namespace, "Regenerated API keys");
                Ok(rotation.outcome)
            }
            Err(e) => {
                error!(namespace = %namespace, error = %e, "Failed to regenerate API keys");
                Err(e.into())
            }
        }
    }

    pub async fn lookup_by_ids<I>(
        &self,
        requester: &Requester,
        ids: I,
    ) -> Result<Vec<CredentialRecord>, KeyError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        require_super(requester, "lookup by id")?;

        let ids = ids
            .into_iter()
            .map(|id| CredentialId::parse(id.as_ref()))
            .collect::<Result<HashSet<_>, _>>()?;

        let found = self.store.get_by_ids(&ids).await?;
        records(found)
    }

    pub async fn lookup_by_namespaces<I>(
        &self,
        requester: &Requester,
        namespaces: I,
    ) -> Result<Vec<CredentialRecord>, KeyError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        // A read key may not inspect even its own namespace
        if !requester.may_inspect(requester.namespace.as_str()) {
            return Err(unauthorized(requester, "lookup by namespace"));
        }

        let mut wanted = HashSet::new();
        for namespace in namespaces {
            let namespace = Namespace::parse(namespace.as_ref())?;
            if !requester.may_inspect(namespace.as_str()) {
                return Err(unauthorized(requester, "lookup by namespace"));
            }
            wanted.insert(namespace.to_string());
        }

        let found = self.store.get_by_namespaces(&wanted).await?;
        records(found)
    }

    /// Delete a single key, returning the number of rows removed
    pub async fn delete_by_id(&self, requester: &Requester, id: &str) -> Result<u64, KeyError> {
        require_super(requester, "delete by id")?;
        let id = CredentialId::parse(id)?;

        let target = self.store.get_by_id(&id).await?.ok_or(KeyError::NotFound)?;
        if target.level.is_super() {
            return Err(unauthorized(requester, "delete super key"));
        }

        let _guard = self.locks.namespace(target.namespace.as_str()).await?;
        match self.store.delete_by_id(&id).await? {
            0 => Err(KeyError::NotFound),
            removed => {
                info!(id = %id, namespace = %target.namespace, "Deleted API key");
                Ok(removed)
            }
        }
    }

    /// Delete every key of a namespace, returning the number of rows removed
    pub async fn delete_by_namespace(
        &self,
        requester: &Requester,
        namespace: &str,
    ) -> Result<u64, KeyError> {
        require_super(requester, "delete by namespace")?;
        let namespace = Namespace::parse(namespace)?;
        if namespace.as_str() == SUPER_NAMESPACE {
            return Err(unauthorized(requester, "delete super key"));
        }

        let _guard = self.locks.namespace(namespace.as_str()).await?;
        match self.store.delete_by_namespace(namespace.as_str()).await? {
            0 => Err(KeyError::NotFound),
            removed => {
                info!(namespace = %namespace, removed, "Deleted API keys");
                Ok(removed)
            }
        }
    }

    /// Total number of stored keys
    pub async fn count(&self) -> Result<u64, KeyError> {
        Ok(self.store.count().await?)
    }

    async fn issue_pair(&self, namespace: &Namespace) -> Result<KeyPair, KeyError> {
        let _admission = self.locks.admission().await?;

        let read = Credential::new(namespace.clone(), Level::Read);
        let write = Credential::new(namespace.clone(), Level::Write);

        match self.store.admit_pair(&read, &write).await {
            Ok(Admission::Admitted) => {
                info!(namespace = %namespace, "Issued API key pair");
                Ok(pair(&read, &write))
            }
            Ok(Admission::Conflict(existing)) => {
                debug!(namespace = %namespace, existing = %existing, "Namespace conflict");
                Err(KeyError::NamespaceConflict {
                    candidate: namespace.to_string(),
                    existing,
                })
            }
            Err(e) => {
                error!(namespace = %namespace, error = %e, "Failed to issue API key pair");
                Err(e.into())
            }
        }
    }
}

fn pair(read: &Credential, write: &Credential) -> KeyPair {
    KeyPair {
        read: read.record(),
        write: write.record(),
    }
}

fn single(namespace: &Namespace) -> HashSet<String> {
    HashSet::from([namespace.to_string()])
}

fn records(found: Vec<Credential>) -> Result<Vec<CredentialRecord>, KeyError> {
    if found.is_empty() {
        return Err(KeyError::NotFound);
    }
    Ok(found.iter().map(Credential::record).collect())
}

fn unauthorized(requester: &Requester, operation: &'static str) -> KeyError {
    warn!(
        namespace = %requester.namespace,
        level = %requester.level,
        operation,
        "Unauthorized API key operation"
    );
    KeyError::Unauthorized
}

fn require_super(requester: &Requester, operation: &'static str) -> Result<(), KeyError> {
    if requester.is_super() {
        Ok(())
    } else {
        Err(unauthorized(requester, operation))
    }
}
