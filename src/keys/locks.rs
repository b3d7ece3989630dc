//! Admission and per-namespace locking
//!
//! Issuing a new namespace takes the admission lock exclusively. Mutations
//! of an existing namespace share the admission lock and take a mutex for
//! that namespace only, so different namespaces proceed in parallel.
//!
//! These locks order the callers of one process and bound how long they
//! wait. Atomicity against other processes comes from the store itself.

use crate::storage::StorageError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::timeout;
use tracing::warn;

pub(crate) struct NamespaceLocks {
    admission: RwLock<()>,
    namespaces: DashMap<String, Arc<Mutex<()>>>,
    timeout: Duration,
}

/// Exclusive hold on the namespace set
pub(crate) struct AdmissionGuard<'a> {
    _admission: RwLockWriteGuard<'a, ()>,
}

/// Hold on a single namespace
pub(crate) struct NamespaceGuard<'a> {
    locks: &'a NamespaceLocks,
    namespace: String,
    held: Option<OwnedMutexGuard<()>>,
    _admission: RwLockReadGuard<'a, ()>,
}

impl NamespaceLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            admission: RwLock::new(()),
            namespaces: DashMap::new(),
            timeout,
        }
    }

    pub async fn admission(&self) -> Result<AdmissionGuard<'_>, StorageError> {
        let guard = timeout(self.timeout, self.admission.write())
            .await
            .map_err(|_| {
                warn!("Timed out waiting for admission lock");
                StorageError::Timeout
            })?;

        Ok(AdmissionGuard { _admission: guard })
    }

    pub async fn namespace(&self, namespace: &str) -> Result<NamespaceGuard<'_>, StorageError> {
        let admission = timeout(self.timeout, self.admission.read())
            .await
            .map_err(|_| {
                warn!(namespace, "Timed out waiting for admission lock");
                StorageError::Timeout
            })?;

        let mutex = self
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        // Built before awaiting so the entry is cleaned up on timeout too
        let mut guard = NamespaceGuard {
            locks: self,
            namespace: namespace.to_string(),
            held: None,
            _admission: admission,
        };

        let held = timeout(self.timeout, mutex.lock_owned())
            .await
            .map_err(|_| {
                warn!(namespace, "Timed out waiting for namespace lock");
                StorageError::Timeout
            })?;
        guard.held = Some(held);

        Ok(guard)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.namespaces.len()
    }
}

impl Drop for NamespaceGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        // Only the table still references the mutex: nobody is waiting on it
        self.locks
            .namespaces
            .remove_if(&self.namespace, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
