//! Credential types
//!
//! A credential id is the API key itself: a random 128-bit UUID. Parsing is
//! strict so that malformed keys never reach the store.

use crate::auth::level::Level;
use crate::namespace::Namespace;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("invalid credential id '{0}'")]
pub struct IdError(pub String);

/// Unique identifier of a credential (the API key presented by callers)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(Uuid);

impl CredentialId {
    /// Generate a new random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a caller-supplied key, exactly as given
    pub fn parse(s: &str) -> Result<Self, IdError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| IdError(s.to_string()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for CredentialId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for CredentialId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: CredentialId,
    pub namespace: Namespace,
    pub level: Level,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Create a brand new credential
    pub fn new(namespace: Namespace, level: Level) -> Self {
        let now = Utc::now();
        Self {
            id: CredentialId::generate(),
            namespace,
            level,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the successor of this credential: same namespace and level,
    /// new id, refreshed `updated_at`
    pub fn reissue(&self) -> Self {
        Self {
            id: CredentialId::generate(),
            namespace: self.namespace.clone(),
            level: self.level,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    pub fn record(&self) -> CredentialRecord {
        CredentialRecord::from(self)
    }
}

/// The externally visible view of a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub namespace: String,
    pub id: CredentialId,
    pub level: Level,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Credential> for CredentialRecord {
    fn from(c: &Credential) -> Self {
        Self {
            namespace: c.namespace.to_string(),
            id: c.id,
            level: c.level,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// A freshly issued read/write pair for one namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub read: CredentialRecord,
    pub write: CredentialRecord,
}

/// The identity resolved from a caller's credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub namespace: Namespace,
    pub level: Level,
}

impl Requester {
    pub fn new(namespace: Namespace, level: Level) -> Self {
        Self { namespace, level }
    }

    pub fn is_super(&self) -> bool {
        self.level.is_super()
    }

    /// Whether this requester may inspect the keys of `namespace`
    pub fn may_inspect(&self, namespace: &str) -> bool {
        match self.level {
            Level::Super => true,
            Level::Write => self.namespace.covers(namespace),
            Level::Read => false,
        }
    }
}

impl From<&Credential> for Requester {
    fn from(c: &Credential) -> Self {
        Self::new(c.namespace.clone(), c.level)
    }
}
