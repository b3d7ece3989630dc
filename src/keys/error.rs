//! Lifecycle errors

use crate::auth::IdError;
use crate::namespace::NamespaceError;
use crate::storage::StorageError;
use thiserror::Error;

/// Every failure a key lifecycle operation can report
#[derive(Debug, Error)]
pub enum KeyError {
    /// The requester's level does not allow the operation
    #[error("not authorized to perform this operation")]
    Unauthorized,

    /// The candidate namespace overlaps one that already holds keys
    #[error("namespace '{candidate}' conflicts with existing namespace '{existing}'")]
    NamespaceConflict { candidate: String, existing: String },

    #[error("no matching API keys found")]
    NotFound,

    #[error("invalid API key identifier '{0}'")]
    InvalidIdentifier(String),

    #[error(transparent)]
    InvalidNamespace(#[from] NamespaceError),

    /// Storage failure; the detail is only available through `source()`
    #[error("internal failure")]
    Internal(#[from] StorageError),
}

impl From<IdError> for KeyError {
    fn from(e: IdError) -> Self {
        KeyError::InvalidIdentifier(e.0)
    }
}

impl KeyError {
    pub fn is_internal(&self) -> bool {
        matches!(self, KeyError::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_internal_display_is_opaque() {
        let err = KeyError::from(StorageError::Database("connection refused on 10.0.0.3".into()));
        assert_eq!(err.to_string(), "internal failure");
        assert!(err.source().unwrap().to_string().contains("connection refused"));
        assert!(err.is_internal());
    }

    #[test]
    fn test_conflict_display() {
        let err = KeyError::NamespaceConflict {
            candidate: "com.acme.sub".into(),
            existing: "com.acme".into(),
        };
        assert_eq!(
            err.to_string(),
            "namespace 'com.acme.sub' conflicts with existing namespace 'com.acme'"
        );
    }

    #[test]
    fn test_from_id_error() {
        let err = KeyError::from(IdError("nope".into()));
        assert!(matches!(err, KeyError::InvalidIdentifier(ref s) if s == "nope"));
    }
}
