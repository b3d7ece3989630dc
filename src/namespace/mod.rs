//! Namespace ("vendor prefix") validation and conflict checking
//!
//! A namespace owns every schema whose vendor starts with it, so two
//! namespaces may never stand in a prefix relationship. The comparison is a
//! raw string prefix: `com.foo` and `com.foobar` conflict even though they
//! differ within a dotted segment.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Namespace held by the super credential
pub const SUPER_NAMESPACE: &str = "*";

#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("namespace cannot be empty")]
    Empty,

    #[error("namespace '{0}' contains whitespace or control characters")]
    InvalidCharacter(String),
}

/// A validated namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn parse(name: &str) -> Result<Self, NamespaceError> {
        if name.is_empty() {
            return Err(NamespaceError::Empty);
        }

        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(NamespaceError::InvalidCharacter(name.to_string()));
        }

        Ok(Self(name.to_string()))
    }

    /// The sentinel namespace of the super credential
    pub fn super_namespace() -> Self {
        Self(SUPER_NAMESPACE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if either namespace is a string prefix of the other
    pub fn overlaps(&self, other: &str) -> bool {
        overlaps(&self.0, other)
    }

    /// True if `other` lies in the subtree owned by this namespace
    pub fn covers(&self, other: &str) -> bool {
        other.starts_with(&self.0)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn overlaps(a: &str, b: &str) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Find the first existing namespace that conflicts with `candidate`
pub fn conflicts_with<'a, I>(candidate: &str, existing: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    existing
        .into_iter()
        .map(String::as_str)
        .find(|s| overlaps(candidate, s))
}

/// Whether `candidate` may be admitted next to the `existing` namespaces
pub fn is_admissible<'a, I>(candidate: &str, existing: I) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    conflicts_with(candidate, existing).is_none()
}
