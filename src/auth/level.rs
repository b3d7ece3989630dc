//! Permission levels

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid permission level '{0}': must be read, write or super")]
pub struct LevelError(pub String);

/// Permission level attached to a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Read schemas under the namespace
    Read,
    /// Publish schemas under the namespace
    Write,
    /// Manage keys for every namespace
    Super,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Read => "read",
            Level::Write => "write",
            Level::Super => "super",
        }
    }

    pub fn is_super(&self) -> bool {
        matches!(self, Level::Super)
    }
}

impl FromStr for Level {
    type Err = LevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "read" => Ok(Level::Read),
            "write" => Ok(Level::Write),
            "super" => Ok(Level::Super),
            _ => Err(LevelError(s.to_string())),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
