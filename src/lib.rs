//! Registry keys - scoped API keys for a schema registry
//!
//! Issues, authenticates and revokes the read/write keys that gate access to
//! a vendor namespace, plus the single super key that manages them.

pub mod auth;
pub mod gateway;
pub mod keys;
pub mod namespace;
pub mod storage;

pub use auth::{Credential, CredentialId, CredentialRecord, KeyPair, Level, Requester};
pub use gateway::{Body, Gateway, Request, Response, Status};
pub use keys::{KeyError, KeyService, KeysConfig, Regenerated};
pub use namespace::Namespace;
