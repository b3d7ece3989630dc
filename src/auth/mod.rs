//! Credentials and permission levels
//!
//! Every credential is a random UUID bound to one namespace and one level:
//! - `read`: read schemas under the namespace
//! - `write`: publish schemas under the namespace and inspect its own keys
//! - `super`: manage keys for every namespace (exactly one, seeded at init)

mod credential;
mod level;

pub use credential::{Credential, CredentialId, CredentialRecord, IdError, KeyPair, Requester};
pub use level::{Level, LevelError};
