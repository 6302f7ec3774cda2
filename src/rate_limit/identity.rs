//! Rate-limit partition keys.

use sha2::{Digest, Sha256};
use std::fmt;

/// Who a request is counted against.
///
/// Authenticated callers are keyed by user id; anonymous callers by a truncated SHA-256 of
/// their client address, so raw addresses never reach the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    User(String),
    Client(String),
}

impl IdentityKey {
    pub fn user(id: impl Into<String>) -> Self {
        IdentityKey::User(id.into())
    }

    /// Key an anonymous caller by the first 16 hex digits of SHA-256(`addr`).
    pub fn client_addr(addr: &str) -> Self {
        let digest = Sha256::digest(addr.as_bytes());
        let mut hashed = hex::encode(digest);
        hashed.truncate(16);
        IdentityKey::Client(hashed)
    }

    /// Prefer the user id; fall back to the hashed address (or `"unknown"` without one).
    pub fn resolve(user_id: Option<&str>, client_addr: Option<&str>) -> Self {
        match user_id.filter(|id| !id.is_empty()) {
            Some(id) => IdentityKey::user(id),
            None => IdentityKey::client_addr(client_addr.unwrap_or("unknown")),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::User(id) => write!(f, "user:{id}"),
            IdentityKey::Client(hash) => write!(f, "ip:{hash}"),
        }
    }
}
