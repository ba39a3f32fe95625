use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Used when a request carries no usable remote address.
pub const FALLBACK_ADDR: &str = "127.0.0.1";

/// The stable key under which answers are deduplicated. Exactly one of the
/// two variants applies to a request; an authenticated user never falls back
/// to their network origin.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContributorIdentity {
    Authenticated(UserId),
    /// Anonymous contributors are keyed by remote address. Known limitation
    /// carried over from the original system: contributors behind a shared
    /// network collide, and a contributor whose address changes between
    /// requests is treated as a new identity.
    Anonymous(String),
}

impl ContributorIdentity {
    /// Flat storage key, also the second half of the unique
    /// `(task, contributor)` constraint.
    pub fn key(&self) -> String {
        match self {
            ContributorIdentity::Authenticated(user) => format!("user:{}", user.as_str()),
            ContributorIdentity::Anonymous(addr) => format!("ip:{addr}"),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, ContributorIdentity::Anonymous(_))
    }
}

/// Resolve the contributor identity for a request. Authenticated identity
/// always takes precedence over network origin.
pub fn resolve_identity(user: Option<UserId>, remote_addr: Option<&str>) -> ContributorIdentity {
    match user {
        Some(user) => ContributorIdentity::Authenticated(user),
        None => ContributorIdentity::Anonymous(
            remote_addr.unwrap_or(FALLBACK_ADDR).to_string(),
        ),
    }
}
