//! Auth session types shared with the external auth subsystem.
//!
//! Stave does not implement sign-in flows; the host application obtains a
//! [`Session`] from its auth provider and hands it to the sync worker. All
//! entity mutations that stamp a user id require an [`Identity`], which can
//! only be derived from a session — there is no way to construct one from a
//! bare string, so placeholder authors cannot reach the outbox.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Opaque identifier of a remote user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The authenticated user attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    pub email: Option<String>,
}

/// Credentials issued by the auth provider.
///
/// The access token is re-applied to the remote client at the start of every
/// sync cycle, since the provider can rotate it asynchronously.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub user: AuthUser,
}

impl Session {
    /// Whether this session is expired (with clock skew allowance).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_timestamp_now() + EXPIRY_SKEW_SECONDS
    }

    /// The proof-of-authentication required by entity mutations.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user.id.clone(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// A resolved user identity.
///
/// Only obtainable from [`Session::identity`]; the private field keeps
/// callers from minting identities out of arbitrary strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    user_id: UserId,
}

impl Identity {
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

fn unix_timestamp_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
        })
}

#[cfg(test)]
pub(crate) fn test_session(user_id: &str) -> Session {
    Session {
        access_token: "test-access-token".to_string(),
        refresh_token: "test-refresh-token".to_string(),
        expires_at: unix_timestamp_now() + 3600,
        user: AuthUser {
            id: UserId::new(user_id),
            email: Some(format!("{user_id}@example.com")),
        },
    }
}
