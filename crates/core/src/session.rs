//! Authenticated identity for the cloud medium.

use serde::{Deserialize, Serialize};

/// A signed-in user session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Row-addressing identity (owner of every cloud row)
    pub user_id: String,
    /// Bearer token sent to the remote store
    pub access_token: String,
}

impl Session {
    /// Create a session.
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}
