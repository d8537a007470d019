//! Session model: permission levels and per-workspace bearer tokens.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use cognograph_core::now_millis;

/// Access level granted by a token. Ordered: `Read < Write < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl Permission {
    /// Whether a holder of `self` may perform an operation needing `required`.
    pub fn allows(self, required: Permission) -> bool {
        self >= required
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bearer token for one workspace.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    pub workspace_id: String,
    pub token: String,
    pub permissions: Permission,
    /// Epoch millis
    pub expires_at: u64,
}

// Keeps the bearer string out of logs and panic messages.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("workspace_id", &self.workspace_id)
            .field("token", &"<redacted>")
            .field("permissions", &self.permissions)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl SessionToken {
    pub fn new(
        workspace_id: impl Into<String>,
        token: impl Into<String>,
        permissions: Permission,
        expires_at: u64,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            token: token.into(),
            permissions,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// True once `now` is within `margin_ms` of expiry.
    pub fn needs_refresh(&self, now: u64, margin_ms: u64) -> bool {
        now.saturating_add(margin_ms) >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_ordering() {
        assert!(Permission::Admin.allows(Permission::Write));
        assert!(Permission::Write.allows(Permission::Write));
        assert!(Permission::Write.allows(Permission::Read));
        assert!(!Permission::Read.allows(Permission::Write));
        assert!(!Permission::Write.allows(Permission::Admin));
    }

    #[test]
    fn test_permission_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Permission::Admin).unwrap(), "\"admin\"");
        let p: Permission = serde_json::from_str("\"write\"").unwrap();
        assert_eq!(p, Permission::Write);
    }

    #[test]
    fn test_expiry_and_refresh_window() {
        let token = SessionToken::new("ws", "secret", Permission::Read, 10_000);
        assert!(!token.is_expired(9_999));
        assert!(token.is_expired(10_000));
        assert!(!token.needs_refresh(4_000, 5_000));
        assert!(token.needs_refresh(5_000, 5_000));
    }

    #[test]
    fn test_debug_redacts_bearer() {
        let token = SessionToken::new("ws", "super-secret", Permission::Admin, 0);
        let printed = format!("{token:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("ws"));
    }
}
