//! Role derivation, priority assignment, and the free-tier quota ledger.
//!
//! Roles are re-derived server-side on every request from the verified
//! tier claim plus the in-memory usage ledger. Quota state is process-local
//! by design; it resets on restart and that loss is an accepted trade, not
//! a bug.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::auth::{RoleClaim, VerifiedIdentity};
use crate::config::FREE_QUOTA_LIMIT;

/// Effective role of a caller for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Free,
    Normal,
}

/// Priority class attached to an EXECUTE command. Smaller is higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Admin = 1,
    FreeTier = 2,
    Standard = 3,
}

impl Priority {
    /// Numeric class, 1..=3.
    #[must_use]
    pub fn class(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::FreeTier => "free-tier",
            Self::Standard => "standard",
        }
    }
}

/// Map an effective role to its priority class.
#[must_use]
pub fn priority_for(role: Role) -> Priority {
    match role {
        Role::Admin => Priority::Admin,
        Role::Free => Priority::FreeTier,
        Role::Normal => Priority::Standard,
    }
}

/// Per-user free-tier usage ledger.
pub struct QuotaPolicy {
    used: Arc<RwLock<HashMap<String, u32>>>,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl QuotaPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            used: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Derive the caller's effective role for this request.
    ///
    /// Admin and normal tiers pass through; a free-tier caller holds the
    /// FREE role while usage is strictly below the limit and presents as
    /// NORMAL once exhausted. The view is pre-increment: the command that
    /// consumes the final quota slot still runs with the FREE role.
    pub async fn derive_role(&self, identity: &VerifiedIdentity) -> Role {
        match identity.role_claim {
            RoleClaim::Admin => Role::Admin,
            RoleClaim::Normal => Role::Normal,
            RoleClaim::Free => {
                if self.used(&identity.user_id).await < FREE_QUOTA_LIMIT {
                    Role::Free
                } else {
                    Role::Normal
                }
            }
        }
    }

    /// Count one accepted EXECUTE against a free-tier user.
    pub async fn increment(&self, user_id: &str) {
        let mut used = self.used.write().await;
        let count = used.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        debug!(user_id = %user_id, used = *count, "Quota incremented");
    }

    /// Remaining free-tier quota, saturating at zero.
    pub async fn remaining(&self, user_id: &str) -> u32 {
        FREE_QUOTA_LIMIT.saturating_sub(self.used(user_id).await)
    }

    async fn used(&self, user_id: &str) -> u32 {
        self.used.read().await.get(user_id).copied().unwrap_or(0)
    }
}
