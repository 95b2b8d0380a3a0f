//! Actor context threaded through every mutation
//!
//! The handler layer resolves `X-Tenant-Id` / `X-User-Id` headers and builds
//! an explicit [`ActorContext`] before calling the core. There is no ambient
//! or thread-local audit state anywhere in the kernel.

use serde::{Deserialize, Serialize};

/// Who performed a mutation, and from where.
///
/// `ip` and `user_agent` are recorded verbatim on version rows for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorContext {
    /// Opaque user identifier from the authentication layer
    pub user: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl ActorContext {
    /// Context with only a user id (background jobs, tests)
    pub fn user(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ip: None,
            user_agent: None,
        }
    }

    /// Full request-scoped context
    pub fn new(
        user: impl Into<String>,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            user: user.into(),
            ip,
            user_agent,
        }
    }
}
