use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// The authenticated caller attached to every inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub permissions: HashSet<String>,
}

impl Principal {
    pub fn new<S>(user_id: S, permissions: impl IntoIterator<Item = S>) -> Self
    where
        S: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Any-of check used by the tool registry's permission gate.
    pub fn has_any_permission<'a>(
        &self,
        required: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        required.into_iter().any(|p| self.permissions.contains(p))
    }
}
