//! User reference - the display fields needed to render a user

use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// Weak reference to a user owned by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl UserRef {
    /// Create a new UserRef
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }

    /// Placeholder used when a join arrives without display fields
    pub fn anonymous(id: UserId) -> Self {
        let display_name = id.to_string();
        Self {
            id,
            display_name,
            avatar_ref: None,
        }
    }

    /// Set the avatar reference
    #[must_use]
    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = Some(avatar_ref.into());
        self
    }
}
