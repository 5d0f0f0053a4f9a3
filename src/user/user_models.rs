use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Display fields for a user, resolved from the identity service's `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl UserSummary {
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            avatar_url: None,
        }
    }

    /// Placeholder used when the profile has been removed upstream.
    pub fn unknown(id: Uuid) -> Self {
        Self::new(id, "Unknown user")
    }
}
