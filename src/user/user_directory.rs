use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

use super::user_models::UserSummary;
use crate::error::Result;

/// Read-only view of the external identity store.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_profile(&self, user_id: Uuid) -> Result<Option<UserSummary>>;

    async fn find_profiles(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, UserSummary>>;

    async fn exists(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.find_profile(user_id).await?.is_some())
    }
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_profile(&self, user_id: Uuid) -> Result<Option<UserSummary>> {
        let user = sqlx::query_as::<_, UserSummary>(
            "SELECT id, username, avatar_url FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_profiles(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, UserSummary>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let users = sqlx::query_as::<_, UserSummary>(
            "SELECT id, username, avatar_url FROM users WHERE id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(users.into_iter().map(|u| (u.id, u)).collect())
    }
}

/// In-process directory used by the memory backend and tests.
#[derive(Clone, Default)]
pub struct MemoryUserDirectory {
    users: Arc<DashMap<Uuid, UserSummary>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserSummary) {
        self.users.insert(user.id, user);
    }

    pub fn register(&self, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.insert(UserSummary::new(id, username));
        id
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_profile(&self, user_id: Uuid) -> Result<Option<UserSummary>> {
        Ok(self.users.get(&user_id).map(|u| u.clone()))
    }

    async fn find_profiles(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, UserSummary>> {
        Ok(user_ids
            .iter()
            .filter_map(|id| self.users.get(id).map(|u| (*id, u.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exists_reflects_registration() {
        let directory = MemoryUserDirectory::new();
        let alice = directory.register("alice");

        assert!(directory.exists(alice).await.unwrap());
        assert!(!directory.exists(Uuid::new_v4()).await.unwrap());
        assert_eq!(directory.find_profile(alice).await.unwrap().unwrap().username, "alice");
    }

    #[tokio::test]
    async fn test_find_profiles_skips_unknown_ids() {
        let directory = MemoryUserDirectory::new();
        let alice = directory.register("alice");
        let bob = directory.register("bob");

        let found = directory
            .find_profiles(&[alice, bob, Uuid::new_v4()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&bob].username, "bob");
    }
}
