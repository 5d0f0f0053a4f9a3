//! Shared fixtures for unit tests: an in-memory app with helpers for users,
//! conversations and sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::Claims;
use crate::conversation::{Conversation, GroupInfoPatch, MessagePreview, NewGroup};
use crate::error::{AppError, Result};
use crate::message::MessageDraft;
use crate::state::{AppState, Config, StorageBackend};
use crate::store::{ConversationStore, MemoryStore, MessageStore};
use crate::user::MemoryUserDirectory;
use crate::websocket::types::WsMessage;
use crate::websocket::ConnectionId;

pub const TEST_SECRET: &str = "test-secret";

pub struct TestApp {
    pub state: AppState,
    pub directory: MemoryUserDirectory,
    pub conversations: Arc<dyn ConversationStore>,
}

impl TestApp {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        Self::with_stores(Arc::new(store.clone()), Arc::new(store))
    }

    pub fn with_stores(conversations: Arc<dyn ConversationStore>, messages: Arc<dyn MessageStore>) -> Self {
        let directory = MemoryUserDirectory::new();
        let state = AppState::new(
            Arc::new(Self::config()),
            conversations.clone(),
            messages,
            Arc::new(directory.clone()),
        );
        Self {
            state,
            directory,
            conversations,
        }
    }

    pub fn config() -> Config {
        Config {
            jwt_secret: TEST_SECRET.to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: None,
            database_max_connections: 1,
            storage_backend: StorageBackend::Memory,
            cors_allowed_origins: vec!["http://localhost:3000".to_string()],
            history_default_limit: 50,
            history_max_limit: 100,
        }
    }

    pub fn user(&self, username: &str) -> Uuid {
        self.directory.register(username)
    }

    pub fn token(&self, user_id: Uuid) -> String {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap()
    }

    pub async fn direct(&self, a: Uuid, b: Uuid) -> Uuid {
        self.state
            .conversation_service
            .get_or_create_direct(a, b)
            .await
            .unwrap()
            .id
    }

    /// Creates a group and posts its creation message.
    pub async fn group(&self, creator: Uuid, members: &[Uuid]) -> Uuid {
        let outcome = self
            .state
            .group_service
            .create_group(creator, "Group".to_string(), None, None, members.to_vec())
            .await
            .unwrap();
        self.state.system_notifier.publish(&outcome).await;
        outcome.conversation.id
    }

    pub async fn send_text(&self, sender: Uuid, conversation_id: Uuid, text: &str) -> Uuid {
        self.state
            .message_service
            .send(sender, conversation_id, MessageDraft::text(text))
            .await
            .unwrap()
            .id
    }

    pub async fn find_conversation(&self, conversation_id: Uuid) -> Option<Conversation> {
        self.conversations.find_by_id(conversation_id).await.unwrap()
    }

    pub async fn conversation(&self, conversation_id: Uuid) -> Conversation {
        self.find_conversation(conversation_id)
            .await
            .expect("conversation should exist")
    }

    /// Registers a bare connection for `user_id` without joining any room.
    pub fn socket(&self, user_id: Uuid) -> (ConnectionId, mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (connection_id, _) = self.state.connections.register(user_id, tx);
        (connection_id, rx)
    }

    pub fn drain(rx: &mut mpsc::UnboundedReceiver<WsMessage>) -> Vec<WsMessage> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Memory store whose `record_message` can be switched to fail.
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_record: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_record: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ConversationStore for FlakyStore {
    async fn get_or_create_direct(&self, a: Uuid, b: Uuid) -> Result<(Conversation, bool)> {
        self.inner.get_or_create_direct(a, b).await
    }
    async fn insert_group(&self, group: NewGroup) -> Result<Conversation> {
        self.inner.insert_group(group).await
    }
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Conversation>> {
        ConversationStore::find_by_id(&self.inner, id).await
    }
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.inner.list_for_user(user_id).await
    }
    async fn add_participants(&self, id: Uuid, user_ids: &[Uuid]) -> Result<Conversation> {
        self.inner.add_participants(id, user_ids).await
    }
    async fn remove_participant(&self, id: Uuid, user_id: Uuid) -> Result<Conversation> {
        self.inner.remove_participant(id, user_id).await
    }
    async fn set_admin(&self, id: Uuid, user_id: Uuid, is_admin: bool) -> Result<Conversation> {
        self.inner.set_admin(id, user_id, is_admin).await
    }
    async fn update_group_info(&self, id: Uuid, patch: &GroupInfoPatch) -> Result<Conversation> {
        self.inner.update_group_info(id, patch).await
    }
    async fn delete(&self, id: Uuid) -> Result<()> {
        self.inner.delete(id).await
    }
    async fn record_message(
        &self,
        id: Uuid,
        preview: &MessagePreview,
        count_unread: bool,
    ) -> Result<Conversation> {
        if self.fail_record.load(Ordering::SeqCst) {
            return Err(AppError::Internal("connection reset".to_string()));
        }
        self.inner.record_message(id, preview, count_unread).await
    }
    async fn reset_unread(&self, id: Uuid, user_id: Uuid) -> Result<Conversation> {
        self.inner.reset_unread(id, user_id).await
    }
    async fn refresh_preview(
        &self,
        id: Uuid,
        expected: Option<Uuid>,
        preview: Option<&MessagePreview>,
    ) -> Result<Conversation> {
        self.inner.refresh_preview(id, expected, preview).await
    }
    async fn overwrite_unread(&self, id: Uuid, counts: &HashMap<Uuid, u32>) -> Result<Conversation> {
        self.inner.overwrite_unread(id, counts).await
    }
}
