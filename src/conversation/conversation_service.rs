use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use super::conversation_dto::ConversationView;
use super::conversation_models::Conversation;
use super::membership::{self, Action, Role};
use crate::error::{AppError, Result};
use crate::store::ConversationStore;
use crate::user::{UserDirectory, UserSummary};
use crate::websocket::types::{ConversationUpdatedPayload, WsMessage};
use crate::websocket::ConnectionManager;

/// Loads a conversation and checks `actor` may perform `action` on it.
///
/// A missing conversation is reported as `NotAuthorized`, the same as one the
/// actor cannot see.
pub async fn load_authorized(
    store: &dyn ConversationStore,
    conversation_id: Uuid,
    actor: Uuid,
    action: Action,
) -> Result<(Conversation, Role)> {
    let conversation = store
        .find_by_id(conversation_id)
        .await?
        .ok_or_else(AppError::not_authorized)?;

    let role = membership::authorize(&conversation, actor, action)?;
    Ok((conversation, role))
}

#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    users: Arc<dyn UserDirectory>,
    connections: ConnectionManager,
}

impl ConversationService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        users: Arc<dyn UserDirectory>,
        connections: ConnectionManager,
    ) -> Self {
        Self {
            store,
            users,
            connections,
        }
    }

    pub async fn get_or_create_direct(&self, actor: Uuid, other: Uuid) -> Result<ConversationView> {
        if actor == other {
            return Err(AppError::SelfConversation);
        }
        if !self.users.exists(other).await? {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        let (conversation, created) = self.store.get_or_create_direct(actor, other).await?;
        if created {
            tracing::info!(
                "Created direct conversation {} between {} and {}",
                conversation.id,
                actor,
                other
            );
            self.connections.send_to_users(
                &[actor, other],
                WsMessage::ConversationUpdated(ConversationUpdatedPayload::from(&conversation)),
            );
        }

        self.render(&conversation, actor).await
    }

    pub async fn list(&self, actor: Uuid) -> Result<Vec<ConversationView>> {
        let conversations = self.store.list_for_user(actor).await?;

        let ids: Vec<Uuid> = conversations
            .iter()
            .flat_map(|c| c.participants.iter().copied())
            .collect();
        let profiles = self.profiles(&ids).await?;

        Ok(conversations
            .iter()
            .map(|c| ConversationView::render(c, actor, &profiles))
            .collect())
    }

    pub async fn detail(&self, actor: Uuid, conversation_id: Uuid) -> Result<ConversationView> {
        let (conversation, _) =
            load_authorized(self.store.as_ref(), conversation_id, actor, Action::Read).await?;
        self.render(&conversation, actor).await
    }

    /// Re-evaluated on every join so membership changes take effect immediately.
    pub async fn can_join_room(&self, actor: Uuid, conversation_id: Uuid) -> Result<bool> {
        Ok(self
            .store
            .find_by_id(conversation_id)
            .await?
            .map(|c| membership::can_join_room(&c, actor))
            .unwrap_or(false))
    }

    /// Ids of every conversation the user currently participates in.
    pub async fn conversation_ids_of(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .store
            .list_for_user(user_id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect())
    }

    pub async fn render(&self, conversation: &Conversation, viewer: Uuid) -> Result<ConversationView> {
        let ids: Vec<Uuid> = conversation.participants.iter().copied().collect();
        let profiles = self.profiles(&ids).await?;
        Ok(ConversationView::render(conversation, viewer, &profiles))
    }

    async fn profiles(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, UserSummary>> {
        let mut unique = ids.to_vec();
        unique.sort();
        unique.dedup();
        self.users.find_profiles(&unique).await
    }
}
