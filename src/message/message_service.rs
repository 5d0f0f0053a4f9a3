use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::message_models::{
    HistoryCursor, Message, MessageDraft, MessageKind, MessageView, NewMessage, ReplyPreview, TOMBSTONE,
};
use crate::conversation::conversation_service::load_authorized;
use crate::conversation::{Action, Conversation};
use crate::error::{AppError, Result};
use crate::store::{ConversationStore, MessageStore};
use crate::user::{UserDirectory, UserSummary};
use crate::websocket::types::{MessageDeletedPayload, ReactionUpdatedPayload, SeenPayload, WsMessage};
use crate::websocket::ConnectionManager;

const MAX_REACTION_CHARS: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct HistoryLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl HistoryLimits {
    pub fn clamp(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).clamp(1, self.max_limit)
    }
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 100,
        }
    }
}

/// Authorize, persist, update the conversation, broadcast.
#[derive(Clone)]
pub struct MessageService {
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserDirectory>,
    ws_manager: ConnectionManager,
    limits: HistoryLimits,
}

impl MessageService {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserDirectory>,
        ws_manager: ConnectionManager,
        limits: HistoryLimits,
    ) -> Self {
        Self {
            conversations,
            messages,
            users,
            ws_manager,
            limits,
        }
    }

    pub async fn send(&self, actor: Uuid, conversation_id: Uuid, draft: MessageDraft) -> Result<MessageView> {
        let (conversation, _) =
            load_authorized(self.conversations.as_ref(), conversation_id, actor, Action::Send).await?;

        if !draft.has_body() {
            return Err(AppError::Validation(
                "Message content is required unless media is attached".to_string(),
            ));
        }
        if let Some(reply_to) = draft.reply_to {
            let target = self.messages.find_by_id(reply_to).await?;
            if target.map(|m| m.conversation_id) != Some(conversation.id) {
                return Err(AppError::Validation(
                    "Reply target is not part of this conversation".to_string(),
                ));
            }
        }

        self.deliver(&conversation, actor, draft, Vec::new()).await
    }

    /// Posts a server-generated message. Callers have already authorized the
    /// operation that produced it; `author` may no longer be a participant.
    pub async fn post_system_message(
        &self,
        conversation_id: Uuid,
        author: Uuid,
        content: String,
        read_by: Vec<Uuid>,
    ) -> Result<MessageView> {
        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

        self.deliver(&conversation, author, MessageDraft::system(content), read_by)
            .await
    }

    async fn deliver(
        &self,
        conversation: &Conversation,
        sender_id: Uuid,
        draft: MessageDraft,
        read_by: Vec<Uuid>,
    ) -> Result<MessageView> {
        let message = self
            .messages
            .insert(NewMessage {
                conversation_id: conversation.id,
                sender_id,
                kind: draft.kind,
                content: draft.content,
                media: draft.media,
                reply_to: draft.reply_to,
                read_by,
            })
            .await?;

        let count_unread = message.kind != MessageKind::System;
        if let Err(e) = self
            .conversations
            .record_message(conversation.id, &message.to_preview(), count_unread)
            .await
        {
            tracing::error!(
                "Message {} persisted but conversation {} was not updated: {:?}",
                message.id,
                conversation.id,
                e
            );
            return Err(AppError::DeliveryIncomplete { message_id: message.id });
        }

        let view = self.render(message).await?;
        self.ws_manager
            .broadcast_room(conversation.id, WsMessage::NewMessage(view.clone()), None);

        Ok(view)
    }

    /// Newest-first page of history, tombstones included.
    pub async fn history(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        cursor: Option<HistoryCursor>,
        limit: Option<usize>,
    ) -> Result<Vec<MessageView>> {
        load_authorized(self.conversations.as_ref(), conversation_id, actor, Action::Read).await?;

        let messages = self
            .messages
            .history(conversation_id, cursor, self.limits.clamp(limit))
            .await?;

        self.render_many(messages).await
    }

    pub async fn mark_seen(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        message_id: Option<Uuid>,
    ) -> Result<SeenPayload> {
        load_authorized(self.conversations.as_ref(), conversation_id, actor, Action::Read).await?;

        let newest = self
            .messages
            .history(conversation_id, None, 1)
            .await?
            .first()
            .map(|m| m.id);

        let target = match message_id {
            Some(id) => {
                let message = self
                    .messages
                    .find_by_id(id)
                    .await?
                    .filter(|m| m.conversation_id == conversation_id)
                    .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;
                Some(message.id)
            }
            None => newest,
        };

        if let Some(id) = target {
            self.messages.add_read_receipt(id, actor).await?;
        }
        // The counter drops to zero, so the reconcile watermark moves to the newest message too.
        if let Some(id) = newest.filter(|id| Some(*id) != target) {
            self.messages.add_read_receipt(id, actor).await?;
        }
        self.conversations.reset_unread(conversation_id, actor).await?;

        let receipt = SeenPayload {
            conversation_id,
            user_id: actor,
            message_id: target,
            seen_at: Utc::now(),
        };
        self.ws_manager.broadcast_room(
            conversation_id,
            WsMessage::MessagesSeen(receipt.clone()),
            Some(actor),
        );

        Ok(receipt)
    }

    pub async fn set_reaction(&self, actor: Uuid, message_id: Uuid, reaction: &str) -> Result<MessageView> {
        let reaction = reaction.trim();
        let length = reaction.chars().count();
        if length == 0 || length > MAX_REACTION_CHARS {
            return Err(AppError::Validation(format!(
                "Reaction must be between 1 and {} characters",
                MAX_REACTION_CHARS
            )));
        }

        let message = self.load_for_participant(actor, message_id).await?;
        if message.is_deleted {
            return Err(AppError::StateConflict(
                "Cannot react to a deleted message".to_string(),
            ));
        }

        let updated = self.messages.set_reaction(message.id, actor, reaction).await?;
        self.publish_reactions(&updated, actor);
        self.render(updated).await
    }

    pub async fn clear_reaction(&self, actor: Uuid, message_id: Uuid) -> Result<MessageView> {
        let message = self.load_for_participant(actor, message_id).await?;

        let updated = self.messages.clear_reaction(message.id, actor).await?;
        self.publish_reactions(&updated, actor);
        self.render(updated).await
    }

    fn publish_reactions(&self, message: &Message, actor: Uuid) {
        self.ws_manager.broadcast_room(
            message.conversation_id,
            WsMessage::ReactionUpdated(ReactionUpdatedPayload {
                conversation_id: message.conversation_id,
                message_id: message.id,
                user_id: actor,
                reaction: message.reactions.get(&actor).cloned(),
                reactions: message.reactions.clone(),
            }),
            None,
        );
    }

    /// Soft-deletes a message. Only its sender may do this.
    pub async fn delete_message(&self, actor: Uuid, message_id: Uuid) -> Result<MessageView> {
        let message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(AppError::not_authorized)?;

        if message.sender_id != actor {
            tracing::debug!("User {} tried to delete message {} they did not send", actor, message_id);
            return Err(AppError::not_authorized());
        }
        if message.kind == MessageKind::System {
            return Err(AppError::StateConflict(
                "System messages cannot be deleted".to_string(),
            ));
        }

        let deleted = self.messages.soft_delete(message.id, TOMBSTONE).await?;

        let conversation = self.conversations.find_by_id(deleted.conversation_id).await?;
        if conversation.and_then(|c| c.last_message_id) == Some(deleted.id) {
            let latest = self.messages.latest_visible(deleted.conversation_id).await?;
            self.conversations
                .refresh_preview(
                    deleted.conversation_id,
                    Some(deleted.id),
                    latest.map(|m| m.to_preview()).as_ref(),
                )
                .await?;
        }

        self.ws_manager.broadcast_room(
            deleted.conversation_id,
            WsMessage::MessageDeleted(MessageDeletedPayload {
                conversation_id: deleted.conversation_id,
                message_id: deleted.id,
                content: TOMBSTONE.to_string(),
            }),
            None,
        );

        self.render(deleted).await
    }

    /// Recomputes unread counters and the preview from history.
    ///
    /// A participant's count is the number of non-system messages from others
    /// after the newest message carrying their read receipt.
    pub async fn reconcile(&self, actor: Uuid, conversation_id: Uuid) -> Result<Conversation> {
        let (conversation, _) =
            load_authorized(self.conversations.as_ref(), conversation_id, actor, Action::Read).await?;

        let history = self.messages.list_all(conversation_id).await?;
        let counts = unread_from_history(&conversation, &history);

        self.conversations.overwrite_unread(conversation_id, &counts).await?;

        let latest = history.iter().rev().find(|m| !m.is_deleted);
        let reconciled = self
            .conversations
            .refresh_preview(
                conversation_id,
                conversation.last_message_id,
                latest.map(|m| m.to_preview()).as_ref(),
            )
            .await?;

        tracing::info!("Reconciled conversation {} for {}", conversation_id, actor);
        Ok(reconciled)
    }

    async fn load_for_participant(&self, actor: Uuid, message_id: Uuid) -> Result<Message> {
        let message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(AppError::not_authorized)?;

        load_authorized(
            self.conversations.as_ref(),
            message.conversation_id,
            actor,
            Action::Read,
        )
        .await?;

        Ok(message)
    }

    pub async fn render(&self, message: Message) -> Result<MessageView> {
        self.render_many(vec![message])
            .await?
            .pop()
            .ok_or_else(|| AppError::Internal("message render produced no view".to_string()))
    }

    /// Resolves sender and reply display fields for a batch, preserving order.
    pub async fn render_many(&self, messages: Vec<Message>) -> Result<Vec<MessageView>> {
        let mut replies: HashMap<Uuid, Message> = HashMap::new();
        for reply_id in messages.iter().filter_map(|m| m.reply_to) {
            if replies.contains_key(&reply_id) {
                continue;
            }
            if let Some(target) = self.messages.find_by_id(reply_id).await? {
                replies.insert(reply_id, target);
            }
        }

        let user_ids: Vec<Uuid> = messages
            .iter()
            .map(|m| m.sender_id)
            .chain(replies.values().map(|m| m.sender_id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let profiles = self.users.find_profiles(&user_ids).await?;
        let profile = |id: Uuid| {
            profiles
                .get(&id)
                .cloned()
                .unwrap_or_else(|| UserSummary::unknown(id))
        };

        Ok(messages
            .into_iter()
            .map(|message| {
                let reply = message
                    .reply_to
                    .and_then(|id| replies.get(&id))
                    .map(|target| ReplyPreview::render(target, profile(target.sender_id)));
                let sender = profile(message.sender_id);
                MessageView::render(message, sender, reply)
            })
            .collect())
    }
}

fn unread_from_history(conversation: &Conversation, history: &[Message]) -> HashMap<Uuid, u32> {
    conversation
        .participants
        .iter()
        .map(|participant| {
            let watermark = history
                .iter()
                .rposition(|m| m.read_by.contains(participant))
                .map(|i| i + 1)
                .unwrap_or(0);
            let unread = history[watermark..]
                .iter()
                .filter(|m| m.counts_as_unread_for(*participant))
                .count();
            (*participant, u32::try_from(unread).unwrap_or(u32::MAX))
        })
        .collect()
}
