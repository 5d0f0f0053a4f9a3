//! Persistence seams for conversations and messages.
//!
//! Every mutating operation is a single-document update: either it applies
//! completely to one conversation (or one message) or not at all. Nothing here
//! spans documents, so callers re-check authorization before each call.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::conversation::{Conversation, GroupInfoPatch, MessagePreview, NewGroup};
use crate::error::Result;
use crate::message::{HistoryCursor, Message, NewMessage};

pub use memory::MemoryStore;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Returns the unique direct conversation for the pair, creating it when
    /// absent. The flag is `true` when this call created it.
    async fn get_or_create_direct(&self, user_a: Uuid, user_b: Uuid) -> Result<(Conversation, bool)>;

    async fn insert_group(&self, group: NewGroup) -> Result<Conversation>;

    async fn find_by_id(&self, conversation_id: Uuid) -> Result<Option<Conversation>>;

    /// Conversations the user currently participates in, most recent first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>>;

    /// Adds participants with zeroed counters. Existing participants are left alone.
    async fn add_participants(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<Conversation>;

    /// Removes the participant, their admin flag and their counter.
    async fn remove_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation>;

    async fn set_admin(&self, conversation_id: Uuid, user_id: Uuid, is_admin: bool) -> Result<Conversation>;

    async fn update_group_info(&self, conversation_id: Uuid, patch: &GroupInfoPatch) -> Result<Conversation>;

    /// Deletes the conversation and all of its messages.
    async fn delete(&self, conversation_id: Uuid) -> Result<()>;

    /// When `count_unread` is set, adds one to every counter except the sender's.
    /// The preview moves only forward in `(sent_at, seq)` order. Both parts are
    /// one atomic update.
    async fn record_message(
        &self,
        conversation_id: Uuid,
        preview: &MessagePreview,
        count_unread: bool,
    ) -> Result<Conversation>;

    async fn reset_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation>;

    /// Compare-and-set on the preview: writes `preview` only while the cached
    /// `last_message_id` still equals `expected`. Returns the conversation either way.
    async fn refresh_preview(
        &self,
        conversation_id: Uuid,
        expected: Option<Uuid>,
        preview: Option<&MessagePreview>,
    ) -> Result<Conversation>;

    /// Overwrites counters for current participants. Reconciliation only.
    async fn overwrite_unread(
        &self,
        conversation_id: Uuid,
        counts: &HashMap<Uuid, u32>,
    ) -> Result<Conversation>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists the message, assigning a strictly increasing `(created_at, seq)`.
    async fn insert(&self, message: NewMessage) -> Result<Message>;

    async fn find_by_id(&self, message_id: Uuid) -> Result<Option<Message>>;

    /// Newest-first page of messages strictly older than `cursor`.
    async fn history(
        &self,
        conversation_id: Uuid,
        cursor: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// Every message of the conversation in timeline order.
    async fn list_all(&self, conversation_id: Uuid) -> Result<Vec<Message>>;

    async fn latest_visible(&self, conversation_id: Uuid) -> Result<Option<Message>>;

    async fn set_reaction(&self, message_id: Uuid, user_id: Uuid, reaction: &str) -> Result<Message>;

    async fn clear_reaction(&self, message_id: Uuid, user_id: Uuid) -> Result<Message>;

    async fn add_read_receipt(&self, message_id: Uuid, user_id: Uuid) -> Result<Message>;

    async fn soft_delete(&self, message_id: Uuid, tombstone: &str) -> Result<Message>;
}
