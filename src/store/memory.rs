use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ConversationStore, MessageStore};
use crate::conversation::{direct_pair_key, Conversation, GroupInfoPatch, MessagePreview, NewGroup};
use crate::error::{AppError, Result};
use crate::message::{HistoryCursor, Message, NewMessage};

type TimelineKey = (DateTime<Utc>, i64);

/// Process-local backend for development and tests.
///
/// Each conversation and message is one dashmap entry; mutating through
/// `get_mut` holds the shard lock, so every update applies to a single document
/// atomically, which is the guarantee the Postgres repositories give per row set.
#[derive(Clone, Default)]
pub struct MemoryStore {
    conversations: Arc<DashMap<Uuid, Conversation>>,
    direct_pairs: Arc<DashMap<(Uuid, Uuid), Uuid>>,
    messages: Arc<DashMap<Uuid, Message>>,
    timelines: Arc<DashMap<Uuid, BTreeMap<TimelineKey, Uuid>>>,
    clock: Arc<Mutex<Option<TimelineKey>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn conversation_not_found() -> AppError {
        AppError::NotFound("Conversation not found".to_string())
    }

    fn message_not_found() -> AppError {
        AppError::NotFound("Message not found".to_string())
    }

    fn mutate_conversation<F>(&self, conversation_id: Uuid, apply: F) -> Result<Conversation>
    where
        F: FnOnce(&mut Conversation),
    {
        let mut entry = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(Self::conversation_not_found)?;
        apply(&mut entry);
        Ok(entry.clone())
    }

    fn mutate_message<F>(&self, message_id: Uuid, apply: F) -> Result<Message>
    where
        F: FnOnce(&mut Message),
    {
        let mut entry = self
            .messages
            .get_mut(&message_id)
            .ok_or_else(Self::message_not_found)?;
        apply(&mut entry);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Next timeline position: timestamps move forward by at least a microsecond
    /// so a timestamp-only cursor never splits a tie.
    fn next_position(last: Option<TimelineKey>) -> TimelineKey {
        let now = Utc::now();
        match last {
            Some((ts, seq)) => {
                let floor = ts + Duration::microseconds(1);
                (now.max(floor), seq + 1)
            }
            None => (now, 1),
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get_or_create_direct(&self, user_a: Uuid, user_b: Uuid) -> Result<(Conversation, bool)> {
        let mut created = false;
        let conversation_id = *self
            .direct_pairs
            .entry(direct_pair_key(user_a, user_b))
            .or_insert_with(|| {
                let conversation = Conversation::new_direct(user_a, user_b, Utc::now());
                let id = conversation.id;
                self.conversations.insert(id, conversation);
                created = true;
                id
            });

        let conversation = self
            .conversations
            .get(&conversation_id)
            .map(|c| c.clone())
            .ok_or_else(Self::conversation_not_found)?;

        Ok((conversation, created))
    }

    async fn insert_group(&self, group: NewGroup) -> Result<Conversation> {
        let conversation = Conversation::new_group(&group, Utc::now());
        self.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn find_by_id(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.conversations.get(&conversation_id).map(|c| c.clone()))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|c| c.is_participant(user_id))
            .map(|c| c.clone())
            .collect();

        conversations.sort_by(|a, b| {
            let a_key = a.last_message_at.unwrap_or(a.updated_at);
            let b_key = b.last_message_at.unwrap_or(b.updated_at);
            b_key.cmp(&a_key)
        });

        Ok(conversations)
    }

    async fn add_participants(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<Conversation> {
        self.mutate_conversation(conversation_id, |conversation| {
            for user_id in user_ids {
                conversation.add_participant(*user_id);
            }
            conversation.updated_at = Utc::now();
        })
    }

    async fn remove_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation> {
        self.mutate_conversation(conversation_id, |conversation| {
            conversation.remove_participant(user_id);
            conversation.updated_at = Utc::now();
        })
    }

    async fn set_admin(&self, conversation_id: Uuid, user_id: Uuid, is_admin: bool) -> Result<Conversation> {
        self.mutate_conversation(conversation_id, |conversation| {
            conversation.set_admin(user_id, is_admin);
            conversation.updated_at = Utc::now();
        })
    }

    async fn update_group_info(&self, conversation_id: Uuid, patch: &GroupInfoPatch) -> Result<Conversation> {
        self.mutate_conversation(conversation_id, |conversation| {
            conversation.apply_group_info(patch);
            conversation.updated_at = Utc::now();
        })
    }

    async fn delete(&self, conversation_id: Uuid) -> Result<()> {
        let (_, conversation) = self
            .conversations
            .remove(&conversation_id)
            .ok_or_else(Self::conversation_not_found)?;

        if !conversation.is_group() {
            let mut pair = conversation.participants.iter().copied();
            if let (Some(user_a), Some(user_b)) = (pair.next(), pair.next()) {
                self.direct_pairs.remove(&direct_pair_key(user_a, user_b));
            }
        }

        if let Some((_, timeline)) = self.timelines.remove(&conversation_id) {
            for message_id in timeline.values() {
                self.messages.remove(message_id);
            }
        }

        Ok(())
    }

    async fn record_message(
        &self,
        conversation_id: Uuid,
        preview: &MessagePreview,
        count_unread: bool,
    ) -> Result<Conversation> {
        self.mutate_conversation(conversation_id, |conversation| {
            conversation.record_message(preview, count_unread);
        })
    }

    async fn reset_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation> {
        self.mutate_conversation(conversation_id, |conversation| {
            conversation.reset_unread(user_id);
        })
    }

    async fn refresh_preview(
        &self,
        conversation_id: Uuid,
        expected: Option<Uuid>,
        preview: Option<&MessagePreview>,
    ) -> Result<Conversation> {
        self.mutate_conversation(conversation_id, |conversation| {
            conversation.replace_preview(expected, preview);
        })
    }

    async fn overwrite_unread(
        &self,
        conversation_id: Uuid,
        counts: &HashMap<Uuid, u32>,
    ) -> Result<Conversation> {
        self.mutate_conversation(conversation_id, |conversation| {
            conversation.overwrite_unread(counts);
        })
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        if !self.conversations.contains_key(&message.conversation_id) {
            return Err(Self::conversation_not_found());
        }

        let mut clock = self.clock.lock().await;
        let (created_at, seq) = Self::next_position(*clock);
        *clock = Some((created_at, seq));

        let stored = Message {
            id: Uuid::new_v4(),
            seq,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            kind: message.kind,
            content: message.content,
            media: message.media,
            reply_to: message.reply_to,
            reactions: HashMap::new(),
            read_by: message.read_by.into_iter().collect(),
            is_deleted: false,
            created_at,
            updated_at: created_at,
        };

        self.messages.insert(stored.id, stored.clone());
        self.timelines
            .entry(stored.conversation_id)
            .or_default()
            .insert(stored.ordering_key(), stored.id);

        Ok(stored)
    }

    async fn find_by_id(&self, message_id: Uuid) -> Result<Option<Message>> {
        Ok(self.messages.get(&message_id).map(|m| m.clone()))
    }

    async fn history(
        &self,
        conversation_id: Uuid,
        cursor: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let Some(timeline) = self.timelines.get(&conversation_id) else {
            return Ok(Vec::new());
        };

        let ids: Vec<Uuid> = match cursor {
            Some(cursor) => timeline
                .range(..cursor.upper_bound())
                .rev()
                .take(limit)
                .map(|(_, id)| *id)
                .collect(),
            None => timeline.values().rev().take(limit).copied().collect(),
        };
        drop(timeline);

        Ok(ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
            .collect())
    }

    async fn list_all(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let ids: Vec<Uuid> = self
            .timelines
            .get(&conversation_id)
            .map(|timeline| timeline.values().copied().collect())
            .unwrap_or_default();

        Ok(ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
            .collect())
    }

    async fn latest_visible(&self, conversation_id: Uuid) -> Result<Option<Message>> {
        let ids: Vec<Uuid> = self
            .timelines
            .get(&conversation_id)
            .map(|timeline| timeline.values().rev().copied().collect())
            .unwrap_or_default();

        Ok(ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
            .find(|m| !m.is_deleted))
    }

    async fn set_reaction(&self, message_id: Uuid, user_id: Uuid, reaction: &str) -> Result<Message> {
        self.mutate_message(message_id, |message| {
            message.reactions.insert(user_id, reaction.to_string());
        })
    }

    async fn clear_reaction(&self, message_id: Uuid, user_id: Uuid) -> Result<Message> {
        self.mutate_message(message_id, |message| {
            message.reactions.remove(&user_id);
        })
    }

    async fn add_read_receipt(&self, message_id: Uuid, user_id: Uuid) -> Result<Message> {
        self.mutate_message(message_id, |message| {
            message.read_by.insert(user_id);
        })
    }

    async fn soft_delete(&self, message_id: Uuid, tombstone: &str) -> Result<Message> {
        self.mutate_message(message_id, |message| {
            message.is_deleted = true;
            message.content = tombstone.to_string();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn text(conversation_id: Uuid, sender_id: Uuid, content: &str) -> NewMessage {
        NewMessage {
            conversation_id,
            sender_id,
            kind: MessageKind::Text,
            content: content.to_string(),
            media: None,
            reply_to: None,
            read_by: Vec::new(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_get_or_create_direct_is_idempotent_under_races() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    store.get_or_create_direct(a, b).await
                } else {
                    store.get_or_create_direct(b, a).await
                }
            }));
        }

        let mut ids = Vec::new();
        let mut creations = 0;
        for handle in handles {
            let (conversation, created) = handle.await.unwrap().unwrap();
            ids.push(conversation.id);
            creations += created as usize;
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(creations, 1);
        assert_eq!(store.list_for_user(a).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_record_message_loses_no_increments() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conversation, _) = store.get_or_create_direct(a, b).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..200_i64 {
            let store = store.clone();
            let sender = if i % 4 == 0 { a } else { b };
            handles.push(tokio::spawn(async move {
                let preview = MessagePreview {
                    message_id: Uuid::new_v4(),
                    preview: format!("m{}", i),
                    sender_id: sender,
                    sent_at: Utc::now(),
                    seq: i,
                };
                store.record_message(conversation.id, &preview, true).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let conversation = ConversationStore::find_by_id(&store, conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.unread_for(b), 50);
        assert_eq!(conversation.unread_for(a), 150);
    }

    #[tokio::test]
    async fn test_out_of_order_record_message_keeps_newest_preview() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conversation, _) = store.get_or_create_direct(a, b).await.unwrap();
        let older = store.insert(text(conversation.id, a, "older")).await.unwrap();
        let newer = store.insert(text(conversation.id, a, "newer")).await.unwrap();

        store.record_message(conversation.id, &newer.to_preview(), true).await.unwrap();
        let after = store.record_message(conversation.id, &older.to_preview(), true).await.unwrap();

        assert_eq!(after.last_message_id, Some(newer.id));
        assert_eq!(after.last_message_preview.as_deref(), Some("newer"));
        assert_eq!(after.unread_for(b), 2);
    }

    #[tokio::test]
    async fn test_refresh_preview_skips_when_cache_moved_on() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conversation, _) = store.get_or_create_direct(a, b).await.unwrap();
        let first = store.insert(text(conversation.id, a, "first")).await.unwrap();
        let deleted = store.insert(text(conversation.id, a, "oops")).await.unwrap();
        let racing = store.insert(text(conversation.id, b, "racing")).await.unwrap();
        store.record_message(conversation.id, &deleted.to_preview(), true).await.unwrap();
        store.record_message(conversation.id, &racing.to_preview(), true).await.unwrap();

        let after = store
            .refresh_preview(conversation.id, Some(deleted.id), Some(&first.to_preview()))
            .await
            .unwrap();

        assert_eq!(after.last_message_id, Some(racing.id));
    }

    #[tokio::test]
    async fn test_history_pages_are_disjoint_and_strictly_older() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conversation, _) = store.get_or_create_direct(a, b).await.unwrap();

        for i in 0..100 {
            store.insert(text(conversation.id, a, &format!("#{}", i))).await.unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        let mut cursor: Option<HistoryCursor> = None;
        let mut pages = 0;
        loop {
            let page = store.history(conversation.id, cursor, 20).await.unwrap();
            if page.is_empty() {
                break;
            }
            assert_eq!(page.len(), 20);
            for window in page.windows(2) {
                assert!(window[0].created_at > window[1].created_at);
            }
            if let Some(previous) = cursor {
                assert!(page.iter().all(|m| m.created_at < previous.before));
            }
            for message in &page {
                assert!(seen.insert(message.id));
            }
            let oldest = page.last().unwrap();
            cursor = Some(HistoryCursor { before: oldest.created_at, before_seq: None });
            pages += 1;
        }

        assert_eq!(pages, 5);
        assert_eq!(seen.len(), 100);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_messages() {
        let store = MemoryStore::new();
        let creator = Uuid::new_v4();
        let group = store
            .insert_group(NewGroup {
                creator_id: creator,
                name: "Trip".into(),
                description: None,
                avatar_url: None,
                member_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
            })
            .await
            .unwrap();
        let message = store.insert(text(group.id, creator, "bye")).await.unwrap();

        ConversationStore::delete(&store, group.id).await.unwrap();

        assert!(ConversationStore::find_by_id(&store, group.id).await.unwrap().is_none());
        assert!(MessageStore::find_by_id(&store, message.id).await.unwrap().is_none());
        assert!(store.insert(text(group.id, creator, "late")).await.is_err());
    }

    #[tokio::test]
    async fn test_latest_visible_skips_tombstones() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conversation, _) = store.get_or_create_direct(a, b).await.unwrap();
        let first = store.insert(text(conversation.id, a, "one")).await.unwrap();
        let second = store.insert(text(conversation.id, b, "two")).await.unwrap();

        store.soft_delete(second.id, "gone").await.unwrap();

        let latest = store.latest_visible(conversation.id).await.unwrap().unwrap();
        assert_eq!(latest.id, first.id);
    }
}
