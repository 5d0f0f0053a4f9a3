use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }
}

impl std::fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConversationKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(ConversationKind::Direct),
            "group" => Ok(ConversationKind::Group),
            other => Err(AppError::Internal(format!("unknown conversation kind '{}'", other))),
        }
    }
}

/// Per-participant unread counters.
///
/// The key set is kept equal to the participant set by [`Conversation`]; callers
/// only reach it through the increment/reset/insert/remove operations below.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnreadCounts(HashMap<Uuid, u32>);

impl UnreadCounts {
    pub fn get(&self, user_id: &Uuid) -> Option<u32> {
        self.0.get(user_id).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Uuid> {
        self.0.keys()
    }

    fn track(&mut self, user_id: Uuid) {
        self.0.entry(user_id).or_insert(0);
    }

    fn untrack(&mut self, user_id: &Uuid) {
        self.0.remove(user_id);
    }

    /// Adds one to every counter except the sender's.
    fn increment_except(&mut self, sender_id: &Uuid) {
        for (user_id, count) in self.0.iter_mut() {
            if user_id != sender_id {
                *count = count.saturating_add(1);
            }
        }
    }

    fn reset(&mut self, user_id: &Uuid) {
        if let Some(count) = self.0.get_mut(user_id) {
            *count = 0;
        }
    }

    fn set(&mut self, user_id: &Uuid, value: u32) {
        if let Some(count) = self.0.get_mut(user_id) {
            *count = value;
        }
    }
}

/// Denormalized copy of the newest visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePreview {
    pub message_id: Uuid,
    pub preview: String,
    pub sender_id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub seq: i64,
}

impl MessagePreview {
    pub fn ordering_key(&self) -> (DateTime<Utc>, i64) {
        (self.sent_at, self.seq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub participants: BTreeSet<Uuid>,
    pub admins: BTreeSet<Uuid>,
    pub created_by: Option<Uuid>,
    pub group_name: Option<String>,
    pub group_avatar: Option<String>,
    pub group_description: Option<String>,
    pub unread_counts: UnreadCounts,
    pub last_message_id: Option<Uuid>,
    pub last_message_preview: Option<String>,
    pub last_message_sender_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_seq: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new_direct(user_a: Uuid, user_b: Uuid, now: DateTime<Utc>) -> Self {
        let mut conversation = Self::empty(ConversationKind::Direct, now);
        conversation.add_participant(user_a);
        conversation.add_participant(user_b);
        conversation
    }

    pub fn new_group(group: &NewGroup, now: DateTime<Utc>) -> Self {
        let mut conversation = Self::empty(ConversationKind::Group, now);
        conversation.created_by = Some(group.creator_id);
        conversation.group_name = Some(group.name.clone());
        conversation.group_description = group.description.clone();
        conversation.group_avatar = group.avatar_url.clone();
        conversation.add_participant(group.creator_id);
        for member in &group.member_ids {
            conversation.add_participant(*member);
        }
        conversation.admins.insert(group.creator_id);
        conversation
    }

    fn empty(kind: ConversationKind, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            participants: BTreeSet::new(),
            admins: BTreeSet::new(),
            created_by: None,
            group_name: None,
            group_avatar: None,
            group_description: None,
            unread_counts: UnreadCounts::default(),
            last_message_id: None,
            last_message_preview: None,
            last_message_sender_id: None,
            last_message_at: None,
            last_message_seq: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    pub fn is_admin(&self, user_id: Uuid) -> bool {
        self.admins.contains(&user_id)
    }

    pub fn is_creator(&self, user_id: Uuid) -> bool {
        self.created_by == Some(user_id)
    }

    pub fn unread_for(&self, user_id: Uuid) -> u32 {
        self.unread_counts.get(&user_id).unwrap_or(0)
    }

    /// For direct conversations, the participant that is not `user_id`.
    pub fn counterpart(&self, user_id: Uuid) -> Option<Uuid> {
        match self.kind {
            ConversationKind::Direct => self.participants.iter().copied().find(|p| *p != user_id),
            ConversationKind::Group => None,
        }
    }

    pub fn add_participant(&mut self, user_id: Uuid) -> bool {
        let added = self.participants.insert(user_id);
        if added {
            self.unread_counts.track(user_id);
        }
        added
    }

    /// Removes the participant together with their admin flag and counter.
    pub fn remove_participant(&mut self, user_id: Uuid) -> bool {
        let removed = self.participants.remove(&user_id);
        self.admins.remove(&user_id);
        self.unread_counts.untrack(&user_id);
        removed
    }

    pub fn set_admin(&mut self, user_id: Uuid, is_admin: bool) {
        if is_admin && self.is_participant(user_id) {
            self.admins.insert(user_id);
        } else if !is_admin {
            self.admins.remove(&user_id);
        }
    }

    pub fn apply_group_info(&mut self, patch: &GroupInfoPatch) {
        if let Some(name) = &patch.name {
            self.group_name = Some(name.clone());
        }
        if let Some(description) = &patch.description {
            self.group_description = Some(description.clone());
        }
        if let Some(avatar) = &patch.avatar_url {
            self.group_avatar = Some(avatar.clone());
        }
    }

    /// Bumps every other participant's counter when `count_unread` is set, and
    /// moves the preview forward if `preview` is newer than the cached one. A
    /// late write for an older message leaves the preview alone. Callers hold
    /// the document lock for the whole call.
    pub fn record_message(&mut self, preview: &MessagePreview, count_unread: bool) {
        if self.is_newer_than_cached(preview) {
            self.set_preview(Some(preview));
        }
        if count_unread {
            self.unread_counts.increment_except(&preview.sender_id);
        }
    }

    fn is_newer_than_cached(&self, preview: &MessagePreview) -> bool {
        match self.last_message_at {
            Some(at) => preview.ordering_key() > (at, self.last_message_seq.unwrap_or(0)),
            None => true,
        }
    }

    /// Replaces the preview only while the cached message is still `expected`.
    /// Returns whether the write applied.
    pub fn replace_preview(&mut self, expected: Option<Uuid>, preview: Option<&MessagePreview>) -> bool {
        if self.last_message_id != expected {
            return false;
        }
        self.set_preview(preview);
        true
    }

    fn set_preview(&mut self, preview: Option<&MessagePreview>) {
        self.last_message_id = preview.map(|p| p.message_id);
        self.last_message_preview = preview.map(|p| p.preview.clone());
        self.last_message_sender_id = preview.map(|p| p.sender_id);
        self.last_message_at = preview.map(|p| p.sent_at);
        self.last_message_seq = preview.map(|p| p.seq);
        if let Some(p) = preview {
            self.updated_at = self.updated_at.max(p.sent_at);
        }
    }

    pub fn reset_unread(&mut self, user_id: Uuid) {
        self.unread_counts.reset(&user_id);
    }

    /// Replaces counters for current participants; unknown keys are ignored and
    /// participants missing from `counts` fall back to zero.
    pub fn overwrite_unread(&mut self, counts: &HashMap<Uuid, u32>) {
        let participants: Vec<Uuid> = self.participants.iter().copied().collect();
        for user_id in participants {
            self.unread_counts.set(&user_id, counts.get(&user_id).copied().unwrap_or(0));
        }
    }

    /// Checks the structural invariants of the document.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let keys: BTreeSet<Uuid> = self.unread_counts.keys().copied().collect();
        if keys != self.participants {
            return Err("unread counter keys differ from participants".into());
        }
        if !self.admins.is_subset(&self.participants) {
            return Err("admins are not a subset of participants".into());
        }
        match self.kind {
            ConversationKind::Direct if self.participants.len() != 2 => {
                Err("direct conversation must have exactly two participants".into())
            }
            ConversationKind::Group => match self.created_by {
                Some(creator) if self.is_participant(creator) && self.is_admin(creator) => Ok(()),
                _ => Err("group creator must be a participant and an admin".into()),
            },
            _ => Ok(()),
        }
    }
}

/// Canonical key for the unordered pair of a direct conversation.
pub fn direct_pair_key(user_a: Uuid, user_b: Uuid) -> (Uuid, Uuid) {
    if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    }
}

#[derive(Debug, Clone)]
pub struct NewGroup {
    pub creator_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    /// Members other than the creator.
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupInfoPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

impl GroupInfoPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.avatar_url.is_none()
    }
}

/// Row shape of the `conversations` table.
#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: Uuid,
    pub kind: String,
    pub created_by: Option<Uuid>,
    pub group_name: Option<String>,
    pub group_avatar: Option<String>,
    pub group_description: Option<String>,
    pub last_message_id: Option<Uuid>,
    pub last_message_preview: Option<String>,
    pub last_message_sender_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_seq: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row shape of the `conversation_participants` table.
#[derive(Debug, Clone, FromRow)]
pub struct ParticipantRow {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub is_admin: bool,
    pub unread_count: i32,
}

impl ConversationRow {
    pub fn into_conversation(self, participants: &[ParticipantRow]) -> Result<Conversation> {
        let mut conversation = Conversation {
            id: self.id,
            kind: self.kind.parse()?,
            participants: BTreeSet::new(),
            admins: BTreeSet::new(),
            created_by: self.created_by,
            group_name: self.group_name,
            group_avatar: self.group_avatar,
            group_description: self.group_description,
            unread_counts: UnreadCounts::default(),
            last_message_id: self.last_message_id,
            last_message_preview: self.last_message_preview,
            last_message_sender_id: self.last_message_sender_id,
            last_message_at: self.last_message_at,
            last_message_seq: self.last_message_seq,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };

        let conversation_id = conversation.id;
        let mut counts = HashMap::new();
        for row in participants.iter().filter(|p| p.conversation_id == conversation_id) {
            conversation.add_participant(row.user_id);
            if row.is_admin {
                conversation.admins.insert(row.user_id);
            }
            counts.insert(row.user_id, row.unread_count.max(0) as u32);
        }
        conversation.overwrite_unread(&counts);

        Ok(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_of(creator: Uuid, members: &[Uuid]) -> Conversation {
        Conversation::new_group(
            &NewGroup {
                creator_id: creator,
                name: "Weekend".into(),
                description: None,
                avatar_url: None,
                member_ids: members.to_vec(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_direct_conversation_starts_with_zeroed_counters() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = Conversation::new_direct(a, b, Utc::now());

        assert_eq!(conversation.unread_for(a), 0);
        assert_eq!(conversation.unread_for(b), 0);
        assert_eq!(conversation.counterpart(a), Some(b));
        assert!(conversation.check_invariants().is_ok());
    }

    #[test]
    fn test_record_message_skips_sender() {
        let (c, d, e) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut conversation = group_of(c, &[d, e]);
        let preview = MessagePreview {
            message_id: Uuid::new_v4(),
            preview: "hi".into(),
            sender_id: d,
            sent_at: Utc::now(),
            seq: 1,
        };

        conversation.record_message(&preview, true);
        conversation.record_message(&preview, true);

        assert_eq!(conversation.unread_for(c), 2);
        assert_eq!(conversation.unread_for(d), 0);
        assert_eq!(conversation.unread_for(e), 2);
        assert_eq!(conversation.last_message_preview.as_deref(), Some("hi"));

        conversation.record_message(&preview, false);
        assert_eq!(conversation.unread_for(c), 2);
    }

    #[test]
    fn test_late_record_message_keeps_newer_preview() {
        let (c, d, e) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut conversation = group_of(c, &[d, e]);
        let sent_at = Utc::now();
        let older = MessagePreview {
            message_id: Uuid::new_v4(),
            preview: "older".into(),
            sender_id: d,
            sent_at,
            seq: 7,
        };
        let newer = MessagePreview {
            message_id: Uuid::new_v4(),
            preview: "newer".into(),
            sender_id: e,
            sent_at,
            seq: 8,
        };

        conversation.record_message(&newer, true);
        conversation.record_message(&older, true);

        assert_eq!(conversation.last_message_id, Some(newer.message_id));
        assert_eq!(conversation.last_message_preview.as_deref(), Some("newer"));
        assert_eq!(conversation.last_message_seq, Some(8));
        assert_eq!(conversation.unread_for(c), 2);
        assert_eq!(conversation.unread_for(d), 1);
        assert_eq!(conversation.unread_for(e), 1);
    }

    #[test]
    fn test_replace_preview_requires_expected_message() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut conversation = Conversation::new_direct(a, b, Utc::now());
        let deleted = MessagePreview {
            message_id: Uuid::new_v4(),
            preview: "oops".into(),
            sender_id: a,
            sent_at: Utc::now(),
            seq: 1,
        };
        let fresh = MessagePreview {
            message_id: Uuid::new_v4(),
            preview: "fresh".into(),
            sender_id: b,
            sent_at: deleted.sent_at,
            seq: 2,
        };
        conversation.record_message(&deleted, false);
        conversation.record_message(&fresh, false);

        assert!(!conversation.replace_preview(Some(deleted.message_id), None));
        assert_eq!(conversation.last_message_id, Some(fresh.message_id));

        assert!(conversation.replace_preview(Some(fresh.message_id), None));
        assert_eq!(conversation.last_message_id, None);
        assert_eq!(conversation.last_message_seq, None);
    }

    #[test]
    fn test_removing_participant_drops_admin_and_counter() {
        let (c, d, e) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut conversation = group_of(c, &[d, e]);
        conversation.set_admin(d, true);

        assert!(conversation.remove_participant(d));
        assert!(!conversation.is_admin(d));
        assert_eq!(conversation.unread_counts.get(&d), None);
        assert!(conversation.check_invariants().is_ok());
    }

    #[test]
    fn test_set_admin_ignores_non_participants() {
        let (c, d, e) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut conversation = group_of(c, &[d, e]);
        let outsider = Uuid::new_v4();

        conversation.set_admin(outsider, true);
        assert!(!conversation.is_admin(outsider));
        assert!(conversation.check_invariants().is_ok());
    }

    #[test]
    fn test_overwrite_unread_keeps_key_set() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut conversation = Conversation::new_direct(a, b, Utc::now());
        let stranger = Uuid::new_v4();

        conversation.overwrite_unread(&HashMap::from([(b, 4), (stranger, 9)]));

        assert_eq!(conversation.unread_for(a), 0);
        assert_eq!(conversation.unread_for(b), 4);
        assert_eq!(conversation.unread_counts.get(&stranger), None);
    }

    #[test]
    fn test_row_keeps_only_its_own_participants() {
        let now = Utc::now();
        let (c, d, stranger) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let row = ConversationRow {
            id: Uuid::new_v4(),
            kind: "group".into(),
            created_by: Some(c),
            group_name: Some("Trip".into()),
            group_avatar: None,
            group_description: None,
            last_message_id: None,
            last_message_preview: None,
            last_message_sender_id: None,
            last_message_at: None,
            last_message_seq: None,
            created_at: now,
            updated_at: now,
        };
        let id = row.id;
        let participants = [
            ParticipantRow { conversation_id: id, user_id: c, is_admin: true, unread_count: 0 },
            ParticipantRow { conversation_id: id, user_id: d, is_admin: false, unread_count: 3 },
            ParticipantRow { conversation_id: Uuid::new_v4(), user_id: stranger, is_admin: true, unread_count: 9 },
        ];

        let conversation = row.into_conversation(&participants).unwrap();

        assert_eq!(conversation.participants, BTreeSet::from([c, d]));
        assert!(conversation.is_admin(c));
        assert_eq!(conversation.unread_for(d), 3);
        assert!(conversation.check_invariants().is_ok());
    }

    #[test]
    fn test_direct_pair_key_is_order_independent() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(direct_pair_key(a, b), direct_pair_key(b, a));
    }
}
