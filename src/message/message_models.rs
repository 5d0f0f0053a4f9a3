use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::conversation::MessagePreview;
use crate::error::{AppError, Result};
use crate::user::UserSummary;

/// Content shown in place of a soft-deleted message.
pub const TOMBSTONE: &str = "This message was deleted";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Gif,
    Sticker,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Gif => "gif",
            MessageKind::Sticker => "sticker",
            MessageKind::System => "system",
        }
    }

    /// Conversation-list caption for a message of this kind.
    pub fn preview(&self, content: &str) -> String {
        match self {
            MessageKind::Text | MessageKind::System => content.to_string(),
            MessageKind::Image => "📷 Photo".to_string(),
            MessageKind::Video => "🎥 Video".to_string(),
            MessageKind::Gif => "GIF".to_string(),
            MessageKind::Sticker => "Sticker".to_string(),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MessageKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "video" => Ok(MessageKind::Video),
            "gif" => Ok(MessageKind::Gif),
            "sticker" => Ok(MessageKind::Sticker),
            "system" => Ok(MessageKind::System),
            other => Err(AppError::Internal(format!("unknown message kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Media {
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    /// Server-assigned insertion sequence, the tie-breaker for equal timestamps.
    pub seq: i64,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub kind: MessageKind,
    pub content: String,
    pub media: Option<Media>,
    pub reply_to: Option<Uuid>,
    pub reactions: HashMap<Uuid, String>,
    pub read_by: BTreeSet<Uuid>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn ordering_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.seq)
    }

    pub fn to_preview(&self) -> MessagePreview {
        MessagePreview {
            message_id: self.id,
            preview: self.kind.preview(&self.content),
            sender_id: self.sender_id,
            sent_at: self.created_at,
            seq: self.seq,
        }
    }

    /// Counts toward unread state: sent by someone else and not server-generated.
    pub fn counts_as_unread_for(&self, user_id: Uuid) -> bool {
        self.kind != MessageKind::System && self.sender_id != user_id
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub kind: MessageKind,
    pub content: String,
    pub media: Option<Media>,
    pub reply_to: Option<Uuid>,
    /// Receipts recorded at insert time (used for membership system messages).
    pub read_by: Vec<Uuid>,
}

/// Body of a message as submitted to the delivery pipeline.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub kind: MessageKind,
    pub content: String,
    pub media: Option<Media>,
    pub reply_to: Option<Uuid>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::System,
            content: content.into(),
            ..Self::default()
        }
    }

    /// Content may be blank only when media is attached or the server generated it.
    pub fn has_body(&self) -> bool {
        !self.content.trim().is_empty() || self.media.is_some() || self.kind == MessageKind::System
    }
}

/// Position in a conversation's timeline; history pages are strictly older.
///
/// Clients page with the `created_at` and `seq` of the oldest message they
/// hold. Timestamps can tie, so `before` alone may skip messages that share
/// the boundary timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HistoryCursor {
    pub before: DateTime<Utc>,
    pub before_seq: Option<i64>,
}

impl HistoryCursor {
    /// Exclusive upper bound on `(created_at, seq)`. Without `before_seq` every
    /// message at `before` is excluded.
    pub fn upper_bound(&self) -> (DateTime<Utc>, i64) {
        (self.before, self.before_seq.unwrap_or(i64::MIN))
    }
}

/// Row shape of the `messages` table.
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub seq: i64,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub kind: String,
    pub content: String,
    pub media: Option<sqlx::types::Json<Media>>,
    pub reply_to: Option<Uuid>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ReactionRow {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub reaction: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ReadRow {
    pub message_id: Uuid,
    pub user_id: Uuid,
}

impl MessageRow {
    pub fn into_message(self, reactions: &[ReactionRow], reads: &[ReadRow]) -> Result<Message> {
        Ok(Message {
            id: self.id,
            seq: self.seq,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            kind: self.kind.parse()?,
            content: self.content,
            media: self.media.map(|m| m.0),
            reply_to: self.reply_to,
            reactions: reactions
                .iter()
                .filter(|r| r.message_id == self.id)
                .map(|r| (r.user_id, r.reaction.clone()))
                .collect(),
            read_by: reads
                .iter()
                .filter(|r| r.message_id == self.id)
                .map(|r| r.user_id)
                .collect(),
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Reply target as rendered next to the replying message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReplyPreview {
    pub id: Uuid,
    pub sender: UserSummary,
    pub kind: MessageKind,
    pub content: String,
    pub is_deleted: bool,
}

/// Render-layer projection of a [`Message`]. Tombstoned messages carry the
/// tombstone text and never expose their media or reactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MessageView {
    pub id: Uuid,
    pub seq: i64,
    pub conversation_id: Uuid,
    pub sender: UserSummary,
    pub kind: MessageKind,
    pub content: String,
    pub media: Option<Media>,
    pub reply_to: Option<ReplyPreview>,
    pub reactions: HashMap<Uuid, String>,
    pub read_by: Vec<Uuid>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageView {
    pub fn render(message: Message, sender: UserSummary, reply_to: Option<ReplyPreview>) -> Self {
        let (content, media, reactions) = if message.is_deleted {
            (TOMBSTONE.to_string(), None, HashMap::new())
        } else {
            (message.content, message.media, message.reactions)
        };

        Self {
            id: message.id,
            seq: message.seq,
            conversation_id: message.conversation_id,
            sender,
            kind: message.kind,
            content,
            media,
            reply_to,
            reactions,
            read_by: message.read_by.into_iter().collect(),
            is_deleted: message.is_deleted,
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

impl ReplyPreview {
    pub fn render(message: &Message, sender: UserSummary) -> Self {
        Self {
            id: message.id,
            sender,
            kind: message.kind,
            content: if message.is_deleted {
                TOMBSTONE.to_string()
            } else {
                message.content.clone()
            },
            is_deleted: message.is_deleted,
        }
    }
}
