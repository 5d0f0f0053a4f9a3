use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::conversation_models::{Conversation, ConversationKind};
use crate::user::UserSummary;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDirectRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LastMessageView {
    pub id: Uuid,
    pub preview: String,
    pub sender_id: Uuid,
    pub sent_at: DateTime<Utc>,
}

/// A conversation as seen by one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConversationView {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub participants: Vec<UserSummary>,
    pub admins: Vec<Uuid>,
    pub created_by: Option<Uuid>,
    pub group_name: Option<String>,
    pub group_avatar: Option<String>,
    pub group_description: Option<String>,
    /// The other participant of a direct conversation.
    pub counterpart: Option<UserSummary>,
    pub unread_count: u32,
    pub last_message: Option<LastMessageView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationView {
    pub fn render(conversation: &Conversation, viewer: Uuid, profiles: &HashMap<Uuid, UserSummary>) -> Self {
        let resolve = |id: &Uuid| {
            profiles
                .get(id)
                .cloned()
                .unwrap_or_else(|| UserSummary::unknown(*id))
        };

        let last_message = match (
            conversation.last_message_id,
            &conversation.last_message_preview,
            conversation.last_message_sender_id,
            conversation.last_message_at,
        ) {
            (Some(id), Some(preview), Some(sender_id), Some(sent_at)) => Some(LastMessageView {
                id,
                preview: preview.clone(),
                sender_id,
                sent_at,
            }),
            _ => None,
        };

        Self {
            id: conversation.id,
            kind: conversation.kind,
            participants: conversation.participants.iter().map(resolve).collect(),
            admins: conversation.admins.iter().copied().collect(),
            created_by: conversation.created_by,
            group_name: conversation.group_name.clone(),
            group_avatar: conversation.group_avatar.clone(),
            group_description: conversation.group_description.clone(),
            counterpart: conversation.counterpart(viewer).as_ref().map(resolve),
            unread_count: conversation.unread_for(viewer),
            last_message,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}
