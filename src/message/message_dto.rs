use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use super::message_models::{HistoryCursor, Media, MessageDraft, MessageKind};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub content: String,
    pub media: Option<Media>,
    #[serde(default, alias = "replyTo")]
    pub reply_to: Option<Uuid>,
}

impl SendMessageRequest {
    /// Converts client input into a draft. System messages are server-only.
    pub fn into_draft(self) -> Result<MessageDraft> {
        self.validate()?;
        if self.kind == MessageKind::System {
            return Err(AppError::Validation(
                "System messages cannot be sent by clients".to_string(),
            ));
        }

        Ok(MessageDraft {
            kind: self.kind,
            content: self.content,
            media: self.media,
            reply_to: self.reply_to,
        })
    }
}

/// Cursor query for history pages. To fetch the next page, send the
/// `created_at` and `seq` of the oldest message received as `before` and
/// `before_seq`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Only messages strictly older than this timestamp. Pair it with
    /// `before_seq`: messages can share a timestamp, and without the pair every
    /// message at exactly `before` is skipped.
    pub before: Option<DateTime<Utc>>,
    /// `seq` of the message whose `created_at` is `before`.
    pub before_seq: Option<i64>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn cursor(&self) -> Result<Option<HistoryCursor>> {
        match (self.before, self.before_seq) {
            (Some(before), before_seq) => Ok(Some(HistoryCursor { before, before_seq })),
            (None, Some(_)) => Err(AppError::Validation(
                "before_seq requires before".to_string(),
            )),
            (None, None) => Ok(None),
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct MarkSeenRequest {
    pub message_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ReactionRequest {
    #[validate(length(min = 1, max = 32))]
    pub reaction: String,
}
