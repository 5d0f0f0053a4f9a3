use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::message::message_dto::SendMessageRequest;
use crate::message::MessageView;

/// Server-to-client frames: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsMessage {
    Ack(AckPayload),
    NewMessage(MessageView),
    MessagesSeen(SeenPayload),
    ReactionUpdated(ReactionUpdatedPayload),
    MessageDeleted(MessageDeletedPayload),
    Typing(TypingPayload),
    Presence(PresencePayload),
    ConversationUpdated(ConversationUpdatedPayload),
    ConversationDeleted(ConversationDeletedPayload),
    Error(ErrorPayload),
    Ping,
    Pong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct AckPayload {
    pub ack_id: Value,
    pub status: AckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AckPayload {
    pub fn ok(ack_id: Value, data: Option<Value>) -> Self {
        Self {
            ack_id,
            status: AckStatus::Ok,
            data,
            message: None,
        }
    }

    pub fn error(ack_id: Value, message: String) -> Self {
        Self {
            ack_id,
            status: AckStatus::Error,
            data: None,
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SeenPayload {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    /// Message the receipt was recorded on; `None` for an empty conversation.
    pub message_id: Option<Uuid>,
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReactionUpdatedPayload {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    /// The user's reaction after the change; `None` when cleared.
    pub reaction: Option<String>,
    pub reactions: HashMap<Uuid, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageDeletedPayload {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TypingPayload {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PresencePayload {
    pub user_id: Uuid,
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationUpdatedPayload {
    pub conversation_id: Uuid,
    pub participants: Vec<Uuid>,
    pub admins: Vec<Uuid>,
    pub group_name: Option<String>,
    pub group_avatar: Option<String>,
    pub group_description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Conversation> for ConversationUpdatedPayload {
    fn from(conversation: &Conversation) -> Self {
        Self {
            conversation_id: conversation.id,
            participants: conversation.participants.iter().copied().collect(),
            admins: conversation.admins.iter().copied().collect(),
            group_name: conversation.group_name.clone(),
            group_avatar: conversation.group_avatar.clone(),
            group_description: conversation.group_description.clone(),
            updated_at: conversation.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationDeletedPayload {
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorPayload {
    pub message: String,
}

/// Room reference as sent by clients: older clients send the bare id, newer
/// ones an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RoomTarget {
    Bare(Uuid),
    Envelope {
        #[serde(alias = "conversationId")]
        conversation_id: Uuid,
    },
}

impl RoomTarget {
    pub fn conversation_id(&self) -> Uuid {
        match self {
            RoomTarget::Bare(id) => *id,
            RoomTarget::Envelope { conversation_id } => *conversation_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendPayload {
    #[serde(alias = "conversationId")]
    pub conversation_id: Uuid,
    #[serde(flatten)]
    pub message: SendMessageRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkSeenPayload {
    #[serde(alias = "conversationId")]
    pub conversation_id: Uuid,
    #[serde(default, alias = "messageId")]
    pub message_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionPayload {
    #[serde(alias = "messageId")]
    pub message_id: Uuid,
    pub reaction: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageTarget {
    #[serde(alias = "messageId")]
    pub message_id: Uuid,
}

/// Client-to-server events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Authenticate { token: String },
    Join(RoomTarget),
    Leave(RoomTarget),
    Send(SendPayload),
    MarkSeen(MarkSeenPayload),
    AddReaction(ReactionPayload),
    RemoveReaction(MessageTarget),
    DeleteMessage(MessageTarget),
    TypingStart(RoomTarget),
    TypingStop(RoomTarget),
    Ping,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate { .. } => "authenticate",
            ClientEvent::Join(_) => "join",
            ClientEvent::Leave(_) => "leave",
            ClientEvent::Send(_) => "send",
            ClientEvent::MarkSeen(_) => "mark_seen",
            ClientEvent::AddReaction(_) => "add_reaction",
            ClientEvent::RemoveReaction(_) => "remove_reaction",
            ClientEvent::DeleteMessage(_) => "delete_message",
            ClientEvent::TypingStart(_) => "typing_start",
            ClientEvent::TypingStop(_) => "typing_stop",
            ClientEvent::Ping => "ping",
        }
    }
}

/// One inbound text frame after decoding.
#[derive(Debug)]
pub struct ClientFrame {
    pub ack_id: Option<Value>,
    pub event: std::result::Result<ClientEvent, String>,
}

/// Decodes a frame. Returns `Err` only when the text is not a JSON object, in
/// which case there is no ack id to answer.
pub fn parse_frame(text: &str) -> std::result::Result<ClientFrame, String> {
    let mut value: Value =
        serde_json::from_str(text).map_err(|e| format!("Invalid message format: {}", e))?;

    let Some(object) = value.as_object_mut() else {
        return Err("Invalid message format: expected an object".to_string());
    };
    let ack_id = object.remove("ack_id").filter(|id| !id.is_null());

    let event = serde_json::from_value::<ClientEvent>(value)
        .map_err(|e| format!("Invalid message format: {}", e));

    Ok(ClientFrame { ack_id, event })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::message::MessageKind;

    #[test]
    fn test_join_accepts_bare_id_and_envelope() {
        let id = Uuid::new_v4();

        let bare = parse_frame(&json!({"type": "join", "data": id}).to_string()).unwrap();
        let envelope =
            parse_frame(&json!({"type": "join", "data": {"conversation_id": id}}).to_string()).unwrap();
        let camel =
            parse_frame(&json!({"type": "join", "data": {"conversationId": id}}).to_string()).unwrap();

        for frame in [bare, envelope, camel] {
            match frame.event.unwrap() {
                ClientEvent::Join(target) => assert_eq!(target.conversation_id(), id),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_ack_id_is_split_from_event() {
        let id = Uuid::new_v4();
        let frame = parse_frame(
            &json!({
                "type": "send",
                "ack_id": 7,
                "data": {"conversation_id": id, "content": "hi"}
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(frame.ack_id, Some(json!(7)));
        match frame.event.unwrap() {
            ClientEvent::Send(payload) => {
                assert_eq!(payload.conversation_id, id);
                assert_eq!(payload.message.content, "hi");
                assert_eq!(payload.message.kind, MessageKind::Text);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_keeps_ack_id() {
        let frame = parse_frame(r#"{"type":"teleport","ack_id":"a1","data":{}}"#).unwrap();
        assert_eq!(frame.ack_id, Some(json!("a1")));
        assert!(frame.event.is_err());

        assert!(parse_frame("not json").is_err());
        assert!(parse_frame("[1,2]").is_err());
    }

    #[test]
    fn test_ping_needs_no_data() {
        let frame = parse_frame(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(frame.event, Ok(ClientEvent::Ping)));
    }

    #[test]
    fn test_outbound_frames_use_type_and_data() {
        let ack = WsMessage::Ack(AckPayload::error(json!("x"), "Not authorized".into()));
        let value = serde_json::to_value(&ack).unwrap();
        assert_eq!(value["type"], "ack");
        assert_eq!(value["data"]["status"], "error");
        assert_eq!(value["data"]["message"], "Not authorized");
        assert!(value["data"].get("data").is_none());

        let pong = serde_json::to_value(&WsMessage::Pong).unwrap();
        assert_eq!(pong, json!({"type": "pong"}));
    }
}
