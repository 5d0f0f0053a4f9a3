use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::connection::{ConnectionId, WsSender};
use super::types::{
    parse_frame, AckPayload, ClientEvent, ClientFrame, ErrorPayload, PresencePayload, TypingPayload, WsMessage,
};
use crate::error::{AppError, Result};
use crate::middleware::authenticate_token;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unauthenticated,
    Authenticated { user_id: Uuid, connection_id: ConnectionId },
}

/// Protocol state of one socket. Frames are fed in arrival order.
pub struct Session {
    state: AppState,
    outbound: WsSender,
    phase: Phase,
}

impl Session {
    pub fn new(state: AppState, outbound: WsSender) -> Self {
        Self {
            state,
            outbound,
            phase: Phase::Unauthenticated,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.identity().map(|(user_id, _)| user_id)
    }

    fn identity(&self) -> Option<(Uuid, ConnectionId)> {
        match self.phase {
            Phase::Authenticated { user_id, connection_id } => Some((user_id, connection_id)),
            Phase::Unauthenticated => None,
        }
    }

    /// Binds the session to `user_id` and registers it for fan-out.
    pub async fn establish(&mut self, user_id: Uuid) {
        let (connection_id, first) = self.state.connections.register(user_id, self.outbound.clone());
        self.phase = Phase::Authenticated { user_id, connection_id };

        if first {
            self.announce_presence(user_id, true).await;
        }
    }

    /// Unregisters the socket; the user goes offline when it was their last one.
    pub async fn close(self) {
        let Some((_, connection_id)) = self.identity() else {
            return;
        };
        if let Some((user_id, true)) = self.state.connections.unregister(connection_id) {
            self.announce_presence(user_id, false).await;
        }
    }

    pub async fn handle_text(&mut self, text: &str) {
        let ClientFrame { ack_id, event } = match parse_frame(text) {
            Ok(frame) => frame,
            Err(message) => {
                self.reply(WsMessage::Error(ErrorPayload { message }));
                return;
            }
        };

        let result = match event {
            Ok(event) => {
                let name = event.name();
                self.dispatch(event).await.map_err(|e| {
                    log_failure(name, self.user_id(), &e);
                    e
                })
            }
            Err(message) => Err(AppError::Validation(message)),
        };

        match (ack_id, result) {
            (Some(ack_id), Ok(data)) => self.reply(WsMessage::Ack(AckPayload::ok(ack_id, data))),
            (Some(ack_id), Err(e)) => self.reply(WsMessage::Ack(AckPayload::error(ack_id, e.client_message()))),
            (None, Ok(_)) => {}
            (None, Err(e)) => self.reply(WsMessage::Error(ErrorPayload {
                message: e.client_message(),
            })),
        }
    }

    async fn dispatch(&mut self, event: ClientEvent) -> Result<Option<Value>> {
        let ((user_id, connection_id), event) = match (self.identity(), event) {
            (_, ClientEvent::Ping) => {
                self.reply(WsMessage::Pong);
                return Ok(None);
            }
            (None, ClientEvent::Authenticate { token }) => {
                let user_id = authenticate_token(&self.state, &token).await?;
                self.establish(user_id).await;
                return Ok(Some(json!({ "user_id": user_id })));
            }
            (None, event) => {
                return Err(AppError::Unauthenticated(format!(
                    "Authenticate before sending '{}'",
                    event.name()
                )))
            }
            (Some(_), ClientEvent::Authenticate { .. }) => {
                return Err(AppError::StateConflict(
                    "Connection is already authenticated".to_string(),
                ))
            }
            (Some(identity), event) => (identity, event),
        };

        let messages = &self.state.message_service;
        match event {
            ClientEvent::Join(target) => {
                let conversation_id = target.conversation_id();
                if !self
                    .state
                    .conversation_service
                    .can_join_room(user_id, conversation_id)
                    .await?
                {
                    return Err(AppError::not_authorized());
                }
                self.state.connections.join_room(connection_id, conversation_id);
                self.confirm_membership(user_id, connection_id, conversation_id).await?;
                Ok(Some(json!({ "conversation_id": conversation_id })))
            }
            ClientEvent::Leave(target) => {
                let conversation_id = target.conversation_id();
                self.state.connections.leave_room(connection_id, conversation_id);
                Ok(Some(json!({ "conversation_id": conversation_id })))
            }
            ClientEvent::Send(payload) => {
                let draft = payload.message.into_draft()?;
                to_data(&messages.send(user_id, payload.conversation_id, draft).await?)
            }
            ClientEvent::MarkSeen(payload) => {
                to_data(&messages.mark_seen(user_id, payload.conversation_id, payload.message_id).await?)
            }
            ClientEvent::AddReaction(payload) => {
                to_data(&messages.set_reaction(user_id, payload.message_id, &payload.reaction).await?)
            }
            ClientEvent::RemoveReaction(target) => {
                to_data(&messages.clear_reaction(user_id, target.message_id).await?)
            }
            ClientEvent::DeleteMessage(target) => {
                to_data(&messages.delete_message(user_id, target.message_id).await?)
            }
            ClientEvent::TypingStart(target) => self.typing(user_id, target.conversation_id(), true).await,
            ClientEvent::TypingStop(target) => self.typing(user_id, target.conversation_id(), false).await,
            ClientEvent::Authenticate { .. } | ClientEvent::Ping => Ok(None),
        }
    }

    /// Re-checks membership once the socket is attached. A removal that lands
    /// between the first check and the attach has already run its eviction, so
    /// the socket detaches itself here.
    async fn confirm_membership(
        &self,
        user_id: Uuid,
        connection_id: ConnectionId,
        conversation_id: Uuid,
    ) -> Result<()> {
        match self
            .state
            .conversation_service
            .can_join_room(user_id, conversation_id)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.state.connections.leave_room(connection_id, conversation_id);
                Err(AppError::not_authorized())
            }
            Err(e) => {
                self.state.connections.leave_room(connection_id, conversation_id);
                Err(e)
            }
        }
    }

    async fn typing(&self, user_id: Uuid, conversation_id: Uuid, is_typing: bool) -> Result<Option<Value>> {
        if !self
            .state
            .conversation_service
            .can_join_room(user_id, conversation_id)
            .await?
        {
            return Err(AppError::not_authorized());
        }

        self.state.connections.broadcast_room(
            conversation_id,
            WsMessage::Typing(TypingPayload {
                conversation_id,
                user_id,
                is_typing,
            }),
            Some(user_id),
        );
        Ok(None)
    }

    async fn announce_presence(&self, user_id: Uuid, is_online: bool) {
        let conversation_ids = match self.state.conversation_service.conversation_ids_of(user_id).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("Failed to load conversations for presence of {}: {:?}", user_id, e);
                return;
            }
        };

        for conversation_id in conversation_ids {
            self.state.connections.broadcast_room(
                conversation_id,
                WsMessage::Presence(PresencePayload { user_id, is_online }),
                Some(user_id),
            );
        }
    }

    fn reply(&self, message: WsMessage) {
        let _ = self.outbound.send(message);
    }
}

fn to_data<T: Serialize>(value: &T) -> Result<Option<Value>> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| AppError::Internal(format!("Failed to encode ack payload: {}", e)))
}

fn log_failure(event: &str, user_id: Option<Uuid>, error: &AppError) {
    match error {
        AppError::Database(_) | AppError::Internal(_) | AppError::DeliveryIncomplete { .. } => {
            tracing::error!("Socket event '{}' from {:?} failed: {:?}", event, user_id, error)
        }
        _ => tracing::debug!("Socket event '{}' from {:?} rejected: {}", event, user_id, error),
    }
}
