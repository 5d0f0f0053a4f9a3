use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::conversation::{Conversation, MembershipEvent, MembershipOutcome};
use crate::error::Result;
use crate::message::{MessageService, MessageView};
use crate::user::{UserDirectory, UserSummary};
use crate::websocket::types::{ConversationDeletedPayload, ConversationUpdatedPayload, WsMessage};
use crate::websocket::ConnectionManager;

/// What publishing an outcome produced.
#[derive(Debug, Default)]
pub struct Publication {
    pub posted: Vec<MessageView>,
    /// Events whose side effects did not complete.
    pub failed: usize,
}

impl Publication {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    /// Caller-facing note for an incomplete publication. Counters and the
    /// preview can be rebuilt with the conversation's reconcile endpoint.
    pub fn notice(&self) -> Option<String> {
        if self.is_complete() {
            return None;
        }
        Some(format!(
            "Change saved, but {} notification(s) failed to publish; reconcile the conversation to repair counters",
            self.failed
        ))
    }
}

/// Turns membership events into system messages and realtime side effects.
#[derive(Clone)]
pub struct SystemNotifier {
    message_service: MessageService,
    users: Arc<dyn UserDirectory>,
    ws_manager: ConnectionManager,
}

impl SystemNotifier {
    pub fn new(message_service: MessageService, users: Arc<dyn UserDirectory>, ws_manager: ConnectionManager) -> Self {
        Self {
            message_service,
            users,
            ws_manager,
        }
    }

    /// Applies every event of `outcome`. The membership change is already
    /// committed, so a failed event is logged and counted, and the remaining
    /// events still run.
    pub async fn publish(&self, outcome: &MembershipOutcome) -> Publication {
        let mut publication = Publication::default();
        for event in &outcome.events {
            match self.apply(&outcome.conversation, event).await {
                Ok(Some(view)) => publication.posted.push(view),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        "Failed to publish {:?} for conversation {}: {:?}",
                        event,
                        outcome.conversation.id,
                        e
                    );
                    publication.failed += 1;
                }
            }
        }
        publication
    }

    async fn apply(&self, conversation: &Conversation, event: &MembershipEvent) -> Result<Option<MessageView>> {
        let departed = event.departed();
        for user_id in &departed {
            self.ws_manager.evict_user_from_room(*user_id, conversation.id);
        }

        if let MembershipEvent::GroupDeleted { participants, .. } = event {
            self.ws_manager.send_to_users(
                participants,
                WsMessage::ConversationDeleted(ConversationDeletedPayload {
                    conversation_id: conversation.id,
                }),
            );
            self.ws_manager.close_room(conversation.id);
            return Ok(None);
        }

        let names = self.users.find_profiles(&mentioned(event)).await?;
        let posted = match describe(event, conversation, &names) {
            Some(content) => Some(
                self.message_service
                    .post_system_message(conversation.id, author(event), content, watermark(event, conversation))
                    .await?,
            ),
            None => None,
        };

        let mut recipients: Vec<Uuid> = conversation.participants.iter().copied().collect();
        recipients.extend(departed);
        self.ws_manager.send_to_users(
            &recipients,
            WsMessage::ConversationUpdated(ConversationUpdatedPayload::from(conversation)),
        );

        Ok(posted)
    }
}

fn author(event: &MembershipEvent) -> Uuid {
    match event {
        MembershipEvent::GroupCreated { actor, .. }
        | MembershipEvent::MembersAdded { actor, .. }
        | MembershipEvent::MemberRemoved { actor, .. }
        | MembershipEvent::AdminGranted { actor, .. }
        | MembershipEvent::AdminRevoked { actor, .. }
        | MembershipEvent::GroupInfoUpdated { actor, .. }
        | MembershipEvent::GroupDeleted { actor, .. } => *actor,
        MembershipEvent::MemberLeft { member } => *member,
    }
}

fn mentioned(event: &MembershipEvent) -> Vec<Uuid> {
    let mut ids = vec![author(event)];
    match event {
        MembershipEvent::GroupCreated { members, .. } | MembershipEvent::MembersAdded { members, .. } => {
            ids.extend(members)
        }
        MembershipEvent::MemberRemoved { member, .. }
        | MembershipEvent::AdminGranted { member, .. }
        | MembershipEvent::AdminRevoked { member, .. } => ids.push(*member),
        _ => {}
    }
    ids
}

/// Read receipts the system message starts with. Users who join through it
/// have nothing older to read.
fn watermark(event: &MembershipEvent, conversation: &Conversation) -> Vec<Uuid> {
    match event {
        MembershipEvent::GroupCreated { .. } => conversation.participants.iter().copied().collect(),
        MembershipEvent::MembersAdded { members, .. } => members.clone(),
        _ => Vec::new(),
    }
}

fn describe(
    event: &MembershipEvent,
    conversation: &Conversation,
    names: &HashMap<Uuid, UserSummary>,
) -> Option<String> {
    let name = |id: &Uuid| {
        names
            .get(id)
            .map(|u| u.username.clone())
            .unwrap_or_else(|| UserSummary::unknown(*id).username)
    };

    let text = match event {
        MembershipEvent::GroupCreated { actor, .. } => format!(
            "{} created the group \"{}\"",
            name(actor),
            conversation.group_name.as_deref().unwrap_or_default()
        ),
        MembershipEvent::MembersAdded { actor, members } => {
            let added: Vec<String> = members.iter().map(name).collect();
            format!("{} added {}", name(actor), join_names(&added))
        }
        MembershipEvent::MemberRemoved { actor, member } => {
            format!("{} removed {}", name(actor), name(member))
        }
        MembershipEvent::MemberLeft { member } => format!("{} left the group", name(member)),
        MembershipEvent::AdminGranted { actor, member } => {
            format!("{} made {} an admin", name(actor), name(member))
        }
        MembershipEvent::AdminRevoked { actor, member } => {
            format!("{} removed {} as an admin", name(actor), name(member))
        }
        MembershipEvent::GroupInfoUpdated { actor, renamed_to } => match renamed_to {
            Some(group_name) => format!("{} renamed the group to \"{}\"", name(actor), group_name),
            None => format!("{} updated the group info", name(actor)),
        },
        MembershipEvent::GroupDeleted { .. } => return None,
    };
    Some(text)
}

fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}
