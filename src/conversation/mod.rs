pub mod conversation_dto;
pub mod conversation_handlers;
pub mod conversation_models;
pub mod conversation_repository;
pub mod conversation_service;
pub mod membership;

pub use conversation_models::{
    direct_pair_key, Conversation, ConversationKind, ConversationRow, GroupInfoPatch, MessagePreview,
    NewGroup, ParticipantRow, UnreadCounts,
};
pub use conversation_repository::PgConversationRepository;
pub use conversation_service::ConversationService;
pub use membership::{authorize, can_join_room, Action, MembershipEvent, MembershipOutcome, Role};
