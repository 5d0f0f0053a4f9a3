pub mod message_dto;
pub mod message_handlers;
pub mod message_models;
pub mod message_repository;
pub mod message_service;

pub use message_models::{
    HistoryCursor, Media, Message, MessageDraft, MessageKind, MessageView, NewMessage, ReplyPreview, TOMBSTONE,
};
pub use message_repository::PgMessageRepository;
pub use message_service::{HistoryLimits, MessageService};
