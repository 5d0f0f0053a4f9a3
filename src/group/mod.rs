pub mod group_dto;
pub mod group_handlers;
pub mod group_service;

pub use group_dto::{AddGroupMembersRequest, CreateGroupRequest, UpdateGroupRequest};
pub use group_service::GroupService;
