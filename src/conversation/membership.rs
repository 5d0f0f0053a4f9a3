//! Authorization over conversation state.
//!
//! Everything here is pure: it looks at a [`Conversation`] snapshot and an
//! actor and answers whether the actor may proceed. Services call it again on
//! every mutation so a membership change between calls is always observed.

use uuid::Uuid;

use super::Conversation;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Creator,
    Admin,
    Member,
    Outsider,
}

impl Role {
    pub fn of(conversation: &Conversation, actor: Uuid) -> Self {
        if !conversation.is_participant(actor) {
            Role::Outsider
        } else if conversation.is_group() && conversation.is_creator(actor) {
            Role::Creator
        } else if conversation.is_group() && conversation.is_admin(actor) {
            Role::Admin
        } else {
            Role::Member
        }
    }

    fn is_admin(&self) -> bool {
        matches!(self, Role::Creator | Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Send,
    JoinRoom,
    AddMembers,
    RemoveMember,
    Leave,
    ManageAdmins,
    UpdateGroupInfo,
    DeleteGroup,
}

impl Action {
    fn group_only(&self) -> bool {
        matches!(
            self,
            Action::AddMembers
                | Action::RemoveMember
                | Action::Leave
                | Action::ManageAdmins
                | Action::UpdateGroupInfo
                | Action::DeleteGroup
        )
    }
}

/// Checks `actor` may perform `action` on `conversation` and returns their role.
///
/// Outsiders always get `NotAuthorized`, before any other check, so a caller
/// outside the conversation learns nothing about its shape.
pub fn authorize(conversation: &Conversation, actor: Uuid, action: Action) -> Result<Role> {
    let role = Role::of(conversation, actor);
    if role == Role::Outsider {
        tracing::debug!(
            "Denied {:?} on conversation {} for non-participant {}",
            action,
            conversation.id,
            actor
        );
        return Err(AppError::not_authorized());
    }

    if action.group_only() && !conversation.is_group() {
        return Err(AppError::StateConflict(
            "This operation is only available for group conversations".to_string(),
        ));
    }

    let allowed = match action {
        Action::Read | Action::Send | Action::JoinRoom => true,
        Action::AddMembers | Action::RemoveMember | Action::UpdateGroupInfo => role.is_admin(),
        Action::ManageAdmins | Action::DeleteGroup => role == Role::Creator,
        Action::Leave => {
            if role == Role::Creator {
                return Err(AppError::StateConflict(
                    "The group creator must delete the group instead of leaving it".to_string(),
                ));
            }
            true
        }
    };

    if allowed {
        Ok(role)
    } else {
        tracing::debug!(
            "Denied {:?} on conversation {} for {:?} {}",
            action,
            conversation.id,
            role,
            actor
        );
        Err(AppError::not_authorized())
    }
}

pub fn can_join_room(conversation: &Conversation, actor: Uuid) -> bool {
    authorize(conversation, actor, Action::JoinRoom).is_ok()
}

/// Domain events produced by membership operations, consumed by the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    GroupCreated { actor: Uuid, members: Vec<Uuid> },
    MembersAdded { actor: Uuid, members: Vec<Uuid> },
    MemberRemoved { actor: Uuid, member: Uuid },
    MemberLeft { member: Uuid },
    AdminGranted { actor: Uuid, member: Uuid },
    AdminRevoked { actor: Uuid, member: Uuid },
    GroupInfoUpdated { actor: Uuid, renamed_to: Option<String> },
    GroupDeleted { actor: Uuid, participants: Vec<Uuid> },
}

impl MembershipEvent {
    /// Users who lose access to the conversation because of this event.
    pub fn departed(&self) -> Vec<Uuid> {
        match self {
            MembershipEvent::MemberRemoved { member, .. } | MembershipEvent::MemberLeft { member } => {
                vec![*member]
            }
            MembershipEvent::GroupDeleted { participants, .. } => participants.clone(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MembershipOutcome {
    /// State after the operation. For a deleted group, the last state seen.
    pub conversation: Conversation,
    pub events: Vec<MembershipEvent>,
}

impl MembershipOutcome {
    pub fn new(conversation: Conversation, event: MembershipEvent) -> Self {
        Self {
            conversation,
            events: vec![event],
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::conversation::NewGroup;

    struct Fixture {
        creator: Uuid,
        admin: Uuid,
        member: Uuid,
        group: Conversation,
    }

    fn fixture() -> Fixture {
        let (creator, admin, member) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut group = Conversation::new_group(
            &NewGroup {
                creator_id: creator,
                name: "Climbing".into(),
                description: None,
                avatar_url: None,
                member_ids: vec![admin, member],
            },
            Utc::now(),
        );
        group.set_admin(admin, true);
        Fixture { creator, admin, member, group }
    }

    #[test]
    fn test_roles() {
        let f = fixture();
        assert_eq!(Role::of(&f.group, f.creator), Role::Creator);
        assert_eq!(Role::of(&f.group, f.admin), Role::Admin);
        assert_eq!(Role::of(&f.group, f.member), Role::Member);
        assert_eq!(Role::of(&f.group, Uuid::new_v4()), Role::Outsider);
    }

    #[test]
    fn test_outsider_is_rejected_for_every_action() {
        let f = fixture();
        let outsider = Uuid::new_v4();
        for action in [Action::Read, Action::Send, Action::Leave, Action::DeleteGroup] {
            assert!(matches!(
                authorize(&f.group, outsider, action),
                Err(AppError::NotAuthorized(_))
            ));
        }
        assert!(!can_join_room(&f.group, outsider));
    }

    #[test]
    fn test_member_management_requires_admin() {
        let f = fixture();
        assert!(authorize(&f.group, f.admin, Action::AddMembers).is_ok());
        assert!(authorize(&f.group, f.creator, Action::RemoveMember).is_ok());
        assert!(matches!(
            authorize(&f.group, f.member, Action::AddMembers),
            Err(AppError::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_admin_management_and_deletion_require_creator() {
        let f = fixture();
        assert!(authorize(&f.group, f.creator, Action::ManageAdmins).is_ok());
        assert!(authorize(&f.group, f.admin, Action::ManageAdmins).is_err());
        assert!(authorize(&f.group, f.admin, Action::DeleteGroup).is_err());
        assert!(authorize(&f.group, f.admin, Action::UpdateGroupInfo).is_ok());
    }

    #[test]
    fn test_creator_cannot_leave() {
        let f = fixture();
        assert!(matches!(
            authorize(&f.group, f.creator, Action::Leave),
            Err(AppError::StateConflict(_))
        ));
        assert!(authorize(&f.group, f.member, Action::Leave).is_ok());
    }

    #[test]
    fn test_group_actions_conflict_on_direct_conversations() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let direct = Conversation::new_direct(a, b, Utc::now());

        assert_eq!(authorize(&direct, a, Action::Send).unwrap(), Role::Member);
        assert!(matches!(
            authorize(&direct, a, Action::AddMembers),
            Err(AppError::StateConflict(_))
        ));
        assert!(matches!(
            authorize(&direct, Uuid::new_v4(), Action::AddMembers),
            Err(AppError::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_membership_rechecked_after_removal() {
        let mut f = fixture();
        assert!(can_join_room(&f.group, f.member));
        f.group.remove_participant(f.member);
        assert!(!can_join_room(&f.group, f.member));
    }
}
