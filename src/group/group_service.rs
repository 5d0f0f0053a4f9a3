use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::conversation::conversation_service::load_authorized;
use crate::conversation::{Action, GroupInfoPatch, MembershipEvent, MembershipOutcome, NewGroup};
use crate::error::{AppError, Result};
use crate::store::ConversationStore;
use crate::user::UserDirectory;

/// Members a new group needs besides its creator.
pub const MIN_INITIAL_MEMBERS: usize = 2;

/// Group creation and membership administration.
///
/// Each operation re-reads the conversation, authorizes, mutates and returns the
/// resulting state together with the events it produced. Turning those events
/// into system messages and socket traffic is the notifier's job.
#[derive(Clone)]
pub struct GroupService {
    store: Arc<dyn ConversationStore>,
    users: Arc<dyn UserDirectory>,
}

impl GroupService {
    pub fn new(store: Arc<dyn ConversationStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self { store, users }
    }

    pub async fn create_group(
        &self,
        creator_id: Uuid,
        name: String,
        description: Option<String>,
        avatar_url: Option<String>,
        member_ids: Vec<Uuid>,
    ) -> Result<MembershipOutcome> {
        let members = distinct_excluding(&member_ids, creator_id);
        if members.len() < MIN_INITIAL_MEMBERS {
            return Err(AppError::Validation(format!(
                "A group needs at least {} members besides the creator",
                MIN_INITIAL_MEMBERS
            )));
        }
        self.ensure_users_exist(&members).await?;

        let conversation = self
            .store
            .insert_group(NewGroup {
                creator_id,
                name,
                description,
                avatar_url,
                member_ids: members.clone(),
            })
            .await?;

        tracing::info!("User {} created group {}", creator_id, conversation.id);
        Ok(MembershipOutcome::new(
            conversation,
            MembershipEvent::GroupCreated {
                actor: creator_id,
                members,
            },
        ))
    }

    pub async fn add_members(&self, actor: Uuid, group_id: Uuid, user_ids: Vec<Uuid>) -> Result<MembershipOutcome> {
        let (conversation, _) = load_authorized(self.store.as_ref(), group_id, actor, Action::AddMembers).await?;

        if user_ids.is_empty() {
            return Err(AppError::Validation("At least one user is required".to_string()));
        }
        let new_members: Vec<Uuid> = distinct_excluding(&user_ids, actor)
            .into_iter()
            .filter(|id| !conversation.is_participant(*id))
            .collect();
        if new_members.is_empty() {
            return Err(AppError::StateConflict(
                "All users are already members of this group".to_string(),
            ));
        }
        self.ensure_users_exist(&new_members).await?;

        let conversation = self.store.add_participants(group_id, &new_members).await?;

        Ok(MembershipOutcome::new(
            conversation,
            MembershipEvent::MembersAdded {
                actor,
                members: new_members,
            },
        ))
    }

    pub async fn remove_member(&self, actor: Uuid, group_id: Uuid, target: Uuid) -> Result<MembershipOutcome> {
        let (conversation, _) =
            load_authorized(self.store.as_ref(), group_id, actor, Action::RemoveMember).await?;

        if conversation.is_creator(target) {
            return Err(AppError::StateConflict(
                "The group creator cannot be removed".to_string(),
            ));
        }
        if !conversation.is_participant(target) {
            return Err(AppError::StateConflict(
                "User is not a member of this group".to_string(),
            ));
        }

        let conversation = self.store.remove_participant(group_id, target).await?;

        Ok(MembershipOutcome::new(
            conversation,
            MembershipEvent::MemberRemoved { actor, member: target },
        ))
    }

    pub async fn leave_group(&self, actor: Uuid, group_id: Uuid) -> Result<MembershipOutcome> {
        load_authorized(self.store.as_ref(), group_id, actor, Action::Leave).await?;

        let conversation = self.store.remove_participant(group_id, actor).await?;

        Ok(MembershipOutcome::new(
            conversation,
            MembershipEvent::MemberLeft { member: actor },
        ))
    }

    pub async fn make_admin(&self, actor: Uuid, group_id: Uuid, target: Uuid) -> Result<MembershipOutcome> {
        let (conversation, _) =
            load_authorized(self.store.as_ref(), group_id, actor, Action::ManageAdmins).await?;

        if !conversation.is_participant(target) {
            return Err(AppError::StateConflict(
                "Only group members can be made admins".to_string(),
            ));
        }
        if conversation.is_admin(target) {
            return Err(AppError::StateConflict("User is already an admin".to_string()));
        }

        let conversation = self.store.set_admin(group_id, target, true).await?;

        Ok(MembershipOutcome::new(
            conversation,
            MembershipEvent::AdminGranted { actor, member: target },
        ))
    }

    pub async fn remove_admin(&self, actor: Uuid, group_id: Uuid, target: Uuid) -> Result<MembershipOutcome> {
        let (conversation, _) =
            load_authorized(self.store.as_ref(), group_id, actor, Action::ManageAdmins).await?;

        if conversation.is_creator(target) {
            return Err(AppError::StateConflict(
                "The group creator is always an admin".to_string(),
            ));
        }
        if !conversation.is_admin(target) {
            return Err(AppError::StateConflict("User is not an admin".to_string()));
        }

        let conversation = self.store.set_admin(group_id, target, false).await?;

        Ok(MembershipOutcome::new(
            conversation,
            MembershipEvent::AdminRevoked { actor, member: target },
        ))
    }

    pub async fn update_group_info(
        &self,
        actor: Uuid,
        group_id: Uuid,
        patch: GroupInfoPatch,
    ) -> Result<MembershipOutcome> {
        load_authorized(self.store.as_ref(), group_id, actor, Action::UpdateGroupInfo).await?;

        if patch.is_empty() {
            return Err(AppError::Validation("Nothing to update".to_string()));
        }

        let conversation = self.store.update_group_info(group_id, &patch).await?;

        Ok(MembershipOutcome::new(
            conversation,
            MembershipEvent::GroupInfoUpdated {
                actor,
                renamed_to: patch.name,
            },
        ))
    }

    /// Deletes the group and, with it, all of its messages.
    pub async fn delete_group(&self, actor: Uuid, group_id: Uuid) -> Result<MembershipOutcome> {
        let (conversation, _) =
            load_authorized(self.store.as_ref(), group_id, actor, Action::DeleteGroup).await?;

        self.store.delete(group_id).await?;
        tracing::info!("User {} deleted group {}", actor, group_id);

        let participants = conversation.participants.iter().copied().collect();
        Ok(MembershipOutcome::new(
            conversation,
            MembershipEvent::GroupDeleted { actor, participants },
        ))
    }

    async fn ensure_users_exist(&self, user_ids: &[Uuid]) -> Result<()> {
        let found = self.users.find_profiles(user_ids).await?;
        match user_ids.iter().find(|id| !found.contains_key(id)) {
            Some(missing) => Err(AppError::NotFound(format!("User {} not found", missing))),
            None => Ok(()),
        }
    }
}

/// Distinct ids in first-seen order, without `exclude`.
fn distinct_excluding(ids: &[Uuid], exclude: Uuid) -> Vec<Uuid> {
    let mut seen = BTreeSet::new();
    ids.iter()
        .copied()
        .filter(|id| *id != exclude && seen.insert(*id))
        .collect()
}
