use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    conversation::{conversation_dto::ConversationView, MembershipOutcome},
    error::Result,
    group::group_dto::{AddGroupMembersRequest, CreateGroupRequest, UpdateGroupRequest},
    middleware::AuthUser,
    response::ApiResponse,
    state::AppState,
};

/// Publishes the outcome's events and renders the resulting group for the caller.
/// Events that failed to publish are reported in the envelope message.
async fn settle(
    state: &AppState,
    user_id: Uuid,
    outcome: MembershipOutcome,
) -> Result<ApiResponse<ConversationView>> {
    let publication = state.system_notifier.publish(&outcome).await;
    let group = state
        .conversation_service
        .render(&outcome.conversation, user_id)
        .await?;
    Ok(ApiResponse::success(group).with_notice(publication.notice()))
}

/// Create a group conversation
#[utoipa::path(
    post,
    path = "/api/groups",
    tag = "groups",
    request_body = CreateGroupRequest,
    responses(
        (status = 201, description = "Group created successfully", body = ConversationView),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "A member does not exist")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let outcome = state
        .group_service
        .create_group(
            user_id,
            payload.name,
            payload.description,
            payload.avatar_url,
            payload.member_ids,
        )
        .await?;
    let response = settle(&state, user_id, outcome).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Update group name, description or avatar (admins only)
#[utoipa::path(
    patch,
    path = "/api/groups/{group_id}",
    tag = "groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID")
    ),
    request_body = UpdateGroupRequest,
    responses(
        (status = 200, description = "Group updated successfully", body = ConversationView),
        (status = 400, description = "Validation error"),
        (status = 403, description = "Not an admin")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(group_id): Path<Uuid>,
    Json(payload): Json<UpdateGroupRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let outcome = state
        .group_service
        .update_group_info(user_id, group_id, payload.into())
        .await?;
    let response = settle(&state, user_id, outcome).await?;

    Ok((StatusCode::OK, Json(response)))
}

/// Delete a group and all of its messages (creator only)
#[utoipa::path(
    delete,
    path = "/api/groups/{group_id}",
    tag = "groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID")
    ),
    responses(
        (status = 200, description = "Group deleted successfully"),
        (status = 403, description = "Not the creator")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let outcome = state.group_service.delete_group(user_id, group_id).await?;
    let publication = state.system_notifier.publish(&outcome).await;

    Ok((
        StatusCode::OK,
        Json(ApiResponse::message("Group deleted successfully").with_notice(publication.notice())),
    ))
}

/// Add members to a group (admins only)
#[utoipa::path(
    post,
    path = "/api/groups/{group_id}/members",
    tag = "groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID")
    ),
    request_body = AddGroupMembersRequest,
    responses(
        (status = 200, description = "Members added successfully", body = ConversationView),
        (status = 403, description = "Not an admin"),
        (status = 409, description = "All users are already members")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn add_members(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(group_id): Path<Uuid>,
    Json(payload): Json<AddGroupMembersRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let outcome = state
        .group_service
        .add_members(user_id, group_id, payload.user_ids)
        .await?;
    let response = settle(&state, user_id, outcome).await?;

    Ok((StatusCode::OK, Json(response)))
}

/// Remove a member from a group (admins only, never the creator)
#[utoipa::path(
    delete,
    path = "/api/groups/{group_id}/members/{user_id}",
    tag = "groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID"),
        ("user_id" = Uuid, Path, description = "Member to remove")
    ),
    responses(
        (status = 200, description = "Member removed successfully", body = ConversationView),
        (status = 403, description = "Not an admin"),
        (status = 409, description = "Target is the creator or not a member")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn remove_member(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((group_id, member_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let outcome = state
        .group_service
        .remove_member(user_id, group_id, member_id)
        .await?;
    let response = settle(&state, user_id, outcome).await?;

    Ok((StatusCode::OK, Json(response)))
}

/// Leave a group
#[utoipa::path(
    post,
    path = "/api/groups/{group_id}/leave",
    tag = "groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID")
    ),
    responses(
        (status = 200, description = "Left the group"),
        (status = 403, description = "Not a member"),
        (status = 409, description = "The creator cannot leave")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn leave_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let outcome = state.group_service.leave_group(user_id, group_id).await?;
    let publication = state.system_notifier.publish(&outcome).await;

    Ok((
        StatusCode::OK,
        Json(ApiResponse::message("You left the group").with_notice(publication.notice())),
    ))
}

/// Promote a member to admin (creator only)
#[utoipa::path(
    post,
    path = "/api/groups/{group_id}/admins/{user_id}",
    tag = "groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID"),
        ("user_id" = Uuid, Path, description = "Member to promote")
    ),
    responses(
        (status = 200, description = "Member promoted", body = ConversationView),
        (status = 403, description = "Not the creator"),
        (status = 409, description = "Target is not a member or already an admin")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn make_admin(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((group_id, member_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let outcome = state
        .group_service
        .make_admin(user_id, group_id, member_id)
        .await?;
    let response = settle(&state, user_id, outcome).await?;

    Ok((StatusCode::OK, Json(response)))
}

/// Revoke admin rights (creator only, never from the creator)
#[utoipa::path(
    delete,
    path = "/api/groups/{group_id}/admins/{user_id}",
    tag = "groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID"),
        ("user_id" = Uuid, Path, description = "Admin to demote")
    ),
    responses(
        (status = 200, description = "Admin demoted", body = ConversationView),
        (status = 403, description = "Not the creator"),
        (status = 409, description = "Target is the creator or not an admin")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn remove_admin(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((group_id, member_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let outcome = state
        .group_service
        .remove_admin(user_id, group_id, member_id)
        .await?;
    let response = settle(&state, user_id, outcome).await?;

    Ok((StatusCode::OK, Json(response)))
}
