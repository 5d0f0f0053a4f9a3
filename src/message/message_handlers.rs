use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    conversation::conversation_dto::ConversationView,
    error::Result,
    message::{
        message_dto::{HistoryQuery, MarkSeenRequest, ReactionRequest, SendMessageRequest},
        message_models::MessageView,
    },
    middleware::AuthUser,
    response::ApiResponse,
    state::AppState,
    websocket::types::SeenPayload,
};

/// Get message history of a conversation, newest first
///
/// Page backwards by passing the oldest returned message's `created_at` as
/// `before` and its `seq` as `before_seq`.
#[utoipa::path(
    get,
    path = "/api/conversations/{id}/messages",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID"),
        HistoryQuery
    ),
    responses(
        (status = 200, description = "Page of messages strictly older than the cursor", body = Vec<MessageView>),
        (status = 400, description = "Invalid cursor"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse> {
    let cursor = query.cursor()?;
    let messages = state
        .message_service
        .history(user_id, conversation_id, cursor, query.limit)
        .await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(messages))))
}

/// Send a message to a conversation
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/messages",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message delivered", body = MessageView),
        (status = 400, description = "Missing content"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant"),
        (status = 500, description = "Message saved but conversation not updated")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let draft = payload.into_draft()?;
    let message = state
        .message_service
        .send(user_id, conversation_id, draft)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(message))))
}

/// Mark a conversation as seen
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/seen",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    request_body = MarkSeenRequest,
    responses(
        (status = 200, description = "Unread counter reset", body = SeenPayload),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Message not found in this conversation")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn mark_seen(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<Uuid>,
    payload: Option<Json<MarkSeenRequest>>,
) -> Result<impl IntoResponse> {
    let message_id = payload.and_then(|Json(p)| p.message_id);
    let receipt = state
        .message_service
        .mark_seen(user_id, conversation_id, message_id)
        .await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(receipt))))
}

/// Recompute unread counters and the preview from history
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/reconcile",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Reconciled conversation", body = ConversationView),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn reconcile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let conversation = state
        .message_service
        .reconcile(user_id, conversation_id)
        .await?;
    let view = state
        .conversation_service
        .render(&conversation, user_id)
        .await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(view))))
}

/// Set the caller's reaction on a message
#[utoipa::path(
    put,
    path = "/api/messages/{id}/reaction",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Message ID")
    ),
    request_body = ReactionRequest,
    responses(
        (status = 200, description = "Reaction stored", body = MessageView),
        (status = 400, description = "Invalid reaction"),
        (status = 403, description = "Not a participant"),
        (status = 409, description = "Message is deleted")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn set_reaction(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<Uuid>,
    Json(payload): Json<ReactionRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let message = state
        .message_service
        .set_reaction(user_id, message_id, &payload.reaction)
        .await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(message))))
}

/// Remove the caller's reaction from a message
#[utoipa::path(
    delete,
    path = "/api/messages/{id}/reaction",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Message ID")
    ),
    responses(
        (status = 200, description = "Reaction removed", body = MessageView),
        (status = 403, description = "Not a participant")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn clear_reaction(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let message = state
        .message_service
        .clear_reaction(user_id, message_id)
        .await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(message))))
}

/// Soft-delete a message sent by the caller
#[utoipa::path(
    delete,
    path = "/api/messages/{id}",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Message ID")
    ),
    responses(
        (status = 200, description = "Message replaced by its tombstone", body = MessageView),
        (status = 403, description = "Not the sender"),
        (status = 409, description = "System messages cannot be deleted")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let message = state
        .message_service
        .delete_message(user_id, message_id)
        .await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(message))))
}
