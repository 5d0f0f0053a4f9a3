use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::{
    conversation::conversation_dto::{ConversationView, CreateDirectRequest},
    error::Result,
    middleware::AuthUser,
    response::ApiResponse,
    state::AppState,
};

/// List the caller's conversations, most recent first
#[utoipa::path(
    get,
    path = "/api/conversations",
    tag = "conversations",
    responses(
        (status = 200, description = "Conversations of the caller", body = Vec<ConversationView>),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse> {
    let conversations = state.conversation_service.list(user_id).await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(conversations))))
}

/// Open the direct conversation with another user, creating it if needed
#[utoipa::path(
    post,
    path = "/api/conversations/direct",
    tag = "conversations",
    request_body = CreateDirectRequest,
    responses(
        (status = 200, description = "The unique direct conversation for the pair", body = ConversationView),
        (status = 400, description = "Cannot start a conversation with yourself"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "User not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn open_direct(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CreateDirectRequest>,
) -> Result<impl IntoResponse> {
    let conversation = state
        .conversation_service
        .get_or_create_direct(user_id, payload.user_id)
        .await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(conversation))))
}

/// Get a conversation the caller participates in
#[utoipa::path(
    get,
    path = "/api/conversations/{id}",
    tag = "conversations",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Conversation detail", body = ConversationView),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let conversation = state
        .conversation_service
        .detail(user_id, conversation_id)
        .await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(conversation))))
}
