use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotAuthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Cannot start a conversation with yourself")]
    SelfConversation,

    #[error("{0}")]
    StateConflict(String),

    #[error("{0}")]
    Unauthenticated(String),

    /// The message row exists but the conversation counters were not updated.
    #[error("Message {message_id} was saved but delivery could not be completed")]
    DeliveryIncomplete { message_id: Uuid },

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn not_authorized() -> Self {
        AppError::NotAuthorized("Not authorized".to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::SelfConversation => StatusCode::BAD_REQUEST,
            AppError::StateConflict(_) => StatusCode::CONFLICT,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::DeliveryIncomplete { .. }
            | AppError::Database(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to hand back to the caller. Storage details stay in the logs.
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(format!("Validation failed: {}", errors))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Database(e) => tracing::error!("Database error: {:?}", e),
            AppError::Internal(detail) => tracing::error!("Internal error: {}", detail),
            AppError::DeliveryIncomplete { message_id } => {
                tracing::error!("Delivery incomplete for message {}", message_id)
            }
            _ => {}
        }

        let body = Json(json!({
            "success": false,
            "message": self.client_message(),
        }));

        (self.status_code(), body).into_response()
    }
}
