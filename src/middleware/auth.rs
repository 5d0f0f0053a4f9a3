use crate::{auth::verify_jwt, error::AppError, state::AppState};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// Token from `Authorization: Bearer ...`, falling back to `?token=` (browsers
/// cannot set headers on WebSocket upgrades).
pub fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        return value.strip_prefix("Bearer ").map(|t| t.trim().to_string());
    }

    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
}

/// Resolves a token to a known user id.
pub async fn authenticate_token(state: &AppState, token: &str) -> Result<Uuid, AppError> {
    let user_id = verify_jwt(token, &state.config.jwt_secret)?.user_id()?;

    if !state.users.exists(user_id).await? {
        return Err(AppError::Unauthenticated("User not found".to_string()));
    }

    Ok(user_id)
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(req.headers(), req.uri().query())
        .ok_or_else(|| AppError::Unauthenticated("Invalid credentials".to_string()))?;

    let user_id = authenticate_token(&state, &token).await?;
    req.extensions_mut().insert(user_id);

    Ok(next.run(req).await)
}

// Extractor for getting user_id from request extensions
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Uuid>()
            .copied()
            .map(AuthUser)
            .ok_or_else(|| AppError::Unauthenticated("Invalid credentials".to_string()))
    }
}
