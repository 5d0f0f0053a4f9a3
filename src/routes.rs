use crate::{
    conversation::{
        conversation_dto::{ConversationView, CreateDirectRequest, LastMessageView},
        conversation_handlers, ConversationKind,
    },
    group::{
        group_dto::{AddGroupMembersRequest, CreateGroupRequest, UpdateGroupRequest},
        group_handlers,
    },
    message::{
        message_dto::{MarkSeenRequest, ReactionRequest, SendMessageRequest},
        message_handlers, Media, MessageKind, MessageView, ReplyPreview,
    },
    middleware::auth_middleware,
    state::AppState,
    user::UserSummary,
    websocket::types::SeenPayload,
};
use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::conversation::conversation_handlers::list_conversations,
        crate::conversation::conversation_handlers::open_direct,
        crate::conversation::conversation_handlers::get_conversation,
        crate::message::message_handlers::get_history,
        crate::message::message_handlers::send_message,
        crate::message::message_handlers::mark_seen,
        crate::message::message_handlers::reconcile,
        crate::message::message_handlers::set_reaction,
        crate::message::message_handlers::clear_reaction,
        crate::message::message_handlers::delete_message,
        crate::group::group_handlers::create_group,
        crate::group::group_handlers::update_group,
        crate::group::group_handlers::delete_group,
        crate::group::group_handlers::add_members,
        crate::group::group_handlers::remove_member,
        crate::group::group_handlers::leave_group,
        crate::group::group_handlers::make_admin,
        crate::group::group_handlers::remove_admin,
    ),
    components(
        schemas(
            CreateDirectRequest,
            ConversationView,
            ConversationKind,
            LastMessageView,
            UserSummary,
            SendMessageRequest,
            MarkSeenRequest,
            ReactionRequest,
            MessageView,
            MessageKind,
            Media,
            ReplyPreview,
            SeenPayload,
            CreateGroupRequest,
            UpdateGroupRequest,
            AddGroupMembersRequest,
        )
    ),
    tags(
        (name = "conversations", description = "Direct and group conversation listing"),
        (name = "messages", description = "Message history, delivery, receipts and reactions"),
        (name = "groups", description = "Group membership and administration")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::Http::new(
                        utoipa::openapi::security::HttpAuthScheme::Bearer,
                    ),
                ),
            )
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_allowed_origins);

    let conversation_routes = Router::new()
        .route("/", get(conversation_handlers::list_conversations))
        .route("/direct", post(conversation_handlers::open_direct))
        .route("/:id", get(conversation_handlers::get_conversation))
        .route(
            "/:id/messages",
            get(message_handlers::get_history).post(message_handlers::send_message),
        )
        .route("/:id/seen", post(message_handlers::mark_seen))
        .route("/:id/reconcile", post(message_handlers::reconcile));

    let message_routes = Router::new()
        .route("/:id", delete(message_handlers::delete_message))
        .route(
            "/:id/reaction",
            put(message_handlers::set_reaction).delete(message_handlers::clear_reaction),
        );

    let group_routes = Router::new()
        .route("/", post(group_handlers::create_group))
        .route(
            "/:group_id",
            axum::routing::patch(group_handlers::update_group).delete(group_handlers::delete_group),
        )
        .route("/:group_id/members", post(group_handlers::add_members))
        .route("/:group_id/members/:user_id", delete(group_handlers::remove_member))
        .route("/:group_id/leave", post(group_handlers::leave_group))
        .route(
            "/:group_id/admins/:user_id",
            post(group_handlers::make_admin).delete(group_handlers::remove_admin),
        );

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .nest("/conversations", conversation_routes)
        .nest("/messages", message_routes)
        .nest("/groups", group_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // The socket authenticates itself, either on upgrade or with its first event
    let api_routes = Router::new()
        .merge(protected_routes)
        .route("/ws", get(crate::websocket::ws_handler));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{FlakyStore, TestApp};

    async fn call(app: &TestApp, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = create_router(app.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_requests_without_token_are_rejected() {
        let app = TestApp::new();

        let (status, body) = call(&app, "GET", "/api/conversations", None, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_token_for_unknown_user_is_rejected() {
        let app = TestApp::new();
        let token = app.token(Uuid::new_v4());

        let (status, _) = call(&app, "GET", "/api/conversations", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_direct_conversation_and_message_flow() {
        let app = TestApp::new();
        let (a, b) = (app.user("alice"), app.user("bob"));
        let (alice, bob) = (app.token(a), app.token(b));

        let (status, body) = call(
            &app,
            "POST",
            "/api/conversations/direct",
            Some(&alice),
            Some(json!({"user_id": b})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let conversation = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/conversations/{}/messages", conversation),
            Some(&alice),
            Some(json!({"content": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["content"], "hi");

        let (_, body) = call(&app, "GET", "/api/conversations", Some(&bob), None).await;
        assert_eq!(body["data"][0]["unread_count"], 1);
        assert_eq!(body["data"][0]["last_message"]["preview"], "hi");

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/conversations/{}/seen", conversation),
            Some(&bob),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, "GET", "/api/conversations", Some(&bob), None).await;
        assert_eq!(body["data"][0]["unread_count"], 0);
    }

    #[tokio::test]
    async fn test_outsider_gets_forbidden() {
        let app = TestApp::new();
        let (a, b, c) = (app.user("alice"), app.user("bob"), app.user("carol"));
        let conversation = app.direct(a, b).await;
        let carol = app.token(c);

        let (status, body) = call(
            &app,
            "GET",
            &format!("/api/conversations/{}/messages", conversation),
            Some(&carol),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "Not authorized");
    }

    #[tokio::test]
    async fn test_group_creation_validates_member_count() {
        let app = TestApp::new();
        let (c, d) = (app.user("carol"), app.user("dave"));
        let token = app.token(c);

        let (status, _) = call(
            &app,
            "POST",
            "/api/groups",
            Some(&token),
            Some(json!({"name": "Pair", "member_ids": [d]})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_membership_change_reports_unpublished_notification() {
        let store = MemoryStore::new();
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        let app = TestApp::with_stores(flaky.clone(), Arc::new(store));
        let (c, d, e) = (app.user("carol"), app.user("dave"), app.user("erin"));
        let group = app.group(c, &[d, e]).await;
        let token = app.token(c);

        flaky.fail_record.store(true, Ordering::SeqCst);
        let (status, body) = call(
            &app,
            "DELETE",
            &format!("/api/groups/{}/members/{}", group, e),
            Some(&token),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["message"].as_str().unwrap().contains("failed to publish"));
        assert!(!app.conversation(group).await.is_participant(e));
    }

    #[tokio::test]
    async fn test_history_pages_with_cursor_pair_from_response() {
        let app = TestApp::new();
        let (a, b) = (app.user("alice"), app.user("bob"));
        let conversation = app.direct(a, b).await;
        for i in 0..5 {
            app.send_text(a, conversation, &format!("m{}", i)).await;
        }
        let token = app.token(b);
        let uri = format!("/api/conversations/{}/messages", conversation);

        let (_, first) = call(&app, "GET", &format!("{}?limit=3", uri), Some(&token), None).await;
        let oldest = &first["data"][2];
        let before = oldest["created_at"].as_str().unwrap().replace('+', "%2B");
        let (status, second) = call(
            &app,
            "GET",
            &format!("{}?limit=3&before={}&before_seq={}", uri, before, oldest["seq"]),
            Some(&token),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let contents: Vec<&str> = second["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, vec!["m1", "m0"]);
    }

    #[tokio::test]
    async fn test_openapi_lists_conversation_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/conversations/{id}/messages"));
        assert!(doc.paths.paths.contains_key("/api/groups/{group_id}/admins/{user_id}"));
    }
}
