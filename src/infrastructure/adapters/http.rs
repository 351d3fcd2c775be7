//! HTTP surface: WebSocket upgrade, health and conversation routes

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use super::websocket::AxumTransport;
use crate::application::errors::{DirectoryError, IdentityError, StorageError};
use crate::application::presence::{PresenceSession, SessionContext};
use crate::application::services::ConversationDirectory;
use crate::domain::entities::{ChatId, ChatMessage, ChatSummary, UserId};
use crate::domain::traits::IdentityProvider;

pub const SESSION_COOKIE: &str = "session_key";

/// Shared state accessible from axum handlers
#[derive(Clone)]
pub struct AppState {
    pub session: SessionContext,
    pub directory: Arc<ConversationDirectory>,
    pub identity: Arc<dyn IdentityProvider>,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Identity(IdentityError),
}

impl From<DirectoryError> for ApiError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::Storage(e) => ApiError::Storage(e),
            DirectoryError::Identity(e) => ApiError::Identity(e),
        }
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Storage(StorageError::ConstraintViolation(_)) => StatusCode::CONFLICT,
            ApiError::Storage(StorageError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Identity(IdentityError::UnknownUser(_)) => StatusCode::NOT_FOUND,
            ApiError::Identity(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let body = json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub companion_id: UserId,
}

/// Session credential from the cookie, a bearer header, or the `token` query parameter
fn credential(headers: &HeaderMap, query: &TokenQuery) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string());

    let from_bearer = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
    };

    from_cookie
        .or_else(from_bearer)
        .or_else(|| query.token.clone())
        .filter(|token| !token.is_empty())
}

async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query: &TokenQuery,
) -> Result<UserId, ApiError> {
    let token = credential(headers, query).ok_or(ApiError::Unauthorized)?;
    match state.identity.resolve_session(&token).await {
        Ok(user_id) => Ok(user_id),
        Err(IdentityError::Unavailable(e)) => {
            tracing::warn!("Identity lookup failed, rejecting request: {}", e);
            Err(ApiError::Unauthorized)
        }
        Err(e) => {
            tracing::debug!("Credential rejected: {}", e);
            Err(ApiError::Unauthorized)
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/chats", get(list_chats).post(create_chat))
        .route("/chats/{chat_id}/messages", get(chat_messages))
        .with_state(state)
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user_id = match authenticate(&state, &headers, &query).await {
        Ok(user_id) => user_id,
        Err(e) => return e.into_response(),
    };
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let ctx = state.session.clone();
    upgrade
        .max_frame_size(state.max_frame_bytes)
        .max_message_size(state.max_frame_bytes)
        .on_upgrade(move |socket| async move {
            tracing::info!("User {} connected", user_id);
            let session = PresenceSession::new(user_id, AxumTransport::new(socket), ctx);
            session.run().await;
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "online": state.session.registry.count(),
    }))
}

/// GET /chats
async fn list_chats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let user_id = authenticate(&state, &headers, &query).await?;
    let chats = state.directory.list_conversations_for_user(user_id).await?;
    Ok(Json(chats))
}

/// POST /chats
async fn create_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Json(request): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<ChatSummary>), ApiError> {
    let user_id = authenticate(&state, &headers, &query).await?;
    if request.companion_id == user_id {
        return Err(ApiError::BadRequest("cannot start a chat with yourself".to_string()));
    }
    let summary = state
        .directory
        .create_conversation(user_id, request.companion_id)
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// GET /chats/{chat_id}/messages
async fn chat_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let user_id = authenticate(&state, &headers, &query).await?;
    if !state.directory.is_participant(chat_id, user_id).await? {
        return Err(ApiError::Forbidden);
    }
    let history = state.directory.chat_history(chat_id).await?;
    Ok(Json(history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::application::presence::PresenceRegistry;
    use crate::application::services::{DeliveryPolicy, FanoutCoordinator};
    use crate::domain::entities::UserProfile;
    use crate::domain::traits::MessageStore;
    use crate::infrastructure::storage::{MemoryIdentity, MemoryStore};

    fn app() -> Router {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::new());
        let identity: Arc<dyn IdentityProvider> = Arc::new(
            MemoryIdentity::new()
                .with_user(UserProfile::new(1, "alice"))
                .with_user(UserProfile::new(2, "bob"))
                .with_user(UserProfile::new(3, "carol"))
                .with_session("tok-a", 1)
                .with_session("tok-b", 2)
                .with_session("tok-c", 3),
        );
        let directory = Arc::new(ConversationDirectory::new(store.clone(), identity.clone()));
        let registry = Arc::new(PresenceRegistry::new());
        let coordinator = Arc::new(FanoutCoordinator::new(
            store,
            directory.clone(),
            registry.clone(),
            DeliveryPolicy::Drop,
        ));

        router(AppState {
            session: SessionContext {
                registry,
                coordinator,
                queue_capacity: 8,
                shutdown: CancellationToken::new(),
            },
            directory,
            identity,
            max_frame_bytes: 4096,
        })
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get_as(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    fn create_as(token: &str, companion_id: UserId) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chats")
            .header(header::COOKIE, format!("theme=dark; {}={}", SESSION_COOKIE, token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "companion_id": companion_id }).to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_online_count() {
        let resp = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["online"], 0);
    }

    #[tokio::test]
    async fn ws_without_credential_is_rejected_before_upgrade() {
        let resp = app()
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app().oneshot(get_as("/ws", "forged")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_then_list_chats() {
        let app = app();

        let resp = app.clone().oneshot(create_as("tok-a", 2)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;
        assert_eq!(created["companion"]["nick_name"], "bob");

        let resp = app.clone().oneshot(get_as("/chats", "tok-b")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let chats = body_json(resp).await;
        assert_eq!(chats.as_array().unwrap().len(), 1);
        assert_eq!(chats[0]["chat_id"], created["chat_id"]);
        assert_eq!(chats[0]["companion"]["nick_name"], "alice");
    }

    #[tokio::test]
    async fn unknown_companion_does_not_break_listing() {
        let app = app();
        app.clone().oneshot(create_as("tok-a", 2)).await.unwrap();

        let resp = app.clone().oneshot(create_as("tok-a", 99)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app.oneshot(get_as("/chats", "tok-a")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_is_only_for_participants() {
        let app = app();
        let created = body_json(app.clone().oneshot(create_as("tok-a", 2)).await.unwrap()).await;
        let uri = format!("/chats/{}/messages", created["chat_id"]);

        let resp = app.clone().oneshot(get_as(&uri, "tok-b")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!([]));

        let resp = app.clone().oneshot(get_as(&uri, "tok-c")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app.oneshot(get_as("/chats/999/messages", "tok-a")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn query_token_and_self_chat() {
        let resp = app().oneshot(create_as("tok-a", 1)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app()
            .oneshot(Request::builder().uri("/chats?token=tok-c").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn cookie_wins_over_bearer_and_query() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer from-header".parse().unwrap());
        let query = TokenQuery {
            token: Some("from-query".to_string()),
        };
        assert_eq!(credential(&headers, &query).as_deref(), Some("from-header"));

        headers.insert(header::COOKIE, "session_key=from-cookie".parse().unwrap());
        assert_eq!(credential(&headers, &query).as_deref(), Some("from-cookie"));

        assert_eq!(credential(&HeaderMap::new(), &TokenQuery::default()), None);
    }
}
