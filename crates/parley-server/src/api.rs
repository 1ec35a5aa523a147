use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use parley_shared::constants::PROTOCOL_VERSION;
use parley_shared::protocol::UnreadCount;
use parley_shared::types::{CallId, NotificationId, UserId};
use parley_shared::AuthError;
use parley_store::{CallSession, Notification};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::gateway::{credential, ws_handler};
use crate::hub::Hub;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

/// Page size when `limit` is absent, and the largest page served.
const DEFAULT_PAGE: u32 = 20;
const MAX_PAGE: u32 = 100;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_handler))
        .route(
            "/api/notifications",
            get(list_notifications).delete(delete_all_notifications),
        )
        .route("/api/notifications/unread", get(unread_notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/read-all", post(mark_all_read))
        .route("/api/notifications/:id", delete(delete_notification))
        .route("/api/notifications/:id/read", post(mark_read))
        .route("/api/calls/:id", get(get_call))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    protocol: &'static str,
    online_users: usize,
    sessions: usize,
}

#[derive(Debug, Deserialize)]
struct Page {
    limit: Option<u32>,
    offset: Option<u32>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    let registry = state.hub.registry();
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
        online_users: registry.online_user_count(),
        sessions: registry.session_count(),
    })
}

/// Resolve the bearer credential of a REST request to its user.
fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<UserId, ServerError> {
    let token = credential(headers, None)
        .ok_or_else(|| AuthError::InvalidCredential("missing bearer token".into()))?;
    Ok(state.hub.authenticate(token)?)
}

async fn list_notifications(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Notification>>, ServerError> {
    let user = authenticate(&headers, &state)?;
    let limit = page.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let offset = page.offset.unwrap_or(0);
    Ok(Json(state.hub.notifications().list(user, limit, offset)?))
}

async fn unread_notifications(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<Notification>>, ServerError> {
    let user = authenticate(&headers, &state)?;
    Ok(Json(state.hub.notifications().unread(user)?))
}

async fn unread_count(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<UnreadCount>, ServerError> {
    let user = authenticate(&headers, &state)?;
    let count = state.hub.notifications().unread_count(user)?;
    Ok(Json(UnreadCount { count }))
}

async fn mark_read(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<NotificationId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user = authenticate(&headers, &state)?;
    state.hub.notifications().mark_read(id, user)?;
    Ok(Json(serde_json::json!({ "read": true })))
}

async fn mark_all_read(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user = authenticate(&headers, &state)?;
    let updated = state.hub.notifications().mark_all_read(user)?;
    debug!(user = %user, updated, "Marked all notifications read");
    Ok(Json(serde_json::json!({ "updated": updated })))
}

async fn delete_notification(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<NotificationId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user = authenticate(&headers, &state)?;
    state.hub.notifications().delete(id, user)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn delete_all_notifications(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user = authenticate(&headers, &state)?;
    let deleted = state.hub.notifications().delete_all(user)?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

async fn get_call(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CallSession>, ServerError> {
    let user = authenticate(&headers, &state)?;
    Ok(Json(state.hub.calls().get(&CallId(id), user)?))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP + WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{Duration, Utc};
    use ed25519_dalek::SigningKey;
    use parley_shared::call::{CallScope, CallType};
    use parley_shared::token::AccessToken;
    use parley_shared::types::NotificationType;
    use parley_store::{NewNotification, SqliteStore, UserRepository};
    use rand::rngs::OsRng;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::identity::TokenResolver;
    use crate::notifications::DispatcherSettings;

    struct Fixture {
        state: AppState,
        key: SigningKey,
        a: UserId,
        b: UserId,
    }

    fn fixture() -> Fixture {
        let key = SigningKey::generate(&mut OsRng);
        let store = SqliteStore::in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        store
            .with_db(|db| {
                db.insert_user(a, Some("alice"))?;
                db.insert_user(b, Some("bob"))
            })
            .unwrap();
        let users: Arc<dyn UserRepository> = Arc::new(store.clone());
        let identity = Arc::new(TokenResolver::new(key.verifying_key().to_bytes(), users));
        let hub = Arc::new(Hub::new(
            Arc::new(store),
            identity,
            DispatcherSettings::default(),
            16,
        ));
        let state = AppState {
            hub,
            rate_limiter: RateLimiter::new(100.0, 100.0),
            config: Arc::new(ServerConfig::default()),
        };
        Fixture { state, key, a, b }
    }

    fn bearer(f: &Fixture, user: UserId) -> String {
        let token = AccessToken::issue(user, Utc::now() + Duration::hours(1), &f.key);
        format!("Bearer {}", token.encode())
    }

    async fn call(f: &Fixture, method: Method, uri: &str, user: Option<UserId>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header("authorization", bearer(f, user));
        }
        let response = build_router(f.state.clone())
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn seed_notification(f: &Fixture, to: UserId) {
        f.state
            .hub
            .dispatcher()
            .enqueue(NewNotification {
                recipient_id: to,
                sender_id: None,
                title: "System".into(),
                body: "maintenance at noon".into(),
                kind: NotificationType::SystemAnnouncement,
                data: json!({}),
            })
            .await;
        f.state.hub.dispatcher().idle().await;
    }

    #[tokio::test]
    async fn test_health_and_info() {
        let f = fixture();
        let (status, body) = call(&f, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(&f, Method::GET, "/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["protocol"], PROTOCOL_VERSION);
        assert_eq!(body["onlineUsers"], 0);
    }

    #[tokio::test]
    async fn test_notifications_require_bearer() {
        let f = fixture();
        let (status, body) = call(&f, Method::GET, "/api/notifications", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_notification_lifecycle() {
        let f = fixture();
        seed_notification(&f, f.a).await;
        seed_notification(&f, f.a).await;

        let (_, body) = call(&f, Method::GET, "/api/notifications/unread-count", Some(f.a)).await;
        assert_eq!(body["count"], 2);

        let (_, body) = call(&f, Method::GET, "/api/notifications?limit=1", Some(f.a)).await;
        let listed = body.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        let id = listed[0]["id"].as_str().unwrap().to_string();

        let (status, _) =
            call(&f, Method::POST, &format!("/api/notifications/{id}/read"), Some(f.a)).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&f, Method::GET, "/api/notifications/unread", Some(f.a)).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, body) = call(&f, Method::POST, "/api/notifications/read-all", Some(f.a)).await;
        assert_eq!(body["updated"], 1);

        let (status, _) =
            call(&f, Method::DELETE, &format!("/api/notifications/{id}"), Some(f.a)).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&f, Method::DELETE, "/api/notifications", Some(f.a)).await;
        assert_eq!(body["deleted"], 1);
        let (_, body) = call(&f, Method::GET, "/api/notifications", Some(f.a)).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_notification_is_not_found() {
        let f = fixture();
        seed_notification(&f, f.a).await;
        let (_, body) = call(&f, Method::GET, "/api/notifications", Some(f.a)).await;
        let id = body[0]["id"].as_str().unwrap().to_string();

        let (status, _) =
            call(&f, Method::POST, &format!("/api/notifications/{id}/read"), Some(f.b)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_call_lookup_is_participant_only() {
        let f = fixture();
        f.state
            .hub
            .calls()
            .initiate(
                CallId::from("rest-call"),
                f.a,
                CallScope::Private { recipient: f.b },
                CallType::Video,
            )
            .await
            .unwrap();

        let (status, body) = call(&f, Method::GET, "/api/calls/rest-call", Some(f.b)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "RINGING");

        let (status, _) = call(&f, Method::GET, "/api/calls/missing", Some(f.a)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
