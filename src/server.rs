use std::{net::SocketAddr, sync::Arc};

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Extension, Json, Router, middleware};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthKeys, Identity, require_auth};
use crate::chat::{ChatService, Saved};
use crate::debug::DebugService;
use crate::error::ApiError;
use crate::session::{ChatSession, DebugSession, DebugSessionSummary};

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub debug: DebugService,
    pub auth: Arc<AuthKeys>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveChatBody {
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub session_id: Option<String>,
}

async fn save_chat(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: Result<Json<SaveChatBody>, JsonRejection>,
) -> Result<(StatusCode, Json<ChatSession>), ApiError> {
    let Json(body) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    let saved = state.chat
        .create_or_append(&identity.user_id, body.session_id.as_deref(), body.prompt, body.response)
        .await?;
    let status = match saved {
        Saved::Created(_) => StatusCode::CREATED,
        Saved::Appended(_) => StatusCode::OK,
    };
    Ok((status, Json(saved.into_session())))
}

async fn list_chats(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<ChatSession>>, ApiError> {
    Ok(Json(state.chat.list(&identity.user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct DebugQuery {
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    #[serde(rename = "id")]
    pub resource_id: Option<String>,
}

/// What the client gets back for a debug run or a stored debug session.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DebugReport {
    pub logs: Vec<String>,
    pub metrics: serde_json::Value,
    pub genai_response: String,
    pub session_id: String,
}

impl From<DebugSession> for DebugReport {
    fn from(s: DebugSession) -> Self {
        Self { logs: s.logs, metrics: s.metrics, genai_response: s.genai_response, session_id: s.session_id }
    }
}

async fn run_debug(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    query: Result<Query<DebugQuery>, QueryRejection>,
) -> Result<Json<DebugReport>, ApiError> {
    let Query(q) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let session = state.debug
        .run_debug(&identity.user_id, q.resource_type.as_deref(), q.resource_id.as_deref())
        .await?;
    Ok(Json(session.into()))
}

async fn list_debug_sessions(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<DebugSessionSummary>>, ApiError> {
    Ok(Json(state.debug.list_sessions(&identity.user_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

async fn get_debug_session(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<DebugReport>, ApiError> {
    let Query(q) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let session = state.debug.get_session(&identity.user_id, q.session_id.as_deref()).await?;
    Ok(Json(session.into()))
}

async fn root() -> &'static str {
    "Backend API Running"
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    match origins {
        None => CorsLayer::permissive(),
        Some(list) => {
            let parsed: Vec<HeaderValue> = list.iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::permissive().allow_origin(parsed)
        }
    }
}

pub fn router(state: AppState, cors_origins: Option<&[String]>) -> Router {
    let api = Router::new()
        .route("/chats", post(save_chat).get(list_chats))
        .route("/debug", get(run_debug))
        .route("/sessions", get(list_debug_sessions))
        .route("/session", get(get_debug_session))
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), require_auth));

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
