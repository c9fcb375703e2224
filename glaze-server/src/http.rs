//! Glaze HTTP API
//!
//! Axum router for the storefront chat widget and the catalogue admin tools.
//! Each endpoint is a thin handler that delegates to a subsystem function;
//! the subsystems are testable without going through axum dispatch.
//!
//! Endpoints:
//! - POST /api/chat                        — grounded answer as JSON
//! - POST /api/chat/stream                 — grounded answer as chunked text
//! - GET  /api/chat/history/:sessionId     — turns of a chat session
//! - POST /api/conversations               — create (or reuse) a conversation
//! - GET  /api/conversations/:id           — conversation with its messages
//! - GET  /api/conversations/:id/messages  — messages only
//! - POST /api/conversations/:id/messages  — append a message
//! - GET  /api/products                    — catalogue, optional `?category=`
//! - GET  /api/products/:id                — one product
//! - POST /api/upload/products             — catalogue JSON (admin)
//! - POST /api/upload/products/file        — catalogue JSON as multipart `file` (admin)
//! - GET  /health                          — liveness
//! - GET  /health/db                       — PostgreSQL and pgvector status

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use glaze_core::config::HttpConfig;
use glaze_core::models::{Conversation, Message, Product, ProvenanceItem};
use glaze_core::KnowledgeStore;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::require_admin;
use crate::error::ApiError;
use crate::state::HttpState;
use crate::subsystems::chat::{self, ChatRequest, ChatResponse};
use crate::subsystems::conversation::{self, CreateConversationRequest, SendMessageRequest};
use crate::subsystems::upload::{self, UploadReport};

/// Catalogue uploads may carry long care guides.
const UPLOAD_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Larger provenance lists are left out of the response headers.
const MAX_PROVENANCE_HEADER_BYTES: usize = 4096;

pub const PROVENANCE_HEADER: &str = "x-provenance";
pub const CONVERSATION_HEADER: &str = "x-conversation-id";

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let cors = cors_layer(&state.config.http);

    Router::new()
        .route("/health", get(health_handler))
        .route("/health/db", get(db_health_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", post(chat_stream_handler))
        .route("/api/chat/history/:session_id", get(history_handler))
        .route("/api/conversations", post(create_conversation_handler))
        .route("/api/conversations/:id", get(get_conversation_handler))
        .route(
            "/api/conversations/:id/messages",
            get(list_messages_handler).post(send_message_handler),
        )
        .route("/api/products", get(list_products_handler))
        .route("/api/products/:id", get(get_product_handler))
        .route(
            "/api/upload/products",
            post(upload_products_handler).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route(
            "/api/upload/products/file",
            post(upload_file_handler).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Allow the configured origins, or any origin when none are configured.
pub fn cors_layer(config: &HttpConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    tracing::info!(origins = ?config.cors_origins, "CORS restricted to configured origins");
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .expose_headers([
            HeaderName::from_static(PROVENANCE_HEADER),
            HeaderName::from_static(CONVERSATION_HEADER),
        ])
        .max_age(Duration::from_secs(3600))
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Glaze HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ProductQuery {
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub session_id: String,
    pub conversation_id: Option<Uuid>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

// ============================================================================
// Health
// ============================================================================

/// Liveness body (pure, no IO).
pub fn health_inner() -> serde_json::Value {
    serde_json::json!({
        "status": "healthy",
        "service": "glaze",
        "version": env!("CARGO_PKG_VERSION"),
    })
}

/// PostgreSQL and pgvector versions, or 503 when the database is unreachable.
pub async fn db_health_inner(knowledge: &dyn KnowledgeStore) -> (StatusCode, serde_json::Value) {
    match knowledge.health().await {
        Ok(health) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "postgresql": health.postgresql,
                "pgvector": health.pgvector,
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unhealthy",
                    "error": "database unavailable",
                }),
            )
        }
    }
}

pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(health_inner()))
}

pub async fn db_health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = db_health_inner(state.knowledge.as_ref()).await;
    (status, Json(body))
}

// ============================================================================
// Chat
// ============================================================================

pub async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(chat::answer(&state, req).await?))
}

pub async fn chat_stream_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let answer = chat::stream(state, req).await?;

    let mut response = Body::from_stream(answer.body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Some(value) = provenance_header(&answer.provenance) {
        headers.insert(PROVENANCE_HEADER, value);
    }
    if let Some(id) = answer.conversation_id {
        if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
            headers.insert(CONVERSATION_HEADER, value);
        }
    }

    Ok(response)
}

/// Provenance as a JSON header value, if it is small and header-safe.
pub fn provenance_header(provenance: &[ProvenanceItem]) -> Option<HeaderValue> {
    let json = serde_json::to_string(provenance).ok()?;
    if json.len() > MAX_PROVENANCE_HEADER_BYTES {
        tracing::debug!(bytes = json.len(), "Provenance too large for header, omitted");
        return None;
    }
    HeaderValue::from_str(&json).ok()
}

pub async fn history_handler(
    State(state): State<Arc<HttpState>>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Path(session_id) = path?;
    let (conversation, messages) =
        conversation::history_for_session(state.conversations.as_ref(), &session_id).await?;

    Ok(Json(HistoryResponse {
        session_id: session_id.trim().to_string(),
        conversation_id: conversation.map(|c| c.id),
        messages,
    }))
}

// ============================================================================
// Conversations
// ============================================================================

pub async fn create_conversation_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> Result<Json<Conversation>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(
        conversation::create_conversation(state.conversations.as_ref(), req).await?,
    ))
}

pub async fn get_conversation_handler(
    State(state): State<Arc<HttpState>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let Path(id) = path?;
    let (conversation, messages) =
        conversation::get_conversation(state.conversations.as_ref(), id).await?;
    Ok(Json(ConversationResponse {
        conversation,
        messages,
    }))
}

pub async fn list_messages_handler(
    State(state): State<Arc<HttpState>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let Path(id) = path?;
    Ok(Json(
        conversation::list_messages(state.conversations.as_ref(), id).await?,
    ))
}

pub async fn send_message_handler(
    State(state): State<Arc<HttpState>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let Path(id) = path?;
    let Json(req) = payload?;
    let message = conversation::send_message(state.conversations.as_ref(), id, &req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

// ============================================================================
// Products
// ============================================================================

pub async fn list_products_handler(
    State(state): State<Arc<HttpState>>,
    query: Result<Query<ProductQuery>, QueryRejection>,
) -> Result<Json<Vec<Product>>, ApiError> {
    let Query(query) = query?;
    let category = query.category.as_deref().map(str::trim).filter(|c| !c.is_empty());
    Ok(Json(state.knowledge.list_products(category).await?))
}

pub async fn get_product_handler(
    State(state): State<Arc<HttpState>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Product>, ApiError> {
    let Path(id) = path?;
    state
        .knowledge
        .get_product(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("product {} not found", id)))
}

// ============================================================================
// Uploads
// ============================================================================

pub async fn upload_products_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadReport>, ApiError> {
    require_admin(&headers, state.config.auth.admin_token.as_deref())?;
    let report =
        upload::ingest_catalog(state.knowledge.as_ref(), state.embedder.as_ref(), &body).await?;
    Ok(Json(report))
}

pub async fn upload_file_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadReport>, ApiError> {
    require_admin(&headers, state.config.auth.admin_token.as_deref())?;
    let mut multipart = multipart.map_err(|r| ApiError::BadRequest(r.body_text()))?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        tracing::debug!(file_name = ?field.file_name(), "Received catalogue file");
        let bytes = field.bytes().await?;
        let report =
            upload::ingest_catalog(state.knowledge.as_ref(), state.embedder.as_ref(), &bytes)
                .await?;
        return Ok(Json(report));
    }

    Err(ApiError::BadRequest("multipart field 'file' is required".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glaze_core::models::SourceType;

    fn item(source_id: &str) -> ProvenanceItem {
        ProvenanceItem {
            product_id: Uuid::from_u128(1),
            source_type: SourceType::Faq,
            source_id: Some(source_id.to_string()),
            similarity: 0.8,
        }
    }

    #[test]
    fn test_health_inner_pure() {
        let v = health_inner();
        assert_eq!(v["status"], "healthy");
        assert_eq!(v["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_provenance_header_is_json() {
        let value = provenance_header(&[item("faq-1")]).unwrap();
        let parsed: Vec<ProvenanceItem> = serde_json::from_str(value.to_str().unwrap()).unwrap();
        assert_eq!(parsed, vec![item("faq-1")]);
    }

    #[test]
    fn test_provenance_header_empty_list() {
        assert_eq!(provenance_header(&[]).unwrap(), "[]");
    }

    #[test]
    fn test_provenance_header_skips_unsafe_values() {
        assert!(provenance_header(&[item("Pflegeanleitung \u{e4}#0")]).is_none());
        assert!(provenance_header(&[item(&"x".repeat(MAX_PROVENANCE_HEADER_BYTES))]).is_none());
    }
}
