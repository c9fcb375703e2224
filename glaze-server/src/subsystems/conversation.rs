//! Conversations: sessions, turns and history.

use glaze_core::models::{Conversation, Message, NewMessage, Role};
use glaze_core::ConversationStore;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    #[serde(alias = "session_id")]
    pub session_id: Option<String>,
    #[serde(alias = "user_id")]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SendMessageRequest {
    pub role: Option<String>,
    pub content: Option<String>,
}

/// Validate a client-supplied turn. Runs before any store access.
pub fn validate_message(req: &SendMessageRequest) -> Result<NewMessage, ApiError> {
    let role: Role = req
        .role
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("role field is required".to_string()))?
        .parse()
        .map_err(ApiError::BadRequest)?;

    let content = match req.content.as_deref() {
        Some(c) if !c.trim().is_empty() => c.to_string(),
        _ => return Err(ApiError::BadRequest("content field is required".to_string())),
    };

    Ok(NewMessage {
        role,
        content,
        provenance: Vec::new(),
    })
}

pub async fn create_conversation(
    store: &dyn ConversationStore,
    req: CreateConversationRequest,
) -> Result<Conversation, ApiError> {
    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let conversation = store
        .get_or_create_conversation(session_id.trim(), req.user_id.as_deref())
        .await?;

    tracing::info!(
        conversation_id = %conversation.id,
        session_id = %conversation.session_id,
        "Conversation ready"
    );
    Ok(conversation)
}

async fn require_conversation(
    store: &dyn ConversationStore,
    id: Uuid,
) -> Result<Conversation, ApiError> {
    store
        .find_conversation(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("conversation {} not found", id)))
}

pub async fn get_conversation(
    store: &dyn ConversationStore,
    id: Uuid,
) -> Result<(Conversation, Vec<Message>), ApiError> {
    let conversation = require_conversation(store, id).await?;
    let messages = store.list_messages(id).await?;
    Ok((conversation, messages))
}

pub async fn list_messages(
    store: &dyn ConversationStore,
    id: Uuid,
) -> Result<Vec<Message>, ApiError> {
    require_conversation(store, id).await?;
    Ok(store.list_messages(id).await?)
}

pub async fn send_message(
    store: &dyn ConversationStore,
    id: Uuid,
    req: &SendMessageRequest,
) -> Result<Message, ApiError> {
    let message = validate_message(req)?;
    require_conversation(store, id).await?;
    let saved = store.append_message(id, &message).await?;
    tracing::debug!(
        conversation_id = %id,
        message_id = %saved.id,
        role = %saved.role,
        "Message stored"
    );
    Ok(saved)
}

/// History for a chat session. An unknown session has an empty history.
pub async fn history_for_session(
    store: &dyn ConversationStore,
    session_id: &str,
) -> Result<(Option<Conversation>, Vec<Message>), ApiError> {
    let session_id = session_id.trim();
    if session_id.is_empty() {
        return Err(ApiError::BadRequest("sessionId is required".to_string()));
    }

    match store.find_conversation_by_session(session_id).await? {
        Some(conversation) => {
            let messages = store.list_messages(conversation.id).await?;
            Ok((Some(conversation), messages))
        }
        None => Ok((None, Vec::new())),
    }
}
