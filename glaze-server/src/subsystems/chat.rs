//! The grounded question-answering pipeline.
//!
//! Both the JSON and the streaming endpoint run the same steps:
//! validate, load the session's conversation and history, retrieve, then
//! either escalate (nothing relevant) or generate and ground the answer.
//! The user turn and the assistant turn are persisted last; a failed write
//! never fails the request.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use glaze_core::models::{Conversation, MatchedSnippet, Message, NewMessage, ProvenanceItem};
use glaze_core::prompt::{build_prompt, SYSTEM_INSTRUCTION};
use glaze_core::provenance::{
    cites_any, ground_answer, sources_line, CitationFilter, ESCALATION_MESSAGE,
};
use glaze_core::{ConversationStore, GenerationError, GlazeError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::HttpState;
use crate::subsystems::retrieve::retrieve;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: Option<String>,
    #[serde(alias = "session_id")]
    pub session_id: Option<String>,
    #[serde(alias = "user_id")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatInput {
    pub message: String,
    pub session_id: String,
    pub user_id: Option<String>,
}

impl ChatRequest {
    pub fn validate(self) -> Result<ChatInput, ApiError> {
        let message = required(self.message, "message")?;
        let session_id = required(self.session_id, "sessionId")?;
        Ok(ChatInput {
            message,
            session_id,
            user_id: self.user_id.filter(|u| !u.trim().is_empty()),
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ApiError::BadRequest(format!("{} field is required", field))),
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub provenance: Vec<ProvenanceItem>,
    /// Number of snippets that cleared the relevance bar.
    pub retrieved_docs: usize,
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<Uuid>,
}

struct Prepared {
    input: ChatInput,
    conversation: Option<Conversation>,
    history: Vec<Message>,
    snippets: Vec<MatchedSnippet>,
}

impl Prepared {
    fn conversation_id(&self) -> Option<Uuid> {
        self.conversation.as_ref().map(|c| c.id)
    }
}

async fn prepare(state: &HttpState, req: ChatRequest) -> Result<Prepared, ApiError> {
    let input = req.validate()?;

    let conversation = match state
        .conversations
        .get_or_create_conversation(&input.session_id, input.user_id.as_deref())
        .await
    {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::error!(
                error = %e,
                session_id = %input.session_id,
                "Failed to load conversation"
            );
            None
        }
    };

    let history = match &conversation {
        Some(c) => {
            let limit = i64::from(state.config.retrieval.history_turns);
            state
                .conversations
                .recent_messages(c.id, limit)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(
                        error = %e,
                        conversation_id = %c.id,
                        "Failed to load history, continuing without it"
                    );
                    Vec::new()
                })
        }
        None => Vec::new(),
    };

    let snippets = retrieve(
        state.knowledge.as_ref(),
        state.embedder.as_ref(),
        &state.config.retrieval,
        &input.message,
    )
    .await?;

    Ok(Prepared {
        input,
        conversation,
        history,
        snippets,
    })
}

/// Store the question and the reply. Failures are logged, never returned.
async fn persist_turns(
    store: &dyn ConversationStore,
    conversation_id: Option<Uuid>,
    question: &str,
    answer: &str,
    provenance: Vec<ProvenanceItem>,
) {
    let Some(id) = conversation_id else {
        tracing::warn!("No conversation for this request, turns not stored");
        return;
    };

    if let Err(e) = store.append_message(id, &NewMessage::user(question)).await {
        tracing::error!(error = %e, conversation_id = %id, "Failed to store user turn");
        return;
    }
    if let Err(e) = store
        .append_message(id, &NewMessage::assistant(answer, provenance))
        .await
    {
        tracing::error!(error = %e, conversation_id = %id, "Failed to store assistant turn");
    }
}

pub async fn answer(state: &HttpState, req: ChatRequest) -> Result<ChatResponse, ApiError> {
    let prepared = prepare(state, req).await?;
    let conversation_id = prepared.conversation_id();

    if prepared.snippets.is_empty() {
        tracing::info!(session_id = %prepared.input.session_id, "No relevant snippets, escalating");
        persist_turns(
            state.conversations.as_ref(),
            conversation_id,
            &prepared.input.message,
            ESCALATION_MESSAGE,
            Vec::new(),
        )
        .await;
        return Ok(ChatResponse {
            answer: ESCALATION_MESSAGE.to_string(),
            provenance: Vec::new(),
            retrieved_docs: 0,
            conversation_id,
        });
    }

    let prompt = build_prompt(&prepared.input.message, &prepared.snippets, &prepared.history);
    let raw = state
        .generator
        .generate(SYSTEM_INSTRUCTION, &prompt)
        .await
        .map_err(GlazeError::from)?;

    let grounded = ground_answer(&raw, &prepared.snippets);
    tracing::info!(
        session_id = %prepared.input.session_id,
        retrieved = prepared.snippets.len(),
        cited = grounded.provenance.len(),
        model = state.generator.name(),
        "Answer generated"
    );

    persist_turns(
        state.conversations.as_ref(),
        conversation_id,
        &prepared.input.message,
        &grounded.text,
        grounded.provenance.clone(),
    )
    .await;

    Ok(ChatResponse {
        answer: grounded.text,
        provenance: grounded.provenance,
        retrieved_docs: prepared.snippets.len(),
        conversation_id,
    })
}

/// A streamed answer. `provenance` lists the retrieved snippets and is known
/// before the first chunk is sent.
pub struct ChatStream {
    pub provenance: Vec<ProvenanceItem>,
    pub conversation_id: Option<Uuid>,
    pub retrieved_docs: usize,
    pub body: BoxStream<'static, Result<String, GenerationError>>,
}

pub async fn stream(state: Arc<HttpState>, req: ChatRequest) -> Result<ChatStream, ApiError> {
    let prepared = prepare(&state, req).await?;
    let conversation_id = prepared.conversation_id();
    let store = state.conversations.clone();
    let question = prepared.input.message.clone();

    if prepared.snippets.is_empty() {
        tracing::info!(session_id = %prepared.input.session_id, "No relevant snippets, escalating");
        let body = async_stream::stream! {
            yield Ok::<_, GenerationError>(ESCALATION_MESSAGE.to_string());
            persist_turns(
                store.as_ref(),
                conversation_id,
                &question,
                ESCALATION_MESSAGE,
                Vec::new(),
            )
            .await;
        };
        return Ok(ChatStream {
            provenance: Vec::new(),
            conversation_id,
            retrieved_docs: 0,
            body: body.boxed(),
        });
    }

    let prompt = build_prompt(&prepared.input.message, &prepared.snippets, &prepared.history);
    let mut chunks = state
        .generator
        .generate_stream(SYSTEM_INSTRUCTION, &prompt)
        .await
        .map_err(GlazeError::from)?;

    let snippets = prepared.snippets;
    let provenance: Vec<ProvenanceItem> = snippets.iter().map(ProvenanceItem::from).collect();
    let retrieved_docs = snippets.len();

    let body = async_stream::stream! {
        let mut sent = String::new();
        let mut citations = CitationFilter::new();

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(text) => {
                    let clean = citations.push(&text, &snippets);
                    if !clean.is_empty() {
                        sent.push_str(&clean);
                        yield Ok(clean);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Generation stream failed, aborting response");
                    yield Err(e);
                    return;
                }
            }
        }

        let rest = citations.finish();
        if !rest.is_empty() {
            sent.push_str(&rest);
            yield Ok(rest);
        }

        if !cites_any(&sent, &snippets) {
            let tail = format!("\n\n{}", sources_line(&snippets));
            sent.push_str(&tail);
            yield Ok(tail);
        }

        let grounded = ground_answer(&sent, &snippets);
        tracing::info!(
            retrieved = snippets.len(),
            cited = grounded.provenance.len(),
            "Streamed answer complete"
        );
        persist_turns(store.as_ref(), conversation_id, &question, &sent, grounded.provenance).await;
    };

    Ok(ChatStream {
        provenance,
        conversation_id,
        retrieved_docs,
        body: body.boxed(),
    })
}
