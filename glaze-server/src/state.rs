use std::sync::Arc;

use glaze_core::{
    ConversationStore, EmbeddingBackend, GenerationBackend, GlazeConfig, KnowledgeStore, PgStore,
};

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub embedder: Arc<dyn EmbeddingBackend>,
    pub generator: Arc<dyn GenerationBackend>,
    pub config: GlazeConfig,
}

impl HttpState {
    /// State backed by one Postgres store for both catalogue and conversations.
    pub fn with_pg_store(
        store: PgStore,
        embedder: Arc<dyn EmbeddingBackend>,
        generator: Arc<dyn GenerationBackend>,
        config: GlazeConfig,
    ) -> Self {
        let store = Arc::new(store);
        Self {
            knowledge: store.clone(),
            conversations: store,
            embedder,
            generator,
            config,
        }
    }
}
