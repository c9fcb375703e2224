//! Similarity search over product embeddings
//!
//! - Embeds the query with `TaskType::RetrievalQuery`
//! - Calls the `match_product_embeddings` database function
//! - Keeps only snippets above the relevance threshold, highest similarity first

use glaze_core::config::RetrievalConfig;
use glaze_core::models::MatchedSnippet;
use glaze_core::{EmbeddingBackend, GlazeError, KnowledgeStore};

/// Maximum allowed number of snippets per query
const MAX_MATCH_COUNT: u32 = 20;

pub async fn retrieve(
    knowledge: &dyn KnowledgeStore,
    embedder: &dyn EmbeddingBackend,
    config: &RetrievalConfig,
    query: &str,
) -> Result<Vec<MatchedSnippet>, GlazeError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(GlazeError::InvalidInput("Query cannot be empty".to_string()));
    }

    let count = config.match_count.clamp(1, MAX_MATCH_COUNT) as i32;

    let query_vector = embedder.embed_query(query).await.map_err(|e| {
        tracing::error!(error = %e, backend = embedder.name(), "Failed to embed query");
        e
    })?;

    let mut snippets = knowledge
        .match_embeddings(&query_vector, config.match_threshold, count)
        .await?;

    snippets.retain(|s| s.similarity > config.match_threshold);
    snippets.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    snippets.truncate(count as usize);

    tracing::info!(
        matches = snippets.len(),
        top_similarity = snippets.first().map(|s| s.similarity),
        threshold = config.match_threshold,
        "Retrieved product snippets"
    );

    Ok(snippets)
}
