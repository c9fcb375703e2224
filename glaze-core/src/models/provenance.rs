use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::embedding::{MatchedSnippet, SourceType};

/// Citation attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceItem {
    pub product_id: Uuid,
    pub source_type: SourceType,
    pub source_id: Option<String>,
    pub similarity: f64,
}

impl From<&MatchedSnippet> for ProvenanceItem {
    fn from(snippet: &MatchedSnippet) -> Self {
        Self {
            product_id: snippet.product_id,
            source_type: snippet.source_type,
            source_id: Some(snippet.citation_id()),
            similarity: snippet.similarity,
        }
    }
}
