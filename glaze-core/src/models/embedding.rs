use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of knowledge a snippet was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Description,
    Faq,
    Spec,
    Document,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::Faq => "faq",
            Self::Spec => "spec",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "description" => Ok(Self::Description),
            "faq" => Ok(Self::Faq),
            "spec" => Ok(Self::Spec),
            "document" => Ok(Self::Document),
            other => Err(format!("unknown source type '{}'", other)),
        }
    }
}

/// A snippet ready to be written next to its product, vector already computed.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEmbedding {
    pub source_type: SourceType,
    pub source_id: Option<String>,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// A product and every embedding that should replace its current ones.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductUpsert {
    pub product: crate::models::NewProduct,
    pub embeddings: Vec<NewEmbedding>,
}

/// One row returned by the similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedSnippet {
    /// Embedding record id.
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub source_type: SourceType,
    pub source_id: Option<String>,
    pub content: String,
    pub metadata: serde_json::Value,
    pub similarity: f64,
}

impl MatchedSnippet {
    /// Identifier rendered in the citation tag: the source id when the snippet
    /// has one, otherwise the embedding record id.
    pub fn citation_id(&self) -> String {
        match &self.source_id {
            Some(source_id) => source_id.clone(),
            None => self.id.to_string(),
        }
    }
}
