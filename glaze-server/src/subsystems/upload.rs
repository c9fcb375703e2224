//! Catalogue ingestion.
//!
//! Every snippet of every product is embedded before the first database
//! write, and the whole upload is stored in one batch, so any failure leaves
//! the catalogue untouched.

use glaze_core::models::{NewEmbedding, ProductUpsert};
use glaze_core::{EmbeddingBackend, GlazeError, KnowledgeStore};
use glaze_ingest::{build_snippets, parse_catalog};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct UploadedProduct {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub embeddings: usize,
}

#[derive(Debug, Serialize)]
pub struct UploadReport {
    pub products: Vec<UploadedProduct>,
    pub embeddings: usize,
}

pub async fn ingest_catalog(
    knowledge: &dyn KnowledgeStore,
    embedder: &dyn EmbeddingBackend,
    bytes: &[u8],
) -> Result<UploadReport, ApiError> {
    let entries = parse_catalog(bytes)?;

    let mut prepared: Vec<ProductUpsert> = Vec::with_capacity(entries.len());
    for entry in &entries {
        let snippets = build_snippets(entry);
        let mut embeddings = Vec::with_capacity(snippets.len());
        for snippet in snippets {
            let vector = embedder.embed(&snippet.content).await.map_err(|e| {
                tracing::error!(
                    error = %e,
                    sku = %entry.sku,
                    backend = embedder.name(),
                    "Failed to embed snippet"
                );
                GlazeError::from(e)
            })?;
            embeddings.push(NewEmbedding {
                source_type: snippet.source_type,
                source_id: snippet.source_id,
                content: snippet.content,
                embedding: vector,
                metadata: snippet.metadata,
            });
        }
        prepared.push(ProductUpsert {
            product: entry.to_new_product(),
            embeddings,
        });
    }

    let saved = knowledge.upsert_products(&prepared).await?;

    let mut report = UploadReport {
        products: Vec::with_capacity(saved.len()),
        embeddings: 0,
    };
    for (product, item) in saved.into_iter().zip(&prepared) {
        let embeddings = item.embeddings.len();
        tracing::info!(
            product_id = %product.id,
            sku = %product.sku,
            embeddings,
            "Product ingested"
        );
        report.embeddings += embeddings;
        report.products.push(UploadedProduct {
            id: product.id,
            sku: product.sku,
            name: product.name,
            embeddings,
        });
    }

    Ok(report)
}
