//! Persistence seams and their PostgreSQL implementation.
//!
//! `KnowledgeStore` covers the product catalogue and the similarity search,
//! `ConversationStore` covers chat turns. `PgStore` implements both over one
//! pool; tests swap in in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::GlazeError;
use crate::models::{
    Conversation, MatchedSnippet, Message, NewEmbedding, NewMessage, NewProduct, Product,
    ProductUpsert, ProvenanceItem,
};

#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub postgresql: String,
    pub pgvector: String,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Run the similarity search. Rows come back ordered by similarity, highest first.
    async fn match_embeddings(
        &self,
        query: &[f32],
        threshold: f64,
        count: i32,
    ) -> Result<Vec<MatchedSnippet>, GlazeError>;

    /// Insert or replace products (keyed by SKU) together with all of their
    /// embeddings. The batch is written atomically: on error nothing changes.
    async fn upsert_products(&self, batch: &[ProductUpsert]) -> Result<Vec<Product>, GlazeError>;

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, GlazeError>;

    async fn list_products(&self, category: Option<&str>) -> Result<Vec<Product>, GlazeError>;

    async fn health(&self) -> Result<StoreHealth, GlazeError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch the session's conversation, creating it on first use.
    async fn get_or_create_conversation(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Conversation, GlazeError>;

    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>, GlazeError>;

    async fn find_conversation_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Conversation>, GlazeError>;

    async fn append_message(
        &self,
        conversation_id: Uuid,
        message: &NewMessage,
    ) -> Result<Message, GlazeError>;

    /// All messages of a conversation in turn order.
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, GlazeError>;

    /// The last `limit` messages in turn order.
    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Message>, GlazeError>;
}

// ============================================================================
// PgStore
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Upsert one product and replace its embeddings on an open transaction.
async fn write_product(
    conn: &mut PgConnection,
    product: &NewProduct,
    embeddings: &[NewEmbedding],
) -> Result<Product, GlazeError> {
    let saved: Product = sqlx::query_as(&format!(
        r#"
        INSERT INTO products (name, description, category, sku, price, specifications, image_url)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (sku) DO UPDATE SET
            name = EXCLUDED.name,
            description = EXCLUDED.description,
            category = EXCLUDED.category,
            price = EXCLUDED.price,
            specifications = EXCLUDED.specifications,
            image_url = EXCLUDED.image_url,
            updated_at = now()
        RETURNING {}
        "#,
        PRODUCT_COLUMNS
    ))
    .bind(&product.name)
    .bind(&product.description)
    .bind(&product.category)
    .bind(&product.sku)
    .bind(product.price)
    .bind(&product.specifications)
    .bind(&product.image_url)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM product_embeddings WHERE product_id = $1")
        .bind(saved.id)
        .execute(&mut *conn)
        .await?;

    for embedding in embeddings {
        sqlx::query(
            r#"
            INSERT INTO product_embeddings (product_id, source_type, source_id, content, embedding, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(saved.id)
        .bind(embedding.source_type.as_str())
        .bind(&embedding.source_id)
        .bind(&embedding.content)
        .bind(Vector::from(embedding.embedding.clone()))
        .bind(&embedding.metadata)
        .execute(&mut *conn)
        .await?;
    }

    tracing::info!(
        product_id = %saved.id,
        sku = %saved.sku,
        embeddings = embeddings.len(),
        "Product written"
    );

    Ok(saved)
}

#[derive(sqlx::FromRow)]
struct MatchRow {
    id: Uuid,
    product_id: Uuid,
    product_name: Option<String>,
    source_type: String,
    source_id: Option<String>,
    content: String,
    metadata: Option<serde_json::Value>,
    similarity: Option<f64>,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    role: String,
    content: String,
    provenance: Json<Vec<ProvenanceItem>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = GlazeError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: row.id,
            conversation_id: row.conversation_id,
            role: row.role.parse().map_err(GlazeError::Other)?,
            content: row.content,
            provenance: row.provenance.0,
            created_at: row.created_at,
        })
    }
}

const PRODUCT_COLUMNS: &str = "id, name, description, category, sku, price, specifications, \
                               image_url, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, provenance, created_at";

#[async_trait]
impl KnowledgeStore for PgStore {
    async fn match_embeddings(
        &self,
        query: &[f32],
        threshold: f64,
        count: i32,
    ) -> Result<Vec<MatchedSnippet>, GlazeError> {
        let vector = Vector::from(query.to_vec());

        let rows: Vec<MatchRow> = sqlx::query_as(
            r#"
            SELECT id, product_id, product_name, source_type, source_id, content, metadata, similarity
            FROM match_product_embeddings($1::vector, $2, $3)
            "#,
        )
        .bind(&vector)
        .bind(threshold)
        .bind(count)
        .fetch_all(&self.pool)
        .await?;

        let mut snippets = Vec::with_capacity(rows.len());
        for row in rows {
            let source_type = match row.source_type.parse() {
                Ok(st) => st,
                Err(e) => {
                    tracing::warn!(
                        id = %row.id,
                        error = %e,
                        "Skipping snippet with unknown source type"
                    );
                    continue;
                }
            };
            snippets.push(MatchedSnippet {
                id: row.id,
                product_id: row.product_id,
                product_name: row.product_name,
                source_type,
                source_id: row.source_id,
                content: row.content,
                metadata: row.metadata.unwrap_or_else(|| serde_json::json!({})),
                similarity: row.similarity.unwrap_or(0.0),
            });
        }

        Ok(snippets)
    }

    async fn upsert_products(&self, batch: &[ProductUpsert]) -> Result<Vec<Product>, GlazeError> {
        let mut tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(batch.len());

        for item in batch {
            saved.push(write_product(&mut *tx, &item.product, &item.embeddings).await?);
        }

        tx.commit().await?;
        tracing::info!(products = saved.len(), "Catalogue batch committed");

        Ok(saved)
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, GlazeError> {
        let product = sqlx::query_as(&format!(
            "SELECT {} FROM products WHERE id = $1",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    async fn list_products(&self, category: Option<&str>) -> Result<Vec<Product>, GlazeError> {
        let products = sqlx::query_as(&format!(
            "SELECT {} FROM products WHERE ($1::text IS NULL OR category = $1) ORDER BY name",
            PRODUCT_COLUMNS
        ))
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    async fn health(&self) -> Result<StoreHealth, GlazeError> {
        let postgresql = crate::db::health_check(&self.pool).await?;
        let pgvector = crate::db::check_pgvector(&self.pool).await?;
        Ok(StoreHealth {
            postgresql,
            pgvector,
        })
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn get_or_create_conversation(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Conversation, GlazeError> {
        let conversation = sqlx::query_as(
            r#"
            INSERT INTO conversations (session_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (session_id) DO UPDATE SET
                user_id = COALESCE(conversations.user_id, EXCLUDED.user_id),
                updated_at = now()
            RETURNING id, session_id, user_id, created_at, updated_at
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>, GlazeError> {
        let conversation = sqlx::query_as(
            "SELECT id, session_id, user_id, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn find_conversation_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Conversation>, GlazeError> {
        let conversation = sqlx::query_as(
            "SELECT id, session_id, user_id, created_at, updated_at FROM conversations WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        message: &NewMessage,
    ) -> Result<Message, GlazeError> {
        let mut tx = self.pool.begin().await?;

        let row: MessageRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO messages (conversation_id, role, content, provenance)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(Json(&message.provenance))
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        row.try_into()
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, GlazeError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages WHERE conversation_id = $1 ORDER BY seq ASC",
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Message>, GlazeError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            r#"
            SELECT {cols} FROM (
                SELECT seq, {cols} FROM messages
                WHERE conversation_id = $1
                ORDER BY seq DESC
                LIMIT $2
            ) recent
            ORDER BY seq ASC
            "#,
            cols = MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }
}
