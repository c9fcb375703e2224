pub mod config;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod models;
pub mod prompt;
pub mod provenance;
pub mod store;

pub use config::GlazeConfig;
pub use embeddings::{
    EmbeddingBackend, EmbeddingConfig, EmbeddingError, GeminiEmbeddingClient, GEMINI_DIMENSIONS,
};
pub use error::GlazeError;
pub use generation::{
    GeminiGenerationClient, GenerationBackend, GenerationConfig, GenerationError, TextStream,
};
pub use store::{ConversationStore, KnowledgeStore, PgStore, StoreHealth};
