pub mod conversation;
pub mod embedding;
pub mod product;
pub mod provenance;

pub use conversation::{Conversation, Message, NewMessage, Role};
pub use embedding::{MatchedSnippet, NewEmbedding, ProductUpsert, SourceType};
pub use product::{NewProduct, Product};
pub use provenance::ProvenanceItem;
