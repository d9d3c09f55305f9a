//! ChatVault store: per-chat message/document storage with exact and HNSW similarity search.

mod active;
pub mod chat_store;
pub mod embedding;
pub mod hnsw;
pub mod kv;
mod profile;
pub mod retrieval;
pub mod schema;
pub mod session;
pub mod similarity;
pub mod types;

pub use chat_store::{validate_chat_id, ChatStore};
pub use embedding::{spawn_embedding_backfill, EmbeddingProvider, NoopEmbedder};
pub use hnsw::HnswIndex;
pub use retrieval::allocate;
pub use session::ChatSession;
pub use similarity::cosine_similarity;
pub use types::*;
