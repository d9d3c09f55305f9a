//! Persisted records and search result types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Chat metadata record (persisted as `metadata.json` next to the chat database).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub use_reranking: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default)]
    pub file_count: usize,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_top_k() -> usize {
    5
}
fn default_max_tokens() -> usize {
    2048
}
fn default_context_window() -> usize {
    8192
}

impl Chat {
    /// New chat with a random id and default generation settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), name)
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            system_prompt: String::new(),
            created_at: Utc::now(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            use_reranking: false,
            max_tokens: default_max_tokens(),
            context_window: default_context_window(),
            file_count: 0,
        }
    }
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Injected retrieval context.
    Context,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Context => "context",
        })
    }
}

/// A chat message. `embedding` is empty while a back-fill is pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(rename = "chatID")]
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(chat_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            role,
            content: content.into(),
            embedding: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }
}

/// A loaded file or folder entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    #[serde(rename = "chatID")]
    pub chat_id: String,
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    /// Content-addressed dedup key, see [`content_hash`].
    pub content_hash: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub uploaded_at: DateTime<Utc>,
}

/// A chunk of a [`Document`], produced and embedded by the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    pub id: String,
    #[serde(rename = "documentID")]
    pub document_id: String,
    #[serde(rename = "chatID")]
    pub chat_id: String,
    pub chunk_index: usize,
    pub content: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub start_pos: usize,
    pub end_pos: usize,
    #[serde(default)]
    pub file_path: String,
}

impl DocumentChunk {
    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }
}

/// How a profile fact was learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactSource {
    Explicit,
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFact {
    pub key: String,
    pub value: String,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub source: FactSource,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub context: String,
}

impl ProfileFact {
    pub fn new(key: impl Into<String>, value: impl Into<String>, source: FactSource) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value: value.into(),
            confidence: 1.0,
            source,
            first_seen: now,
            last_seen: now,
            context: String::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(rename = "chatID")]
    pub chat_id: String,
    pub facts: HashMap<String, ProfileFact>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            facts: HashMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// A message with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredMessage {
    pub message: Message,
    pub score: f32,
}

/// A chunk with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Output of the two-pool search. Each list is sorted by descending score.
#[derive(Debug, Clone, Default)]
pub struct HybridResults {
    pub messages: Vec<ScoredMessage>,
    pub chunks: Vec<ScoredChunk>,
}

impl HybridResults {
    pub fn len(&self) -> usize {
        self.messages.len() + self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counts for the open chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStats {
    pub chat_id: String,
    pub messages: usize,
    pub embedded_messages: usize,
    pub documents: usize,
    pub chunks: usize,
    pub embedded_chunks: usize,
    pub message_index_size: usize,
    pub chunk_index_size: usize,
    pub db_path: String,
}

/// SHA-256 hex digest of file content, used as a [`Document::content_hash`].
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
