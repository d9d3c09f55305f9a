//! State of the one open chat: its KV environment and in-memory indexes.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use chatvault_core::{ChatVaultConfig, OpContext, Result};

use crate::hnsw::HnswIndex;
use crate::kv::KvEnv;
use crate::schema::{
    chunk_key, document_key, message_key, CHUNK_PREFIX, DOCUMENT_PREFIX, MESSAGE_PREFIX,
};
use crate::types::{ChatStats, Document, DocumentChunk, Message, Role};

pub(crate) struct ActiveChat {
    pub(crate) chat_id: String,
    /// Bumped on every `open_chat`; sessions compare against it.
    pub(crate) generation: u64,
    pub(crate) kv: KvEnv,
    pub(crate) messages_index: Option<HnswIndex>,
    pub(crate) chunks_index: Option<HnswIndex>,
    pub(crate) ann_threshold: usize,
}

impl ActiveChat {
    /// Open the chat's environment and, when ANN is enabled, rebuild both
    /// indexes from the stored embeddings.
    pub(crate) fn open(
        ctx: &OpContext,
        config: &ChatVaultConfig,
        chat_id: &str,
        generation: u64,
    ) -> Result<Self> {
        let kv = KvEnv::open(
            ctx,
            config.data_paths.chat_db(chat_id),
            config.busy_timeout,
        )?;

        let (messages_index, chunks_index) = if config.ann.enabled {
            (
                Some(HnswIndex::new(config.ann.index.clone())),
                Some(HnswIndex::new(config.ann.index.clone())),
            )
        } else {
            (None, None)
        };

        let chat = Self {
            chat_id: chat_id.to_string(),
            generation,
            kv,
            messages_index,
            chunks_index,
            ann_threshold: config.ann.threshold,
        };
        chat.rebuild_indexes(ctx)?;
        Ok(chat)
    }

    fn rebuild_indexes(&self, ctx: &OpContext) -> Result<()> {
        if self.messages_index.is_none() && self.chunks_index.is_none() {
            return Ok(());
        }
        for message in self.scan_messages(ctx)? {
            self.index_message(&message);
        }
        for chunk in self.scan_chunks(ctx)? {
            self.index_chunk(&chunk);
        }
        info!(
            "Rebuilt ANN indexes for chat {}: {} messages, {} chunks",
            self.chat_id,
            self.messages_index.as_ref().map_or(0, HnswIndex::size),
            self.chunks_index.as_ref().map_or(0, HnswIndex::size),
        );
        Ok(())
    }

    pub(crate) fn close(self) -> Result<()> {
        self.kv.close()
    }

    // ---------------------------------------------------------------
    // Index maintenance
    // ---------------------------------------------------------------

    pub(crate) fn index_message(&self, message: &Message) {
        if let Some(index) = &self.messages_index {
            if message.has_embedding() {
                index.add(
                    &message.id,
                    message.embedding.clone(),
                    true,
                    message.role == Role::Context,
                );
            }
        }
    }

    fn index_chunk(&self, chunk: &DocumentChunk) {
        if let Some(index) = &self.chunks_index {
            if chunk.has_embedding() {
                index.add(&chunk.id, chunk.embedding.clone(), false, false);
            }
        }
    }

    /// The index, if it is large enough to replace an exact scan.
    pub(crate) fn ann_pool<'a>(&self, index: &'a Option<HnswIndex>) -> Option<&'a HnswIndex> {
        index
            .as_ref()
            .filter(|index| index.size() >= self.ann_threshold)
    }

    // ---------------------------------------------------------------
    // Entity writes
    // ---------------------------------------------------------------

    pub(crate) fn store_message(&self, ctx: &OpContext, message: &Message) -> Result<()> {
        self.put_json(ctx, &message_key(&message.id), message)?;
        self.index_message(message);
        debug!("Stored message {} in chat {}", message.id, self.chat_id);
        Ok(())
    }

    pub(crate) fn store_document(&self, ctx: &OpContext, document: &Document) -> Result<()> {
        self.put_json(ctx, &document_key(&document.id), document)?;
        debug!("Stored document {} in chat {}", document.id, self.chat_id);
        Ok(())
    }

    pub(crate) fn store_document_chunk(&self, ctx: &OpContext, chunk: &DocumentChunk) -> Result<()> {
        self.put_json(ctx, &chunk_key(&chunk.id), chunk)?;
        self.index_chunk(chunk);
        Ok(())
    }

    fn put_json<T: Serialize>(&self, ctx: &OpContext, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.kv.put(ctx, key, &bytes)
    }

    // ---------------------------------------------------------------
    // Entity reads
    // ---------------------------------------------------------------

    /// Messages sorted by timestamp, oldest first.
    pub(crate) fn get_messages(&self, ctx: &OpContext) -> Result<Vec<Message>> {
        let mut messages = self.scan_messages(ctx)?;
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    /// Documents sorted by upload time, oldest first.
    pub(crate) fn get_documents(&self, ctx: &OpContext) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self.scan(ctx, DOCUMENT_PREFIX)?;
        documents.sort_by_key(|d| d.uploaded_at);
        Ok(documents)
    }

    /// First document in key order with this content hash.
    pub(crate) fn find_document_by_hash(
        &self,
        ctx: &OpContext,
        hash: &str,
    ) -> Result<Option<Document>> {
        let documents: Vec<Document> = self.scan(ctx, DOCUMENT_PREFIX)?;
        Ok(documents.into_iter().find(|d| d.content_hash == hash))
    }

    pub(crate) fn get_message(&self, ctx: &OpContext, id: &str) -> Result<Option<Message>> {
        self.get_json(ctx, &message_key(id))
    }

    pub(crate) fn get_chunk(&self, ctx: &OpContext, id: &str) -> Result<Option<DocumentChunk>> {
        self.get_json(ctx, &chunk_key(id))
    }

    /// Messages in key order.
    pub(crate) fn scan_messages(&self, ctx: &OpContext) -> Result<Vec<Message>> {
        self.scan(ctx, MESSAGE_PREFIX)
    }

    /// Chunks in key order.
    pub(crate) fn scan_chunks(&self, ctx: &OpContext) -> Result<Vec<DocumentChunk>> {
        self.scan(ctx, CHUNK_PREFIX)
    }

    fn get_json<T: DeserializeOwned>(&self, ctx: &OpContext, key: &[u8]) -> Result<Option<T>> {
        match self.kv.get(ctx, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Decode every record under `prefix`, skipping ones that fail to parse.
    pub(crate) fn scan<T: DeserializeOwned>(&self, ctx: &OpContext, prefix: &str) -> Result<Vec<T>> {
        let entries = self.kv.scan_prefix(ctx, prefix.as_bytes())?;
        Ok(decode_lenient(entries))
    }

    pub(crate) fn stats(&self, ctx: &OpContext) -> Result<ChatStats> {
        let messages = self.scan_messages(ctx)?;
        let chunks = self.scan_chunks(ctx)?;
        let documents: Vec<Document> = self.scan(ctx, DOCUMENT_PREFIX)?;

        Ok(ChatStats {
            chat_id: self.chat_id.clone(),
            messages: messages.len(),
            embedded_messages: messages.iter().filter(|m| m.has_embedding()).count(),
            documents: documents.len(),
            chunks: chunks.len(),
            embedded_chunks: chunks.iter().filter(|c| c.has_embedding()).count(),
            message_index_size: self.messages_index.as_ref().map_or(0, HnswIndex::size),
            chunk_index_size: self.chunks_index.as_ref().map_or(0, HnswIndex::size),
            db_path: self.kv.path().display().to_string(),
        })
    }
}

pub(crate) fn decode_lenient<T: DeserializeOwned>(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<T> {
    entries
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_slice(&value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    "Skipping malformed record {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                );
                None
            }
        })
        .collect()
}
