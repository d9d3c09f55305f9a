//! Scoped handle to the chat opened by [`ChatStore::open_chat`].

use tracing::warn;

use chatvault_core::{OpContext, Result};

use crate::chat_store::{ChatStore, Scope};
use crate::types::{
    ChatStats, Document, DocumentChunk, HybridResults, Message, ProfileFact, ScoredMessage,
    UserProfile,
};

/// The open chat. Dropping the session closes the chat unless another
/// `open_chat` has replaced it since; [`ChatSession::detach`] leaves it open.
///
/// Operations on a replaced session fail with `NoOpenChat`.
#[must_use = "dropping the session closes the chat"]
pub struct ChatSession<'a> {
    store: &'a ChatStore,
    chat_id: String,
    generation: u64,
    released: bool,
}

impl<'a> ChatSession<'a> {
    pub(crate) fn new(store: &'a ChatStore, chat_id: &str, generation: u64) -> Self {
        Self {
            store,
            chat_id: chat_id.to_string(),
            generation,
            released: false,
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Whether this session's chat is still the open one.
    pub fn is_current(&self) -> bool {
        self.store
            .read(self.scope(), |_| Ok(()))
            .is_ok()
    }

    /// Close the chat now and report failures.
    pub fn close(mut self) -> Result<()> {
        self.released = true;
        self.store.close_scoped(self.scope())
    }

    /// Keep the chat open after the session goes away. Close it later with
    /// [`ChatStore::close_chat`].
    pub fn detach(mut self) {
        self.released = true;
    }

    fn scope(&self) -> Scope {
        Scope::Generation(self.generation)
    }

    pub fn store_message(&self, ctx: &OpContext, message: &Message) -> Result<()> {
        self.store
            .write(self.scope(), |chat| chat.store_message(ctx, message))
    }

    pub fn store_document(&self, ctx: &OpContext, document: &Document) -> Result<()> {
        self.store
            .write(self.scope(), |chat| chat.store_document(ctx, document))
    }

    pub fn store_document_chunk(&self, ctx: &OpContext, chunk: &DocumentChunk) -> Result<()> {
        self.store
            .write(self.scope(), |chat| chat.store_document_chunk(ctx, chunk))
    }

    pub fn get_messages(&self, ctx: &OpContext) -> Result<Vec<Message>> {
        self.store.read(self.scope(), |chat| chat.get_messages(ctx))
    }

    pub fn get_documents(&self, ctx: &OpContext) -> Result<Vec<Document>> {
        self.store.read(self.scope(), |chat| chat.get_documents(ctx))
    }

    pub fn find_document_by_hash(&self, ctx: &OpContext, hash: &str) -> Result<Option<Document>> {
        self.store
            .read(self.scope(), |chat| chat.find_document_by_hash(ctx, hash))
    }

    pub fn search_similar(
        &self,
        ctx: &OpContext,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredMessage>> {
        self.store
            .read(self.scope(), |chat| chat.search_similar(ctx, query, top_k))
    }

    pub fn search_similar_with_chunks(
        &self,
        ctx: &OpContext,
        query: &[f32],
        top_k: usize,
    ) -> Result<HybridResults> {
        self.store.read(self.scope(), |chat| {
            chat.search_similar_with_chunks(ctx, query, top_k)
        })
    }

    pub fn upsert_profile_fact(&self, ctx: &OpContext, fact: &ProfileFact) -> Result<ProfileFact> {
        self.store
            .write(self.scope(), |chat| chat.upsert_profile_fact(ctx, fact))
    }

    pub fn get_profile_fact(&self, ctx: &OpContext, key: &str) -> Result<Option<ProfileFact>> {
        self.store
            .read(self.scope(), |chat| chat.get_profile_fact(ctx, key))
    }

    pub fn delete_profile_fact(&self, ctx: &OpContext, key: &str) -> Result<bool> {
        self.store
            .write(self.scope(), |chat| chat.delete_profile_fact(ctx, key))
    }

    pub fn get_fact_history(&self, ctx: &OpContext, key: &str) -> Result<Vec<ProfileFact>> {
        self.store
            .read(self.scope(), |chat| chat.get_fact_history(ctx, key))
    }

    pub fn store_user_profile(&self, ctx: &OpContext, profile: &UserProfile) -> Result<()> {
        self.store
            .write(self.scope(), |chat| chat.store_user_profile(ctx, profile))
    }

    pub fn get_user_profile(&self, ctx: &OpContext) -> Result<UserProfile> {
        self.store.read(self.scope(), |chat| chat.get_user_profile(ctx))
    }

    pub fn stats(&self, ctx: &OpContext) -> Result<ChatStats> {
        self.store.read(self.scope(), |chat| chat.stats(ctx))
    }
}

impl Drop for ChatSession<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.close_scoped(self.scope()) {
            warn!("Failed to close chat {} on session drop: {}", self.chat_id, e);
        }
    }
}
