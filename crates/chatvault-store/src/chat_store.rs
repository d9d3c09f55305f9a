//! Chat-scoped store: lifecycle, chat metadata and entity access.
//!
//! At most one chat database is open at a time. A reader/writer lock guards
//! it: lifecycle changes and entity writes take the write lock, reads and
//! searches take the read lock.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use chatvault_core::{ChatVaultConfig, Error, OpContext, Result};

use crate::active::ActiveChat;
use crate::kv::KvEnv;
use crate::schema::message_key;
use crate::session::ChatSession;
use crate::types::{
    Chat, ChatStats, Document, DocumentChunk, HybridResults, Message, ProfileFact, ScoredMessage,
    UserProfile,
};

pub(crate) enum ChatState {
    Closed,
    Open(ActiveChat),
}

/// Which open chat an operation may act on.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Scope {
    /// Whatever chat is open.
    Any,
    /// Only the chat opened with this generation.
    Generation(u64),
}

pub struct ChatStore {
    config: ChatVaultConfig,
    state: RwLock<ChatState>,
    generation: AtomicU64,
}

impl ChatStore {
    pub fn new(config: ChatVaultConfig) -> Self {
        info!(
            "ChatStore ready at {} (ann={}, threshold={})",
            config.data_paths.chats.display(),
            config.ann.enabled,
            config.ann.threshold
        );
        Self {
            config,
            state: RwLock::new(ChatState::Closed),
            generation: AtomicU64::new(0),
        }
    }

    /// Store with default configuration rooted at `data_dir`.
    pub fn open_dir(data_dir: impl AsRef<Path>) -> Result<Self> {
        let config = ChatVaultConfig::new(data_dir).map_err(|e| Error::storage("open_store", e))?;
        Ok(Self::new(config))
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Open `chat_id`, closing whichever chat was open before.
    ///
    /// The returned session closes the chat when dropped.
    pub fn open_chat(&self, ctx: &OpContext, chat_id: &str) -> Result<ChatSession<'_>> {
        validate_chat_id(chat_id)?;
        ctx.check()?;

        let mut state = self.state.write();
        if let ChatState::Open(previous) = std::mem::replace(&mut *state, ChatState::Closed) {
            release(previous);
        }

        std::fs::create_dir_all(self.config.data_paths.chat_dir(chat_id))
            .map_err(|e| Error::storage("open_chat", e))?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let chat = ActiveChat::open(ctx, &self.config, chat_id, generation)?;
        *state = ChatState::Open(chat);
        info!("Opened chat {}", chat_id);

        Ok(ChatSession::new(self, chat_id, generation))
    }

    /// Close the open chat. No-op when nothing is open.
    pub fn close_chat(&self) -> Result<()> {
        self.close_scoped(Scope::Any)
    }

    /// Shutdown hook; closes the open chat.
    pub fn close(&self) -> Result<()> {
        self.close_chat()
    }

    pub(crate) fn close_scoped(&self, scope: Scope) -> Result<()> {
        let mut state = self.state.write();
        let matches = match (&*state, scope) {
            (ChatState::Open(_), Scope::Any) => true,
            (ChatState::Open(chat), Scope::Generation(g)) => chat.generation == g,
            (ChatState::Closed, _) => false,
        };
        if !matches {
            return Ok(());
        }
        match std::mem::replace(&mut *state, ChatState::Closed) {
            ChatState::Open(chat) => {
                let chat_id = chat.chat_id.clone();
                chat.close()?;
                info!("Closed chat {}", chat_id);
                Ok(())
            }
            ChatState::Closed => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.state.read(), ChatState::Open(_))
    }

    pub fn active_chat_id(&self) -> Option<String> {
        match &*self.state.read() {
            ChatState::Open(chat) => Some(chat.chat_id.clone()),
            ChatState::Closed => None,
        }
    }

    pub(crate) fn read<T>(
        &self,
        scope: Scope,
        f: impl FnOnce(&ActiveChat) -> Result<T>,
    ) -> Result<T> {
        let state = self.state.read();
        f(scoped(&state, scope)?)
    }

    pub(crate) fn write<T>(
        &self,
        scope: Scope,
        f: impl FnOnce(&ActiveChat) -> Result<T>,
    ) -> Result<T> {
        let state = self.state.write();
        f(scoped(&state, scope)?)
    }

    // ---------------------------------------------------------------
    // Entity operations on the open chat
    // ---------------------------------------------------------------

    pub fn store_message(&self, ctx: &OpContext, message: &Message) -> Result<()> {
        self.write(Scope::Any, |chat| chat.store_message(ctx, message))
    }

    pub fn store_document(&self, ctx: &OpContext, document: &Document) -> Result<()> {
        self.write(Scope::Any, |chat| chat.store_document(ctx, document))
    }

    pub fn store_document_chunk(&self, ctx: &OpContext, chunk: &DocumentChunk) -> Result<()> {
        self.write(Scope::Any, |chat| chat.store_document_chunk(ctx, chunk))
    }

    pub fn get_messages(&self, ctx: &OpContext) -> Result<Vec<Message>> {
        self.read(Scope::Any, |chat| chat.get_messages(ctx))
    }

    pub fn get_documents(&self, ctx: &OpContext) -> Result<Vec<Document>> {
        self.read(Scope::Any, |chat| chat.get_documents(ctx))
    }

    pub fn find_document_by_hash(&self, ctx: &OpContext, hash: &str) -> Result<Option<Document>> {
        self.read(Scope::Any, |chat| chat.find_document_by_hash(ctx, hash))
    }

    pub fn search_similar(
        &self,
        ctx: &OpContext,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredMessage>> {
        self.read(Scope::Any, |chat| chat.search_similar(ctx, query, top_k))
    }

    pub fn search_similar_with_chunks(
        &self,
        ctx: &OpContext,
        query: &[f32],
        top_k: usize,
    ) -> Result<HybridResults> {
        self.read(Scope::Any, |chat| {
            chat.search_similar_with_chunks(ctx, query, top_k)
        })
    }

    pub fn stats(&self, ctx: &OpContext) -> Result<ChatStats> {
        self.read(Scope::Any, |chat| chat.stats(ctx))
    }

    // ------ Profile ------

    pub fn upsert_profile_fact(&self, ctx: &OpContext, fact: &ProfileFact) -> Result<ProfileFact> {
        self.write(Scope::Any, |chat| chat.upsert_profile_fact(ctx, fact))
    }

    pub fn get_profile_fact(&self, ctx: &OpContext, key: &str) -> Result<Option<ProfileFact>> {
        self.read(Scope::Any, |chat| chat.get_profile_fact(ctx, key))
    }

    pub fn delete_profile_fact(&self, ctx: &OpContext, key: &str) -> Result<bool> {
        self.write(Scope::Any, |chat| chat.delete_profile_fact(ctx, key))
    }

    pub fn get_fact_history(&self, ctx: &OpContext, key: &str) -> Result<Vec<ProfileFact>> {
        self.read(Scope::Any, |chat| chat.get_fact_history(ctx, key))
    }

    pub fn store_user_profile(&self, ctx: &OpContext, profile: &UserProfile) -> Result<()> {
        self.write(Scope::Any, |chat| chat.store_user_profile(ctx, profile))
    }

    pub fn get_user_profile(&self, ctx: &OpContext) -> Result<UserProfile> {
        self.read(Scope::Any, |chat| chat.get_user_profile(ctx))
    }

    // ---------------------------------------------------------------
    // Writes to any chat
    // ---------------------------------------------------------------

    /// Write a message to `chat_id` through a short-lived handle.
    ///
    /// Works whether or not `chat_id` is the open chat. Fails with
    /// `ChatNotFound` if the chat directory does not exist.
    pub fn store_message_to_chat(
        &self,
        ctx: &OpContext,
        chat_id: &str,
        message: &Message,
    ) -> Result<()> {
        validate_chat_id(chat_id)?;
        ctx.check()?;

        // Shared lock only: a concurrent delete_chat must not run underneath.
        let state = self.state.read();
        if !self.config.data_paths.chat_dir(chat_id).is_dir() {
            return Err(Error::ChatNotFound(chat_id.to_string()));
        }

        let bytes = serde_json::to_vec(message)?;
        let env = KvEnv::open(
            ctx,
            self.config.data_paths.chat_db(chat_id),
            self.config.busy_timeout,
        )?;
        let written = env.put(ctx, &message_key(&message.id), &bytes);
        if let Err(e) = env.close() {
            warn!("Failed to close short-lived handle for chat {}: {}", chat_id, e);
        }
        written?;

        if let ChatState::Open(chat) = &*state {
            if chat.chat_id == chat_id {
                chat.index_message(message);
            }
        }
        debug!("Stored message {} to chat {}", message.id, chat_id);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Chat metadata
    // ---------------------------------------------------------------

    /// Write `<chat>/metadata.json`, replacing any previous record.
    pub fn store_chat(&self, ctx: &OpContext, chat: &Chat) -> Result<()> {
        validate_chat_id(&chat.id)?;
        ctx.check()?;
        let _state = self.state.write();

        let dir = self.config.data_paths.chat_dir(&chat.id);
        std::fs::create_dir_all(&dir).map_err(|e| Error::storage("store_chat", e))?;

        let json = serde_json::to_vec_pretty(chat)?;
        let path = self.config.data_paths.chat_metadata(&chat.id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| Error::storage("store_chat", e))?;
        std::fs::rename(&tmp, &path).map_err(|e| Error::storage("store_chat", e))?;
        debug!("Stored metadata for chat {}", chat.id);
        Ok(())
    }

    pub fn get_chat(&self, ctx: &OpContext, chat_id: &str) -> Result<Chat> {
        validate_chat_id(chat_id)?;
        ctx.check()?;
        let _state = self.state.read();

        let path = self.config.data_paths.chat_metadata(chat_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ChatNotFound(chat_id.to_string()))
            }
            Err(e) => return Err(Error::storage("get_chat", e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Every readable chat record, newest first. Unreadable entries are skipped.
    pub fn list_chats(&self, ctx: &OpContext) -> Result<Vec<Chat>> {
        ctx.check()?;
        let _state = self.state.read();

        let entries = match std::fs::read_dir(&self.config.data_paths.chats) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage("list_chats", e)),
        };

        let mut chats = Vec::new();
        for entry in entries.flatten() {
            ctx.check()?;
            let path = entry.path().join("metadata.json");
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_slice::<Chat>(&bytes) {
                Ok(chat) => chats.push(chat),
                Err(e) => warn!("Skipping malformed chat record {}: {}", path.display(), e),
            }
        }

        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(chats)
    }

    /// Remove a chat's directory, closing it first if it is open.
    ///
    /// Deleting a chat that does not exist is a no-op.
    pub fn delete_chat(&self, ctx: &OpContext, chat_id: &str) -> Result<()> {
        validate_chat_id(chat_id)?;
        ctx.check()?;
        let mut state = self.state.write();

        let is_active = matches!(&*state, ChatState::Open(chat) if chat.chat_id == chat_id);
        if is_active {
            if let ChatState::Open(chat) = std::mem::replace(&mut *state, ChatState::Closed) {
                release(chat);
            }
        }

        let dir = self.config.data_paths.chat_dir(chat_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("Deleted chat {}", chat_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Chat {} already absent", chat_id);
                Ok(())
            }
            Err(e) => Err(Error::storage("delete_chat", e)),
        }
    }
}

impl Drop for ChatStore {
    fn drop(&mut self) {
        if let ChatState::Open(chat) = std::mem::replace(self.state.get_mut(), ChatState::Closed) {
            release(chat);
        }
    }
}

/// Close a chat that is being replaced; failures are logged, not returned.
fn release(chat: ActiveChat) {
    let chat_id = chat.chat_id.clone();
    match chat.close() {
        Ok(()) => info!("Closed chat {}", chat_id),
        Err(e) => warn!("Failed to close chat {}: {}", chat_id, e),
    }
}

fn scoped(state: &ChatState, scope: Scope) -> Result<&ActiveChat> {
    match (state, scope) {
        (ChatState::Open(chat), Scope::Any) => Ok(chat),
        (ChatState::Open(chat), Scope::Generation(g)) if chat.generation == g => Ok(chat),
        _ => Err(Error::NoOpenChat),
    }
}

/// Chat ids become directory names.
pub fn validate_chat_id(chat_id: &str) -> Result<()> {
    let bad = chat_id.is_empty()
        || chat_id == "."
        || chat_id == ".."
        || chat_id.contains(['/', '\\', ':', '\0']);
    if bad {
        return Err(Error::InvalidChatId(chat_id.to_string()));
    }
    Ok(())
}
