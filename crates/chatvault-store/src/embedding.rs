//! Embedding provider seam and the delayed back-fill of reply embeddings.
//!
//! An assistant reply is stored right away with an empty embedding. The
//! back-fill task waits, embeds the reply on a blocking thread and rewrites
//! the message through [`ChatStore::store_message_to_chat`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chatvault_core::{Error, OpContext, Result};

use crate::chat_store::ChatStore;
use crate::types::Message;

/// Trait for embedding backends.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text`. Returns None if the backend is unavailable.
    fn embed(&self, text: &str) -> Option<Vec<f32>>;

    /// Embedding dimension.
    fn dimension(&self) -> usize;
}

/// Provider that never produces embeddings.
pub struct NoopEmbedder {
    dim: usize,
}

impl NoopEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl EmbeddingProvider for NoopEmbedder {
    fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

/// Spawn the back-fill for `message` in `chat_id`.
///
/// Resolves to `Ok(())` once the embedded message is written, or when the
/// provider has no embedding to offer. Cancelling `ctx` before the delay
/// elapses resolves to `Err(Cancelled)` without touching the store.
pub fn spawn_embedding_backfill(
    store: Arc<ChatStore>,
    chat_id: String,
    message: Message,
    provider: Arc<dyn EmbeddingProvider>,
    delay: Duration,
    ctx: OpContext,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.token().cancelled() => {
                debug!("Back-fill for message {} cancelled", message.id);
                return Err(Error::Cancelled);
            }
        }
        ctx.check()?;

        tokio::task::spawn_blocking(move || backfill(&store, &chat_id, message, provider.as_ref(), &ctx))
            .await
            .map_err(|e| Error::storage("embedding_backfill", e))?
    })
}

fn backfill(
    store: &ChatStore,
    chat_id: &str,
    message: Message,
    provider: &dyn EmbeddingProvider,
    ctx: &OpContext,
) -> Result<()> {
    let Some(embedding) = provider.embed(&message.content) else {
        warn!(
            "No embedding available for message {} in chat {}",
            message.id, chat_id
        );
        return Ok(());
    };

    let id = message.id.clone();
    let message = message.with_embedding(embedding);
    store.store_message_to_chat(ctx, chat_id, &message)?;
    info!("Back-filled embedding for message {} in chat {}", id, chat_id);
    Ok(())
}
