//! Similarity search over the open chat's messages and chunks.
//!
//! Small pools are scored exhaustively. Once a pool's ANN index reaches the
//! configured threshold its candidates come from the index and are rescored
//! with exact cosine similarity.

use tracing::debug;

use chatvault_core::{OpContext, Result};

use crate::active::ActiveChat;
use crate::similarity::cosine_similarity;
use crate::types::{HybridResults, ScoredChunk, ScoredMessage};

/// Split `top_k` between messages and chunks.
///
/// Half goes to messages (rounded down), the rest to chunks. A pool short of
/// its share hands the remainder to the other pool. Neither count exceeds
/// what its pool holds.
pub fn allocate(top_k: usize, messages_available: usize, chunks_available: usize) -> (usize, usize) {
    let mut message_count = top_k / 2;
    let mut chunk_count = top_k - message_count;

    if messages_available < message_count {
        chunk_count += message_count - messages_available;
        message_count = messages_available;
    }
    if chunks_available < chunk_count {
        message_count += chunk_count - chunks_available;
        chunk_count = chunks_available;
    }

    (
        message_count.min(messages_available),
        chunk_count.min(chunks_available),
    )
}

impl ActiveChat {
    pub(crate) fn search_similar(
        &self,
        ctx: &OpContext,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredMessage>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let mut scored = self.rank_messages(ctx, query, top_k)?;
        scored.truncate(top_k);
        Ok(scored)
    }

    pub(crate) fn search_similar_with_chunks(
        &self,
        ctx: &OpContext,
        query: &[f32],
        top_k: usize,
    ) -> Result<HybridResults> {
        if top_k == 0 {
            return Ok(HybridResults::default());
        }
        let mut messages = self.rank_messages(ctx, query, top_k)?;
        let mut chunks = self.rank_chunks(ctx, query, top_k)?;

        let (message_count, chunk_count) = allocate(top_k, messages.len(), chunks.len());
        messages.truncate(message_count);
        chunks.truncate(chunk_count);

        debug!(
            "Hybrid search in chat {}: {} messages + {} chunks (top_k={})",
            self.chat_id,
            messages.len(),
            chunks.len(),
            top_k
        );
        Ok(HybridResults { messages, chunks })
    }

    /// Embedded messages by descending similarity. Exact scans rank the whole
    /// pool; the ANN path ranks at most `want` candidates.
    fn rank_messages(
        &self,
        ctx: &OpContext,
        query: &[f32],
        want: usize,
    ) -> Result<Vec<ScoredMessage>> {
        let mut scored = Vec::new();

        if let Some(index) = self.ann_pool(&self.messages_index) {
            for id in index.search(query, want, false) {
                let message = match self.get_message(ctx, &id) {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(e) if e.is_interrupt() => return Err(e),
                    Err(e) => {
                        debug!("Skipping ANN candidate {}: {}", id, e);
                        continue;
                    }
                };
                if message.has_embedding() {
                    let score = cosine_similarity(query, &message.embedding);
                    scored.push(ScoredMessage { message, score });
                }
            }
        } else {
            for message in self.scan_messages(ctx)? {
                if message.has_embedding() {
                    let score = cosine_similarity(query, &message.embedding);
                    scored.push(ScoredMessage { message, score });
                }
            }
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(scored)
    }

    fn rank_chunks(&self, ctx: &OpContext, query: &[f32], want: usize) -> Result<Vec<ScoredChunk>> {
        let mut scored = Vec::new();

        if let Some(index) = self.ann_pool(&self.chunks_index) {
            for id in index.search(query, want, false) {
                let chunk = match self.get_chunk(ctx, &id) {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => continue,
                    Err(e) if e.is_interrupt() => return Err(e),
                    Err(e) => {
                        debug!("Skipping ANN candidate {}: {}", id, e);
                        continue;
                    }
                };
                if chunk.has_embedding() {
                    let score = cosine_similarity(query, &chunk.embedding);
                    scored.push(ScoredChunk { chunk, score });
                }
            }
        } else {
            for chunk in self.scan_chunks(ctx)? {
                if chunk.has_embedding() {
                    let score = cosine_similarity(query, &chunk.embedding);
                    scored.push(ScoredChunk { chunk, score });
                }
            }
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(scored)
    }
}
