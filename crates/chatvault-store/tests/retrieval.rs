//! Search behavior through the public store API, on both the exact and the
//! ANN path.

use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use chatvault_core::{ChatVaultConfig, Error, OpContext};
use chatvault_store::kv::{KvEnv, KvOp};
use chatvault_store::schema::message_key;
use chatvault_store::{cosine_similarity, ChatStore, DocumentChunk, Message, Role};
use tempfile::TempDir;

fn store_with(threshold: usize, ann: bool) -> (ChatStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut config = ChatVaultConfig::new(dir.path()).unwrap();
    config.ann.enabled = ann;
    config.ann.threshold = threshold;
    (ChatStore::new(config), dir)
}

fn message(chat_id: &str, content: &str, embedding: Vec<f32>) -> Message {
    Message::new(chat_id, Role::User, content).with_embedding(embedding)
}

fn chunk(chat_id: &str, i: usize, embedding: Vec<f32>) -> DocumentChunk {
    DocumentChunk {
        id: format!("chunk-{i:03}"),
        document_id: "doc-1".into(),
        chat_id: chat_id.into(),
        chunk_index: i,
        content: format!("chunk {i}"),
        embedding,
        start_pos: i * 100,
        end_pos: i * 100 + 99,
        file_path: "/tmp/notes.md".into(),
    }
}

/// Deterministic, mostly distinct directions in 8 dimensions.
fn vector(seed: usize) -> Vec<f32> {
    (0..8)
        .map(|d| (((seed + 1) * (d + 3) * 7919) % 101) as f32 / 101.0 - 0.5)
        .collect()
}

#[test]
fn test_end_to_end_top_two() {
    let (store, _dir) = store_with(2048, true);
    let ctx = OpContext::background();
    let session = store.open_chat(&ctx, "c1").unwrap();

    let vs: Vec<Vec<f32>> = vec![
        vec![1.0, 0.0, 0.0, 0.0],
        vec![0.9, 0.4, 0.0, 0.0],
        vec![0.0, 1.0, 0.0, 0.0],
        vec![0.0, 0.7, 0.7, 0.0],
        vec![0.0, 0.0, 0.0, 1.0],
    ];
    for (i, v) in vs.iter().enumerate() {
        session
            .store_message(&ctx, &message("c1", &format!("v{}", i + 1), v.clone()))
            .unwrap();
    }

    let results = session.search_similar(&ctx, &vs[2], 2).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].message.content, "v3");
    assert_eq!(results[0].score, 1.0);

    let best_other = [0usize, 1, 3, 4]
        .into_iter()
        .max_by(|&a, &b| {
            cosine_similarity(&vs[2], &vs[a]).total_cmp(&cosine_similarity(&vs[2], &vs[b]))
        })
        .unwrap();
    assert_eq!(results[1].message.content, format!("v{}", best_other + 1));
}

#[test]
fn test_search_ignores_unembedded_and_respects_top_k() {
    let (store, _dir) = store_with(2048, true);
    let ctx = OpContext::background();
    let session = store.open_chat(&ctx, "c1").unwrap();

    for i in 0..6 {
        session
            .store_message(&ctx, &message("c1", &format!("m{i}"), vector(i)))
            .unwrap();
    }
    session
        .store_message(&ctx, &Message::new("c1", Role::Assistant, "pending"))
        .unwrap();

    let all = session.search_similar(&ctx, &vector(2), 50).unwrap();
    assert_eq!(all.len(), 6);
    assert!(all.iter().all(|r| r.message.content != "pending"));
    assert!(all.windows(2).all(|w| w[0].score >= w[1].score));

    assert_eq!(session.search_similar(&ctx, &vector(2), 3).unwrap().len(), 3);
    assert!(session.search_similar(&ctx, &vector(2), 0).unwrap().is_empty());
}

#[test]
fn test_hybrid_three_messages_twenty_chunks() {
    let (store, _dir) = store_with(2048, true);
    let ctx = OpContext::background();
    let session = store.open_chat(&ctx, "c1").unwrap();

    for i in 0..3 {
        session
            .store_message(&ctx, &message("c1", &format!("m{i}"), vector(i)))
            .unwrap();
    }
    for i in 0..20 {
        session
            .store_document_chunk(&ctx, &chunk("c1", i, vector(100 + i)))
            .unwrap();
    }

    let results = session
        .search_similar_with_chunks(&ctx, &vector(7), 10)
        .unwrap();
    assert_eq!(results.messages.len(), 3);
    assert_eq!(results.chunks.len(), 7);
    assert!(results.messages.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(results.chunks.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn test_hybrid_no_messages() {
    let (store, _dir) = store_with(2048, true);
    let ctx = OpContext::background();
    let session = store.open_chat(&ctx, "c1").unwrap();

    for i in 0..5 {
        session
            .store_document_chunk(&ctx, &chunk("c1", i, vector(i)))
            .unwrap();
    }

    let results = session
        .search_similar_with_chunks(&ctx, &vector(1), 10)
        .unwrap();
    assert!(results.messages.is_empty());
    assert_eq!(results.chunks.len(), 5);
    assert_eq!(results.len(), 5);
}

#[test]
fn test_ann_path_matches_exact_top_hit() {
    let (ann_store, _a) = store_with(16, true);
    let (exact_store, _b) = store_with(16, false);
    let ctx = OpContext::background();
    let ann = ann_store.open_chat(&ctx, "c1").unwrap();
    let exact = exact_store.open_chat(&ctx, "c1").unwrap();

    for i in 0..64 {
        let m = message("c1", &format!("m{i}"), vector(i));
        ann.store_message(&ctx, &m).unwrap();
        exact.store_message(&ctx, &m).unwrap();
    }
    assert_eq!(ann.stats(&ctx).unwrap().message_index_size, 64);
    assert_eq!(exact.stats(&ctx).unwrap().message_index_size, 0);

    for q in [3usize, 17, 40] {
        let got = ann.search_similar(&ctx, &vector(q), 5).unwrap();
        let want = exact.search_similar(&ctx, &vector(q), 5).unwrap();
        assert_eq!(got[0].message.content, want[0].message.content);
        assert_eq!(got[0].score, 1.0);
        assert!(got.windows(2).all(|w| w[0].score >= w[1].score));
    }
}

#[test]
fn test_indexes_rebuilt_on_reopen() {
    let (store, _dir) = store_with(4, true);
    let ctx = OpContext::background();
    {
        let session = store.open_chat(&ctx, "c1").unwrap();
        for i in 0..8 {
            session
                .store_message(&ctx, &message("c1", &format!("m{i}"), vector(i)))
                .unwrap();
            session
                .store_document_chunk(&ctx, &chunk("c1", i, vector(50 + i)))
                .unwrap();
        }
    }

    let session = store.open_chat(&ctx, "c1").unwrap();
    let stats = session.stats(&ctx).unwrap();
    assert_eq!(stats.message_index_size, 8);
    assert_eq!(stats.chunk_index_size, 8);

    let results = session
        .search_similar_with_chunks(&ctx, &vector(52), 4)
        .unwrap();
    assert_eq!(results.chunks[0].chunk.id, "chunk-002");
    assert_eq!(results.len(), 4);
}

#[test]
fn test_search_cancelled() {
    let (store, _dir) = store_with(2048, true);
    let ctx = OpContext::background();
    let session = store.open_chat(&ctx, "c1").unwrap();
    session
        .store_message(&ctx, &message("c1", "m", vector(0)))
        .unwrap();

    let cancelled = ctx.child();
    cancelled.cancel();
    let err = session
        .search_similar(&cancelled, &vector(0), 1)
        .unwrap_err();
    assert!(err.is_interrupt());
    assert_eq!(session.search_similar(&ctx, &vector(0), 1).unwrap().len(), 1);
}

/// Write `n` embedded messages for `chat_id` in one transaction, before the
/// chat is opened.
fn seed_messages(dir: &TempDir, chat_id: &str, n: usize) {
    let ctx = OpContext::background();
    let path = dir.path().join("chats").join(chat_id).join("messages.db");
    let env = KvEnv::open(&ctx, path, Duration::from_secs(5)).unwrap();
    let ops: Vec<KvOp> = (0..n)
        .map(|i| {
            let embedding: Vec<f32> = (0..32).map(|d| ((i * 31 + d) % 97) as f32).collect();
            let msg = message(chat_id, &format!("bulk {i}"), embedding);
            KvOp::Put {
                key: message_key(&msg.id),
                value: serde_json::to_vec(&msg).unwrap(),
            }
        })
        .collect();
    env.apply(&ctx, &ops).unwrap();
    env.close().unwrap();
}

#[test]
fn test_deadline_interrupts_large_scan() {
    let (store, dir) = store_with(2048, false);
    seed_messages(&dir, "c1", 20_000);
    let ctx = OpContext::background();
    let session = store.open_chat(&ctx, "c1").unwrap();
    let query = vec![1.0; 32];

    let started = Instant::now();
    assert_eq!(session.search_similar(&ctx, &query, 5).unwrap().len(), 5);
    let full_scan = started.elapsed();

    let short = ctx.child().with_timeout(Duration::from_micros(200));
    let started = Instant::now();
    let err = session.search_similar(&short, &query, 5).unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded), "got {err}");
    assert!(started.elapsed() < full_scan);

    // The parent context and the connection stay usable.
    assert_eq!(session.search_similar(&ctx, &query, 5).unwrap().len(), 5);
}

#[test]
fn test_cancel_from_another_thread_interrupts_scan() {
    let (store, dir) = store_with(2048, false);
    seed_messages(&dir, "c1", 20_000);
    let ctx = OpContext::background();
    let session = store.open_chat(&ctx, "c1").unwrap();

    let op = ctx.child();
    let start = Arc::new(Barrier::new(2));
    let canceller = {
        let op = op.clone();
        let start = start.clone();
        std::thread::spawn(move || {
            start.wait();
            op.cancel();
        })
    };

    start.wait();
    let result = session.search_similar_with_chunks(&op, &vec![1.0; 32], 5);
    canceller.join().unwrap();

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(!ctx.is_done());
    assert_eq!(session.stats(&ctx).unwrap().messages, 20_000);
}
