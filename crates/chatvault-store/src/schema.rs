//! Key-value table SQL and the key layout of a chat database.

/// SQLite file inside the `messages.db/` environment directory.
pub const DB_FILE: &str = "store.sqlite";

/// Single ordered key-value table. Keys compare as raw bytes.
pub const KV_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key BLOB PRIMARY KEY NOT NULL,
    value BLOB NOT NULL
) WITHOUT ROWID;
"#;

pub const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;";

pub const MESSAGE_PREFIX: &str = "msg:";
pub const DOCUMENT_PREFIX: &str = "doc:";
pub const CHUNK_PREFIX: &str = "chunk:";

pub fn message_key(id: &str) -> Vec<u8> {
    format!("{MESSAGE_PREFIX}{id}").into_bytes()
}

pub fn document_key(id: &str) -> Vec<u8> {
    format!("{DOCUMENT_PREFIX}{id}").into_bytes()
}

pub fn chunk_key(id: &str) -> Vec<u8> {
    format!("{CHUNK_PREFIX}{id}").into_bytes()
}

/// `profile:<chat_id>` holds the profile header.
pub fn profile_key(chat_id: &str) -> Vec<u8> {
    format!("profile:{chat_id}").into_bytes()
}

/// Prefix of every current fact for a chat.
pub fn fact_prefix(chat_id: &str) -> Vec<u8> {
    format!("fact:{chat_id}:").into_bytes()
}

/// Fact keys are hex-encoded so arbitrary text cannot collide with `:`.
pub fn fact_key(chat_id: &str, key: &str) -> Vec<u8> {
    format!("fact:{chat_id}:{}", hex::encode(key)).into_bytes()
}

/// Prefix of every history entry of one fact.
pub fn fact_history_prefix(chat_id: &str, key: &str) -> Vec<u8> {
    format!("facthist:{chat_id}:{}:", hex::encode(key)).into_bytes()
}

/// Zero padded so history entries scan in insertion order.
pub fn fact_history_key(chat_id: &str, key: &str, seq: u64) -> Vec<u8> {
    let mut out = fact_history_prefix(chat_id, key);
    out.extend_from_slice(format!("{seq:08}").as_bytes());
    out
}

/// Prefix of every history entry for a chat.
pub fn fact_history_chat_prefix(chat_id: &str) -> Vec<u8> {
    format!("facthist:{chat_id}:").into_bytes()
}

/// Smallest key strictly greater than every key starting with `prefix`.
///
/// `None` when no such bound exists (empty or all-0xFF prefix).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.pop() {
        if last < u8::MAX {
            bound.push(last + 1);
            return Some(bound);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_bound() {
        assert_eq!(prefix_upper_bound(b"msg:"), Some(b"msg;".to_vec()));
        assert_eq!(prefix_upper_bound(&[0x61, 0xFF]), Some(vec![0x62]));
        assert_eq!(prefix_upper_bound(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_upper_bound(b""), None);
    }

    #[test]
    fn test_fact_keys_escape_separator() {
        let key = fact_key("c1", "home:city");
        assert_eq!(key, b"fact:c1:686f6d653a63697479".to_vec());
        assert!(key.starts_with(&fact_prefix("c1")));
    }

    #[test]
    fn test_history_keys_sort_by_sequence() {
        let a = fact_history_key("c1", "name", 9);
        let b = fact_history_key("c1", "name", 10);
        assert!(a < b);
        assert!(a.starts_with(&fact_history_prefix("c1", "name")));
        assert!(a.starts_with(&fact_history_chat_prefix("c1")));
    }

    #[test]
    fn test_prefixes_do_not_overlap() {
        assert!(!chunk_key("x").starts_with(MESSAGE_PREFIX.as_bytes()));
        assert!(!fact_history_key("c1", "k", 0).starts_with(&fact_prefix("c1")));
    }
}
