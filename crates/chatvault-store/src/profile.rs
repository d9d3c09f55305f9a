//! Per-chat user profile facts with superseded-value history.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use chatvault_core::{OpContext, Result};

use crate::active::{decode_lenient, ActiveChat};
use crate::kv::KvOp;
use crate::schema::{fact_history_key, fact_history_prefix, fact_key, fact_prefix, profile_key};
use crate::types::{ProfileFact, UserProfile};

/// Stored under `profile:<chat_id>`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileHeader {
    #[serde(rename = "chatID")]
    chat_id: String,
    updated_at: DateTime<Utc>,
}

impl ActiveChat {
    fn header_op(&self, updated_at: DateTime<Utc>) -> Result<KvOp> {
        let header = ProfileHeader {
            chat_id: self.chat_id.clone(),
            updated_at,
        };
        Ok(KvOp::Put {
            key: profile_key(&self.chat_id),
            value: serde_json::to_vec(&header)?,
        })
    }

    /// Insert or overwrite a fact. An existing fact keeps its `first_seen`;
    /// if its value changes the previous version moves to history.
    pub(crate) fn upsert_profile_fact(
        &self,
        ctx: &OpContext,
        fact: &ProfileFact,
    ) -> Result<ProfileFact> {
        let key = fact_key(&self.chat_id, &fact.key);
        let mut stored = fact.clone();
        let mut ops = Vec::with_capacity(3);

        if let Some(bytes) = self.kv.get(ctx, &key)? {
            let previous: ProfileFact = serde_json::from_slice(&bytes)?;
            stored.first_seen = previous.first_seen;
            if previous.value != fact.value {
                let seq = self.next_history_seq(ctx, &fact.key)?;
                debug!(
                    "Fact {:?} in chat {} changed, archiving version {}",
                    fact.key, self.chat_id, seq
                );
                ops.push(KvOp::Put {
                    key: fact_history_key(&self.chat_id, &fact.key, seq),
                    value: bytes,
                });
            }
        }

        ops.push(KvOp::Put {
            key,
            value: serde_json::to_vec(&stored)?,
        });
        ops.push(self.header_op(Utc::now())?);
        self.kv.apply(ctx, &ops)?;
        Ok(stored)
    }

    fn next_history_seq(&self, ctx: &OpContext, fact: &str) -> Result<u64> {
        let prefix = fact_history_prefix(&self.chat_id, fact);
        let entries = self.kv.scan_prefix(ctx, &prefix)?;
        let last = entries.last().and_then(|(key, _)| {
            std::str::from_utf8(&key[prefix.len()..])
                .ok()
                .and_then(|seq| seq.parse::<u64>().ok())
        });
        Ok(last.map_or(entries.len() as u64, |seq| seq + 1))
    }

    pub(crate) fn get_profile_fact(&self, ctx: &OpContext, key: &str) -> Result<Option<ProfileFact>> {
        match self.kv.get(ctx, &fact_key(&self.chat_id, key))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a fact and its history. Returns whether the fact existed.
    pub(crate) fn delete_profile_fact(&self, ctx: &OpContext, key: &str) -> Result<bool> {
        let fact = fact_key(&self.chat_id, key);
        let existed = self.kv.get(ctx, &fact)?.is_some();

        let mut ops: Vec<KvOp> = self
            .kv
            .scan_prefix(ctx, &fact_history_prefix(&self.chat_id, key))?
            .into_iter()
            .map(|(key, _)| KvOp::Delete { key })
            .collect();
        if !existed && ops.is_empty() {
            return Ok(false);
        }
        ops.push(KvOp::Delete { key: fact });
        ops.push(self.header_op(Utc::now())?);
        self.kv.apply(ctx, &ops)?;
        Ok(existed)
    }

    /// Superseded versions oldest first, then the current fact.
    pub(crate) fn get_fact_history(&self, ctx: &OpContext, key: &str) -> Result<Vec<ProfileFact>> {
        let entries = self
            .kv
            .scan_prefix(ctx, &fact_history_prefix(&self.chat_id, key))?;
        let mut history: Vec<ProfileFact> = decode_lenient(entries);
        if let Some(current) = self.get_profile_fact(ctx, key)? {
            history.push(current);
        }
        Ok(history)
    }

    /// Replace the whole profile in one transaction. Facts missing from
    /// `profile` are removed along with their history.
    pub(crate) fn store_user_profile(&self, ctx: &OpContext, profile: &UserProfile) -> Result<()> {
        let keep: HashSet<Vec<u8>> = profile
            .facts
            .keys()
            .map(|k| fact_key(&self.chat_id, k))
            .collect();

        let mut ops = Vec::new();
        for current in self.scan_facts(ctx)? {
            let key = fact_key(&self.chat_id, &current.key);
            if keep.contains(&key) {
                continue;
            }
            for (hist, _) in self
                .kv
                .scan_prefix(ctx, &fact_history_prefix(&self.chat_id, &current.key))?
            {
                ops.push(KvOp::Delete { key: hist });
            }
            ops.push(KvOp::Delete { key });
        }

        for (name, fact) in &profile.facts {
            let mut fact = fact.clone();
            fact.key = name.clone();
            ops.push(KvOp::Put {
                key: fact_key(&self.chat_id, name),
                value: serde_json::to_vec(&fact)?,
            });
        }
        ops.push(self.header_op(profile.updated_at)?);

        self.kv.apply(ctx, &ops)?;
        debug!(
            "Stored profile for chat {} with {} facts",
            self.chat_id,
            profile.facts.len()
        );
        Ok(())
    }

    /// The stored profile, or an empty one if nothing was ever written.
    pub(crate) fn get_user_profile(&self, ctx: &OpContext) -> Result<UserProfile> {
        let mut profile = UserProfile::new(self.chat_id.clone());
        if let Some(bytes) = self.kv.get(ctx, &profile_key(&self.chat_id))? {
            let header: ProfileHeader = serde_json::from_slice(&bytes)?;
            profile.updated_at = header.updated_at;
        }
        for fact in self.scan_facts(ctx)? {
            profile.facts.insert(fact.key.clone(), fact);
        }
        Ok(profile)
    }

    fn scan_facts(&self, ctx: &OpContext) -> Result<Vec<ProfileFact>> {
        let entries = self.kv.scan_prefix(ctx, &fact_prefix(&self.chat_id))?;
        Ok(decode_lenient(entries))
    }
}
