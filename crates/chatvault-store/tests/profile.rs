use std::collections::HashMap;

use chatvault_core::{Error, OpContext};
use chatvault_store::{ChatStore, FactSource, ProfileFact, UserProfile};
use chrono::{Duration, Utc};
use tempfile::TempDir;

fn test_store() -> (ChatStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = ChatStore::open_dir(dir.path()).unwrap();
    (store, dir)
}

#[test]
fn test_empty_profile() {
    let (store, _dir) = test_store();
    let ctx = OpContext::background();
    let session = store.open_chat(&ctx, "c1").unwrap();

    let profile = session.get_user_profile(&ctx).unwrap();
    assert_eq!(profile.chat_id, "c1");
    assert!(profile.facts.is_empty());
    assert_eq!(session.get_profile_fact(&ctx, "name").unwrap(), None);
}

#[test]
fn test_upsert_overwrites_and_keeps_first_seen() {
    let (store, _dir) = test_store();
    let ctx = OpContext::background();
    let session = store.open_chat(&ctx, "c1").unwrap();

    let mut first = ProfileFact::new("city", "Lisbon", FactSource::Inferred).with_confidence(0.4);
    first.first_seen = Utc::now() - Duration::days(3);
    first.last_seen = first.first_seen;
    session.upsert_profile_fact(&ctx, &first).unwrap();

    let second = ProfileFact::new("city", "Porto", FactSource::Explicit);
    let stored = session.upsert_profile_fact(&ctx, &second).unwrap();
    assert_eq!(stored.first_seen, first.first_seen);

    let current = session.get_profile_fact(&ctx, "city").unwrap().unwrap();
    assert_eq!(current.value, "Porto");
    assert_eq!(current.confidence, 1.0);
    assert_eq!(current.source, FactSource::Explicit);
    assert_eq!(current.last_seen, second.last_seen);
    assert_eq!(current.first_seen, first.first_seen);
}

#[test]
fn test_fact_history_tracks_value_changes() {
    let (store, _dir) = test_store();
    let ctx = OpContext::background();
    let _session = store.open_chat(&ctx, "c1").unwrap();

    for value in ["tea", "tea", "coffee", "water"] {
        store
            .upsert_profile_fact(&ctx, &ProfileFact::new("drink", value, FactSource::Explicit))
            .unwrap();
    }

    let values: Vec<_> = store
        .get_fact_history(&ctx, "drink")
        .unwrap()
        .into_iter()
        .map(|f| f.value)
        .collect();
    assert_eq!(values, vec!["tea", "coffee", "water"]);
}

#[test]
fn test_delete_fact_removes_history() {
    let (store, _dir) = test_store();
    let ctx = OpContext::background();
    let _session = store.open_chat(&ctx, "c1").unwrap();

    store
        .upsert_profile_fact(&ctx, &ProfileFact::new("pet", "cat", FactSource::Explicit))
        .unwrap();
    store
        .upsert_profile_fact(&ctx, &ProfileFact::new("pet", "dog", FactSource::Explicit))
        .unwrap();

    assert!(store.delete_profile_fact(&ctx, "pet").unwrap());
    assert!(!store.delete_profile_fact(&ctx, "pet").unwrap());
    assert!(store.get_fact_history(&ctx, "pet").unwrap().is_empty());

    // A new fact under the same key starts a fresh history.
    store
        .upsert_profile_fact(&ctx, &ProfileFact::new("pet", "fish", FactSource::Inferred))
        .unwrap();
    assert_eq!(store.get_fact_history(&ctx, "pet").unwrap().len(), 1);
}

#[test]
fn test_store_user_profile_replaces_facts() {
    let (store, _dir) = test_store();
    let ctx = OpContext::background();
    let _session = store.open_chat(&ctx, "c1").unwrap();

    store
        .upsert_profile_fact(&ctx, &ProfileFact::new("old", "gone", FactSource::Explicit))
        .unwrap();

    let mut profile = UserProfile::new("c1");
    profile.facts = HashMap::from([
        (
            "name".to_string(),
            ProfileFact::new("name", "Ada", FactSource::Explicit),
        ),
        (
            "lang".to_string(),
            ProfileFact::new("lang", "Rust", FactSource::Inferred).with_confidence(0.8),
        ),
    ]);
    store.store_user_profile(&ctx, &profile).unwrap();

    let loaded = store.get_user_profile(&ctx).unwrap();
    assert_eq!(loaded.facts.len(), 2);
    assert_eq!(loaded.facts["name"].value, "Ada");
    assert_eq!(loaded.facts["lang"].confidence, 0.8);
    assert!(!loaded.facts.contains_key("old"));
    assert_eq!(loaded.updated_at, profile.updated_at);
}

#[test]
fn test_fact_keys_with_separators() {
    let (store, _dir) = test_store();
    let ctx = OpContext::background();
    let _session = store.open_chat(&ctx, "c1").unwrap();

    for key in ["a:b", "a", "a:b:c"] {
        store
            .upsert_profile_fact(&ctx, &ProfileFact::new(key, key, FactSource::Explicit))
            .unwrap();
    }
    assert_eq!(store.get_user_profile(&ctx).unwrap().facts.len(), 3);
    assert_eq!(
        store.get_profile_fact(&ctx, "a:b").unwrap().unwrap().value,
        "a:b"
    );
}

#[test]
fn test_profiles_are_per_chat() {
    let (store, _dir) = test_store();
    let ctx = OpContext::background();

    {
        let a = store.open_chat(&ctx, "a").unwrap();
        a.upsert_profile_fact(&ctx, &ProfileFact::new("name", "A", FactSource::Explicit))
            .unwrap();
    }
    let b = store.open_chat(&ctx, "b").unwrap();
    assert!(b.get_user_profile(&ctx).unwrap().facts.is_empty());
}

#[test]
fn test_session_profile_api() {
    let (store, _dir) = test_store();
    let ctx = OpContext::background();
    let session = store.open_chat(&ctx, "c1").unwrap();

    for value in ["red", "blue"] {
        session
            .upsert_profile_fact(&ctx, &ProfileFact::new("color", value, FactSource::Explicit))
            .unwrap();
    }
    assert_eq!(session.get_fact_history(&ctx, "color").unwrap().len(), 2);
    assert!(session.delete_profile_fact(&ctx, "color").unwrap());
    assert!(session.get_fact_history(&ctx, "color").unwrap().is_empty());

    let mut profile = UserProfile::new("c1");
    profile.facts.insert(
        "name".to_string(),
        ProfileFact::new("name", "Grace", FactSource::Explicit),
    );
    session.store_user_profile(&ctx, &profile).unwrap();
    assert_eq!(
        session.get_user_profile(&ctx).unwrap().facts["name"].value,
        "Grace"
    );

    let _other = store.open_chat(&ctx, "c2").unwrap();
    assert!(matches!(
        session.delete_profile_fact(&ctx, "name"),
        Err(Error::NoOpenChat)
    ));
    assert!(matches!(
        session.store_user_profile(&ctx, &profile),
        Err(Error::NoOpenChat)
    ));
}
