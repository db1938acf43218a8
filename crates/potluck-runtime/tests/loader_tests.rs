//! Integration tests for the conversation loader
//!
//! Exercises access control, batched profile lookup, timeouts and stale
//! attempt handling against the in-memory backend.

mod common;

use std::sync::Arc;

use common::*;
use potluck_core::{ErrorKind, LoaderConfig, SyncError, UserId};
use potluck_harness::{BackendCall, InMemoryBackendConfig, Operation};
use potluck_runtime::{ConversationLoader, SharedStore};
use tokio::time::{sleep, Duration};

fn create_test_loader(
    backend: &Arc<potluck_harness::InMemoryBackend>,
    timeout_ms: u64,
) -> (Arc<ConversationLoader>, SharedStore) {
    let store = SharedStore::new();
    let loader = ConversationLoader::new(
        backend.clone(),
        backend.clone(),
        store.clone(),
        LoaderConfig { timeout_ms },
    );
    (Arc::new(loader), store)
}

#[tokio::test]
async fn test_load_populates_store_in_order() {
    let (backend, _clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("2", BOB, "second", 30));
    backend.seed_message(create_test_message("1", ALICE, "first", 10));
    let (loader, store) = create_test_loader(&backend, 500);

    let loaded = loader
        .load(&conversation_id(), &UserId::from(ALICE))
        .await
        .expect("Load should succeed");

    assert_eq!(loaded.message_count, 2);
    assert_eq!(loaded.other_participant.display_name, "Bob");
    assert_eq!(ids(&store.snapshot()), vec!["1", "2"]);
    assert_eq!(store.conversation_id(), Some(conversation_id()));
}

#[tokio::test]
async fn test_profiles_resolved_in_one_batch() {
    let (backend, _clock) = create_test_backend(InMemoryBackendConfig::default());
    for i in 0..10u64 {
        let sender = if i % 2 == 0 { ALICE } else { BOB };
        backend.seed_message(create_test_message(&format!("m{}", i), sender, "hi", i));
    }
    let (loader, _store) = create_test_loader(&backend, 500);

    let loaded = loader.load(&conversation_id(), &UserId::from(BOB)).await.unwrap();

    let lookups = backend.calls_of(Operation::ResolveProfiles);
    assert_eq!(lookups.len(), 1);
    match &lookups[0] {
        BackendCall::ResolveProfiles(ids) => {
            assert_eq!(ids, &vec![UserId::from(ALICE), UserId::from(BOB)])
        }
        other => panic!("Unexpected call {:?}", other),
    }
    assert_eq!(loaded.other_participant.display_name, "Alice");
    assert_eq!(loaded.profiles.len(), 2);
}

#[tokio::test]
async fn test_unknown_conversation_not_found() {
    let (backend, _clock) = create_test_backend(InMemoryBackendConfig::default());
    let (loader, store) = create_test_loader(&backend, 500);

    let result = loader.load(&"missing".into(), &UserId::from(ALICE)).await;
    assert!(matches!(result, Err(SyncError::NotFound { .. })));
    assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn test_non_participant_forbidden() {
    let (backend, _clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("1", ALICE, "private", 10));
    let (loader, store) = create_test_loader(&backend, 500);

    let result = loader.load(&conversation_id(), &UserId::from("mallory")).await;
    assert!(matches!(result, Err(SyncError::Forbidden { .. })));
    assert!(store.snapshot().is_empty());
    assert_eq!(backend.call_count(Operation::FetchMessages), 0);
}

#[tokio::test]
async fn test_transport_failure_surfaced() {
    let (backend, _clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.fail_next(Operation::FetchMessages, 1);
    let (loader, _store) = create_test_loader(&backend, 500);

    let err = loader
        .load(&conversation_id(), &UserId::from(ALICE))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);

    // Retry is caller-initiated and succeeds once the backend recovers
    tokio_test::assert_ok!(loader.load(&conversation_id(), &UserId::from(ALICE)).await);
}

#[tokio::test]
async fn test_profile_failure_uses_placeholders() {
    let (backend, _clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.fail_next(Operation::ResolveProfiles, 1);
    let (loader, _store) = create_test_loader(&backend, 500);

    let loaded = loader
        .load(&conversation_id(), &UserId::from(ALICE))
        .await
        .expect("Profile failure must not fail the load");
    assert_eq!(
        loaded.other_participant,
        potluck_core::Profile::placeholder(UserId::from(BOB))
    );
}

#[tokio::test]
async fn test_timeout_result_never_applied() {
    let (backend, _clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("1", ALICE, "slow", 10));
    backend.set_latency(Duration::from_millis(150));
    let (loader, store) = create_test_loader(&backend, 50);

    let result = loader.load(&conversation_id(), &UserId::from(ALICE)).await;
    assert!(matches!(result, Err(SyncError::TimedOut { duration_ms: 50 })));

    // Let the detached fetch finish; its result must be dropped
    sleep(Duration::from_millis(600)).await;
    assert!(store.snapshot().is_empty());
    assert!(backend.call_count(Operation::ResolveProfiles) >= 1);
}

#[tokio::test]
async fn test_stale_attempt_superseded() {
    let (backend, _clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("1", ALICE, "hello", 10));
    backend.set_latency(Duration::from_millis(200));
    let (loader, store) = create_test_loader(&backend, 2_000);

    let slow = {
        let loader = loader.clone();
        tokio::spawn(async move { loader.load(&conversation_id(), &UserId::from(ALICE)).await })
    };
    sleep(Duration::from_millis(30)).await;
    backend.set_latency(Duration::ZERO);

    let fresh = loader.load(&conversation_id(), &UserId::from(ALICE)).await.unwrap();
    assert_eq!(fresh.attempt, 2);

    let stale = slow.await.unwrap();
    match stale {
        Err(SyncError::Superseded { attempt, latest }) => {
            assert_eq!(attempt, 1);
            assert_eq!(latest, 2);
        }
        other => panic!("Expected Superseded, got {:?}", other.map(|l| l.attempt)),
    }
    assert_eq!(ids(&store.snapshot()), vec!["1"]);
    assert_eq!(loader.latest_attempt(), 2);
}
