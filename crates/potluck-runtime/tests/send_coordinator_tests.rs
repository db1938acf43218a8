//! Integration tests for optimistic send, edit and delete
//!
//! Each test drives a full session against the in-memory backend so the
//! optimistic entry, the persisted row and its live-feed echo all meet in
//! the same store.

mod common;

use common::*;
use potluck_core::{
    AuthContext, ErrorKind, MessageId, RecipeRef, SyncError, Timestamp, UserId, ValidationError,
    ViewerRole,
};
use potluck_harness::{BackendCall, InMemoryBackendConfig, Operation};
use tokio::time::Duration;

fn notified_recipients(backend: &potluck_harness::InMemoryBackend) -> Vec<(UserId, String)> {
    backend
        .calls_of(Operation::Notify)
        .into_iter()
        .filter_map(|call| match call {
            BackendCall::Notify {
                recipient, preview, ..
            } => Some((recipient, preview)),
            _ => None,
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Send
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_send_shows_pending_then_reconciles() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;
    backend.set_latency(Duration::from_millis(100));

    let (sent, pending_seen) = tokio::join!(session.send("hello bob", None), async {
        wait_until(|| session.messages().iter().any(|m| m.pending)).await;
        session.messages()
    });

    assert_eq!(pending_seen.len(), 1);
    assert!(pending_seen[0].pending);
    assert!(pending_seen[0].id.is_pending());
    assert_eq!(pending_seen[0].content, "hello bob");

    let sent = sent.expect("Send should succeed");
    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, sent.id);
    assert!(!messages[0].pending);
    assert_eq!(session.store_stats().reconciled, 1);
}

#[tokio::test]
async fn test_send_updates_summary_and_notifies() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;

    let sent = session.send("dinner at eight?", None).await.unwrap();

    let conversation = backend.conversation(&conversation_id()).unwrap();
    assert_eq!(conversation.last_message.as_deref(), Some("dinner at eight?"));
    assert_eq!(conversation.last_message_at, Some(sent.created_at));
    assert_eq!(
        session.conversation().unwrap().last_message.as_deref(),
        Some("dinner at eight?")
    );
    assert_eq!(
        notified_recipients(&backend),
        vec![(UserId::from(BOB), "dinner at eight?".to_string())]
    );
}

#[tokio::test]
async fn test_failed_send_rolls_back_and_returns_draft() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("1", BOB, "hi", 10));
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;

    backend.set_offline(true);
    let recipe = RecipeRef::recipe("lasagna");
    let failure = session
        .send("try this", Some(recipe.clone()))
        .await
        .unwrap_err();
    backend.set_offline(false);

    assert_eq!(failure.kind(), ErrorKind::Transport);
    assert_eq!(failure.content, "try this");
    assert_eq!(failure.recipe_ref, Some(recipe));
    assert_eq!(ids(&session.messages()), vec!["1"]);
    assert_eq!(backend.call_count(Operation::UpdateSummary), 0);
    assert_eq!(backend.call_count(Operation::Notify), 0);
}

#[tokio::test]
async fn test_send_validation() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;

    let empty = session.send("", None).await.unwrap_err();
    assert!(matches!(
        empty.source,
        SyncError::Validation(ValidationError::EmptyMessage)
    ));

    let blank = session.send("   \n", None).await.unwrap_err();
    assert!(matches!(
        blank.source,
        SyncError::Validation(ValidationError::EmptyMessage)
    ));

    let long = "x".repeat(session.config().send.max_content_length + 1);
    let too_long = session.send(&long, None).await.unwrap_err();
    assert!(matches!(
        too_long.source,
        SyncError::Validation(ValidationError::ContentTooLong { .. })
    ));

    assert!(session.messages().is_empty());
    assert_eq!(backend.call_count(Operation::InsertMessage), 0);
}

#[tokio::test]
async fn test_recipe_only_send_uses_recipe_preview() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;

    let sent = session
        .send("", Some(RecipeRef::recipe("banana-bread")))
        .await
        .expect("Recipe-only message should be accepted");

    assert_eq!(sent.recipe_ref, Some(RecipeRef::recipe("banana-bread")));
    let conversation = backend.conversation(&conversation_id()).unwrap();
    assert_eq!(conversation.last_message.as_deref(), Some("Shared a recipe"));
    assert_eq!(
        notified_recipients(&backend),
        vec![(UserId::from(BOB), "Shared a recipe".to_string())]
    );
}

#[tokio::test]
async fn test_send_before_open_rejected() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    let session = create_test_session(&backend, &clock, AuthContext::member(ALICE));

    let failure = session.send("anyone?", None).await.unwrap_err();
    assert!(matches!(
        failure.source,
        SyncError::Validation(ValidationError::Unbound)
    ));
}

#[tokio::test]
async fn test_notifier_failure_does_not_fail_send() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;
    backend.fail_next(Operation::Notify, 1);
    backend.fail_next(Operation::UpdateSummary, 1);

    let sent = session.send("still delivered", None).await;

    assert!(sent.is_ok());
    assert_eq!(backend.persisted_messages(&conversation_id()).len(), 1);
    assert_eq!(session.messages().len(), 1);
}

// ----------------------------------------------------------------------------
// Edit
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_edit_own_message() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("m1", ALICE, "see you at 7", 10));
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;

    let edited = session
        .edit(&MessageId::from("m1"), "see you at 8")
        .await
        .expect("Edit should succeed");

    assert_eq!(edited.content, "see you at 8");
    assert!(edited.updated_at > edited.created_at);
    assert_eq!(edited.updated_at, Timestamp::new(1_000));

    let local = session.message(&MessageId::from("m1")).unwrap();
    assert_eq!(local.content, "see you at 8");
    assert!(local.is_edited());

    let conversation = backend.conversation(&conversation_id()).unwrap();
    assert_eq!(conversation.last_message.as_deref(), Some("see you at 8"));
    assert_eq!(
        notified_recipients(&backend),
        vec![(UserId::from(BOB), "see you at 8".to_string())]
    );
}

#[tokio::test]
async fn test_edit_older_message_keeps_summary() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("m1", ALICE, "first", 10));
    backend.seed_message(create_test_message("m2", BOB, "second", 20));
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;

    session.edit(&MessageId::from("m1"), "first!").await.unwrap();

    assert_eq!(backend.call_count(Operation::UpdateSummary), 0);
    assert_eq!(ids(&session.messages()), vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_edit_of_others_message_forbidden() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("m1", BOB, "original", 10));

    for auth in [
        AuthContext::member(ALICE),
        AuthContext::with_role(ALICE, ViewerRole::Admin),
    ] {
        let mut session = create_test_session(&backend, &clock, auth);
        open_and_follow(&mut session).await;

        let err = session.edit(&MessageId::from("m1"), "hacked").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(session.message(&MessageId::from("m1")).unwrap().content, "original");
        session.close().await;
    }
    assert_eq!(backend.call_count(Operation::UpdateMessage), 0);
}

#[tokio::test]
async fn test_failed_edit_reverts() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("m1", ALICE, "original", 10));
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;
    backend.fail_next(Operation::UpdateMessage, 1);

    let err = session.edit(&MessageId::from("m1"), "changed").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    let local = session.message(&MessageId::from("m1")).unwrap();
    assert_eq!(local.content, "original");
    assert_eq!(local.updated_at, Timestamp::new(10));
    assert_eq!(backend.call_count(Operation::Notify), 0);
}

#[tokio::test]
async fn test_edit_unknown_and_pending_messages() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;

    let missing = session.edit(&MessageId::from("nope"), "x").await.unwrap_err();
    assert!(matches!(missing, SyncError::NotFound { .. }));

    backend.set_latency(Duration::from_millis(100));
    let (sent, pending_edit) = tokio::join!(session.send("in flight", None), async {
        wait_until(|| session.messages().iter().any(|m| m.pending)).await;
        let pending_id = session.messages()[0].id.clone();
        session.edit(&pending_id, "changed").await
    });

    assert!(sent.is_ok());
    assert!(matches!(
        pending_edit,
        Err(SyncError::Validation(ValidationError::StillPending { .. }))
    ));
}

// ----------------------------------------------------------------------------
// Delete
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_delete_own_message() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("m1", ALICE, "oops", 10));
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;

    session.delete(&MessageId::from("m1")).await.unwrap();

    assert!(session.messages().is_empty());
    assert!(backend.persisted_messages(&conversation_id()).is_empty());
}

#[tokio::test]
async fn test_member_cannot_delete_others_message() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("m1", BOB, "mine", 10));
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;

    let err = session.delete(&MessageId::from("m1")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(ids(&session.messages()), vec!["m1"]);
    assert_eq!(backend.call_count(Operation::DeleteMessage), 0);
}

#[tokio::test]
async fn test_moderator_can_delete_others_message() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("m1", BOB, "spam", 10));
    let mut session =
        create_test_session(&backend, &clock, AuthContext::with_role(ALICE, ViewerRole::Moderator));
    open_and_follow(&mut session).await;

    session.delete(&MessageId::from("m1")).await.unwrap();

    assert!(session.messages().is_empty());
    assert!(backend.persisted_messages(&conversation_id()).is_empty());
}

#[tokio::test]
async fn test_failed_delete_restores_message() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("m1", ALICE, "keep me", 10));
    backend.seed_message(create_test_message("m2", BOB, "reply", 20));
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;
    backend.fail_next(Operation::DeleteMessage, 1);

    let err = session.delete(&MessageId::from("m1")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(ids(&session.messages()), vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_deleting_newest_repoints_summary() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    backend.seed_message(create_test_message("m1", BOB, "first", 10));
    backend.seed_message(create_test_message("m2", ALICE, "second", 20));
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;

    session.delete(&MessageId::from("m2")).await.unwrap();

    let conversation = backend.conversation(&conversation_id()).unwrap();
    assert_eq!(conversation.last_message.as_deref(), Some("first"));
    assert_eq!(conversation.last_message_at, Some(Timestamp::new(10)));

    // Deleting the last remaining message clears the summary
    let mut moderator =
        create_test_session(&backend, &clock, AuthContext::with_role(ALICE, ViewerRole::Moderator));
    session.close().await;
    open_and_follow(&mut moderator).await;
    moderator.delete(&MessageId::from("m1")).await.unwrap();

    let conversation = backend.conversation(&conversation_id()).unwrap();
    assert_eq!(conversation.last_message, None);
    assert_eq!(conversation.last_message_at, None);
}

#[tokio::test]
async fn test_concurrent_sends_each_reconcile() {
    let (backend, clock) = create_test_backend(InMemoryBackendConfig::default());
    let mut session = create_test_session(&backend, &clock, AuthContext::member(ALICE));
    open_and_follow(&mut session).await;
    backend.set_latency(Duration::from_millis(20));

    let drafts = ["one", "two", "three"];
    let results = futures::future::join_all(drafts.iter().map(|d| session.send(d, None))).await;

    for result in results {
        tokio_test::assert_ok!(result);
    }
    assert!(wait_until(|| session.messages().iter().all(|m| !m.pending)).await);
    assert_eq!(session.messages().len(), 3);
    assert_eq!(backend.persisted_messages(&conversation_id()).len(), 3);
}
