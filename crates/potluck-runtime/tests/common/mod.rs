//! Shared fixtures for runtime integration tests

#![allow(dead_code)]

use std::sync::Arc;

use potluck_core::{
    AuthContext, Conversation, ConversationId, Message, MessageId, Profile, SyncConfig, Timestamp,
    UserId,
};
use potluck_harness::{InMemoryBackend, InMemoryBackendConfig, MockTimeSource};
use potluck_runtime::{ConversationSession, FeedStatus, SessionBuilder};
use tokio::time::{sleep, timeout, Duration};

pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";
pub const CONVERSATION: &str = "c1";

pub fn conversation_id() -> ConversationId {
    ConversationId::from(CONVERSATION)
}

/// Backend with conversation `c1` between alice and bob and both profiles
pub fn create_test_backend(config: InMemoryBackendConfig) -> (Arc<InMemoryBackend>, MockTimeSource) {
    let clock = MockTimeSource::new_at(1_000);
    let backend = Arc::new(InMemoryBackend::with_config(config, Arc::new(clock.clone())));
    backend.seed_conversation(
        Conversation::new(conversation_id(), UserId::from(ALICE), UserId::from(BOB))
            .expect("valid conversation"),
    );
    for (id, name) in [(ALICE, "Alice"), (BOB, "Bob")] {
        backend.add_profile(Profile {
            user_id: UserId::from(id),
            display_name: name.to_string(),
            avatar_ref: None,
        });
    }
    (backend, clock)
}

pub fn create_test_session(
    backend: &Arc<InMemoryBackend>,
    clock: &MockTimeSource,
    auth: AuthContext,
) -> ConversationSession {
    SessionBuilder::new(auth)
        .with_config(SyncConfig::testing())
        .with_backend(backend.clone())
        .with_time_source(Arc::new(clock.clone()))
        .build()
        .expect("Failed to build session")
}

pub fn create_test_message(id: &str, sender: &str, content: &str, created_at: u64) -> Message {
    Message {
        id: MessageId::from(id),
        conversation_id: conversation_id(),
        sender_id: UserId::from(sender),
        content: content.to_string(),
        recipe_ref: None,
        created_at: Timestamp::new(created_at),
        updated_at: Timestamp::new(created_at),
        correlation_id: None,
        pending: false,
    }
}

/// Open `c1` and wait until the live feed is subscribed
pub async fn open_and_follow(session: &mut ConversationSession) {
    session
        .open(conversation_id())
        .await
        .expect("Failed to open conversation");
    assert!(
        wait_until(|| session.feed_status() == FeedStatus::Subscribed).await,
        "Live feed never subscribed"
    );
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

pub fn ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.id.to_string()).collect()
}
