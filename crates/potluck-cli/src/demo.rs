//! Scripted demo session
//!
//! Drives one conversation session through the engine's main paths against
//! the in-memory backend: initial load, a remote insert, a local send and
//! edit, a send rejected while offline, a forced feed drop with reconnect,
//! and a search over the final list.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::{sleep, timeout, Duration};
use tracing::{info, warn};

use potluck_core::{
    AuthContext, Conversation, ConversationId, Message, MessageId, Profile, SystemTimeSource,
    TimeSource, Timestamp, UserId,
};
use potluck_harness::{InMemoryBackend, InMemoryBackendConfig};
use potluck_runtime::{ConversationSession, FeedStatus, SessionBuilder};

use crate::config::{CliAppConfig, DemoConfig};
use crate::error::{CliError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ----------------------------------------------------------------------------
// Demo Report
// ----------------------------------------------------------------------------

/// Outcome of a demo run
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub conversation_id: ConversationId,
    pub messages: Vec<Message>,
    pub search_query: String,
    /// Positions in `messages` matching the search query
    pub search_matches: Vec<usize>,
    /// Content handed back by the send rejected while offline
    pub rejected_draft: Option<String>,
    pub subscribe_attempts: u64,
    pub reconnects: u64,
    pub events_received: u64,
    pub read_marks: u64,
}

impl DemoReport {
    /// Human-readable transcript of the final conversation
    pub fn render(&self) -> String {
        let mut out = format!("Conversation {}\n", self.conversation_id);
        for (position, message) in self.messages.iter().enumerate() {
            let marker = if self.search_matches.contains(&position) {
                '*'
            } else {
                ' '
            };
            let edited = if message.is_edited() { " (edited)" } else { "" };
            out.push_str(&format!(
                "{} {:>2} {:<8} {}{}\n",
                marker, position, message.sender_id, message.content, edited
            ));
        }
        out.push_str(&format!(
            "search {:?}: {} match(es)\n",
            self.search_query,
            self.search_matches.len()
        ));
        if let Some(draft) = &self.rejected_draft {
            out.push_str(&format!("rejected draft kept for retry: {:?}\n", draft));
        }
        out.push_str(&format!(
            "feed: {} subscribe attempt(s), {} reconnect(s), {} event(s); {} read mark(s)\n",
            self.subscribe_attempts, self.reconnects, self.events_received, self.read_marks
        ));
        out
    }
}

// ----------------------------------------------------------------------------
// Demo Runner
// ----------------------------------------------------------------------------

pub struct DemoRunner {
    config: CliAppConfig,
    clock: Arc<SystemTimeSource>,
}

impl DemoRunner {
    pub fn new(config: CliAppConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemTimeSource::new()),
        }
    }

    pub async fn run(&self) -> Result<DemoReport> {
        let demo = &self.config.demo;
        let viewer = UserId::from(demo.viewer.as_str());
        let peer = UserId::from(demo.peer.as_str());
        let conversation_id = ConversationId::from(demo.conversation.as_str());

        let backend = self.seed_backend(demo, &conversation_id, &viewer, &peer)?;
        let mut session = SessionBuilder::new(AuthContext::member(viewer.clone()))
            .with_config(self.config.sync.clone())
            .with_backend(backend.clone())
            .with_time_source(self.clock.clone())
            .build()?;

        // 1. Initial load
        let loaded = session.open(conversation_id.clone()).await?;
        info!(
            "Loaded {} message(s) with {}",
            loaded.message_count, loaded.other_participant.display_name
        );
        self.wait_for("live feed subscription", || {
            session.feed_status() == FeedStatus::Subscribed
        })
        .await?;

        // 2. The peer writes from another client
        let mut remote = self.message(
            "remote-1",
            &conversation_id,
            &peer,
            "Homemade pasta? I'll bring the flour",
        );
        remote.created_at = Timestamp::new(remote.created_at.as_millis().saturating_sub(1_000));
        remote.updated_at = remote.created_at;
        let remote_id = remote.id.clone();
        backend.remote_insert(remote);
        self.wait_for("remote insert", || session.message(&remote_id).is_some())
            .await?;
        info!("Received live message {}", remote_id);

        // 3. Local send and edit
        let sent = session.send("Perfect, I'll bring tomatoes", None).await?;
        info!("Sent message {}", sent.id);
        let edited = session
            .edit(&sent.id, "Perfect, I'll bring tomatoes and basil for the pasta")
            .await?;
        info!("Edited message {}", edited.id);

        // 4. A send while the backend is unreachable is rolled back
        let rejected_draft = self.send_while_offline(&session, &backend).await?;

        // 5. Server drops the subscription; the feed reconnects
        let reconnects_before = session.feed_stats().reconnects;
        backend.drop_subscriptions("simulated server restart");
        self.wait_for("live feed reconnect", || {
            session.feed_stats().reconnects > reconnects_before
                && session.feed_status() == FeedStatus::Subscribed
        })
        .await?;
        info!("Live feed reconnected");

        // 6. Search over the final list
        let search = session.search(&demo.search_query);
        info!(
            "Search {:?} matched {} message(s)",
            search.query,
            search.matches.len()
        );

        let stats = session.feed_stats();
        let report = DemoReport {
            conversation_id,
            messages: session.messages(),
            search_query: search.query,
            search_matches: search.matches,
            rejected_draft,
            subscribe_attempts: stats.subscribe_attempts,
            reconnects: stats.reconnects,
            events_received: stats.events_received,
            read_marks: session.read_stats().marks_sent,
        };
        session.close().await;
        Ok(report)
    }

    fn seed_backend(
        &self,
        demo: &DemoConfig,
        conversation_id: &ConversationId,
        viewer: &UserId,
        peer: &UserId,
    ) -> Result<Arc<InMemoryBackend>> {
        let backend = Arc::new(InMemoryBackend::with_config(
            InMemoryBackendConfig {
                latency_ms: demo.latency_ms,
                ..InMemoryBackendConfig::default()
            },
            self.clock.clone(),
        ));
        backend.seed_conversation(Conversation::new(
            conversation_id.clone(),
            viewer.clone(),
            peer.clone(),
        )?);
        for user in [viewer, peer] {
            backend.add_profile(Profile {
                user_id: user.clone(),
                display_name: capitalize(user.as_str()),
                avatar_ref: None,
            });
        }

        let now = self.clock.now().as_millis();
        let mut opening = self.message(
            "seed-1",
            conversation_id,
            peer,
            "Want to cook together on Saturday?",
        );
        opening.created_at = Timestamp::new(now.saturating_sub(60_000));
        opening.updated_at = opening.created_at;
        let mut reply = self.message("seed-2", conversation_id, viewer, "Sure, what are you thinking?");
        reply.created_at = Timestamp::new(now.saturating_sub(30_000));
        reply.updated_at = reply.created_at;
        backend.seed_message(opening);
        backend.seed_message(reply);
        Ok(backend)
    }

    async fn send_while_offline(
        &self,
        session: &ConversationSession,
        backend: &InMemoryBackend,
    ) -> Result<Option<String>> {
        backend.set_offline(true);
        let outcome = session.send("Are you still there?", None).await;
        backend.set_offline(false);

        match outcome {
            Ok(message) => Err(CliError::Demo(format!(
                "send {} succeeded while the backend was offline",
                message.id
            ))),
            Err(failure) => {
                warn!("Send rejected ({}); draft kept", failure);
                Ok(Some(failure.content))
            }
        }
    }

    fn message(
        &self,
        id: &str,
        conversation_id: &ConversationId,
        sender: &UserId,
        content: &str,
    ) -> Message {
        let now = self.clock.now();
        Message {
            id: MessageId::from(id),
            conversation_id: conversation_id.clone(),
            sender_id: sender.clone(),
            content: content.to_string(),
            recipe_ref: None,
            created_at: now,
            updated_at: now,
            correlation_id: None,
            pending: false,
        }
    }

    async fn wait_for<F: FnMut() -> bool>(&self, what: &str, mut condition: F) -> Result<()> {
        let limit = Duration::from_millis(self.config.demo.step_timeout_ms);
        timeout(limit, async {
            while !condition() {
                sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .map_err(|_| CliError::Demo(format!("timed out waiting for {}", what)))
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
