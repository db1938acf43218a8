//! Live feed subscription management
//!
//! This module contains the LiveFeedManager that owns a conversation's push
//! subscription. It drives [`FeedState`] through its transitions, reconnects
//! with backoff after drops, catches up on rows persisted while disconnected
//! and hydrates partial change payloads before handing them to the session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use potluck_core::backend::{ChangeEvent, FeedSignal, LiveFeed, PersistenceService, RawMessageRow};
use potluck_core::config::LiveFeedConfig;
use potluck_core::message::Message;
use potluck_core::sync::{AuditEntry, FeedEffect, FeedEvent, FeedState, FeedStatus, FeedTransition};
use potluck_core::types::{ConversationId, MessageId, TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Public Types
// ----------------------------------------------------------------------------

/// Hydrated change handed to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedUpdate {
    Upsert(Message),
    Remove(MessageId),
    /// Columns that arrived when hydration failed; merged over any known entry
    Partial {
        row: RawMessageRow,
        received_at: Timestamp,
    },
}

/// Receives every hydrated change; invoked at least once per change
pub type FeedCallback = Arc<dyn Fn(FeedUpdate) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveFeedStats {
    pub subscribe_attempts: u64,
    pub reconnects: u64,
    pub events_received: u64,
    pub hydrations: u64,
    pub hydration_fallbacks: u64,
    pub catch_ups: u64,
    pub catch_up_failures: u64,
}

// ----------------------------------------------------------------------------
// Shared Feed State
// ----------------------------------------------------------------------------

struct FeedShared {
    state: FeedState,
    audit_trail: VecDeque<AuditEntry>,
    stats: LiveFeedStats,
}

/// State shared between the manager and its subscription task
#[derive(Clone)]
struct FeedContext {
    shared: Arc<Mutex<FeedShared>>,
    config: LiveFeedConfig,
    time_source: Arc<dyn TimeSource>,
}

impl FeedContext {
    fn lock(&self) -> MutexGuard<'_, FeedShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply an event; `None` if the current state rejects it
    fn apply(&self, event: FeedEvent) -> Option<FeedTransition> {
        let now = self.time_source.now();
        let mut shared = self.lock();
        match shared.state.clone().transition(event, now, &self.config) {
            Ok(transition) => {
                if transition.audit_entry.from_state != transition.audit_entry.to_state {
                    debug!(
                        "Live feed {} -> {} on {}",
                        transition.audit_entry.from_state,
                        transition.audit_entry.to_state,
                        transition.audit_entry.event
                    );
                }
                shared.state = transition.new_state.clone();
                shared.audit_trail.push_back(transition.audit_entry.clone());
                while shared.audit_trail.len() > self.config.audit_capacity {
                    shared.audit_trail.pop_front();
                }
                Some(transition)
            }
            Err(error) => {
                debug!("Ignoring live feed event: {}", error);
                None
            }
        }
    }

    fn record(&self, f: impl FnOnce(&mut LiveFeedStats)) {
        f(&mut self.lock().stats);
    }
}

// ----------------------------------------------------------------------------
// Live Feed Manager
// ----------------------------------------------------------------------------

struct RunningFeed {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the live subscription for one conversation at a time
pub struct LiveFeedManager {
    feed: Arc<dyn LiveFeed>,
    persistence: Arc<dyn PersistenceService>,
    context: FeedContext,
    running: Option<RunningFeed>,
}

impl LiveFeedManager {
    pub fn new(
        feed: Arc<dyn LiveFeed>,
        persistence: Arc<dyn PersistenceService>,
        time_source: Arc<dyn TimeSource>,
        config: LiveFeedConfig,
    ) -> Self {
        Self {
            feed,
            persistence,
            context: FeedContext {
                shared: Arc::new(Mutex::new(FeedShared {
                    state: FeedState::idle(),
                    audit_trail: VecDeque::new(),
                    stats: LiveFeedStats::default(),
                })),
                config,
                time_source,
            },
            running: None,
        }
    }

    /// Follow `conversation_id`, delivering hydrated changes to `on_message`
    ///
    /// A feed already running for another conversation is stopped first.
    pub async fn start(&mut self, conversation_id: ConversationId, on_message: FeedCallback) {
        if self.running.is_some() {
            self.stop().await;
        }

        let started = self.context.apply(FeedEvent::Start {
            conversation_id: conversation_id.clone(),
        });
        if started.is_none() {
            warn!("Live feed for {} did not start", conversation_id);
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = FeedTask {
            feed: self.feed.clone(),
            persistence: self.persistence.clone(),
            context: self.context.clone(),
            conversation_id,
            on_message,
        };
        self.running = Some(RunningFeed {
            shutdown,
            task: tokio::spawn(task.run(shutdown_rx)),
        });
    }

    /// Unsubscribe and return to `Idle`; no reconnect happens afterwards
    pub async fn stop(&mut self) {
        self.context.apply(FeedEvent::Stop);
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
            if let Err(e) = running.task.await {
                warn!("Live feed task ended abnormally: {}", e);
            }
        }
    }

    pub fn status(&self) -> FeedStatus {
        self.context.lock().state.status()
    }

    pub fn state(&self) -> FeedState {
        self.context.lock().state.clone()
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.context.lock().state.conversation_id().cloned()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn stats(&self) -> LiveFeedStats {
        self.context.lock().stats.clone()
    }

    /// Most recent transitions, oldest first
    pub fn audit_trail(&self) -> Vec<AuditEntry> {
        self.context.lock().audit_trail.iter().cloned().collect()
    }
}

impl Drop for LiveFeedManager {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            self.context.apply(FeedEvent::Stop);
            let _ = running.shutdown.send(true);
        }
    }
}

// ----------------------------------------------------------------------------
// Subscription Task
// ----------------------------------------------------------------------------

struct FeedTask {
    feed: Arc<dyn LiveFeed>,
    persistence: Arc<dyn PersistenceService>,
    context: FeedContext,
    conversation_id: ConversationId,
    on_message: FeedCallback,
}

impl FeedTask {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut resumed = false;
        loop {
            if *shutdown.borrow() {
                return;
            }

            self.context.record(|s| s.subscribe_attempts += 1);
            let subscribed = tokio::select! {
                _ = shutdown.changed() => return,
                result = self.feed.subscribe(&self.conversation_id) => result,
            };

            let reason = match subscribed {
                Ok(mut subscription) => {
                    if self.context.apply(FeedEvent::Acknowledged).is_none() {
                        self.unsubscribe(subscription).await;
                        return;
                    }
                    info!("Live feed subscribed to {}", self.conversation_id);

                    let caught_up = if resumed {
                        self.catch_up().await
                    } else {
                        Ok(())
                    };
                    match caught_up {
                        Err(reason) => {
                            self.unsubscribe(subscription).await;
                            reason
                        }
                        Ok(()) => match self.pump(&mut subscription.events, &mut shutdown).await {
                            Some(reason) => reason,
                            None => {
                                self.unsubscribe(subscription).await;
                                return;
                            }
                        },
                    }
                }
                Err(error) => error.to_string(),
            };

            resumed = true;
            let delay = match self.context.apply(FeedEvent::Closed {
                reason: reason.clone(),
            }) {
                Some(transition) => reconnect_delay(&transition),
                None => return,
            };
            info!(
                "Live feed for {} closed ({}), resubscribing in {}ms",
                self.conversation_id,
                reason,
                delay.as_millis()
            );

            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if self.context.apply(FeedEvent::RetryDue).is_none() {
                return;
            }
            self.context.record(|s| s.reconnects += 1);
        }
    }

    /// Deliver events until the subscription closes (`Some(reason)`) or
    /// shutdown is requested (`None`)
    async fn pump(
        &self,
        events: &mut mpsc::UnboundedReceiver<FeedSignal>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<String> {
        loop {
            let signal = tokio::select! {
                _ = shutdown.changed() => return None,
                signal = events.recv() => signal,
            };
            match signal {
                Some(FeedSignal::Change(event)) => {
                    self.context.apply(FeedEvent::EventReceived);
                    self.context.record(|s| s.events_received += 1);
                    self.deliver(event).await;
                }
                Some(FeedSignal::Closed { reason }) => return Some(reason),
                None => return Some("event stream ended".to_string()),
            }
        }
    }

    /// Forward every persisted row after a resubscribe; the store drops
    /// what it already holds
    async fn catch_up(&self) -> Result<(), String> {
        match self.persistence.fetch_messages(&self.conversation_id).await {
            Ok(messages) => {
                debug!(
                    "Catching up {} message(s) for {}",
                    messages.len(),
                    self.conversation_id
                );
                self.context.record(|s| s.catch_ups += 1);
                for message in messages {
                    (self.on_message)(FeedUpdate::Upsert(message));
                }
                Ok(())
            }
            Err(error) => {
                warn!("Catch-up for {} failed: {}", self.conversation_id, error);
                self.context.record(|s| s.catch_up_failures += 1);
                Err(format!("catch-up failed: {}", error))
            }
        }
    }

    async fn deliver(&self, event: ChangeEvent) {
        let update = match event {
            ChangeEvent::Delete { id } => FeedUpdate::Remove(id),
            ChangeEvent::Insert(row) | ChangeEvent::Update(row) => self.hydrate(row).await,
        };
        (self.on_message)(update);
    }

    /// Fetch the full row for id-only payloads, forwarding the raw columns on failure
    async fn hydrate(&self, row: RawMessageRow) -> FeedUpdate {
        let now = self.context.time_source.now();
        if row.is_complete() {
            return FeedUpdate::Upsert(row.into_message(&self.conversation_id, now));
        }

        match self.persistence.fetch_message_by_id(&row.id).await {
            Ok(Some(message)) => {
                self.context.record(|s| s.hydrations += 1);
                return FeedUpdate::Upsert(message);
            }
            Ok(None) => warn!("Message {} not found during hydration, forwarding raw row", row.id),
            Err(error) => warn!("Hydration of {} failed, forwarding raw row: {}", row.id, error),
        }
        self.context.record(|s| s.hydration_fallbacks += 1);
        FeedUpdate::Partial {
            row,
            received_at: now,
        }
    }

    async fn unsubscribe(&self, subscription: potluck_core::backend::Subscription) {
        if let Err(e) = self.feed.unsubscribe(subscription.handle).await {
            warn!("Failed to unsubscribe {}: {}", subscription.handle, e);
        }
    }
}

fn reconnect_delay(transition: &FeedTransition) -> Duration {
    transition
        .effects
        .iter()
        .find_map(|effect| match effect {
            FeedEffect::ScheduleReconnect { delay_ms } => Some(Duration::from_millis(*delay_ms)),
            _ => None,
        })
        .unwrap_or_default()
}
