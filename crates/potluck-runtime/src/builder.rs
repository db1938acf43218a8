//! Session Builder API
//!
//! Provides a builder-style API for consumers (CLI/tests) to register the
//! collaborators of a session and get a ready [`ConversationSession`].

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::info;

use potluck_core::backend::{LiveFeed, Notifier, PersistenceService, ProfileResolver};
use potluck_core::config::SyncConfig;
use potluck_core::errors::{SyncError, SyncResult};
use potluck_core::message::AuthContext;
use potluck_core::sync::SearchIndex;
use potluck_core::types::{SystemTimeSource, TimeSource};

use crate::managers::{ConversationLoader, LiveFeedManager, ReadTracker, SendCoordinator};
use crate::session::ConversationSession;
use crate::shared_store::{ConversationSlot, SharedStore};

// ----------------------------------------------------------------------------
// Session Builder
// ----------------------------------------------------------------------------

/// Builder for a conversation session
pub struct SessionBuilder {
    auth: AuthContext,
    config: SyncConfig,
    persistence: Option<Arc<dyn PersistenceService>>,
    live_feed: Option<Arc<dyn LiveFeed>>,
    profiles: Option<Arc<dyn ProfileResolver>>,
    notifier: Option<Arc<dyn Notifier>>,
    time_source: Arc<dyn TimeSource>,
}

impl SessionBuilder {
    /// Create a new session builder for the given viewer
    pub fn new(auth: AuthContext) -> Self {
        Self {
            auth,
            config: SyncConfig::default(),
            persistence: None,
            live_feed: None,
            profiles: None,
            notifier: None,
            time_source: Arc::new(SystemTimeSource::new()),
        }
    }

    /// Set the sync configuration
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceService>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_live_feed(mut self, live_feed: Arc<dyn LiveFeed>) -> Self {
        self.live_feed = Some(live_feed);
        self
    }

    pub fn with_profile_resolver(mut self, profiles: Arc<dyn ProfileResolver>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Register one backend implementing every collaborator
    pub fn with_backend<B>(self, backend: Arc<B>) -> Self
    where
        B: PersistenceService + LiveFeed + ProfileResolver + Notifier + 'static,
    {
        self.with_persistence(backend.clone())
            .with_live_feed(backend.clone())
            .with_profile_resolver(backend.clone())
            .with_notifier(backend)
    }

    /// Set the clock used for optimistic timestamps and audit entries
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    /// Validate configuration and assemble the session
    pub fn build(self) -> SyncResult<ConversationSession> {
        self.config.validate()?;

        let persistence = self
            .persistence
            .ok_or_else(|| SyncError::config_error("persistence service not configured"))?;
        let live_feed = self
            .live_feed
            .ok_or_else(|| SyncError::config_error("live feed not configured"))?;
        let profiles = self
            .profiles
            .ok_or_else(|| SyncError::config_error("profile resolver not configured"))?;
        let notifier = self
            .notifier
            .ok_or_else(|| SyncError::config_error("notifier not configured"))?;

        let store = SharedStore::new();
        let conversation = ConversationSlot::new();

        let loader = ConversationLoader::new(
            persistence.clone(),
            profiles,
            store.clone(),
            self.config.loader.clone(),
        );
        let live = LiveFeedManager::new(
            live_feed,
            persistence.clone(),
            self.time_source.clone(),
            self.config.live_feed.clone(),
        );
        let sender = SendCoordinator::new(
            persistence.clone(),
            notifier,
            self.time_source.clone(),
            store.clone(),
            conversation.clone(),
            self.auth.clone(),
            self.config.send.clone(),
        );
        let read_tracker = ReadTracker::new(
            persistence,
            self.auth.viewer_id.clone(),
            self.config.read_tracker.clone(),
        );
        store.add_listener(read_tracker.listener());

        info!(
            "Built conversation session for {} ({})",
            self.auth.viewer_id, self.auth.role
        );

        Ok(ConversationSession {
            auth: self.auth,
            config: self.config,
            store,
            conversation,
            profiles: HashMap::new(),
            search: SearchIndex::new(),
            loader,
            live_feed: live,
            sender,
            read_tracker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_collaborators_rejected() {
        let result = SessionBuilder::new(AuthContext::member("alice")).build();
        match result {
            Err(SyncError::Configuration { reason }) => assert!(reason.contains("persistence")),
            Err(other) => panic!("Expected configuration error, got {}", other),
            Ok(_) => panic!("Expected configuration error"),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = SyncConfig::default();
        config.loader.timeout_ms = 0;
        let result = SessionBuilder::new(AuthContext::member("alice"))
            .with_config(config)
            .build();
        assert!(matches!(result, Err(SyncError::Configuration { .. })));
    }
}
