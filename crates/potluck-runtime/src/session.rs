//! Conversation session facade
//!
//! One [`ConversationSession`] per viewer: it owns the shared store, the
//! search view and every manager, and exposes the operations the surrounding
//! application calls.

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::{debug, info};

use potluck_core::config::SyncConfig;
use potluck_core::errors::{SyncError, SyncResult, ValidationError};
use potluck_core::message::{AuthContext, Conversation, Message, Profile, RecipeRef};
use potluck_core::sync::{FeedStatus, MessageStoreStats, SearchIndex, SearchState};
use potluck_core::types::{ConversationId, MessageId, UserId};

use crate::managers::{
    ConversationLoader, FeedCallback, FeedUpdate, LiveFeedManager, LiveFeedStats,
    LoadedConversation, ReadTracker, ReadTrackerStats, SendCoordinator, SendFailure,
};
use crate::shared_store::{ConversationSlot, SharedStore};

/// A viewer's synchronized view of one conversation at a time
pub struct ConversationSession {
    pub(crate) auth: AuthContext,
    pub(crate) config: SyncConfig,
    pub(crate) store: SharedStore,
    pub(crate) conversation: ConversationSlot,
    pub(crate) profiles: HashMap<UserId, Profile>,
    pub(crate) search: SearchIndex,
    pub(crate) loader: ConversationLoader,
    pub(crate) live_feed: LiveFeedManager,
    pub(crate) sender: SendCoordinator,
    pub(crate) read_tracker: ReadTracker,
}

impl ConversationSession {
    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Open a conversation: load it, mark it read, then follow live changes
    ///
    /// Opening while another conversation is open discards the previous
    /// conversation's messages, search and feed.
    pub async fn open(&mut self, conversation_id: ConversationId) -> SyncResult<LoadedConversation> {
        self.close().await;
        self.search.clear();
        self.conversation.clear();
        self.profiles.clear();
        self.store.update(|store| store.bind(conversation_id.clone()));

        let loaded = self.loader.load(&conversation_id, &self.auth.viewer_id).await?;
        self.adopt(&loaded);
        self.read_tracker.mark_read(&conversation_id).await;
        self.follow(&conversation_id).await;

        info!(
            "Opened conversation {} for {}",
            conversation_id, self.auth.viewer_id
        );
        Ok(loaded)
    }

    /// Re-run the loader for the bound conversation
    ///
    /// A running live feed keeps running. After a failed `open` or a `close`
    /// a successful reload starts following the conversation again.
    pub async fn reload(&mut self) -> SyncResult<LoadedConversation> {
        let conversation_id = self
            .store
            .conversation_id()
            .ok_or(ValidationError::Unbound)?;
        let loaded = self.loader.load(&conversation_id, &self.auth.viewer_id).await?;
        self.adopt(&loaded);
        self.read_tracker.mark_read(&conversation_id).await;
        self.follow(&conversation_id).await;
        Ok(loaded)
    }

    /// Stop live updates and read tracking; the store keeps its contents
    pub async fn close(&mut self) {
        self.live_feed.stop().await;
        self.read_tracker.stop().await;
    }

    /// Start read tracking and the live feed unless already running
    async fn follow(&mut self, conversation_id: &ConversationId) {
        if !self.read_tracker.is_tracking() {
            self.read_tracker.start(conversation_id.clone()).await;
        }
        if !self.live_feed.is_running() {
            let store = self.store.clone();
            let on_message: FeedCallback =
                Arc::new(move |update| apply_feed_update(&store, update));
            self.live_feed.start(conversation_id.clone(), on_message).await;
        }
    }

    fn adopt(&mut self, loaded: &LoadedConversation) {
        self.conversation.set(loaded.conversation.clone());
        self.profiles = loaded.profiles.clone();
    }

    // ------------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------------

    /// Ordered, deduplicated messages of the open conversation
    pub fn messages(&self) -> Vec<Message> {
        self.store.snapshot()
    }

    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.store.with(|store| store.get(id).cloned())
    }

    pub fn conversation(&self) -> Option<Conversation> {
        self.conversation.get()
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.store.conversation_id()
    }

    pub fn profiles(&self) -> &HashMap<UserId, Profile> {
        &self.profiles
    }

    /// Profile for `user_id`, falling back to a placeholder
    pub fn profile(&self, user_id: &UserId) -> Profile {
        self.profiles
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| Profile::placeholder(user_id.clone()))
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------------

    pub fn search(&mut self, text: &str) -> SearchState {
        let search = &mut self.search;
        self.store.with(|store| search.query(text, store))
    }

    pub fn search_next(&mut self) -> Option<usize> {
        let search = &mut self.search;
        self.store.with(|store| search.next(store))
    }

    pub fn search_previous(&mut self) -> Option<usize> {
        let search = &mut self.search;
        self.store.with(|store| search.previous(store))
    }

    pub fn clear_search(&mut self) {
        self.search.clear();
    }

    /// Current search result, recomputed if the store changed
    pub fn search_state(&mut self) -> SearchState {
        let search = &mut self.search;
        self.store.with(|store| search.state_for(store))
    }

    // ------------------------------------------------------------------------
    // Local Intents
    // ------------------------------------------------------------------------

    pub async fn send(
        &self,
        content: &str,
        recipe_ref: Option<RecipeRef>,
    ) -> Result<Message, SendFailure> {
        self.sender.send(content, recipe_ref).await
    }

    pub async fn edit(&self, message_id: &MessageId, new_content: &str) -> SyncResult<Message> {
        self.sender.edit(message_id, new_content).await
    }

    pub async fn delete(&self, message_id: &MessageId) -> SyncResult<()> {
        self.sender.delete(message_id).await
    }

    pub async fn set_visible(&self, visible: bool) {
        self.read_tracker.set_visible(visible).await;
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub fn feed_status(&self) -> FeedStatus {
        self.live_feed.status()
    }

    pub fn feed_stats(&self) -> LiveFeedStats {
        self.live_feed.stats()
    }

    pub fn live_feed(&self) -> &LiveFeedManager {
        &self.live_feed
    }

    pub fn read_stats(&self) -> ReadTrackerStats {
        self.read_tracker.stats()
    }

    pub fn store_stats(&self) -> MessageStoreStats {
        self.store.with(|store| store.stats().clone())
    }
}

fn apply_feed_update(store: &SharedStore, update: FeedUpdate) {
    match update {
        FeedUpdate::Upsert(message) => {
            let id = message.id.clone();
            if let Err(e) = store.update(|s| s.upsert(message)) {
                debug!("Live change for {} not applied: {}", id, e);
            }
        }
        FeedUpdate::Remove(id) => {
            store.update(|s| s.remove(&id));
        }
        FeedUpdate::Partial { row, received_at } => {
            let id = row.id.clone();
            let applied = store.update(|s| {
                let message = match (s.get(&row.id), s.conversation_id()) {
                    (Some(known), _) => row.merge_into(known.clone()),
                    (None, Some(bound)) => row.into_message(bound, received_at),
                    (None, None) => return Err(SyncError::from(ValidationError::Unbound)),
                };
                s.upsert(message)
            });
            if let Err(e) = applied {
                debug!("Partial live change for {} not applied: {}", id, e);
            }
        }
    }
}
