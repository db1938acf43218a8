//! Ordered, Deduplicated Message Storage
//!
//! Holds the messages of exactly one conversation, ordered by
//! `(created_at, id)` and deduplicated by id. Optimistic entries are
//! reconciled against their persisted counterparts by correlation id.
//!
//! Every successful mutation bumps [`MessageStore::revision`] and is reported
//! to the registered [`ChangeListener`]s. Listeners run while the caller holds
//! the store, so they must not call back into it.

use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{SyncResult, ValidationError};
use crate::message::Message;
use crate::types::{ConversationId, CorrelationId, MessageId, Timestamp};

// ----------------------------------------------------------------------------
// Change Notifications
// ----------------------------------------------------------------------------

/// How an `upsert` changed the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    /// New id, no placeholder replaced
    Inserted,
    /// Existing id overwritten with the latest field values
    Updated,
    /// Optimistic placeholder replaced by its persisted counterpart
    Reconciled,
    /// Stale placeholder for a message already persisted; nothing changed
    Ignored,
}

impl UpsertOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, UpsertOutcome::Ignored)
    }
}

/// Notification emitted after each store mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Upserted { id: MessageId, outcome: UpsertOutcome },
    Removed { id: MessageId },
    /// Store was rebound or bulk-replaced
    Reset { conversation_id: ConversationId, count: usize },
}

/// Hook invoked for every [`StoreChange`]
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, change: &StoreChange);
}

impl<F> ChangeListener for F
where
    F: Fn(&StoreChange) + Send + Sync,
{
    fn on_change(&self, change: &StoreChange) {
        self(change)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStoreStats {
    pub inserted: usize,
    pub deduplicated: usize,
    pub reconciled: usize,
    pub ignored: usize,
    pub rejected: usize,
    pub removed: usize,
}

// ----------------------------------------------------------------------------
// Message Store Implementation
// ----------------------------------------------------------------------------

type OrderKey = (Timestamp, MessageId);

/// In-memory message collection bound to a single conversation
pub struct MessageStore {
    conversation_id: Option<ConversationId>,
    /// Messages ordered by `(created_at, id)`
    ordered: BTreeMap<OrderKey, Message>,
    /// Id to creation time, locating an entry in `ordered`
    index: HashMap<MessageId, Timestamp>,
    /// Correlation id to the id of the entry currently carrying it
    correlations: HashMap<CorrelationId, MessageId>,
    listeners: Vec<Arc<dyn ChangeListener>>,
    revision: u64,
    stats: MessageStoreStats,
}

impl MessageStore {
    /// Create a new, unbound store
    pub fn new() -> Self {
        Self {
            conversation_id: None,
            ordered: BTreeMap::new(),
            index: HashMap::default(),
            correlations: HashMap::default(),
            listeners: Vec::new(),
            revision: 0,
            stats: MessageStoreStats::default(),
        }
    }

    /// Create a store already bound to a conversation
    pub fn bound_to(conversation_id: ConversationId) -> Self {
        let mut store = Self::new();
        store.conversation_id = Some(conversation_id);
        store
    }

    /// Register a change listener; listeners survive rebinding
    pub fn add_listener(&mut self, listener: Arc<dyn ChangeListener>) {
        self.listeners.push(listener);
    }

    /// Conversation the store currently belongs to
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    /// Reset the store for a new conversation, discarding all content
    pub fn bind(&mut self, conversation_id: ConversationId) {
        self.clear_content(conversation_id.clone());
        self.revision += 1;
        self.notify(&StoreChange::Reset {
            conversation_id,
            count: 0,
        });
    }

    /// Rebind and bulk-load a snapshot, emitting a single `Reset`
    ///
    /// Messages from other conversations are skipped and counted as rejected.
    pub fn replace_all<I>(&mut self, conversation_id: ConversationId, messages: I) -> usize
    where
        I: IntoIterator<Item = Message>,
    {
        self.clear_content(conversation_id.clone());
        for message in messages {
            if let Err(e) = self.apply_upsert(message) {
                warn!("Skipping message during bulk load: {}", e);
            }
        }
        self.revision += 1;
        let count = self.ordered.len();
        self.notify(&StoreChange::Reset {
            conversation_id,
            count,
        });
        count
    }

    /// Insert or replace a message by id, reconciling optimistic placeholders
    pub fn upsert(&mut self, message: Message) -> SyncResult<UpsertOutcome> {
        let id = message.id.clone();
        let outcome = self.apply_upsert(message)?;
        if outcome.changed() {
            self.revision += 1;
            self.notify(&StoreChange::Upserted { id, outcome });
        }
        Ok(outcome)
    }

    /// Remove a message by id; no-op if absent
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let removed = self.detach(id)?;
        self.stats.removed += 1;
        self.revision += 1;
        self.notify(&StoreChange::Removed { id: id.clone() });
        Some(removed)
    }

    /// Ordered, deduplicated view; iterating has no side effects
    pub fn all(&self) -> impl DoubleEndedIterator<Item = &Message> + ExactSizeIterator + '_ {
        self.ordered.values()
    }

    /// Owned snapshot of [`MessageStore::all`]
    pub fn snapshot(&self) -> Vec<Message> {
        self.ordered.values().cloned().collect()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        let created_at = self.index.get(id)?;
        self.ordered.get(&(*created_at, id.clone()))
    }

    /// Entry currently carrying a correlation id, pending or persisted
    pub fn get_by_correlation(&self, correlation_id: &CorrelationId) -> Option<&Message> {
        let id = self.correlations.get(correlation_id)?;
        self.get(id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    /// Newest message by `(created_at, id)`
    pub fn latest(&self) -> Option<&Message> {
        self.ordered.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.ordered.values().filter(|m| m.pending).count()
    }

    /// Monotonic counter bumped by every mutation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn stats(&self) -> &MessageStoreStats {
        &self.stats
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn clear_content(&mut self, conversation_id: ConversationId) {
        self.conversation_id = Some(conversation_id);
        self.ordered.clear();
        self.index.clear();
        self.correlations.clear();
        self.stats = MessageStoreStats::default();
    }

    fn apply_upsert(&mut self, mut message: Message) -> SyncResult<UpsertOutcome> {
        let bound = match &self.conversation_id {
            Some(bound) => bound,
            None => {
                self.stats.rejected += 1;
                return Err(ValidationError::Unbound.into());
            }
        };
        if &message.conversation_id != bound {
            self.stats.rejected += 1;
            return Err(ValidationError::ConversationMismatch {
                expected: bound.to_string(),
                actual: message.conversation_id.to_string(),
            }
            .into());
        }

        let mut outcome = UpsertOutcome::Inserted;

        // Placeholder reconciliation by correlation id
        if let Some(correlation) = message.correlation_id {
            if let Some(existing_id) = self.correlations.get(&correlation).cloned() {
                if existing_id != message.id {
                    let existing_pending = self.get(&existing_id).map(|m| m.pending).unwrap_or(false);
                    if existing_pending {
                        self.detach(&existing_id);
                        self.stats.reconciled += 1;
                        outcome = UpsertOutcome::Reconciled;
                    } else if message.pending {
                        self.stats.ignored += 1;
                        return Ok(UpsertOutcome::Ignored);
                    }
                }
            }
        }

        // Deduplication by id
        if let Some(previous) = self.detach(&message.id) {
            if message.correlation_id.is_none() {
                message.correlation_id = previous.correlation_id;
            }
            self.stats.deduplicated += 1;
            if outcome == UpsertOutcome::Inserted {
                outcome = UpsertOutcome::Updated;
            }
        } else if outcome == UpsertOutcome::Inserted {
            self.stats.inserted += 1;
        }

        self.index.insert(message.id.clone(), message.created_at);
        if let Some(correlation) = message.correlation_id {
            self.correlations.insert(correlation, message.id.clone());
        }
        self.ordered.insert(message.sort_key(), message);

        Ok(outcome)
    }

    /// Remove an entry from every index without notifying
    fn detach(&mut self, id: &MessageId) -> Option<Message> {
        let created_at = self.index.remove(id)?;
        let message = self.ordered.remove(&(created_at, id.clone()))?;
        if let Some(correlation) = message.correlation_id {
            if self.correlations.get(&correlation) == Some(id) {
                self.correlations.remove(&correlation);
            }
        }
        Some(message)
    }

    fn notify(&self, change: &StoreChange) {
        for listener in &self.listeners {
            listener.on_change(change);
        }
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStore")
            .field("conversation_id", &self.conversation_id)
            .field("messages", &self.ordered.len())
            .field("listeners", &self.listeners.len())
            .field("revision", &self.revision)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SyncError;
    use crate::types::UserId;
    use std::sync::Mutex;

    fn conversation() -> ConversationId {
        ConversationId::from("c1")
    }

    fn create_test_message(id: &str, created_at: u64) -> Message {
        Message {
            id: MessageId::from(id),
            conversation_id: conversation(),
            sender_id: UserId::from("alice"),
            content: format!("message {}", id),
            recipe_ref: None,
            created_at: Timestamp::new(created_at),
            updated_at: Timestamp::new(created_at),
            correlation_id: None,
            pending: false,
        }
    }

    fn ids(store: &MessageStore) -> Vec<String> {
        store.all().map(|m| m.id.to_string()).collect()
    }

    #[test]
    fn test_ordering_by_created_at_then_id() {
        let mut store = MessageStore::bound_to(conversation());
        store.upsert(create_test_message("b", 20)).unwrap();
        store.upsert(create_test_message("c", 10)).unwrap();
        store.upsert(create_test_message("a", 20)).unwrap();

        assert_eq!(ids(&store), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_deduplication_keeps_latest_values() {
        let mut store = MessageStore::bound_to(conversation());
        store.upsert(create_test_message("1", 10)).unwrap();

        let mut redelivered = create_test_message("1", 10);
        redelivered.content = "edited".to_string();
        redelivered.updated_at = Timestamp::new(15);
        let outcome = store.upsert(redelivered).unwrap();

        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&MessageId::from("1")).unwrap().content, "edited");
        assert_eq!(store.stats().deduplicated, 1);
    }

    #[test]
    fn test_placeholder_reconciled_by_correlation() {
        let mut store = MessageStore::bound_to(conversation());
        let correlation = CorrelationId::new();

        let mut pending = create_test_message("ignored", 50);
        pending.id = MessageId::pending(&correlation);
        pending.correlation_id = Some(correlation);
        pending.pending = true;
        store.upsert(pending).unwrap();
        assert_eq!(store.pending_count(), 1);

        // Authoritative row has a server timestamp that may differ
        let mut persisted = create_test_message("A", 52);
        persisted.correlation_id = Some(correlation);
        let outcome = store.upsert(persisted).unwrap();

        assert_eq!(outcome, UpsertOutcome::Reconciled);
        assert_eq!(ids(&store), vec!["A"]);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.get_by_correlation(&correlation).unwrap().id, MessageId::from("A"));
    }

    #[test]
    fn test_late_placeholder_is_ignored() {
        let mut store = MessageStore::bound_to(conversation());
        let correlation = CorrelationId::new();

        let mut persisted = create_test_message("A", 52);
        persisted.correlation_id = Some(correlation);
        store.upsert(persisted).unwrap();

        let mut pending = create_test_message("x", 50);
        pending.id = MessageId::pending(&correlation);
        pending.correlation_id = Some(correlation);
        pending.pending = true;
        let revision = store.revision();

        assert_eq!(store.upsert(pending).unwrap(), UpsertOutcome::Ignored);
        assert_eq!(ids(&store), vec!["A"]);
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn test_redelivery_without_correlation_keeps_it() {
        let mut store = MessageStore::bound_to(conversation());
        let correlation = CorrelationId::new();

        let mut persisted = create_test_message("A", 52);
        persisted.correlation_id = Some(correlation);
        store.upsert(persisted).unwrap();

        // Live-feed rows may omit the correlation column
        store.upsert(create_test_message("A", 52)).unwrap();
        assert_eq!(
            store.get(&MessageId::from("A")).unwrap().correlation_id,
            Some(correlation)
        );
    }

    #[test]
    fn test_rejects_foreign_conversation() {
        let mut store = MessageStore::bound_to(conversation());
        let mut foreign = create_test_message("1", 10);
        foreign.conversation_id = ConversationId::from("other");

        let result = store.upsert(foreign);
        assert!(matches!(
            result,
            Err(SyncError::Validation(ValidationError::ConversationMismatch { .. }))
        ));
        assert!(store.is_empty());
        assert_eq!(store.stats().rejected, 1);
    }

    #[test]
    fn test_unbound_store_rejects() {
        let mut store = MessageStore::new();
        assert!(matches!(
            store.upsert(create_test_message("1", 10)),
            Err(SyncError::Validation(ValidationError::Unbound))
        ));
    }

    #[test]
    fn test_remove_is_noop_when_absent() {
        let mut store = MessageStore::bound_to(conversation());
        store.upsert(create_test_message("1", 10)).unwrap();
        let revision = store.revision();

        assert!(store.remove(&MessageId::from("missing")).is_none());
        assert_eq!(store.revision(), revision);
        assert!(store.remove(&MessageId::from("1")).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_change_notifications() {
        let mut store = MessageStore::bound_to(conversation());
        let seen: Arc<Mutex<Vec<StoreChange>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.add_listener(Arc::new(move |change: &StoreChange| {
            sink.lock().unwrap().push(change.clone());
        }));

        store.upsert(create_test_message("1", 10)).unwrap();
        store.remove(&MessageId::from("1"));
        store.replace_all(conversation(), vec![create_test_message("2", 20)]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[0], StoreChange::Upserted { outcome: UpsertOutcome::Inserted, .. }));
        assert!(matches!(seen[1], StoreChange::Removed { .. }));
        assert!(matches!(seen[2], StoreChange::Reset { count: 1, .. }));
    }

    #[test]
    fn test_bind_discards_previous_conversation() {
        let mut store = MessageStore::bound_to(conversation());
        store.upsert(create_test_message("1", 10)).unwrap();

        store.bind(ConversationId::from("c2"));
        assert!(store.is_empty());
        assert_eq!(store.conversation_id(), Some(&ConversationId::from("c2")));
    }

    #[test]
    fn test_all_is_restartable() {
        let mut store = MessageStore::bound_to(conversation());
        store.upsert(create_test_message("1", 10)).unwrap();
        store.upsert(create_test_message("2", 20)).unwrap();

        let first: Vec<_> = store.all().collect();
        let second: Vec<_> = store.all().collect();
        assert_eq!(first, second);
        assert_eq!(store.all().len(), 2);
        assert_eq!(store.latest().unwrap().id, MessageId::from("2"));
    }
}
