//! Shared handles to session state
//!
//! The message store is the single serialization point of a session. Every
//! component mutates it through [`SharedStore`], whose lock is synchronous and
//! is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use potluck_core::message::{Conversation, Message, SummaryPatch};
use potluck_core::sync::{ChangeListener, MessageStore};
use potluck_core::types::ConversationId;

// ----------------------------------------------------------------------------
// Shared Message Store
// ----------------------------------------------------------------------------

/// Cloneable handle to one session's [`MessageStore`]
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<MessageStore>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MessageStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a read-only closure against the store
    pub fn with<R>(&self, f: impl FnOnce(&MessageStore) -> R) -> R {
        f(&self.lock())
    }

    /// Run a mutating closure against the store
    pub fn update<R>(&self, f: impl FnOnce(&mut MessageStore) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.lock().snapshot()
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.lock().conversation_id().cloned()
    }

    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.lock().add_listener(listener);
    }
}

// ----------------------------------------------------------------------------
// Conversation Slot
// ----------------------------------------------------------------------------

/// Metadata of the conversation currently open in a session
#[derive(Debug, Clone, Default)]
pub struct ConversationSlot {
    inner: Arc<Mutex<Option<Conversation>>>,
}

impl ConversationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Conversation>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> Option<Conversation> {
        self.lock().clone()
    }

    pub fn set(&self, conversation: Conversation) {
        *self.lock() = Some(conversation);
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    /// Apply a summary patch if `conversation_id` is still the open conversation
    pub fn apply_summary(&self, conversation_id: &ConversationId, patch: &SummaryPatch) {
        if let Some(conversation) = self.lock().as_mut() {
            if &conversation.id == conversation_id {
                conversation.apply_summary(patch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use potluck_core::types::Timestamp;

    #[test]
    fn test_clones_share_store() {
        let store = SharedStore::new();
        let other = store.clone();

        store.update(|s| s.bind(ConversationId::from("c1")));
        assert_eq!(other.conversation_id(), Some(ConversationId::from("c1")));
        assert!(other.snapshot().is_empty());
    }

    #[test]
    fn test_summary_only_for_open_conversation() {
        let slot = ConversationSlot::new();
        slot.set(Conversation::new("c1".into(), "alice".into(), "bob".into()).unwrap());

        let patch = SummaryPatch {
            last_message: Some("hi".to_string()),
            last_message_at: Some(Timestamp::new(5)),
        };
        slot.apply_summary(&ConversationId::from("c2"), &patch);
        assert_eq!(slot.get().unwrap().last_message, None);

        slot.apply_summary(&ConversationId::from("c1"), &patch);
        assert_eq!(slot.get().unwrap().last_message.as_deref(), Some("hi"));
    }
}
