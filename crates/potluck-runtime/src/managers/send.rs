//! Optimistic send, edit and delete
//!
//! This module contains the SendCoordinator that applies the local user's
//! intents to the shared store immediately, persists them, and reconciles or
//! rolls back once the backing store answers. Summary updates and
//! notifications are best-effort and never fail an operation.

use std::sync::Arc;

use tracing::{debug, warn};

use potluck_core::backend::{Notifier, PersistenceService};
use potluck_core::config::SendConfig;
use potluck_core::errors::{ErrorKind, SyncError, SyncResult, ValidationError};
use potluck_core::message::{
    AuthContext, Conversation, Message, MessagePatch, NewMessage, RecipeRef, SummaryPatch,
};
use potluck_core::types::{CorrelationId, MessageId, TimeSource, UserId};

use crate::shared_store::{ConversationSlot, SharedStore};

// ----------------------------------------------------------------------------
// Send Failure
// ----------------------------------------------------------------------------

/// A rejected send, carrying the draft so the caller can resubmit it
#[derive(Debug, thiserror::Error)]
#[error("Send failed: {source}")]
pub struct SendFailure {
    pub content: String,
    pub recipe_ref: Option<RecipeRef>,
    #[source]
    pub source: SyncError,
}

impl SendFailure {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    pub fn into_error(self) -> SyncError {
        self.source
    }
}

impl From<SendFailure> for SyncError {
    fn from(failure: SendFailure) -> Self {
        failure.source
    }
}

// ----------------------------------------------------------------------------
// Send Coordinator
// ----------------------------------------------------------------------------

/// Applies local intents optimistically and reconciles with the backing store
pub struct SendCoordinator {
    persistence: Arc<dyn PersistenceService>,
    notifier: Arc<dyn Notifier>,
    time_source: Arc<dyn TimeSource>,
    store: SharedStore,
    conversation: ConversationSlot,
    auth: AuthContext,
    config: SendConfig,
}

impl SendCoordinator {
    pub fn new(
        persistence: Arc<dyn PersistenceService>,
        notifier: Arc<dyn Notifier>,
        time_source: Arc<dyn TimeSource>,
        store: SharedStore,
        conversation: ConversationSlot,
        auth: AuthContext,
        config: SendConfig,
    ) -> Self {
        Self {
            persistence,
            notifier,
            time_source,
            store,
            conversation,
            auth,
            config,
        }
    }

    /// Send a new message; returns the persisted row
    pub async fn send(
        &self,
        content: &str,
        recipe_ref: Option<RecipeRef>,
    ) -> Result<Message, SendFailure> {
        let fail = |source: SyncError| SendFailure {
            content: content.to_string(),
            recipe_ref: recipe_ref.clone(),
            source,
        };

        let conversation = self.open_conversation().map_err(fail)?;
        let recipient = conversation
            .other_participant(&self.auth.viewer_id)
            .map_err(fail)?
            .clone();
        if recipient == self.auth.viewer_id {
            return Err(fail(ValidationError::SelfTarget.into()));
        }
        self.validate_content(content, recipe_ref.is_some())
            .map_err(fail)?;

        let correlation_id = CorrelationId::new();
        let created_at = self.time_source.now();
        let placeholder = Message {
            id: MessageId::pending(&correlation_id),
            conversation_id: conversation.id.clone(),
            sender_id: self.auth.viewer_id.clone(),
            content: content.to_string(),
            recipe_ref: recipe_ref.clone(),
            created_at,
            updated_at: created_at,
            correlation_id: Some(correlation_id),
            pending: true,
        };
        let placeholder_id = placeholder.id.clone();
        self.store
            .update(|store| store.upsert(placeholder))
            .map_err(fail)?;

        let request = NewMessage {
            conversation_id: conversation.id.clone(),
            sender_id: self.auth.viewer_id.clone(),
            content: content.to_string(),
            recipe_ref: recipe_ref.clone(),
            correlation_id,
            created_at,
        };

        let persisted = match self.persistence.insert_message(request).await {
            Ok(persisted) => persisted,
            Err(error) => {
                debug!("Send {} failed, rolling back: {}", correlation_id, error);
                self.store.update(|store| store.remove(&placeholder_id));
                return Err(fail(error));
            }
        };

        // A live-feed echo may already have reconciled the placeholder
        let mut authoritative = persisted.clone();
        if authoritative.correlation_id.is_none() {
            authoritative.correlation_id = Some(correlation_id);
        }
        if let Err(e) = self.store.update(|store| store.upsert(authoritative)) {
            debug!("Persisted message {} not applied locally: {}", persisted.id, e);
        }

        self.publish_summary(&conversation, &persisted).await;
        self.notify(&conversation, &recipient, &persisted).await;
        Ok(persisted)
    }

    /// Edit the content of one of the viewer's own messages
    pub async fn edit(&self, message_id: &MessageId, new_content: &str) -> SyncResult<Message> {
        let conversation = self.open_conversation()?;
        let recipient = conversation.other_participant(&self.auth.viewer_id)?.clone();
        let existing = self.persisted_entry(message_id)?;

        if existing.sender_id != self.auth.viewer_id {
            return Err(SyncError::forbidden(format!(
                "{} cannot edit message {} sent by {}",
                self.auth.viewer_id, message_id, existing.sender_id
            )));
        }
        self.validate_content(new_content, existing.recipe_ref.is_some())?;

        let updated_at = self.time_source.now().max(existing.updated_at + 1);
        let mut optimistic = existing.clone();
        optimistic.content = new_content.to_string();
        optimistic.updated_at = updated_at;
        self.store.update(|store| store.upsert(optimistic.clone()))?;

        let patch = MessagePatch {
            content: new_content.to_string(),
            updated_at,
        };
        let persisted = match self.persistence.update_message(message_id, patch).await {
            Ok(persisted) => persisted,
            Err(error) => {
                debug!("Edit of {} failed, reverting: {}", message_id, error);
                self.store.update(|store| {
                    // Only revert if nothing newer replaced the optimistic value
                    if store.get(message_id) == Some(&optimistic) {
                        let _ = store.upsert(existing);
                    }
                });
                return Err(error);
            }
        };

        if let Err(e) = self.store.update(|store| store.upsert(persisted.clone())) {
            debug!("Edited message {} not applied locally: {}", persisted.id, e);
        }

        let is_newest = self
            .store
            .with(|store| store.latest().map(|m| &m.id == message_id).unwrap_or(false));
        if is_newest {
            self.publish_summary(&conversation, &persisted).await;
        }
        self.notify(&conversation, &recipient, &persisted).await;
        Ok(persisted)
    }

    /// Delete a message; own messages, or any message for elevated roles
    pub async fn delete(&self, message_id: &MessageId) -> SyncResult<()> {
        let conversation = self.open_conversation()?;
        conversation.other_participant(&self.auth.viewer_id)?;
        let existing = self.persisted_entry(message_id)?;

        if existing.sender_id != self.auth.viewer_id && !self.auth.is_elevated() {
            return Err(SyncError::forbidden(format!(
                "{} ({}) cannot delete message {} sent by {}",
                self.auth.viewer_id, self.auth.role, message_id, existing.sender_id
            )));
        }

        let was_newest = self.store.update(|store| {
            let was_newest = store.latest().map(|m| &m.id == message_id).unwrap_or(false);
            store.remove(message_id);
            was_newest
        });

        if let Err(error) = self.persistence.delete_message(message_id).await {
            debug!("Delete of {} failed, restoring: {}", message_id, error);
            self.store.update(|store| {
                if !store.contains(message_id) {
                    let _ = store.upsert(existing);
                }
            });
            return Err(error);
        }

        if was_newest {
            let patch = self.store.with(|store| match store.latest() {
                Some(latest) => summary_for(latest, self.config.preview_length),
                None => SummaryPatch {
                    last_message: None,
                    last_message_at: None,
                },
            });
            self.write_summary(&conversation, patch).await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn open_conversation(&self) -> SyncResult<Conversation> {
        self.conversation
            .get()
            .ok_or_else(|| ValidationError::Unbound.into())
    }

    /// Look up a persisted entry by id; pending entries cannot be modified
    fn persisted_entry(&self, message_id: &MessageId) -> SyncResult<Message> {
        let existing = self
            .store
            .with(|store| store.get(message_id).cloned())
            .ok_or_else(|| SyncError::message_not_found(message_id.as_str()))?;
        if existing.pending {
            return Err(ValidationError::StillPending {
                message_id: message_id.to_string(),
            }
            .into());
        }
        Ok(existing)
    }

    fn validate_content(&self, content: &str, has_recipe: bool) -> SyncResult<()> {
        if content.trim().is_empty() && !has_recipe {
            return Err(ValidationError::EmptyMessage.into());
        }
        let length = content.chars().count();
        if length > self.config.max_content_length {
            return Err(ValidationError::ContentTooLong {
                length,
                max: self.config.max_content_length,
            }
            .into());
        }
        Ok(())
    }

    async fn publish_summary(&self, conversation: &Conversation, message: &Message) {
        let patch = summary_for(message, self.config.preview_length);
        self.write_summary(conversation, patch).await;
    }

    async fn write_summary(&self, conversation: &Conversation, patch: SummaryPatch) {
        match self
            .persistence
            .update_conversation_summary(&conversation.id, patch.clone())
            .await
        {
            Ok(()) => self.conversation.apply_summary(&conversation.id, &patch),
            Err(e) => warn!("Failed to update summary of {}: {}", conversation.id, e),
        }
    }

    async fn notify(&self, conversation: &Conversation, recipient: &UserId, message: &Message) {
        let preview = message.preview(self.config.preview_length);
        if let Err(e) = self
            .notifier
            .notify_new_message(recipient, &self.auth.viewer_id, &conversation.id, &preview)
            .await
        {
            warn!("Failed to notify {} about {}: {}", recipient, message.id, e);
        }
    }
}

fn summary_for(message: &Message, preview_length: usize) -> SummaryPatch {
    SummaryPatch {
        last_message: Some(message.preview(preview_length)),
        last_message_at: Some(message.created_at),
    }
}
