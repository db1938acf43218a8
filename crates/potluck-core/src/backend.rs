//! Collaborator interfaces for the sync engine
//!
//! The engine never talks to a concrete backend. It reaches the hosted data
//! store, the push feed, profile lookup and notification delivery through the
//! narrow async traits below, each call independently failable.

use async_trait::async_trait;
use core::fmt;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::SyncResult;
use crate::message::{
    Conversation, Message, MessagePatch, NewMessage, Profile, RecipeRef, SummaryPatch,
};
use crate::types::{ConversationId, CorrelationId, MessageId, Timestamp, UserId};

// ----------------------------------------------------------------------------
// Persistence
// ----------------------------------------------------------------------------

/// Request/response access to the hosted backing store
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Conversation metadata, `None` if it does not exist
    async fn fetch_conversation(&self, id: &ConversationId) -> SyncResult<Option<Conversation>>;

    /// Full history ordered by `created_at` ascending
    async fn fetch_messages(&self, conversation_id: &ConversationId) -> SyncResult<Vec<Message>>;

    /// Single persisted row, used to hydrate partial live-feed payloads
    async fn fetch_message_by_id(&self, id: &MessageId) -> SyncResult<Option<Message>>;

    /// Persist a new message; the returned row carries the authoritative id
    /// and echoes the request's correlation id
    async fn insert_message(&self, message: NewMessage) -> SyncResult<Message>;

    async fn update_message(&self, id: &MessageId, patch: MessagePatch) -> SyncResult<Message>;

    async fn delete_message(&self, id: &MessageId) -> SyncResult<()>;

    async fn update_conversation_summary(
        &self,
        id: &ConversationId,
        patch: SummaryPatch,
    ) -> SyncResult<()>;

    /// Idempotent read marker for `user_id`
    async fn mark_conversation_read(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> SyncResult<()>;
}

// ----------------------------------------------------------------------------
// Live Feed
// ----------------------------------------------------------------------------

/// Opaque token identifying an open subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Row payload pushed by the live feed; any column except the id may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessageRow {
    pub id: MessageId,
    pub conversation_id: Option<ConversationId>,
    pub sender_id: Option<UserId>,
    pub content: Option<String>,
    pub recipe_ref: Option<RecipeRef>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    pub correlation_id: Option<CorrelationId>,
}

impl RawMessageRow {
    /// Notification carrying only the message id
    pub fn id_only(id: impl Into<MessageId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Whether every column needed to build a [`Message`] is present
    pub fn is_complete(&self) -> bool {
        self.conversation_id.is_some()
            && self.sender_id.is_some()
            && self.content.is_some()
            && self.created_at.is_some()
    }

    /// Build a message from whatever columns arrived
    ///
    /// Missing columns fall back to the subscribed conversation, an empty
    /// sender and body, and `now` for the timestamps.
    pub fn into_message(self, conversation_id: &ConversationId, now: Timestamp) -> Message {
        let created_at = self.created_at.unwrap_or(now);
        Message {
            id: self.id,
            conversation_id: self.conversation_id.unwrap_or_else(|| conversation_id.clone()),
            sender_id: self.sender_id.unwrap_or_else(|| UserId::new(String::new())),
            content: self.content.unwrap_or_default(),
            recipe_ref: self.recipe_ref,
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
            correlation_id: self.correlation_id,
            pending: false,
        }
    }

    /// Overlay the columns that arrived onto a known message
    ///
    /// Absent columns keep the known values, so the entry stays in place.
    pub fn merge_into(self, known: Message) -> Message {
        Message {
            id: known.id,
            conversation_id: self.conversation_id.unwrap_or(known.conversation_id),
            sender_id: self.sender_id.unwrap_or(known.sender_id),
            content: self.content.unwrap_or(known.content),
            recipe_ref: self.recipe_ref.or(known.recipe_ref),
            created_at: self.created_at.unwrap_or(known.created_at),
            updated_at: self.updated_at.unwrap_or(known.updated_at),
            correlation_id: self.correlation_id.or(known.correlation_id),
            pending: false,
        }
    }
}

impl From<&Message> for RawMessageRow {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            conversation_id: Some(message.conversation_id.clone()),
            sender_id: Some(message.sender_id.clone()),
            content: Some(message.content.clone()),
            recipe_ref: message.recipe_ref.clone(),
            created_at: Some(message.created_at),
            updated_at: Some(message.updated_at),
            correlation_id: message.correlation_id,
        }
    }
}

/// Row-level change pushed for the subscribed conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    Insert(RawMessageRow),
    Update(RawMessageRow),
    Delete { id: MessageId },
}

impl ChangeEvent {
    pub fn message_id(&self) -> &MessageId {
        match self {
            ChangeEvent::Insert(row) | ChangeEvent::Update(row) => &row.id,
            ChangeEvent::Delete { id } => id,
        }
    }
}

/// Item delivered on a subscription's event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedSignal {
    Change(ChangeEvent),
    /// Terminal: the subscription is gone and must be reopened
    Closed { reason: String },
}

/// An acknowledged subscription and its event stream
///
/// Delivery is at-least-once. A stream that ends without a `Closed` signal
/// is treated as closed.
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub events: mpsc::UnboundedReceiver<FeedSignal>,
}

/// Push channel of row changes filtered to one conversation
#[async_trait]
pub trait LiveFeed: Send + Sync {
    /// Open a subscription; returning `Ok` is the acknowledgment
    async fn subscribe(&self, conversation_id: &ConversationId) -> SyncResult<Subscription>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> SyncResult<()>;
}

// ----------------------------------------------------------------------------
// Profiles and Notifications
// ----------------------------------------------------------------------------

/// Batched display-identity lookup
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    /// Resolve every id in one call; unknown ids are simply absent
    async fn resolve_profiles(&self, user_ids: &[UserId]) -> SyncResult<HashMap<UserId, Profile>>;
}

/// Fire-and-forget notification delivery
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_new_message(
        &self,
        recipient: &UserId,
        sender: &UserId,
        conversation_id: &ConversationId,
        preview: &str,
    ) -> SyncResult<()>;
}
