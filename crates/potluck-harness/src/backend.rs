//! In-Memory Backend for Testing
//!
//! Provides a deterministic stand-in for the hosted backing store, live feed,
//! profile service and notifier. Supports simulated latency, offline periods,
//! targeted failure injection, forced feed drops and call recording.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

use potluck_core::backend::{
    ChangeEvent, FeedSignal, LiveFeed, Notifier, PersistenceService, ProfileResolver,
    RawMessageRow, Subscription, SubscriptionHandle,
};
use potluck_core::errors::{SyncError, SyncResult};
use potluck_core::message::{
    Conversation, Message, MessagePatch, NewMessage, Profile, SummaryPatch,
};
use potluck_core::types::{
    ConversationId, MessageId, SystemTimeSource, TimeSource, UserId,
};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// How write echoes are pushed to live-feed subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedPayload {
    /// Every column of the row
    #[default]
    Full,
    /// Only the message id; subscribers must hydrate
    IdOnly,
}

/// Configuration for in-memory backend behavior
#[derive(Debug, Clone)]
pub struct InMemoryBackendConfig {
    /// Delay applied to every collaborator call
    pub latency_ms: u64,
    /// Whether writes through the persistence API are pushed to subscribers
    pub echo_writes: bool,
    pub feed_payload: FeedPayload,
}

impl Default for InMemoryBackendConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            echo_writes: true,
            feed_payload: FeedPayload::Full,
        }
    }
}

impl InMemoryBackendConfig {
    /// Feed that only pushes message ids, forcing hydration fetches
    pub fn id_only_feed() -> Self {
        Self {
            feed_payload: FeedPayload::IdOnly,
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Call Recording
// ----------------------------------------------------------------------------

/// Collaborator operations, used to target failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FetchConversation,
    FetchMessages,
    FetchMessageById,
    InsertMessage,
    UpdateMessage,
    DeleteMessage,
    UpdateSummary,
    MarkRead,
    Subscribe,
    Unsubscribe,
    ResolveProfiles,
    Notify,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::FetchConversation => "fetch_conversation",
            Operation::FetchMessages => "fetch_messages",
            Operation::FetchMessageById => "fetch_message_by_id",
            Operation::InsertMessage => "insert_message",
            Operation::UpdateMessage => "update_message",
            Operation::DeleteMessage => "delete_message",
            Operation::UpdateSummary => "update_conversation_summary",
            Operation::MarkRead => "mark_conversation_read",
            Operation::Subscribe => "subscribe",
            Operation::Unsubscribe => "unsubscribe",
            Operation::ResolveProfiles => "resolve_profiles",
            Operation::Notify => "notify_new_message",
        }
    }
}

/// A recorded collaborator call with its arguments
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    FetchConversation(ConversationId),
    FetchMessages(ConversationId),
    FetchMessageById(MessageId),
    InsertMessage(NewMessage),
    UpdateMessage(MessageId, MessagePatch),
    DeleteMessage(MessageId),
    UpdateSummary(ConversationId, SummaryPatch),
    MarkRead(ConversationId, UserId),
    Subscribe(ConversationId),
    Unsubscribe(SubscriptionHandle),
    ResolveProfiles(Vec<UserId>),
    Notify {
        recipient: UserId,
        sender: UserId,
        conversation_id: ConversationId,
        preview: String,
    },
}

impl BackendCall {
    pub fn operation(&self) -> Operation {
        match self {
            BackendCall::FetchConversation(_) => Operation::FetchConversation,
            BackendCall::FetchMessages(_) => Operation::FetchMessages,
            BackendCall::FetchMessageById(_) => Operation::FetchMessageById,
            BackendCall::InsertMessage(_) => Operation::InsertMessage,
            BackendCall::UpdateMessage(..) => Operation::UpdateMessage,
            BackendCall::DeleteMessage(_) => Operation::DeleteMessage,
            BackendCall::UpdateSummary(..) => Operation::UpdateSummary,
            BackendCall::MarkRead(..) => Operation::MarkRead,
            BackendCall::Subscribe(_) => Operation::Subscribe,
            BackendCall::Unsubscribe(_) => Operation::Unsubscribe,
            BackendCall::ResolveProfiles(_) => Operation::ResolveProfiles,
            BackendCall::Notify { .. } => Operation::Notify,
        }
    }
}

// ----------------------------------------------------------------------------
// In-Memory Backend
// ----------------------------------------------------------------------------

struct Subscriber {
    conversation_id: ConversationId,
    sender: mpsc::UnboundedSender<FeedSignal>,
}

struct BackendState {
    config: InMemoryBackendConfig,
    conversations: HashMap<ConversationId, Conversation>,
    messages: Vec<Message>,
    profiles: HashMap<UserId, Profile>,
    subscribers: HashMap<u64, Subscriber>,
    next_message: u64,
    next_handle: u64,
    offline: bool,
    failures: HashMap<Operation, usize>,
    calls: Vec<BackendCall>,
}

impl BackendState {
    fn take_failure(&mut self, operation: Operation) -> Option<SyncError> {
        if self.offline {
            return Some(SyncError::unavailable("backend offline"));
        }
        let remaining = self.failures.get_mut(&operation)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(SyncError::request_failed(operation.name(), "injected failure"))
    }

    fn row_for(&self, message: &Message) -> RawMessageRow {
        match self.config.feed_payload {
            FeedPayload::Full => RawMessageRow::from(message),
            FeedPayload::IdOnly => RawMessageRow::id_only(message.id.clone()),
        }
    }

    fn broadcast(&mut self, conversation_id: &ConversationId, event: ChangeEvent) {
        self.subscribers.retain(|handle, subscriber| {
            if &subscriber.conversation_id != conversation_id {
                return true;
            }
            let delivered = subscriber
                .sender
                .send(FeedSignal::Change(event.clone()))
                .is_ok();
            if !delivered {
                debug!("Dropping subscriber {} with closed receiver", handle);
            }
            delivered
        });
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }
}

/// Shared in-memory backend; clones operate on the same state
#[derive(Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
    clock: Arc<dyn TimeSource>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_config(InMemoryBackendConfig::default(), Arc::new(SystemTimeSource::new()))
    }

    /// Backend stamping persisted rows with `clock`
    pub fn with_clock(clock: Arc<dyn TimeSource>) -> Self {
        Self::with_config(InMemoryBackendConfig::default(), clock)
    }

    pub fn with_config(config: InMemoryBackendConfig, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                config,
                conversations: HashMap::new(),
                messages: Vec::new(),
                profiles: HashMap::new(),
                subscribers: HashMap::new(),
                next_message: 0,
                next_handle: 0,
                offline: false,
                failures: HashMap::new(),
                calls: Vec::new(),
            })),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call, apply latency, then surface any injected failure
    async fn enter(&self, call: BackendCall) -> SyncResult<()> {
        let (latency_ms, failure) = {
            let mut state = self.lock();
            let operation = call.operation();
            state.calls.push(call);
            let failure = state.take_failure(operation);
            (state.config.latency_ms, failure)
        };
        if latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------------

    pub fn seed_conversation(&self, conversation: Conversation) {
        self.lock()
            .conversations
            .insert(conversation.id.clone(), conversation);
    }

    /// Persist a message without notifying subscribers
    pub fn seed_message(&self, message: Message) {
        let mut state = self.lock();
        match state.position(&message.id) {
            Some(index) => state.messages[index] = message,
            None => state.messages.push(message),
        }
    }

    pub fn add_profile(&self, profile: Profile) {
        self.lock().profiles.insert(profile.user_id.clone(), profile);
    }

    // ------------------------------------------------------------------------
    // Remote Activity
    // ------------------------------------------------------------------------

    /// Persist a message written by another client and push it to subscribers
    pub fn remote_insert(&self, message: Message) {
        let mut state = self.lock();
        let row = state.row_for(&message);
        let conversation_id = message.conversation_id.clone();
        match state.position(&message.id) {
            Some(index) => state.messages[index] = message,
            None => state.messages.push(message),
        }
        state.broadcast(&conversation_id, ChangeEvent::Insert(row));
    }

    /// Overwrite a persisted message and push an update
    pub fn remote_update(&self, message: Message) {
        let mut state = self.lock();
        let row = state.row_for(&message);
        let conversation_id = message.conversation_id.clone();
        if let Some(index) = state.position(&message.id) {
            state.messages[index] = message;
        }
        state.broadcast(&conversation_id, ChangeEvent::Update(row));
    }

    /// Delete a persisted message and push the removal
    pub fn remote_delete(&self, id: &MessageId) {
        let mut state = self.lock();
        if let Some(index) = state.position(id) {
            let removed = state.messages.remove(index);
            state.broadcast(&removed.conversation_id, ChangeEvent::Delete { id: id.clone() });
        }
    }

    /// Push a raw change without touching persisted state
    pub fn push_change(&self, conversation_id: &ConversationId, event: ChangeEvent) {
        self.lock().broadcast(conversation_id, event);
    }

    /// Close every open subscription as a server drop would
    pub fn drop_subscriptions(&self, reason: &str) -> usize {
        let mut state = self.lock();
        let dropped = state.subscribers.len();
        for (_, subscriber) in state.subscribers.drain() {
            let _ = subscriber.sender.send(FeedSignal::Closed {
                reason: reason.to_string(),
            });
        }
        dropped
    }

    pub fn subscriber_count(&self, conversation_id: &ConversationId) -> usize {
        self.lock()
            .subscribers
            .values()
            .filter(|s| &s.conversation_id == conversation_id && !s.sender.is_closed())
            .count()
    }

    // ------------------------------------------------------------------------
    // Fault Injection
    // ------------------------------------------------------------------------

    /// Fail every call with `Unavailable` until set back online
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Fail the next `count` calls of `operation`
    pub fn fail_next(&self, operation: Operation, count: usize) {
        *self.lock().failures.entry(operation).or_insert(0) += count;
    }

    /// Delay applied to calls started from now on
    pub fn set_latency(&self, latency: Duration) {
        self.lock().config.latency_ms = latency.as_millis() as u64;
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    pub fn calls_of(&self, operation: Operation) -> Vec<BackendCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Persisted rows of a conversation in `(created_at, id)` order
    pub fn persisted_messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .lock()
            .messages
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.sort_key());
        messages
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.lock().conversations.get(id).cloned()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Collaborator Implementations
// ----------------------------------------------------------------------------

#[async_trait]
impl PersistenceService for InMemoryBackend {
    async fn fetch_conversation(&self, id: &ConversationId) -> SyncResult<Option<Conversation>> {
        self.enter(BackendCall::FetchConversation(id.clone())).await?;
        Ok(self.lock().conversations.get(id).cloned())
    }

    async fn fetch_messages(&self, conversation_id: &ConversationId) -> SyncResult<Vec<Message>> {
        self.enter(BackendCall::FetchMessages(conversation_id.clone()))
            .await?;
        Ok(self.persisted_messages(conversation_id))
    }

    async fn fetch_message_by_id(&self, id: &MessageId) -> SyncResult<Option<Message>> {
        self.enter(BackendCall::FetchMessageById(id.clone())).await?;
        let state = self.lock();
        Ok(state.position(id).map(|index| state.messages[index].clone()))
    }

    async fn insert_message(&self, message: NewMessage) -> SyncResult<Message> {
        self.enter(BackendCall::InsertMessage(message.clone())).await?;

        let mut state = self.lock();
        if !state.conversations.contains_key(&message.conversation_id) {
            return Err(SyncError::conversation_not_found(
                message.conversation_id.as_str(),
            ));
        }
        state.next_message += 1;
        let now = self.clock.now();
        let persisted = Message {
            id: MessageId::new(format!("msg-{:04}", state.next_message)),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            recipe_ref: message.recipe_ref,
            created_at: now,
            updated_at: now,
            correlation_id: Some(message.correlation_id),
            pending: false,
        };
        state.messages.push(persisted.clone());

        if state.config.echo_writes {
            let row = state.row_for(&persisted);
            state.broadcast(&persisted.conversation_id, ChangeEvent::Insert(row));
        }
        Ok(persisted)
    }

    async fn update_message(&self, id: &MessageId, patch: MessagePatch) -> SyncResult<Message> {
        self.enter(BackendCall::UpdateMessage(id.clone(), patch.clone()))
            .await?;

        let mut state = self.lock();
        let index = state
            .position(id)
            .ok_or_else(|| SyncError::message_not_found(id.as_str()))?;
        let updated = {
            let message = &mut state.messages[index];
            message.content = patch.content;
            message.updated_at = patch.updated_at;
            message.clone()
        };

        if state.config.echo_writes {
            let row = state.row_for(&updated);
            state.broadcast(&updated.conversation_id, ChangeEvent::Update(row));
        }
        Ok(updated)
    }

    async fn delete_message(&self, id: &MessageId) -> SyncResult<()> {
        self.enter(BackendCall::DeleteMessage(id.clone())).await?;

        let mut state = self.lock();
        let index = state
            .position(id)
            .ok_or_else(|| SyncError::message_not_found(id.as_str()))?;
        let removed = state.messages.remove(index);

        if state.config.echo_writes {
            state.broadcast(&removed.conversation_id, ChangeEvent::Delete { id: id.clone() });
        }
        Ok(())
    }

    async fn update_conversation_summary(
        &self,
        id: &ConversationId,
        patch: SummaryPatch,
    ) -> SyncResult<()> {
        self.enter(BackendCall::UpdateSummary(id.clone(), patch.clone()))
            .await?;
        let mut state = self.lock();
        let conversation = state
            .conversations
            .get_mut(id)
            .ok_or_else(|| SyncError::conversation_not_found(id.as_str()))?;
        conversation.apply_summary(&patch);
        Ok(())
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> SyncResult<()> {
        self.enter(BackendCall::MarkRead(conversation_id.clone(), user_id.clone()))
            .await
    }
}

#[async_trait]
impl LiveFeed for InMemoryBackend {
    async fn subscribe(&self, conversation_id: &ConversationId) -> SyncResult<Subscription> {
        self.enter(BackendCall::Subscribe(conversation_id.clone()))
            .await?;

        let (sender, events) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.next_handle += 1;
        let handle = state.next_handle;
        state.subscribers.insert(
            handle,
            Subscriber {
                conversation_id: conversation_id.clone(),
                sender,
            },
        );
        debug!("Opened subscription {} for {}", handle, conversation_id);

        Ok(Subscription {
            handle: SubscriptionHandle::new(handle),
            events,
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> SyncResult<()> {
        self.lock().subscribers.remove(&handle.as_u64());
        self.enter(BackendCall::Unsubscribe(handle)).await
    }
}

#[async_trait]
impl ProfileResolver for InMemoryBackend {
    async fn resolve_profiles(&self, user_ids: &[UserId]) -> SyncResult<HashMap<UserId, Profile>> {
        self.enter(BackendCall::ResolveProfiles(user_ids.to_vec()))
            .await?;
        let state = self.lock();
        Ok(user_ids
            .iter()
            .filter_map(|id| state.profiles.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }
}

#[async_trait]
impl Notifier for InMemoryBackend {
    async fn notify_new_message(
        &self,
        recipient: &UserId,
        sender: &UserId,
        conversation_id: &ConversationId,
        preview: &str,
    ) -> SyncResult<()> {
        self.enter(BackendCall::Notify {
            recipient: recipient.clone(),
            sender: sender.clone(),
            conversation_id: conversation_id.clone(),
            preview: preview.to_string(),
        })
        .await
    }
}
