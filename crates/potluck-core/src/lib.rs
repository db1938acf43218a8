//! Potluck Conversation Sync Core
//!
//! This crate provides the foundational types, error taxonomy, configuration
//! and synchronous state for keeping one conversation's messages consistent
//! across an initial load, a live change feed and optimistic local writes.
//! Async orchestration lives in `potluck-runtime`; this crate only defines the
//! collaborator traits it drives.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod backend;
pub mod config;
pub mod errors;
pub mod message;
pub mod sync;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use backend::{
    ChangeEvent, FeedSignal, LiveFeed, Notifier, PersistenceService, ProfileResolver,
    RawMessageRow, Subscription, SubscriptionHandle,
};
pub use config::{LiveFeedConfig, LoaderConfig, ReadTrackerConfig, SendConfig, SyncConfig};
pub use errors::{ErrorKind, SyncError, SyncResult, TransportError, ValidationError};
pub use message::{
    AuthContext, Conversation, Message, MessagePatch, NewMessage, Profile, RecipeKind, RecipeRef,
    SummaryPatch, ViewerRole,
};
pub use sync::{
    ChangeListener, FeedEffect, FeedEvent, FeedState, FeedStatus, MessageStore, SearchIndex,
    SearchState, StateTransitionError, StoreChange, UpsertOutcome,
};
pub use types::{
    ConversationId, CorrelationId, MessageId, SystemTimeSource, TimeSource, Timestamp, UserId,
};
