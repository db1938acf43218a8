//! Conversation synchronization primitives
//!
//! Synchronous building blocks driven by the runtime crate: the ordered
//! message store, the search view over it and the live-feed state machine.

pub mod feed_state;
pub mod message_store;
pub mod search;

pub use feed_state::{
    AuditEntry, ClosedState, FeedEffect, FeedEvent, FeedState, FeedStatus, FeedTransition,
    IdleState, StateTransitionError, SubscribedState, SubscribingState,
};
pub use message_store::{
    ChangeListener, MessageStore, MessageStoreStats, StoreChange, UpsertOutcome,
};
pub use search::{SearchIndex, SearchState};
