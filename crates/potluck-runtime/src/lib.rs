//! Potluck Runtime Engine
//!
//! This crate contains the async side of the conversation sync engine:
//! - `ConversationLoader`: initial bulk fetch into the message store
//! - `LiveFeedManager`: subscription lifecycle, reconnects and hydration
//! - `SendCoordinator`: optimistic send/edit/delete with rollback
//! - `ReadTracker`: best-effort read markers
//! - `ConversationSession`: the facade tying them to one shared store
//!
//! `potluck-core` provides the synchronous state these components drive.

pub mod builder;
pub mod managers;
pub mod session;
pub mod shared_store;

pub use builder::SessionBuilder;
pub use managers::*;
pub use session::ConversationSession;
pub use shared_store::{ConversationSlot, SharedStore};

// Re-export core types for convenience
pub use potluck_core::{
    AuthContext, Conversation, ConversationId, FeedStatus, Message, MessageId, Profile, RecipeRef,
    SearchState, SyncConfig, SyncError, SyncResult, UserId, ViewerRole,
};
