//! Stateful managers for the Potluck runtime
//!
//! Each manager owns one concern of a conversation session and mutates the
//! shared message store only through [`crate::SharedStore`].

pub mod live_feed;
pub mod loader;
pub mod read_tracker;
pub mod send;

pub use live_feed::{FeedCallback, FeedUpdate, LiveFeedManager, LiveFeedStats};
pub use loader::{ConversationLoader, LoadedConversation};
pub use read_tracker::{ReadTracker, ReadTrackerStats};
pub use send::{SendCoordinator, SendFailure};
