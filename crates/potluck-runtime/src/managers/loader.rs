//! Initial conversation load
//!
//! Fetches metadata, history and profiles, then replaces the shared store
//! wholesale. Each attempt carries a sequence number; only the most recently
//! started attempt may touch the store.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use potluck_core::backend::{PersistenceService, ProfileResolver};
use potluck_core::config::LoaderConfig;
use potluck_core::errors::{SyncError, SyncResult, TransportError};
use potluck_core::message::{Conversation, Message, Profile};
use potluck_core::types::{ConversationId, UserId};

use crate::shared_store::SharedStore;

/// Result of a successful load
#[derive(Debug, Clone)]
pub struct LoadedConversation {
    pub conversation: Conversation,
    /// Display identity of the participant who is not the viewer
    pub other_participant: Profile,
    /// Both participants and every sender in the history
    pub profiles: HashMap<UserId, Profile>,
    pub message_count: usize,
    pub attempt: u64,
}

struct Snapshot {
    conversation: Conversation,
    other_participant: UserId,
    messages: Vec<Message>,
    profiles: HashMap<UserId, Profile>,
}

/// Loads one conversation into the shared store
pub struct ConversationLoader {
    persistence: Arc<dyn PersistenceService>,
    profiles: Arc<dyn ProfileResolver>,
    store: SharedStore,
    config: LoaderConfig,
    latest_attempt: AtomicU64,
}

impl ConversationLoader {
    pub fn new(
        persistence: Arc<dyn PersistenceService>,
        profiles: Arc<dyn ProfileResolver>,
        store: SharedStore,
        config: LoaderConfig,
    ) -> Self {
        Self {
            persistence,
            profiles,
            store,
            config,
            latest_attempt: AtomicU64::new(0),
        }
    }

    /// Sequence number of the most recently started attempt
    pub fn latest_attempt(&self) -> u64 {
        self.latest_attempt.load(Ordering::SeqCst)
    }

    /// Load `conversation_id` for `viewer_id` and replace the store contents
    ///
    /// Fails with `TimedOut` once the configured budget elapses; the fetch
    /// keeps running in the background but its result is never applied.
    pub async fn load(
        &self,
        conversation_id: &ConversationId,
        viewer_id: &UserId,
    ) -> SyncResult<LoadedConversation> {
        let attempt = self.latest_attempt.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Starting load attempt {} for {}", attempt, conversation_id);

        let fetch = tokio::spawn(fetch_snapshot(
            self.persistence.clone(),
            self.profiles.clone(),
            conversation_id.clone(),
            viewer_id.clone(),
        ));

        let snapshot = match tokio::time::timeout(self.config.timeout(), fetch).await {
            Err(_) => {
                warn!(
                    "Load attempt {} for {} timed out after {}ms",
                    attempt, conversation_id, self.config.timeout_ms
                );
                return Err(SyncError::TimedOut {
                    duration_ms: self.config.timeout_ms,
                });
            }
            Ok(Err(join_error)) => {
                return Err(TransportError::TaskFailed {
                    reason: join_error.to_string(),
                }
                .into());
            }
            Ok(Ok(Err(error))) => {
                debug!("Load attempt {} for {} failed: {}", attempt, conversation_id, error);
                return Err(error);
            }
            Ok(Ok(Ok(snapshot))) => snapshot,
        };

        // Sequence check and replacement happen under the same store lock
        let applied = self.store.update(|store| {
            let latest = self.latest_attempt.load(Ordering::SeqCst);
            if attempt != latest {
                return Err(SyncError::Superseded { attempt, latest });
            }
            Ok(store.replace_all(conversation_id.clone(), snapshot.messages))
        });
        let message_count = match applied {
            Ok(count) => count,
            Err(error) => {
                debug!("Discarding stale load result: {}", error);
                return Err(error);
            }
        };

        info!(
            "Loaded conversation {} with {} messages (attempt {})",
            conversation_id, message_count, attempt
        );

        let other_participant = snapshot
            .profiles
            .get(&snapshot.other_participant)
            .cloned()
            .unwrap_or_else(|| Profile::placeholder(snapshot.other_participant.clone()));

        Ok(LoadedConversation {
            conversation: snapshot.conversation,
            other_participant,
            profiles: snapshot.profiles,
            message_count,
            attempt,
        })
    }
}

async fn fetch_snapshot(
    persistence: Arc<dyn PersistenceService>,
    resolver: Arc<dyn ProfileResolver>,
    conversation_id: ConversationId,
    viewer_id: UserId,
) -> SyncResult<Snapshot> {
    let conversation = persistence
        .fetch_conversation(&conversation_id)
        .await?
        .ok_or_else(|| SyncError::conversation_not_found(conversation_id.as_str()))?;
    conversation.validate()?;
    let other_participant = conversation.other_participant(&viewer_id)?.clone();

    let history = persistence.fetch_messages(&conversation_id).await?;
    let total = history.len();
    let messages: Vec<Message> = history
        .into_iter()
        .filter(|m| m.conversation_id == conversation_id)
        .collect();
    if messages.len() < total {
        warn!(
            "Dropped {} history rows belonging to other conversations",
            total - messages.len()
        );
    }

    // One batched lookup for both participants and every sender
    let user_ids: BTreeSet<UserId> = conversation
        .participants
        .iter()
        .cloned()
        .chain(messages.iter().map(|m| m.sender_id.clone()))
        .collect();
    let user_ids: Vec<UserId> = user_ids.into_iter().collect();

    let resolved = match resolver.resolve_profiles(&user_ids).await {
        Ok(resolved) => resolved,
        Err(error) => {
            warn!("Profile lookup failed, using placeholders: {}", error);
            HashMap::new()
        }
    };
    let profiles = user_ids
        .into_iter()
        .map(|id| {
            let profile = resolved
                .get(&id)
                .cloned()
                .unwrap_or_else(|| Profile::placeholder(id.clone()));
            (id, profile)
        })
        .collect();

    Ok(Snapshot {
        conversation,
        other_participant,
        messages,
        profiles,
    })
}
