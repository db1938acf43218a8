//! Read marker tracking
//!
//! Marks the open conversation read after a load, after store changes while
//! visible, and on visibility regain. All marks are best-effort.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use potluck_core::backend::PersistenceService;
use potluck_core::config::ReadTrackerConfig;
use potluck_core::sync::{ChangeListener, StoreChange};
use potluck_core::types::{ConversationId, UserId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadTrackerStats {
    pub marks_sent: u64,
    pub marks_failed: u64,
    /// Change notifications folded into an already queued mark
    pub changes_coalesced: u64,
}

#[derive(Debug, Default)]
struct Counters {
    marks_sent: AtomicU64,
    marks_failed: AtomicU64,
    changes_coalesced: AtomicU64,
}

type ChangeSender = mpsc::UnboundedSender<()>;

/// Store listener forwarding changes to the active tracking task
struct ChangeForwarder {
    sender: Arc<Mutex<Option<ChangeSender>>>,
}

impl ChangeListener for ChangeForwarder {
    fn on_change(&self, change: &StoreChange) {
        if matches!(change, StoreChange::Reset { .. }) {
            return;
        }
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = sender.as_ref() {
            let _ = sender.send(());
        }
    }
}

struct ActiveTracking {
    conversation_id: ConversationId,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Best-effort reporter of the viewer's read position
pub struct ReadTracker {
    persistence: Arc<dyn PersistenceService>,
    viewer_id: UserId,
    config: ReadTrackerConfig,
    visible: Arc<AtomicBool>,
    sender: Arc<Mutex<Option<ChangeSender>>>,
    counters: Arc<Counters>,
    active: Option<ActiveTracking>,
}

impl ReadTracker {
    pub fn new(
        persistence: Arc<dyn PersistenceService>,
        viewer_id: UserId,
        config: ReadTrackerConfig,
    ) -> Self {
        Self {
            persistence,
            viewer_id,
            config,
            visible: Arc::new(AtomicBool::new(true)),
            sender: Arc::new(Mutex::new(None)),
            counters: Arc::new(Counters::default()),
            active: None,
        }
    }

    /// Listener to register on the session's store
    pub fn listener(&self) -> Arc<dyn ChangeListener> {
        Arc::new(ChangeForwarder {
            sender: self.sender.clone(),
        })
    }

    fn sender_slot(&self) -> MutexGuard<'_, Option<ChangeSender>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `conversation_id` read now; returns whether the mark succeeded
    pub async fn mark_read(&self, conversation_id: &ConversationId) -> bool {
        if !self.config.enabled {
            return false;
        }
        mark(
            self.persistence.as_ref(),
            conversation_id,
            &self.viewer_id,
            &self.counters,
        )
        .await
    }

    /// Begin marking `conversation_id` read on every store change while visible
    pub async fn start(&mut self, conversation_id: ConversationId) {
        self.stop().await;

        let (sender, receiver) = mpsc::unbounded_channel();
        *self.sender_slot() = Some(sender);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(track(
            receiver,
            shutdown_rx,
            TrackContext {
                persistence: self.persistence.clone(),
                conversation_id: conversation_id.clone(),
                viewer_id: self.viewer_id.clone(),
                enabled: self.config.enabled,
                visible: self.visible.clone(),
                counters: self.counters.clone(),
            },
        ));
        self.active = Some(ActiveTracking {
            conversation_id,
            shutdown,
            task,
        });
    }

    /// Stop reacting to store changes
    pub async fn stop(&mut self) {
        *self.sender_slot() = None;
        if let Some(active) = self.active.take() {
            let _ = active.shutdown.send(true);
            if let Err(e) = active.task.await {
                warn!("Read tracking task ended abnormally: {}", e);
            }
        }
    }

    /// Record a visibility change; regaining visibility marks the conversation read
    pub async fn set_visible(&self, visible: bool) {
        let was_visible = self.visible.swap(visible, Ordering::SeqCst);
        if visible && !was_visible {
            if let Some(conversation_id) = self.active.as_ref().map(|a| a.conversation_id.clone()) {
                self.mark_read(&conversation_id).await;
            }
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    pub fn is_tracking(&self) -> bool {
        self.active.is_some()
    }

    pub fn stats(&self) -> ReadTrackerStats {
        ReadTrackerStats {
            marks_sent: self.counters.marks_sent.load(Ordering::Relaxed),
            marks_failed: self.counters.marks_failed.load(Ordering::Relaxed),
            changes_coalesced: self.counters.changes_coalesced.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ReadTracker {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.shutdown.send(true);
        }
    }
}

struct TrackContext {
    persistence: Arc<dyn PersistenceService>,
    conversation_id: ConversationId,
    viewer_id: UserId,
    enabled: bool,
    visible: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

async fn track(
    mut changes: mpsc::UnboundedReceiver<()>,
    mut shutdown: watch::Receiver<bool>,
    context: TrackContext,
) {
    loop {
        let change = tokio::select! {
            _ = shutdown.changed() => break,
            change = changes.recv() => change,
        };
        if change.is_none() {
            break;
        }

        // Fold everything queued while the previous mark was in flight
        let mut coalesced = 0;
        while changes.try_recv().is_ok() {
            coalesced += 1;
        }
        if coalesced > 0 {
            context
                .counters
                .changes_coalesced
                .fetch_add(coalesced, Ordering::Relaxed);
        }

        if context.enabled && context.visible.load(Ordering::SeqCst) {
            mark(
                context.persistence.as_ref(),
                &context.conversation_id,
                &context.viewer_id,
                &context.counters,
            )
            .await;
        }
    }
    debug!("Read tracking for {} stopped", context.conversation_id);
}

async fn mark(
    persistence: &dyn PersistenceService,
    conversation_id: &ConversationId,
    viewer_id: &UserId,
    counters: &Counters,
) -> bool {
    match persistence
        .mark_conversation_read(conversation_id, viewer_id)
        .await
    {
        Ok(()) => {
            counters.marks_sent.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(e) => {
            counters.marks_failed.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to mark {} read: {}", conversation_id, e);
            false
        }
    }
}
