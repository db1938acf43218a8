//! Live Feed State Machine
//!
//! Lifecycle of one conversation's live-feed subscription:
//! `Idle -> Subscribing -> Subscribed -> (Closed -> Subscribing) | Idle`.
//! Transitions consume the current state and return the effects the runtime
//! must execute, so invalid transitions cannot be expressed by accident.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::config::LiveFeedConfig;
use crate::types::{ConversationId, Timestamp};

// ----------------------------------------------------------------------------
// Feed State Types
// ----------------------------------------------------------------------------

/// Linear feed state that must be consumed to transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedState {
    /// Not subscribed and not trying to be
    Idle(IdleState),
    /// Subscription requested, awaiting acknowledgment
    Subscribing(SubscribingState),
    /// Subscription acknowledged, events flowing
    Subscribed(SubscribedState),
    /// Subscription dropped, reconnect scheduled
    Closed(ClosedState),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleState {
    pub last_conversation: Option<ConversationId>,
    pub stopped_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribingState {
    pub conversation_id: ConversationId,
    pub started_at: Timestamp,
    /// Failed attempts since the last acknowledgment
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribedState {
    pub conversation_id: ConversationId,
    pub since: Timestamp,
    pub events_received: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedState {
    pub conversation_id: ConversationId,
    pub closed_at: Timestamp,
    pub reason: String,
    pub consecutive_failures: u32,
    pub retry_delay_ms: u64,
}

/// Flat status for display and assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedStatus {
    Idle,
    Subscribing,
    Subscribed,
    Closed,
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedStatus::Idle => write!(f, "Idle"),
            FeedStatus::Subscribing => write!(f, "Subscribing"),
            FeedStatus::Subscribed => write!(f, "Subscribed"),
            FeedStatus::Closed => write!(f, "Closed"),
        }
    }
}

// ----------------------------------------------------------------------------
// State Transition Events
// ----------------------------------------------------------------------------

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedEvent {
    /// Begin following a conversation
    Start { conversation_id: ConversationId },
    /// The feed acknowledged the subscription
    Acknowledged,
    /// A change event arrived on the subscription
    EventReceived,
    /// Server drop, network loss or a failed subscribe attempt
    Closed { reason: String },
    /// The reconnect delay elapsed
    RetryDue,
    /// Explicit teardown
    Stop,
}

/// Side effects the runtime executes after a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedEffect {
    OpenSubscription { conversation_id: ConversationId },
    ScheduleReconnect { delay_ms: u64 },
    CancelSubscription,
}

/// Result of a state transition
#[derive(Debug, Clone)]
pub struct FeedTransition {
    pub new_state: FeedState,
    pub effects: Vec<FeedEffect>,
    pub audit_entry: AuditEntry,
}

/// Audit trail entry for state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub conversation_id: Option<ConversationId>,
    pub from_state: FeedStatus,
    pub to_state: FeedStatus,
    pub event: String,
    pub effects_count: usize,
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl FeedState {
    pub fn idle() -> Self {
        FeedState::Idle(IdleState {
            last_conversation: None,
            stopped_at: None,
        })
    }

    pub fn status(&self) -> FeedStatus {
        match self {
            FeedState::Idle(_) => FeedStatus::Idle,
            FeedState::Subscribing(_) => FeedStatus::Subscribing,
            FeedState::Subscribed(_) => FeedStatus::Subscribed,
            FeedState::Closed(_) => FeedStatus::Closed,
        }
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            FeedState::Idle(s) => s.last_conversation.as_ref(),
            FeedState::Subscribing(s) => Some(&s.conversation_id),
            FeedState::Subscribed(s) => Some(&s.conversation_id),
            FeedState::Closed(s) => Some(&s.conversation_id),
        }
    }

    /// Whether the manager should keep (re)connecting
    pub fn is_active(&self) -> bool {
        !matches!(self, FeedState::Idle(_))
    }

    pub fn consecutive_failures(&self) -> u32 {
        match self {
            FeedState::Subscribing(s) => s.consecutive_failures,
            FeedState::Closed(s) => s.consecutive_failures,
            _ => 0,
        }
    }

    /// Process an event and transition to new state (consumes self)
    pub fn transition(
        self,
        event: FeedEvent,
        now: Timestamp,
        config: &LiveFeedConfig,
    ) -> Result<FeedTransition, StateTransitionError> {
        let from_state = self.status();
        let event_name = event.name();

        let (new_state, effects) = match (self, event) {
            // From Idle
            (FeedState::Idle(_), FeedEvent::Start { conversation_id }) => {
                let effects = vec![FeedEffect::OpenSubscription {
                    conversation_id: conversation_id.clone(),
                }];
                let new_state = FeedState::Subscribing(SubscribingState {
                    conversation_id,
                    started_at: now,
                    consecutive_failures: 0,
                });
                (new_state, effects)
            }

            (FeedState::Idle(state), FeedEvent::Stop) => (FeedState::Idle(state), Vec::new()),

            // From Subscribing
            (FeedState::Subscribing(state), FeedEvent::Acknowledged) => {
                let new_state = FeedState::Subscribed(SubscribedState {
                    conversation_id: state.conversation_id,
                    since: now,
                    events_received: 0,
                });
                (new_state, Vec::new())
            }

            (FeedState::Subscribing(state), FeedEvent::Closed { reason }) => {
                Self::closed(state.conversation_id, state.consecutive_failures + 1, reason, now, config)
            }

            // From Subscribed
            (FeedState::Subscribed(mut state), FeedEvent::EventReceived) => {
                state.events_received += 1;
                (FeedState::Subscribed(state), Vec::new())
            }

            (FeedState::Subscribed(state), FeedEvent::Closed { reason }) => {
                Self::closed(state.conversation_id, 1, reason, now, config)
            }

            // From Closed
            (FeedState::Closed(state), FeedEvent::RetryDue) => {
                let effects = vec![FeedEffect::OpenSubscription {
                    conversation_id: state.conversation_id.clone(),
                }];
                let new_state = FeedState::Subscribing(SubscribingState {
                    conversation_id: state.conversation_id,
                    started_at: now,
                    consecutive_failures: state.consecutive_failures,
                });
                (new_state, effects)
            }

            // Teardown from any active state
            (state, FeedEvent::Stop) => {
                let new_state = FeedState::Idle(IdleState {
                    last_conversation: state.conversation_id().cloned(),
                    stopped_at: Some(now),
                });
                (new_state, vec![FeedEffect::CancelSubscription])
            }

            // Invalid transitions
            (_state, event) => {
                return Err(StateTransitionError::InvalidTransition {
                    from_state,
                    event: event.name(),
                    reason: format!("Event {} not valid for state {}", event.name(), from_state),
                });
            }
        };

        let audit_entry = AuditEntry {
            timestamp: now,
            conversation_id: new_state.conversation_id().cloned(),
            from_state,
            to_state: new_state.status(),
            event: event_name,
            effects_count: effects.len(),
        };

        Ok(FeedTransition {
            new_state,
            effects,
            audit_entry,
        })
    }

    fn closed(
        conversation_id: ConversationId,
        consecutive_failures: u32,
        reason: String,
        now: Timestamp,
        config: &LiveFeedConfig,
    ) -> (FeedState, Vec<FeedEffect>) {
        let delay_ms = config.reconnect_delay(consecutive_failures).as_millis() as u64;
        let new_state = FeedState::Closed(ClosedState {
            conversation_id,
            closed_at: now,
            reason,
            consecutive_failures,
            retry_delay_ms: delay_ms,
        });
        (new_state, vec![FeedEffect::ScheduleReconnect { delay_ms }])
    }
}

impl Default for FeedState {
    fn default() -> Self {
        Self::idle()
    }
}

impl FeedEvent {
    fn name(&self) -> String {
        match self {
            FeedEvent::Start { .. } => "Start",
            FeedEvent::Acknowledged => "Acknowledged",
            FeedEvent::EventReceived => "EventReceived",
            FeedEvent::Closed { .. } => "Closed",
            FeedEvent::RetryDue => "RetryDue",
            FeedEvent::Stop => "Stop",
        }
        .to_string()
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum StateTransitionError {
    /// Invalid state transition attempted
    InvalidTransition {
        from_state: FeedStatus,
        event: String,
        reason: String,
    },
}

impl fmt::Display for StateTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateTransitionError::InvalidTransition {
                from_state,
                event,
                reason,
            } => write!(
                f,
                "Invalid transition from {} on event {}: {}",
                from_state, event, reason
            ),
        }
    }
}

impl std::error::Error for StateTransitionError {}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
