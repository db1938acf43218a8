//! Conversation and message data model
//!
//! Messages are plain values; the ordering and deduplication rules live in
//! [`crate::sync::MessageStore`].

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::{SyncError, SyncResult, ValidationError};
use crate::types::{ConversationId, CorrelationId, MessageId, Timestamp, UserId};

/// Preview used when a message carries only a recipe attachment
pub const RECIPE_ONLY_PREVIEW: &str = "Shared a recipe";

// ----------------------------------------------------------------------------
// Recipe Reference
// ----------------------------------------------------------------------------

/// Kind of shared item a message points at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipeKind {
    Recipe,
    Collection,
    Other(String),
}

/// Passive attachment pointing at a shared item; never resolved by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipeRef {
    pub recipe_id: String,
    pub recipe_kind: RecipeKind,
}

impl RecipeRef {
    pub fn recipe(recipe_id: impl Into<String>) -> Self {
        Self {
            recipe_id: recipe_id.into(),
            recipe_kind: RecipeKind::Recipe,
        }
    }
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// Text body; may be empty when `recipe_ref` is set
    pub content: String,
    pub recipe_ref: Option<RecipeRef>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Client-generated id echoed by the backing store for locally sent messages
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    /// True while the entry is an unacknowledged optimistic send
    #[serde(default)]
    pub pending: bool,
}

impl Message {
    /// Ordering key used by the store: `(created_at, id)`
    pub fn sort_key(&self) -> (Timestamp, MessageId) {
        (self.created_at, self.id.clone())
    }

    /// Whether the message was edited after creation
    pub fn is_edited(&self) -> bool {
        self.updated_at > self.created_at
    }

    /// Whether the message has neither text nor an attachment
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty() && self.recipe_ref.is_none()
    }

    /// Summary text truncated to `max_chars` characters
    pub fn preview(&self, max_chars: usize) -> String {
        preview_text(&self.content, self.recipe_ref.is_some(), max_chars)
    }
}

/// Build the summary/notification preview for a message body
pub fn preview_text(content: &str, has_recipe: bool, max_chars: usize) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() && has_recipe {
        return RECIPE_ONLY_PREVIEW.to_string();
    }
    let mut preview: String = trimmed.chars().take(max_chars).collect();
    if trimmed.chars().count() > max_chars {
        preview.push('…');
    }
    preview
}

/// Insert request sent to the backing store for a new message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub recipe_ref: Option<RecipeRef>,
    pub correlation_id: CorrelationId,
    pub created_at: Timestamp,
}

/// Edit request for an existing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePatch {
    pub content: String,
    pub updated_at: Timestamp,
}

// ----------------------------------------------------------------------------
// Conversation
// ----------------------------------------------------------------------------

/// Two-party conversation metadata with its denormalized summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: [UserId; 2],
    pub last_message: Option<String>,
    pub last_message_at: Option<Timestamp>,
}

/// Update to a conversation's denormalized summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryPatch {
    pub last_message: Option<String>,
    pub last_message_at: Option<Timestamp>,
}

impl Conversation {
    /// Create a conversation between two distinct participants
    pub fn new(id: ConversationId, first: UserId, second: UserId) -> SyncResult<Self> {
        let conversation = Self {
            id,
            participants: [first, second],
            last_message: None,
            last_message_at: None,
        };
        conversation.validate()?;
        Ok(conversation)
    }

    /// Check the two-participant invariant (deserialized values skip `new`)
    pub fn validate(&self) -> SyncResult<()> {
        if self.participants[0] == self.participants[1] {
            return Err(ValidationError::InvalidParticipants.into());
        }
        Ok(())
    }

    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.participants.contains(user_id)
    }

    /// The participant who is not `viewer`; forbidden if viewer is not a member
    pub fn other_participant(&self, viewer: &UserId) -> SyncResult<&UserId> {
        match &self.participants {
            [a, b] if a == viewer => Ok(b),
            [a, b] if b == viewer => Ok(a),
            _ => Err(SyncError::forbidden(format!(
                "{} is not a participant of conversation {}",
                viewer, self.id
            ))),
        }
    }

    pub fn apply_summary(&mut self, patch: &SummaryPatch) {
        self.last_message = patch.last_message.clone();
        self.last_message_at = patch.last_message_at;
    }
}

// ----------------------------------------------------------------------------
// Profiles and Authorization
// ----------------------------------------------------------------------------

/// Display identity for a participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

impl Profile {
    /// Fallback used when the resolver has no record for a user
    pub fn placeholder(user_id: UserId) -> Self {
        let short: String = user_id.as_str().chars().take(8).collect();
        Self {
            display_name: format!("user-{}", short),
            user_id,
            avatar_ref: None,
        }
    }
}

/// Role of the local viewer as supplied by the authorization context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerRole {
    #[default]
    Member,
    Moderator,
    Admin,
}

impl fmt::Display for ViewerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewerRole::Member => write!(f, "member"),
            ViewerRole::Moderator => write!(f, "moderator"),
            ViewerRole::Admin => write!(f, "admin"),
        }
    }
}

/// Identity of the local user; treated as given, never computed here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub viewer_id: UserId,
    pub role: ViewerRole,
}

impl AuthContext {
    pub fn member(viewer_id: impl Into<UserId>) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            role: ViewerRole::Member,
        }
    }

    pub fn with_role(viewer_id: impl Into<UserId>, role: ViewerRole) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            role,
        }
    }

    /// Moderators and admins may delete any message
    pub fn is_elevated(&self) -> bool {
        matches!(self.role, ViewerRole::Moderator | ViewerRole::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str, recipe: Option<RecipeRef>) -> Message {
        Message {
            id: MessageId::from("m1"),
            conversation_id: ConversationId::from("c1"),
            sender_id: UserId::from("alice"),
            content: content.to_string(),
            recipe_ref: recipe,
            created_at: Timestamp::new(10),
            updated_at: Timestamp::new(10),
            correlation_id: None,
            pending: false,
        }
    }

    #[test]
    fn test_conversation_requires_distinct_participants() {
        let result = Conversation::new("c1".into(), "alice".into(), "alice".into());
        assert!(matches!(
            result,
            Err(SyncError::Validation(ValidationError::InvalidParticipants))
        ));
    }

    #[test]
    fn test_other_participant() {
        let conversation = Conversation::new("c1".into(), "alice".into(), "bob".into()).unwrap();
        assert_eq!(conversation.other_participant(&"alice".into()).unwrap(), &UserId::from("bob"));
        assert_eq!(conversation.other_participant(&"bob".into()).unwrap(), &UserId::from("alice"));
        assert!(matches!(
            conversation.other_participant(&"mallory".into()),
            Err(SyncError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_preview() {
        assert_eq!(message("  hello  ", None).preview(100), "hello");
        assert_eq!(message("abcdef", None).preview(3), "abc…");
        assert_eq!(message("", Some(RecipeRef::recipe("r1"))).preview(10), RECIPE_ONLY_PREVIEW);
    }

    #[test]
    fn test_blank_and_edited() {
        assert!(message("   ", None).is_blank());
        assert!(!message("", Some(RecipeRef::recipe("r1"))).is_blank());

        let mut edited = message("hi", None);
        assert!(!edited.is_edited());
        edited.updated_at = Timestamp::new(20);
        assert!(edited.is_edited());
    }

    #[test]
    fn test_elevated_roles() {
        assert!(!AuthContext::member("alice").is_elevated());
        assert!(AuthContext::with_role("mod", ViewerRole::Moderator).is_elevated());
        assert!(AuthContext::with_role("root", ViewerRole::Admin).is_elevated());
    }
}
