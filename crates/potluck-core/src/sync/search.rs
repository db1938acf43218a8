//! In-memory conversation search
//!
//! A derived, read-only view over [`MessageStore`]: case-insensitive substring
//! matching over message content with a cyclic cursor. Results are recomputed
//! lazily whenever the query or the store revision changes.

use serde::{Deserialize, Serialize};

use super::message_store::MessageStore;
use crate::types::MessageId;

/// Snapshot of the current query, its matches and the cursor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchState {
    pub query: String,
    /// Positions in `MessageStore::all()` whose content matches
    pub matches: Vec<usize>,
    /// Index into `matches`; `None` when there are no matches
    pub cursor: Option<usize>,
}

impl SearchState {
    /// Message position the cursor currently points at
    pub fn current(&self) -> Option<usize> {
        self.cursor.and_then(|cursor| self.matches.get(cursor).copied())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    query: String,
    needle: String,
    matches: Vec<usize>,
    match_ids: Vec<MessageId>,
    cursor: Option<usize>,
    computed_at: Option<u64>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the query text and return the fresh result
    ///
    /// The text is trimmed; an empty query clears the search.
    pub fn query(&mut self, text: &str, store: &MessageStore) -> SearchState {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            self.clear();
            return self.state();
        }
        if trimmed != self.query {
            self.query = trimmed.to_string();
            self.needle = trimmed.to_lowercase();
            self.cursor = None;
            self.computed_at = None;
        }
        self.refresh(store);
        self.state()
    }

    /// Reset matches to empty and the cursor to undefined
    pub fn clear(&mut self) {
        self.query.clear();
        self.needle.clear();
        self.matches.clear();
        self.match_ids.clear();
        self.cursor = None;
        self.computed_at = None;
    }

    pub fn is_active(&self) -> bool {
        !self.needle.is_empty()
    }

    /// Advance the cursor, wrapping from the last match to the first
    pub fn next(&mut self, store: &MessageStore) -> Option<usize> {
        self.refresh(store);
        let len = self.matches.len();
        let cursor = self.cursor?;
        let moved = (cursor + 1) % len;
        self.cursor = Some(moved);
        Some(moved)
    }

    /// Move the cursor back, wrapping from the first match to the last
    pub fn previous(&mut self, store: &MessageStore) -> Option<usize> {
        self.refresh(store);
        let len = self.matches.len();
        let cursor = self.cursor?;
        let moved = if cursor == 0 { len - 1 } else { cursor - 1 };
        self.cursor = Some(moved);
        Some(moved)
    }

    /// Current result, recomputed first if the store changed
    pub fn state_for(&mut self, store: &MessageStore) -> SearchState {
        self.refresh(store);
        self.state()
    }

    /// Last computed result without touching the store
    pub fn state(&self) -> SearchState {
        SearchState {
            query: self.query.clone(),
            matches: self.matches.clone(),
            cursor: self.cursor,
        }
    }

    /// Id of the message under the cursor
    pub fn current_message_id(&self) -> Option<&MessageId> {
        self.cursor.and_then(|cursor| self.match_ids.get(cursor))
    }

    /// Recompute if the store has been mutated since the last pass
    pub fn refresh(&mut self, store: &MessageStore) {
        if !self.is_active() || self.computed_at == Some(store.revision()) {
            return;
        }

        let previous = self.current_message_id().cloned();
        self.matches.clear();
        self.match_ids.clear();

        for (position, message) in store.all().enumerate() {
            if message.content.to_lowercase().contains(&self.needle) {
                self.matches.push(position);
                self.match_ids.push(message.id.clone());
            }
        }

        self.cursor = if self.matches.is_empty() {
            None
        } else {
            previous
                .and_then(|id| self.match_ids.iter().position(|m| *m == id))
                .or(Some(0))
        };
        self.computed_at = Some(store.revision());
    }
}
