//! In-memory conversation transcript mirrored to the shell.
//!
//! The shell keeps no state of its own: every append and update is pushed
//! over IPC, and a scroll nudge follows whenever new content lands.

use tracing::warn;

use crate::ipc::{emit_event, UiEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Stable handle for later in-place updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryId(u64);

#[derive(Debug, Clone)]
pub struct Entry {
    pub id: EntryId,
    pub role: Role,
    pub text: String,
}

/// Ordered transcript of the current run.
#[derive(Default)]
pub struct ConversationLog {
    entries: Vec<Entry>,
    next_id: u64,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and announce it to the shell.
    pub fn append(&mut self, role: Role, text: &str) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            role,
            text: text.to_string(),
        });
        emit_event(&UiEvent::EntryAppended {
            id: id.0,
            role: role.as_str().to_string(),
            text: text.to_string(),
        });
        id
    }

    /// Replace an entry's text in place. Unknown ids are logged and
    /// ignored.
    pub fn update(&mut self, id: EntryId, text: &str) {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.text = text.to_string();
                emit_event(&UiEvent::EntryUpdated {
                    id: id.0,
                    text: text.to_string(),
                });
            }
            None => warn!(id = id.0, "update for unknown conversation entry"),
        }
    }

    /// Ask the shell to reveal the newest entry.
    pub fn scroll_to_latest(&self) {
        emit_event(&UiEvent::ScrollLatest {});
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_keep_order_and_distinct_ids() {
        let mut log = ConversationLog::new();
        let a = log.append(Role::User, "hello");
        let b = log.append(Role::Assistant, "hi there");

        assert_ne!(a, b);
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].text, "hello");
        assert_eq!(log.entries()[0].role, Role::User);
        assert_eq!(log.entries()[1].text, "hi there");
        assert_eq!(log.entries()[1].role, Role::Assistant);
    }

    #[test]
    fn update_replaces_text_in_place() {
        let mut log = ConversationLog::new();
        log.append(Role::User, "hello");
        let placeholder = log.append(Role::Assistant, "...");

        log.update(placeholder, "hi there");

        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[1].text, "hi there");
    }

    #[test]
    fn update_for_unknown_id_is_ignored() {
        let mut log = ConversationLog::new();
        log.append(Role::User, "hello");

        log.update(EntryId(42), "nope");
        assert_eq!(log.entries()[0].text, "hello");
    }
}
