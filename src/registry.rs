//! Saved Session Registry: named, timestamped snapshots of conversations.

use crate::store::{KeyValueStore, SAVED_SESSIONS_KEY, load_or_discard, write_document};
use crate::types::{ChatTurn, ImageData};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};

const SESSION_NAME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("cannot save a session with no turns")]
    EmptySession,

    #[error("no saved session with id '{id}'")]
    NotFound { id: String },
}

/// An immutable snapshot of a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedSession {
    id: String,
    name: String,
    /// Milliseconds since the Unix epoch.
    timestamp: u64,
    #[serde(rename = "chatHistory")]
    turns: Vec<ChatTurn>,
    #[serde(default)]
    image: Option<ImageData>,
}

impl SavedSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn image(&self) -> Option<&ImageData> {
        self.image.as_ref()
    }
}

/// Copy of a saved session's contents, ready to become the live conversation.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub turns: Vec<ChatTurn>,
    pub image: Option<ImageData>,
}

pub struct SessionRegistry {
    store: Arc<dyn KeyValueStore>,
    sessions: Vec<SavedSession>,
}

impl SessionRegistry {
    /// Loads the registry document, discarding it if corrupt.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let stored: Vec<SavedSession> =
            load_or_discard(store.as_ref(), SAVED_SESSIONS_KEY).unwrap_or_default();

        let mut seen = HashSet::new();
        let sessions: Vec<SavedSession> = stored
            .into_iter()
            .filter(|session| {
                let fresh = seen.insert(session.id.clone());
                if !fresh {
                    tracing::warn!(id = %session.id, "dropping duplicate saved session");
                }
                fresh
            })
            .collect();

        tracing::debug!(count = sessions.len(), "loaded saved sessions");
        Self { store, sessions }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.iter().any(|session| session.id == id)
    }

    /// Snapshots `turns` as a new entry stamped with the current time.
    pub fn save(
        &mut self,
        turns: &[ChatTurn],
        image: Option<&ImageData>,
    ) -> Result<SavedSession, RegistryError> {
        self.save_at(turns, image, current_millis())
    }

    /// Snapshots `turns` as a new entry stamped with `timestamp` (ms since epoch).
    pub fn save_at(
        &mut self,
        turns: &[ChatTurn],
        image: Option<&ImageData>,
        timestamp: u64,
    ) -> Result<SavedSession, RegistryError> {
        if turns.is_empty() {
            return Err(RegistryError::EmptySession);
        }

        let session = SavedSession {
            id: self.fresh_id(timestamp),
            name: format!("Session - {}", format_timestamp(timestamp)),
            timestamp,
            turns: turns.to_vec(),
            image: image.cloned(),
        };
        self.sessions.push(session.clone());
        self.persist();
        tracing::info!(id = %session.id, turns = session.turns.len(), "saved session");
        Ok(session)
    }

    /// All entries, newest first. Equal timestamps list the later save first.
    pub fn list(&self) -> Vec<&SavedSession> {
        let mut ordered: Vec<(usize, &SavedSession)> = self.sessions.iter().enumerate().collect();
        ordered.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp).then(b.0.cmp(&a.0)));
        ordered.into_iter().map(|(_, session)| session).collect()
    }

    pub fn get(&self, id: &str) -> Option<&SavedSession> {
        self.sessions.iter().find(|session| session.id == id)
    }

    pub fn load_snapshot(&self, id: &str) -> Result<SessionSnapshot, RegistryError> {
        let session = self.get(id).ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
        Ok(SessionSnapshot {
            turns: session.turns.clone(),
            image: session.image.clone(),
        })
    }

    /// Removes `id` if `confirm` approves. Returns whether the entry was deleted.
    pub fn delete<F>(&mut self, id: &str, confirm: F) -> Result<bool, RegistryError>
    where
        F: FnOnce(&SavedSession) -> bool,
    {
        let index = self
            .sessions
            .iter()
            .position(|session| session.id == id)
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;

        if !confirm(&self.sessions[index]) {
            return Ok(false);
        }

        self.sessions.remove(index);
        self.persist();
        tracing::info!(id, "deleted saved session");
        Ok(true)
    }

    fn fresh_id(&self, timestamp: u64) -> String {
        let base = format!("session-{timestamp}");
        if !self.contains(&base) {
            return base;
        }
        (1..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or(base)
    }

    fn persist(&self) {
        if let Err(err) = write_document(self.store.as_ref(), SAVED_SESSIONS_KEY, &self.sessions) {
            tracing::warn!(error = %err, "failed to persist saved sessions");
        }
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or_default()
}

fn format_timestamp(timestamp: u64) -> String {
    let nanos = i128::from(timestamp) * 1_000_000;
    let Ok(mut datetime) = OffsetDateTime::from_unix_timestamp_nanos(nanos) else {
        return timestamp.to_string();
    };
    if let Ok(offset) = UtcOffset::current_local_offset() {
        datetime = datetime.to_offset(offset);
    }
    datetime
        .format(SESSION_NAME_FORMAT)
        .unwrap_or_else(|_| timestamp.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore};

    fn registry() -> SessionRegistry {
        SessionRegistry::load(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn ids_stay_unique_within_one_millisecond() {
        let mut registry = registry();
        let turns = vec![ChatTurn::user("x")];
        let a = registry.save_at(&turns, None, 1_000).unwrap();
        let b = registry.save_at(&turns, None, 1_000).unwrap();
        let c = registry.save_at(&turns, None, 1_000).unwrap();
        assert_eq!(a.id(), "session-1000");
        assert_eq!(b.id(), "session-1000-1");
        assert_eq!(c.id(), "session-1000-2");
    }

    #[test]
    fn names_default_to_timestamp_rendering() {
        let mut registry = registry();
        let saved = registry
            .save_at(&[ChatTurn::user("x")], None, 1_700_000_000_000)
            .unwrap();
        assert!(saved.name().starts_with("Session - 20"));
    }

    #[test]
    fn duplicate_ids_are_dropped_on_load() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                SAVED_SESSIONS_KEY,
                r#"[{"id":"a","name":"A","timestamp":1,"chatHistory":[{"role":"user","content":"x"}],"image":null},
                    {"id":"a","name":"A2","timestamp":2,"chatHistory":[{"role":"user","content":"y"}],"image":null}]"#,
            )
            .unwrap();
        let registry = SessionRegistry::load(store);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().name(), "A");
    }
}
