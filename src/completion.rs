use crate::store::{COMPLETED_PROBLEMS_KEY, KeyValueStore, load_or_discard, write_document};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Monotonic set of practice problems the student has started.
pub struct CompletionTracker {
    store: Arc<dyn KeyValueStore>,
    ids: BTreeSet<String>,
}

impl CompletionTracker {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let ids: BTreeSet<String> = load_or_discard::<Vec<String>>(store.as_ref(), COMPLETED_PROBLEMS_KEY)
            .unwrap_or_default()
            .into_iter()
            .collect();
        Self { store, ids }
    }

    pub fn is_complete(&self, problem_id: &str) -> bool {
        self.ids.contains(problem_id)
    }

    /// Adds `problem_id`; returns `false` when it was already present.
    pub fn mark_complete(&mut self, problem_id: &str) -> bool {
        if !self.ids.insert(problem_id.to_string()) {
            return false;
        }
        let ordered: Vec<&String> = self.ids.iter().collect();
        if let Err(err) = write_document(self.store.as_ref(), COMPLETED_PROBLEMS_KEY, &ordered) {
            tracing::warn!(error = %err, "failed to persist completed problems");
        }
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, read_document};

    #[test]
    fn marking_is_idempotent() {
        let mut tracker = CompletionTracker::load(Arc::new(MemoryStore::new()));
        assert!(tracker.mark_complete("deriv-1"));
        assert_eq!(tracker.len(), 1);
        assert!(!tracker.mark_complete("deriv-1"));
        assert_eq!(tracker.len(), 1);
        assert!(tracker.is_complete("deriv-1"));
        assert!(!tracker.is_complete("deriv-2"));
    }

    #[test]
    fn persisted_as_ordered_list() {
        let store = Arc::new(MemoryStore::new());
        let mut tracker = CompletionTracker::load(store.clone());
        tracker.mark_complete("linear-1");
        tracker.mark_complete("deriv-3");

        let stored: Vec<String> = read_document(store.as_ref(), COMPLETED_PROBLEMS_KEY)
            .unwrap()
            .unwrap();
        assert_eq!(stored, vec!["deriv-3".to_string(), "linear-1".to_string()]);

        let reloaded = CompletionTracker::load(store);
        assert!(reloaded.is_complete("linear-1"));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn corrupt_document_starts_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(COMPLETED_PROBLEMS_KEY, "[1, 2").unwrap();
        let tracker = CompletionTracker::load(store.clone());
        assert!(tracker.is_empty());
        assert!(store.get(COMPLETED_PROBLEMS_KEY).unwrap().is_none());
    }
}
