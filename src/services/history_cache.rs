use crate::models::history_types::LocalEntry;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Most recent analyses kept per session.
pub const HISTORY_CAPACITY: usize = 10;

/// Bounded, session-scoped cache of recent results, newest first.
/// Independent of network state and never persisted.
#[derive(Clone, Default)]
pub struct LocalHistoryCache {
    entries: Arc<Mutex<VecDeque<LocalEntry>>>,
}

impl LocalHistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend an entry, evicting the oldest once over capacity.
    /// Identical consecutive results are kept as separate entries.
    pub fn push(&self, entry: LocalEntry) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_front(entry);
        entries.truncate(HISTORY_CAPACITY);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Snapshot of the current entries, newest first.
    pub fn entries(&self) -> Vec<LocalEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
