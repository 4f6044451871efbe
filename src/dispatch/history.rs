use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Handle for one history replay. The replay loop checks the token
/// before each emission; once a newer replay (or a stop) supersedes it,
/// the loop winds down on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayToken {
    filter_id: String,
    generation: u64,
}

/// Tracks the live replay generation per filter id. Starting a new
/// replay for a filter invalidates the previous one; deleting or
/// re-saving the filter stops it outright.
pub struct HistoryReplays {
    live: Mutex<HashMap<String, u64>>,
    next_generation: AtomicU64,
}

impl HistoryReplays {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Start a replay for the filter, superseding any running one.
    pub fn begin(&self, filter_id: &str) -> ReplayToken {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(filter_id.to_string(), generation);

        ReplayToken {
            filter_id: filter_id.to_string(),
            generation,
        }
    }

    pub fn is_live(&self, token: &ReplayToken) -> bool {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&token.filter_id)
            == Some(&token.generation)
    }

    /// Stop whatever replay the filter currently has, if any.
    pub fn stop(&self, filter_id: &str) {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(filter_id);
    }

    /// Called by a replay loop when it drains its source. Clears the
    /// entry only if this token is still the live one.
    pub fn finish(&self, token: &ReplayToken) {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if live.get(&token.filter_id) == Some(&token.generation) {
            live.remove(&token.filter_id);
        }
    }
}

impl Default for HistoryReplays {
    fn default() -> Self {
        Self::new()
    }
}
