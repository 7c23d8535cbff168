//! In-memory history store.
//!
//! Append-only per-session turn log, bounded by `max_turns`. The mutex
//! serializes `append`/`get_recent` across sessions, which more than covers
//! the per-session ordering the escalator needs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use schnabel_types::{HistoryStore, HistoryTurn};

/// Default retention per session.
const DEFAULT_MAX_TURNS: usize = 200;

pub struct InMemoryHistoryStore {
    max_turns: usize,
    sessions: Mutex<HashMap<String, VecDeque<HistoryTurn>>>,
}

impl InMemoryHistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_turns(DEFAULT_MAX_TURNS)
    }

    #[must_use]
    pub fn with_max_turns(max_turns: usize) -> Self {
        Self {
            max_turns,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Number of sessions currently held.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn get_recent(&self, session_id: &str, limit: usize) -> Vec<HistoryTurn> {
        let sessions = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(turns) = sessions.get(session_id) else {
            return Vec::new();
        };
        let skip = turns.len().saturating_sub(limit);
        turns.iter().skip(skip).cloned().collect()
    }

    fn append(&self, session_id: &str, turn: HistoryTurn) {
        if self.max_turns == 0 {
            return;
        }
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let turns = sessions.entry(session_id.to_string()).or_default();
        turns.push_back(turn);
        while turns.len() > self.max_turns {
            turns.pop_front();
        }
    }
}
