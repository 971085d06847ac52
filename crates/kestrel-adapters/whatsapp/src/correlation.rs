//! Message id correlation log.
//!
//! Every normalised message leaves an `id → (participant, timestamp, chat)`
//! record behind, so later events (edits, deletions, reactions) can be tied
//! back to who sent the original. The log is bounded; the oldest record is
//! evicted once capacity is reached.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

/// What is remembered about one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub participant: String,
    pub timestamp: u64,
    pub chat_id: String,
}

#[derive(Default)]
struct LogState {
    records: HashMap<String, Correlation>,
    order: VecDeque<String>,
}

/// Bounded, insertion-ordered correlation store.
pub struct CorrelationLog {
    capacity: usize,
    state: Mutex<LogState>,
}

impl CorrelationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LogState::default()),
        }
    }

    /// Records `id`, replacing an existing record for the same id.
    pub fn record(&self, id: &str, correlation: Correlation) {
        if id.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        if state.records.insert(id.to_string(), correlation).is_some() {
            return;
        }
        state.order.push_back(id.to_string());
        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.records.remove(&oldest);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Correlation> {
        self.state.lock().records.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.records.clear();
        state.order.clear();
    }
}
