//! Per-run event ring buffer (spec §3 `EventRingBuffer`, §4.8).
//!
//! IDs are monotonic from 0 and never reused, even once the ring
//! overwrites old entries — `since(last_id)` only returns entries whose
//! `id` is still held, which is the bounded-replay contract SSE-style
//! consumers rely on.

use std::collections::VecDeque;

use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Event {
    pub id: u64,
    pub event_type: String,
    pub data: Value,
}

/// Bounded ring buffer (default capacity 256) keyed by `run_hash` at the
/// registry level; this struct is the per-run buffer itself.
#[derive(Debug)]
pub struct EventRingBuffer {
    capacity: usize,
    next_id: u64,
    entries: VecDeque<Event>,
}

impl EventRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: 0,
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, event_type: impl Into<String>, data: Value) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Event {
            id,
            event_type: event_type.into(),
            data,
        });
        id
    }

    /// All events with `id > last_id`, oldest first. `None` returns
    /// everything still held in the ring.
    pub fn since(&self, last_id: Option<u64>) -> Vec<Event> {
        match last_id {
            None => self.entries.iter().cloned().collect(),
            Some(floor) => self.entries.iter().filter(|e| e.id > floor).cloned().collect(),
        }
    }

    pub fn last_id(&self) -> Option<u64> {
        self.entries.back().map(|e| e.id)
    }
}

impl Clone for Event {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            event_type: self.event_type.clone(),
            data: self.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut buf = EventRingBuffer::new(2);
        let a = buf.push("stage", Value::Null);
        let b = buf.push("stage", Value::Null);
        let c = buf.push("stage", Value::Null);
        assert_eq!((a, b, c), (0, 1, 2));
    }

    #[test]
    fn since_returns_only_ids_greater_than_last_id() {
        let mut buf = EventRingBuffer::new(10);
        buf.push("a", Value::Null);
        buf.push("b", Value::Null);
        buf.push("c", Value::Null);
        let events = buf.since(Some(0));
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.id > 0));
    }

    #[test]
    fn ring_drops_oldest_entries_past_capacity() {
        let mut buf = EventRingBuffer::new(2);
        buf.push("a", Value::Null);
        buf.push("b", Value::Null);
        buf.push("c", Value::Null);
        let all = buf.since(None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, 1);
        assert_eq!(all[1].id, 2);
    }
}
