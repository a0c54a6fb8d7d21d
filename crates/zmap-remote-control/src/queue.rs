//! Message queues.

use std::collections::VecDeque;

use zmap_remote_protocol::WireMessage;

/// A queued message with the priority it was queued at.
#[derive(Debug, Clone)]
struct Entry {
    priority: i32,
    message: WireMessage,
}

/// Ordered queue of wire messages.
///
/// FIFO by default. [`push_by_priority`](Self::push_by_priority) keeps the
/// queue ordered by descending priority, then ascending timestamp, with ties
/// staying in arrival order.
#[derive(Debug, Default)]
pub struct MessageQueue {
    entries: VecDeque<Entry>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, message: WireMessage) {
        self.entries.push_back(Entry {
            priority: 0,
            message,
        });
    }

    /// Queue-jumps, used for resends and replayed replies.
    pub fn push_front(&mut self, message: WireMessage) {
        let priority = self.entries.front().map_or(0, |e| e.priority);
        self.entries.push_front(Entry { priority, message });
    }

    pub fn push_by_priority(&mut self, message: WireMessage, priority: i32) {
        let timestamp = message.header.timestamp;
        let at = self
            .entries
            .iter()
            .position(|e| {
                e.priority < priority
                    || (e.priority == priority && e.message.header.timestamp > timestamp)
            })
            .unwrap_or(self.entries.len());
        self.entries.insert(at, Entry { priority, message });
    }

    pub fn pop_front(&mut self) -> Option<WireMessage> {
        self.entries.pop_front().map(|e| e.message)
    }

    pub fn peek_front(&self) -> Option<&WireMessage> {
        self.entries.front().map(|e| &e.message)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Empties the queue, returning how many messages were dropped.
    pub fn drain(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }
}
