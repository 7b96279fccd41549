//! Fixed-capacity message history.

use crate::message::Message;
use std::sync::Arc;

/// Number of messages each topic retains for replay.
pub const HISTORY_CAPACITY: usize = 100;

/// Ring buffer of the most recent messages of one topic, oldest first.
///
/// Backed by a fixed slice with a head index; appending to a full buffer
/// overwrites the oldest slot.
#[derive(Debug)]
pub struct HistoryBuffer {
    slots: Box<[Option<Arc<Message>>]>,
    /// Index of the oldest message.
    head: usize,
    len: usize,
}

impl HistoryBuffer {
    /// Create a buffer holding [`HISTORY_CAPACITY`] messages.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// Create a buffer with a specific capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be greater than zero");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    /// Append a message, returning the evicted one if the buffer was full.
    pub fn append(&mut self, message: Arc<Message>) -> Option<Arc<Message>> {
        let capacity = self.capacity();
        if self.len < capacity {
            let tail = (self.head + self.len) % capacity;
            self.slots[tail] = Some(message);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(message);
            self.head = (self.head + 1) % capacity;
            evicted
        }
    }

    /// The last `n` messages (fewer if the buffer holds fewer), oldest first.
    ///
    /// The result is an owned snapshot; later appends do not affect it.
    #[must_use]
    pub fn replay(&self, n: usize) -> Vec<Arc<Message>> {
        let n = n.min(self.len);
        self.iter().skip(self.len - n).cloned().collect()
    }

    /// Iterate over retained messages, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Message>> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % capacity].as_ref())
    }

    /// Current occupancy.
    #[must_use]
    pub fn size(&self) -> usize {
        self.len
    }

    /// Maximum occupancy.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Whether the buffer holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}
