//! Ordered, deduplicated conversation log with a bounded reorder window,
//! plus the bounded pre-ready event buffer.
//!
//! Pure bookkeeping, no timers and no locks. The state machine owns one of
//! each and drives them under its own serialization.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::transport::{Cursor, InboundEvent, Message, MessageId};

/// Outcome of applying one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// At least one entry was committed to the log.
    Committed,
    /// Duplicate id; the message was a no-op.
    Ignored,
    /// Out of order; held in the reorder window until the gap fills or the
    /// window flushes.
    Held,
}

/// The message log for one conversation.
#[derive(Debug)]
pub struct ConvoLog {
    entries: Vec<Message>,
    seen: HashSet<MessageId>,
    reorder: BTreeMap<u64, Message>,
    cursor: u64,
    synced: bool,
    window: usize,
}

impl ConvoLog {
    pub fn new(window: usize) -> Self {
        Self {
            entries: Vec::new(),
            seen: HashSet::new(),
            reorder: BTreeMap::new(),
            cursor: 0,
            synced: false,
            window,
        }
    }

    /// Cursor to resume the stream from, or `None` before the first sync
    /// (a fresh connect fetches the full history).
    pub fn resume_cursor(&self) -> Option<Cursor> {
        self.synced.then(|| Cursor(self.cursor))
    }

    pub fn cursor(&self) -> Cursor {
        Cursor(self.cursor)
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn snapshot_entries(&self) -> Vec<Message> {
        self.entries.clone()
    }

    pub fn has_held(&self) -> bool {
        !self.reorder.is_empty()
    }

    /// Replace the whole log with a fresh backfill (full resync).
    pub fn reset(&mut self, backfill: Vec<Message>, cursor: Cursor) {
        self.entries.clear();
        self.seen.clear();
        self.reorder.clear();
        for message in backfill {
            if self.seen.insert(message.id.clone()) {
                self.entries.push(message);
            }
        }
        self.cursor = cursor.0;
        self.synced = true;
    }

    /// Merge a resume backfill into the existing log, deduplicating by id.
    pub fn merge_backfill(&mut self, backfill: Vec<Message>, cursor: Cursor) {
        for message in backfill {
            if self.seen.insert(message.id.clone()) {
                self.entries.push(message);
            }
        }
        self.cursor = self.cursor.max(cursor.0);
        self.synced = true;
    }

    /// Apply one live message: dedup by id, commit if it is the next
    /// sequence, hold if it arrived early. Overflowing the reorder window
    /// flushes everything in sequence order.
    pub fn apply_message(&mut self, message: Message) -> Applied {
        if self.seen.contains(&message.id) {
            return Applied::Ignored;
        }
        let next = self.cursor + 1;
        if message.seq == next {
            self.commit(message);
            self.drain_contiguous();
            Applied::Committed
        } else if message.seq > next {
            self.reorder.insert(message.seq, message);
            if self.reorder.len() > self.window {
                self.flush_reorder();
                Applied::Committed
            } else {
                Applied::Held
            }
        } else {
            // Unseen id with an already-passed sequence: a gap fill that
            // arrived after the window flushed. Keep it, leave the cursor.
            self.seen.insert(message.id.clone());
            self.entries.push(message);
            Applied::Committed
        }
    }

    /// Flush every held message in sequence order, gaps and all. Returns
    /// whether anything was committed.
    pub fn flush_reorder(&mut self) -> bool {
        let held = std::mem::take(&mut self.reorder);
        let mut committed = false;
        for (seq, message) in held {
            if self.seen.insert(message.id.clone()) {
                self.entries.push(message);
                self.cursor = self.cursor.max(seq);
                committed = true;
            }
        }
        committed
    }

    fn commit(&mut self, message: Message) {
        self.cursor = message.seq;
        self.seen.insert(message.id.clone());
        self.entries.push(message);
    }

    fn drain_contiguous(&mut self) {
        while let Some(message) = self.reorder.remove(&(self.cursor + 1)) {
            if self.seen.contains(&message.id) {
                self.cursor += 1;
            } else {
                self.commit(message);
            }
        }
    }
}

/// Bounded FIFO for inbound events that arrive before the session is
/// ready. Overflow drops the oldest event and flags the missed-events
/// condition, which forces a full resync on the next connect.
#[derive(Debug)]
pub struct PendingBuffer {
    queue: VecDeque<InboundEvent>,
    cap: usize,
    overflowed: bool,
}

impl PendingBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            cap,
            overflowed: false,
        }
    }

    /// Buffer an event. Returns true when this push overflowed.
    pub fn push(&mut self, event: InboundEvent) -> bool {
        let mut dropped = false;
        if self.queue.len() >= self.cap {
            self.queue.pop_front();
            self.overflowed = true;
            dropped = true;
        }
        self.queue.push_back(event);
        dropped
    }

    pub fn drain(&mut self) -> Vec<InboundEvent> {
        self.queue.drain(..).collect()
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn clear_overflow(&mut self) {
        self.overflowed = false;
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
