use std::collections::VecDeque;
use std::fmt;

// Backpressure policy: fail fast when the queue is at capacity. The
// runloop logs the overflow and drops the command; nothing blocks.
#[derive(Debug, PartialEq, Eq)]
pub struct QueueOverflow {
    pub dropped: String,
}

impl fmt::Display for QueueOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message queue full, dropped '{}'", self.dropped)
    }
}

impl std::error::Error for QueueOverflow {}

#[derive(Debug)]
struct Entry {
    text: String,
    // Recognized but never reorder the queue; a UI banner consumes them.
    #[allow(dead_code)]
    priority: u32,
    #[allow(dead_code)]
    duration: u32,
}

#[derive(Debug)]
pub struct MsgQueue {
    entries: VecDeque<Entry>,
    capacity: usize,
}

impl MsgQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(
        &mut self,
        text: impl Into<String>,
        priority: u32,
        duration: u32,
    ) -> Result<(), QueueOverflow> {
        let text = text.into();
        if self.entries.len() >= self.capacity {
            return Err(QueueOverflow { dropped: text });
        }
        self.entries.push_back(Entry {
            text,
            priority,
            duration,
        });
        Ok(())
    }

    pub fn pull(&mut self) -> Option<String> {
        self.entries.pop_front().map(|entry| entry.text)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Queue commands carry an optional completion tag after a '|'. The
// producer side joins, the lane side splits on pull.
pub(crate) fn split_tag(command: &str) -> (&str, &str) {
    match command.split_once('|') {
        Some((primary, tag)) => (primary, tag),
        None => (command, ""),
    }
}
