use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AwaitError {
    #[error("output closed before `{pattern}` appeared")]
    NeverSeen { pattern: String },

    #[error("deadline passed before `{pattern}` appeared")]
    TimedOut { pattern: String },
}

#[derive(Debug)]
struct Buffer {
    lines: VecDeque<String>,
    capacity: usize,
    total: u64,
    closed: bool,
    // pattern -> matched by some line since it was first tracked
    seen: HashMap<String, bool>,
    fault: Option<String>,
}

impl Buffer {
    fn saw(&mut self, pattern: &str) -> bool {
        *self
            .seen
            .entry(pattern.to_owned())
            .or_insert_with(|| self.lines.iter().any(|line| line.contains(pattern)))
    }

    fn evict_to(&mut self, capacity: usize) {
        while self.lines.len() > capacity {
            self.lines.pop_front();
        }
    }
}

/// Bounded, thread-safe tail of a child's console output.
///
/// Fed by exactly one capture task; read from anywhere through [`snapshot`](Self::snapshot)
/// or [`await_message`](Self::await_message). Every append and the final
/// [`close`](Self::close) wake all waiters, and waiters arm their wakeup before checking
/// the buffer, so a condition satisfied between check and sleep is never missed.
#[derive(Debug)]
pub struct OutputCollector {
    buffer: Mutex<Buffer>,
    changed: Notify,
}

impl Default for OutputCollector {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl OutputCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(Buffer {
                lines: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                capacity,
                total: 0,
                closed: false,
                seen: HashMap::new(),
                fault: None,
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts latching `pattern` so a match is remembered even after its line is evicted.
    pub fn track(&self, pattern: &str) {
        self.lock().saw(pattern);
    }

    pub fn append(&self, line: impl Into<String>) {
        let line = line.into();
        {
            let mut buffer = self.lock();
            buffer.total += 1;
            for (pattern, hit) in buffer.seen.iter_mut() {
                if !*hit && line.contains(pattern.as_str()) {
                    *hit = true;
                }
            }
            if buffer.capacity > 0 {
                let keep = buffer.capacity - 1;
                buffer.evict_to(keep);
                buffer.lines.push_back(line);
            }
        }
        self.changed.notify_waiters();
    }

    /// Marks the stream as finished; pending and future waits stop hoping for new lines.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn record_fault(&self, reason: impl Into<String>) {
        let mut buffer = self.lock();
        if buffer.fault.is_none() {
            buffer.fault = Some(reason.into());
        }
    }

    pub fn fault(&self) -> Option<String> {
        self.lock().fault.clone()
    }

    pub fn snapshot(&self) -> String {
        let buffer = self.lock();
        let mut out = String::new();
        for (i, line) in buffer.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }

    pub fn lines(&self) -> Vec<String> {
        self.lock().lines.iter().cloned().collect()
    }

    pub fn total_lines(&self) -> u64 {
        self.lock().total
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn set_capacity(&self, capacity: usize) {
        let mut buffer = self.lock();
        buffer.capacity = capacity;
        buffer.evict_to(capacity);
    }

    /*
        @@@
        @await_message();
        . Returns at once when no pattern is given, or when the pattern already matched (even an evicted line).
        . Fails with NeverSeen once the collector is closed without a match.
        . Fails with TimedOut when the optional deadline passes first.
    */
    pub async fn await_message(
        &self,
        pattern: Option<&str>,
        deadline: Option<Instant>,
    ) -> Result<(), AwaitError> {
        let Some(pattern) = pattern else {
            return Ok(());
        };
        match deadline {
            Some(deadline) => timeout_at(deadline, self.seen_or_closed(pattern))
                .await
                .unwrap_or_else(|_| {
                    Err(AwaitError::TimedOut {
                        pattern: pattern.to_owned(),
                    })
                }),
            None => self.seen_or_closed(pattern).await,
        }
    }

    async fn seen_or_closed(&self, pattern: &str) -> Result<(), AwaitError> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut buffer = self.lock();
                if buffer.saw(pattern) {
                    return Ok(());
                }
                if buffer.closed {
                    return Err(AwaitError::NeverSeen {
                        pattern: pattern.to_owned(),
                    });
                }
            }
            notified.await;
        }
    }
}
