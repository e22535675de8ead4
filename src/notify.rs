use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

const DEFAULT_CAPACITY: usize = 32;

/// Something the user should be told about without blocking them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A task went from open to done.
    Completed { title: String, xp: u32 },
    Info(String),
    Error(String),
}

impl Notice {
    pub fn is_error(&self) -> bool {
        matches!(self, Notice::Error(_))
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Completed { title, xp } => write!(f, "Nice work! \"{title}\" done, +{xp} XP"),
            Notice::Info(msg) => f.write_str(msg),
            Notice::Error(msg) => write!(f, "Error: {msg}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub notice: Notice,
    pub raised_at: Instant,
}

/// Bounded queue of toasts. The oldest toast is dropped when full.
#[derive(Debug)]
pub struct Notifier {
    queue: VecDeque<Toast>,
    capacity: usize,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Notifier {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, notice: Notice) {
        if self.queue.len() == self.capacity {
            self.queue.pop_front();
        }
        self.queue.push_back(Toast {
            notice,
            raised_at: Instant::now(),
        });
    }

    pub fn info(&mut self, msg: impl Into<String>) {
        self.push(Notice::Info(msg.into()));
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.push(Notice::Error(msg.into()));
    }

    pub fn latest(&self) -> Option<&Toast> {
        self.queue.back()
    }

    /// Takes every pending notice, oldest first.
    pub fn drain(&mut self) -> Vec<Notice> {
        self.queue.drain(..).map(|t| t.notice).collect()
    }

    /// Drops toasts older than `ttl`.
    pub fn expire(&mut self, ttl: Duration) {
        let now = Instant::now();
        self.queue.retain(|t| now.duration_since(t.raised_at) < ttl);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
