//! Timestamped session log shown to the user.

use std::fmt;

use chrono::{DateTime, Local};
use log::debug;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Plain information.
    Info,
    /// A step finished well.
    Success,
    /// Something the user should look at.
    Warning,
    /// A failed action.
    Error,
}

impl Severity {
    /// Short tag, e.g. for JSON output.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// One line of the session log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// When the entry was recorded.
    pub timestamp: DateTime<Local>,
    /// Severity.
    pub severity: Severity,
    /// Message text.
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

type Listener = Box<dyn FnMut(&LogEntry)>;

/// Append-only list of [`LogEntry`] values.
///
/// A listener set with [`SessionLog::set_listener`] sees every entry as it
/// is appended, which lets a front end render the log live.
#[derive(Default)]
pub struct SessionLog {
    entries: Vec<LogEntry>,
    listener: Option<Listener>,
}

impl fmt::Debug for SessionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLog")
            .field("entries", &self.entries)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl SessionLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry stamped with the current local time.
    pub fn push(&mut self, severity: Severity, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            severity,
            message: message.into(),
        };
        debug!("[{}] {}", severity.tag(), entry.message);
        if let Some(listener) = self.listener.as_mut() {
            listener(&entry);
        }
        self.entries.push(entry);
    }

    /// Call `listener` for every entry appended from now on.
    pub fn set_listener(&mut self, listener: impl FnMut(&LogEntry) + 'static) {
        self.listener = Some(Box::new(listener));
    }

    /// Append an [`Severity::Info`] entry.
    pub fn info(&mut self, message: impl Into<String>) {
        self.push(Severity::Info, message);
    }

    /// Append a [`Severity::Success`] entry.
    pub fn success(&mut self, message: impl Into<String>) {
        self.push(Severity::Success, message);
    }

    /// Append a [`Severity::Warning`] entry.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, message);
    }

    /// Append a [`Severity::Error`] entry.
    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, message);
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry of `severity` contains `needle`.
    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.severity == severity && e.message.contains(needle))
    }
}
