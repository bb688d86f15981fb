//! Line codec for queue records.
//!
//! A record is `<pid>` or `<pid> <label>` followed by `\n`. The label is the
//! free text after the first space and may itself contain spaces.

use std::fmt;
use thiserror::Error;

/// Why a queue line could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordParseError {
    /// The line held nothing at all.
    #[error("empty line")]
    Empty,

    /// The line does not start with a PID.
    #[error("missing pid in '{0}'")]
    MissingPid(String),

    /// The leading token is not a usable PID.
    #[error("invalid pid '{0}'")]
    InvalidPid(String),

    /// The line is not valid UTF-8; holds a lossy rendering.
    #[error("invalid utf-8 in '{0}'")]
    InvalidUtf8(String),
}

/// One waiter in the queue file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Process that owns this entry.
    pub pid: u32,
    /// Command of the owner when it enqueued; may be empty.
    pub label: String,
}

impl LockRecord {
    pub fn new(pid: u32, label: impl Into<String>) -> Self {
        Self {
            pid,
            label: label.into(),
        }
    }

    /// Decode a single line, with or without its trailing newline.
    pub fn parse(line: &str) -> Result<Self, RecordParseError> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        if line.is_empty() {
            return Err(RecordParseError::Empty);
        }

        let (pid_text, label) = match line.split_once(' ') {
            Some((pid_text, label)) => (pid_text, label),
            None => (line, ""),
        };

        if pid_text.is_empty() {
            return Err(RecordParseError::MissingPid(line.to_string()));
        }
        if !pid_text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RecordParseError::InvalidPid(pid_text.to_string()));
        }

        let pid: u32 = pid_text
            .parse()
            .map_err(|_| RecordParseError::InvalidPid(pid_text.to_string()))?;
        if pid == 0 {
            return Err(RecordParseError::InvalidPid(pid_text.to_string()));
        }

        Ok(Self::new(pid, label))
    }

    /// Decode a raw line as read from the queue file.
    pub fn parse_bytes(line: &[u8]) -> Result<Self, RecordParseError> {
        let text = std::str::from_utf8(line).map_err(|_| {
            let lossy = String::from_utf8_lossy(line);
            RecordParseError::InvalidUtf8(lossy.trim_end_matches('\n').to_string())
        })?;
        Self::parse(text)
    }

    /// Encode as one newline-terminated line.
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            write!(f, "{}", self.pid)
        } else {
            write!(f, "{} {}", self.pid, self.label)
        }
    }
}

/// Make a label safe to store on a single queue line.
pub fn sanitize_label(raw: &str) -> String {
    raw.chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}
