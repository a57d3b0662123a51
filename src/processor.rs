//! Message processing for the tally protocol.
//!
//! A client sends one message per connection. The server counts how many
//! times the message's final character appears in it and replies with the
//! count and its parity:
//!
//! ```text
//! Request:  aabba\n
//! Response: 3, (odd)\n
//! ```
//!
//! At most one trailing `\n` or `\r` is stripped before counting. Counting
//! is byte-wise and case-sensitive.

use chrono::Local;
use std::fmt;

/// Timestamp format used in audit log lines.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parity of the occurrence count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    pub fn of(count: usize) -> Self {
        if count % 2 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        }
    }

    /// Label used in replies and log lines.
    pub fn label(self) -> &'static str {
        match self {
            Parity::Even => "even",
            Parity::Odd => "odd",
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One audit log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Local time the message was processed.
    pub timestamp: String,
    /// Message text with the line terminator removed.
    pub message: String,
    /// Final byte of the message, `None` for an empty message.
    pub last_char: Option<u8>,
    /// Occurrences of `last_char` in the message.
    pub count: usize,
    pub parity: Parity,
}

impl LogRecord {
    /// Render the record as a single log line, without the newline.
    ///
    /// Line terminators inside the message are escaped as `\r` and `\n` so
    /// one record is always one physical line.
    pub fn to_line(&self) -> String {
        format!(
            "{}, {}, {}, {}",
            self.timestamp,
            escape_terminators(&self.message),
            self.count,
            self.parity
        )
    }
}

fn escape_terminators(message: &str) -> String {
    let mut escaped = String::with_capacity(message.len());
    for c in message.chars() {
        match c {
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Result of processing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Reply to send back to the client, newline terminated.
    pub reply: String,
    pub record: LogRecord,
}

/// Remove at most one trailing line terminator.
pub fn strip_terminator(input: &[u8]) -> &[u8] {
    match input.last() {
        Some(b'\n') | Some(b'\r') => &input[..input.len() - 1],
        _ => input,
    }
}

/// Count occurrences of the final byte of `text`.
///
/// Returns `None` for empty input.
pub fn count_last(text: &[u8]) -> Option<(u8, usize)> {
    let last = *text.last()?;
    let count = text.iter().filter(|&&b| b == last).count();
    Some((last, count))
}

/// Format the reply line for a count.
pub fn reply(count: usize) -> String {
    format!("{count}, ({})\n", Parity::of(count))
}

/// Process the bytes read from a connection.
///
/// Returns `None` when nothing was read, in which case no reply is sent and
/// nothing is logged.
pub fn process(input: &[u8]) -> Option<Outcome> {
    process_at(input, Local::now().format(TIMESTAMP_FORMAT).to_string())
}

fn process_at(input: &[u8], timestamp: String) -> Option<Outcome> {
    if input.is_empty() {
        return None;
    }

    let text = strip_terminator(input);
    let (last_char, count) = match count_last(text) {
        Some((last, count)) => (Some(last), count),
        None => (None, 0),
    };
    let parity = Parity::of(count);

    Some(Outcome {
        reply: reply(count),
        record: LogRecord {
            timestamp,
            message: String::from_utf8_lossy(text).into_owned(),
            last_char,
            count,
            parity,
        },
    })
}
