//! Append-only audit log shared by all workers.
//!
//! Every append runs inside one critical section: open the file in append
//! mode, write the whole line, flush, close. Lines from concurrent workers
//! therefore never interleave.

use crate::processor::LogRecord;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::trace;

/// Serialized writer for the request log file.
pub struct LogWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LogWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    ///
    /// The file is opened per call so a log that cannot be opened now may
    /// succeed later (e.g. after the directory is created).
    pub fn append(&self, record: &LogRecord) -> io::Result<()> {
        let mut line = record.to_line();
        line.push('\n');

        // The guarded data is `()`, so a poisoned lock carries no broken state.
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        trace!(path = %self.path.display(), bytes = line.len(), "Appended log record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::Parity;
    use std::sync::Arc;
    use std::thread;

    fn temp_log(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "tally-server-{}-{}.log",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn record(message: &str, count: usize) -> LogRecord {
        LogRecord {
            timestamp: "2024-01-01 12:00:00".to_string(),
            message: message.to_string(),
            last_char: message.bytes().last(),
            count,
            parity: Parity::of(count),
        }
    }

    #[test]
    fn test_append_lines() {
        let path = temp_log("append");
        let writer = LogWriter::new(&path);

        writer.append(&record("aabba", 3)).unwrap();
        writer.append(&record("", 0)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "2024-01-01 12:00:00, aabba, 3, odd\n2024-01-01 12:00:00, , 0, even\n"
        );
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_concurrent_appends_do_not_interleave() {
        let path = temp_log("concurrent");
        let writer = Arc::new(LogWriter::new(&path));
        let threads = 8;
        let per_thread = 50;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let writer = Arc::clone(&writer);
                thread::spawn(move || {
                    let message = format!("{}", t).repeat(200);
                    for _ in 0..per_thread {
                        writer.append(&record(&message, 200)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), threads * per_thread);
        for line in lines {
            let fields: Vec<&str> = line.split(", ").collect();
            assert_eq!(fields.len(), 4, "malformed line: {line}");
            let message = fields[1];
            let first = message.chars().next().unwrap();
            assert!(message.chars().all(|c| c == first));
            assert_eq!(message.len(), 200);
            assert_eq!(fields[2], "200");
            assert_eq!(fields[3], "even");
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_unopenable_path_is_error() {
        let path = std::env::temp_dir()
            .join("tally-server-missing-dir")
            .join("nested")
            .join("requests.log");
        let writer = LogWriter::new(&path);
        assert!(writer.append(&record("x", 1)).is_err());
    }
}
