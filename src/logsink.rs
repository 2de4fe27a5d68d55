//! ==============================================================================
//! logsink.rs - line-oriented event log (gateway.log)
//! ==============================================================================
//!
//! purpose:
//!     every component reports its user-visible events (connections opened and
//!     closed, temperature alerts, csv inserts) as plain text lines. the lines
//!     travel over a channel to a single async relay task that numbers, stamps
//!     and appends them to the event log file:
//!
//!         0 - Fri Oct 16 10:01:02 2026 - Sensor node 15 has opened a new connection
//!
//! relationships:
//!     - used by: worker.rs, datamgr.rs, storage.rs (through the LogSink trait)
//!     - spawned by: main.rs (must run inside the tokio runtime)
//!
//! ==============================================================================

use anyhow::{Context, Result};
use chrono::Local;
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// destination for event-log lines
///
/// implementations must never block the caller: workers and consumers log
/// from inside their hot loops.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

/// cloneable sending side of the relay
#[derive(Clone)]
pub struct LogHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl LogSink for LogHandle {
    fn log(&self, message: &str) {
        let line = message.trim_end_matches(['\r', '\n']).to_string();
        if self.tx.send(line).is_err() {
            tracing::debug!("[LOG] relay stopped, dropped: {}", message);
        }
    }
}

pub struct LogRelay;

impl LogRelay {
    /// create (truncate) the event log and start the relay task
    ///
    /// the task finishes once every `LogHandle` has been dropped.
    pub fn spawn<P: AsRef<Path>>(path: P) -> Result<(LogHandle, JoinHandle<Result<()>>)> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create event log {}", path.display()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(relay(tokio::fs::File::from_std(file), rx));

        tracing::info!("[LOG] event log at {}", path.display());
        Ok((LogHandle { tx }, task))
    }
}

async fn relay(file: tokio::fs::File, mut rx: mpsc::UnboundedReceiver<String>) -> Result<()> {
    let mut out = BufWriter::new(file);
    let mut seq: u64 = 0;

    while let Some(message) = rx.recv().await {
        // ctime(3) layout
        let stamp = Local::now().format("%a %b %e %H:%M:%S %Y");
        let line = format!("{} - {} - {}\n", seq, stamp, message);
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        seq += 1;
    }

    out.shutdown().await?;
    tracing::debug!("[LOG] relay closed after {} lines", seq);
    Ok(())
}

/// in-memory sink for tests
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    lines: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl LogSink for MemorySink {
    fn log(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relay_numbers_and_stamps_every_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.log");

        let (handle, task) = LogRelay::spawn(&path).unwrap();
        let other = handle.clone();
        handle.log("first");
        other.log("second\n");
        handle.log("third");
        drop(handle);
        drop(other);
        task.await.unwrap().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("0 - "));
        assert!(lines[0].ends_with(" - first"));
        assert!(lines[1].starts_with("1 - "));
        assert!(lines[1].ends_with(" - second"));
        assert!(lines[2].starts_with("2 - "));
        assert!(lines[2].ends_with(" - third"));
    }

    #[tokio::test]
    async fn logging_from_plain_threads_reaches_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.log");
        let (handle, task) = LogRelay::spawn(&path).unwrap();

        let threads: Vec<_> = (0..4)
            .map(|i| {
                let handle = handle.clone();
                std::thread::spawn(move || handle.log(&format!("from thread {}", i)))
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        drop(handle);
        task.await.unwrap().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 4);
        for i in 0..4 {
            assert!(content.contains(&format!("from thread {}", i)));
        }
    }

    #[tokio::test]
    async fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("gateway.log");
        assert!(LogRelay::spawn(&path).is_err());
    }
}
