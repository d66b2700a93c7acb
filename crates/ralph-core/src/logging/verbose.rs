//! Rotating append-only file sink for the verbose output stream
//!
//! Producers (the driver, the adapter, signal-adjacent code) format and
//! enqueue lines; a dedicated writer thread owns the file handle and
//! performs rotation. The only caller-visible synchronization is the
//! channel send, so producers never block on disk I/O and the sink stays
//! safe under many concurrent writers.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::warn;

use super::mask_sensitive_data;

/// Rotation threshold for the active log file.
pub const MAX_LOG_SIZE_BYTES: u64 = 10 * 1024 * 1024;
/// Number of rotated backups kept (`.log.1` .. `.log.3`).
pub const MAX_BACKUPS: u32 = 3;

enum WriterMessage {
    Line(String),
    Flush(std::sync::mpsc::SyncSender<()>),
    Close,
}

/// Masking, rotating verbose logger.
///
/// Cloneable handle; all clones feed the same writer thread. After
/// `emergency_shutdown()` every subsequent write returns immediately
/// without touching the file, which makes the handle safe to use from
/// signal-handling paths.
#[derive(Clone)]
pub struct VerboseLogger {
    tx: UnboundedSender<WriterMessage>,
    emergency: Arc<AtomicBool>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl VerboseLogger {
    /// Open (or create) the log file at `path` and start the writer thread.
    pub fn new(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let emergency = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = unbounded_channel::<WriterMessage>();

        let writer_emergency = Arc::clone(&emergency);
        let worker = std::thread::Builder::new()
            .name("ralph-verbose-logger".to_string())
            .spawn(move || {
                let mut writer = LogWriter::open(path);
                while let Some(message) = rx.blocking_recv() {
                    match message {
                        WriterMessage::Line(line) => {
                            if writer_emergency.load(Ordering::SeqCst) {
                                continue;
                            }
                            writer.write_line(&line);
                        }
                        WriterMessage::Flush(ack) => {
                            writer.flush();
                            let _ = ack.send(());
                        }
                        WriterMessage::Close => break,
                    }
                }
                writer.flush();
            })?;

        Ok(Self {
            tx,
            emergency,
            worker: Arc::new(Mutex::new(Some(worker))),
        })
    }

    /// Append one masked, timestamped line. Never blocks on I/O.
    pub fn log(&self, level: &str, message: &str) {
        if self.emergency.load(Ordering::SeqCst) {
            return;
        }
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("{timestamp} [{level}] {}\n", mask_sensitive_data(message));
        let _ = self.tx.send(WriterMessage::Line(line));
    }

    /// Async emit path. The enqueue itself never suspends; this exists so
    /// async call sites read naturally and stay insulated from future
    /// buffering changes.
    pub async fn alog(&self, level: &str, message: &str) {
        self.log(level, message);
    }

    pub fn info(&self, message: &str) {
        self.log("INFO", message);
    }

    pub fn warning(&self, message: &str) {
        self.log("WARNING", message);
    }

    pub fn error(&self, message: &str) {
        self.log("ERROR", message);
    }

    /// Latch the emergency flag: all later writes become no-ops.
    ///
    /// Safe to call from signal context; it only stores an atomic.
    pub fn emergency_shutdown(&self) {
        self.emergency.store(true, Ordering::SeqCst);
    }

    /// Whether the emergency latch has been set.
    pub fn is_shut_down(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    /// Wait until every line enqueued so far has reached the file.
    pub fn flush(&self) {
        if self.emergency.load(Ordering::SeqCst) {
            return;
        }
        let (ack_tx, ack_rx) = std::sync::mpsc::sync_channel(1);
        if self.tx.send(WriterMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv_timeout(std::time::Duration::from_secs(5));
        }
    }

    /// Stop the writer thread. Implies `emergency_shutdown()` for any
    /// handle still held elsewhere.
    pub fn close(&self) {
        self.flush();
        self.emergency.store(true, Ordering::SeqCst);
        let _ = self.tx.send(WriterMessage::Close);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Writer-thread state: the open handle plus the running size counter.
struct LogWriter {
    path: PathBuf,
    file: Option<File>,
    size: u64,
}

impl LogWriter {
    fn open(path: PathBuf) -> Self {
        let file = OpenOptions::new().create(true).append(true).open(&path).ok();
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Self { path, file, size }
    }

    fn write_line(&mut self, line: &str) {
        if self.size + line.len() as u64 > MAX_LOG_SIZE_BYTES {
            self.rotate();
        }

        let written = match self.file.as_mut() {
            Some(file) => file.write_all(line.as_bytes()).is_ok(),
            None => false,
        };

        if written {
            self.size += line.len() as u64;
        } else {
            // File sink is broken; fall back to stderr and swallow any
            // failure there too.
            let _ = write!(std::io::stderr(), "ralph-log: {line}");
            self.file = None;
        }
    }

    fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }

    /// Shift backups down one slot and start a fresh active file.
    ///
    /// `log` -> `log.1`, `log.1` -> `log.2`, `log.2` -> `log.3`; the old
    /// `log.3` and any stale higher-numbered backups are removed.
    fn rotate(&mut self) {
        self.file = None;

        // Drop the oldest backup and anything beyond the retention window.
        for index in MAX_BACKUPS..MAX_BACKUPS + 8 {
            let stale = backup_path(&self.path, index);
            if stale.exists() {
                let _ = std::fs::remove_file(&stale);
            }
        }

        for index in (1..MAX_BACKUPS).rev() {
            let from = backup_path(&self.path, index);
            if from.exists() {
                let _ = std::fs::rename(&from, backup_path(&self.path, index + 1));
            }
        }

        if self.path.exists() {
            let _ = std::fs::rename(&self.path, backup_path(&self.path, 1));
        }

        self.file = match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => Some(file),
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to reopen log after rotation");
                None
            }
        };
        self.size = 0;
    }
}

fn backup_path(path: &Path, index: u32) -> PathBuf {
    PathBuf::from(format!("{}.{index}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_log(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn test_writes_masked_timestamped_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ralph.log");
        let logger = VerboseLogger::new(&path).unwrap();

        logger.info("Using API key: sk-1234567890abcdef");
        logger.flush();

        let content = read_log(&path);
        assert!(content.contains("[INFO]"));
        assert!(content.contains("sk-***********"));
        assert!(!content.contains("1234567890abcdef"));
        logger.close();
    }

    #[test]
    fn test_emergency_shutdown_stops_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ralph.log");
        let logger = VerboseLogger::new(&path).unwrap();

        logger.info("before shutdown");
        logger.flush();
        let before = read_log(&path);

        logger.emergency_shutdown();
        logger.info("after shutdown");
        // flush() is also a no-op after the latch; give the writer a moment.
        std::thread::sleep(std::time::Duration::from_millis(50));

        let after = read_log(&path);
        assert_eq!(before, after, "log file must not change after shutdown");
        assert!(logger.is_shut_down());
    }

    #[test]
    fn test_rotation_keeps_three_backups() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ralph.log");

        // Pre-seed an active log just under the limit plus stale backups
        // beyond the retention window.
        std::fs::write(&path, vec![b'x'; (MAX_LOG_SIZE_BYTES - 10) as usize]).unwrap();
        for index in 1..=5u32 {
            std::fs::write(backup_path(&path, index), format!("backup {index}")).unwrap();
        }

        let logger = VerboseLogger::new(&path).unwrap();
        logger.info("this line pushes the active file over the limit");
        logger.flush();

        assert!(backup_path(&path, 1).exists(), "log.1 should exist");
        assert!(backup_path(&path, 2).exists(), "log.2 should exist");
        assert!(backup_path(&path, 3).exists(), "log.3 should exist");
        assert!(!backup_path(&path, 4).exists(), "log.4 should be removed");
        assert!(!backup_path(&path, 5).exists(), "log.5 should be removed");
        assert!(path.exists(), "fresh active log should exist");

        // The renamed active file becomes backup 1; prior backup 1 shifted
        // down to slot 2.
        assert_eq!(backup_path(&path, 2).metadata().unwrap().len(), 8);
        logger.close();
    }

    #[test]
    fn test_oversized_single_message_triggers_rotation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ralph.log");
        std::fs::write(&path, b"existing content").unwrap();

        let logger = VerboseLogger::new(&path).unwrap();
        let huge = "y".repeat((MAX_LOG_SIZE_BYTES + 1) as usize);
        logger.info(&huge);
        logger.flush();

        assert!(backup_path(&path, 1).exists());
        assert_eq!(
            read_log(&backup_path(&path, 1)),
            "existing content",
            "previous active file should be rotated intact"
        );
        assert!(read_log(&path).contains("yyy"));
        logger.close();
    }

    #[test]
    fn test_many_concurrent_producers_do_not_deadlock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ralph.log");
        let logger = VerboseLogger::new(&path).unwrap();

        let handles: Vec<_> = (0..20)
            .map(|producer| {
                let logger = logger.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        logger.info(&format!("producer {producer} line {i}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        logger.flush();

        let content = read_log(&path);
        assert_eq!(content.lines().count(), 20 * 50);
        logger.close();
    }

    #[tokio::test]
    async fn test_async_emit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ralph.log");
        let logger = VerboseLogger::new(&path).unwrap();

        logger.alog("INFO", "async line").await;
        logger.flush();
        assert!(read_log(&path).contains("async line"));
        logger.close();
    }
}
