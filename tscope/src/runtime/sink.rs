//! Trace sink: the single binary output file.
//!
//! Records arrive as pre-encoded byte batches and are appended in order of
//! arrival through buffered I/O. The file is headerless; readers rely on
//! the fixed 256-byte stride and detect EOF. The mutex is held only for
//! the duration of a batch copy; encoding happens in the draining thread
//! before the lock is taken.
//!
//! Failure model: an open failure at init is `SinkUnavailable` and tracing
//! never starts. A write error mid-run emits one diagnostic line and
//! latches the sink into a degraded state where subsequent batches are
//! discarded; the engine is not disturbed.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use log::error;

use tscope_common::RECORD_SIZE;

use crate::domain::TracerError;

#[derive(Debug)]
pub struct TraceSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    degraded: AtomicBool,
    records_written: AtomicU64,
}

impl TraceSink {
    /// Create the output file.
    ///
    /// # Errors
    /// `SinkUnavailable` when the file cannot be created; callers disable
    /// tracing in that case.
    pub fn create(path: PathBuf) -> Result<Self, TracerError> {
        let file = File::create(&path).map_err(|e| TracerError::SinkUnavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            degraded: AtomicBool::new(false),
            records_written: AtomicU64::new(0),
        })
    }

    /// Append a batch of already-encoded records.
    ///
    /// `bytes` must be a whole number of records. In the degraded state the
    /// batch is silently discarded.
    pub fn append_encoded(&self, bytes: &[u8]) {
        debug_assert_eq!(bytes.len() % RECORD_SIZE, 0);
        if bytes.is_empty() || self.degraded.load(Ordering::Relaxed) {
            return;
        }

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.write_all(bytes) {
            drop(writer);
            self.enter_degraded(&e);
            return;
        }
        drop(writer);

        self.records_written.fetch_add((bytes.len() / RECORD_SIZE) as u64, Ordering::Relaxed);
    }

    /// Flush buffered records to disk. Called on capacity thresholds and
    /// at shutdown.
    pub fn flush(&self) {
        if self.degraded.load(Ordering::Relaxed) {
            return;
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.flush() {
            drop(writer);
            self.enter_degraded(&e);
        }
    }

    /// Number of records accepted so far (excludes discarded-in-degraded).
    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    // One diagnostic line, then discard everything that follows
    fn enter_degraded(&self, cause: &std::io::Error) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            error!(
                "trace sink {} failed ({cause}); tracing degraded, subsequent records discarded",
                self.path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use tscope_common::TraceRecord;

    fn encode_n(n: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(n * RECORD_SIZE);
        for i in 0..n {
            let rec = TraceRecord {
                timestamp_ns: i as u64,
                token_id: 0,
                ..TraceRecord::default()
            };
            let mut buf = [0u8; RECORD_SIZE];
            rec.encode(&mut buf);
            bytes.extend_from_slice(&buf);
        }
        bytes
    }

    #[test]
    fn test_append_and_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.bin");
        let sink = TraceSink::create(path.clone()).unwrap();

        sink.append_encoded(&encode_n(3));
        sink.flush();

        assert_eq!(fs::metadata(&path).unwrap().len(), 3 * RECORD_SIZE as u64);
        assert_eq!(sink.records_written(), 3);
    }

    #[test]
    fn test_create_failure_is_sink_unavailable() {
        let err = TraceSink::create(PathBuf::from("/nonexistent-dir/trace.bin")).unwrap_err();
        assert!(matches!(err, TracerError::SinkUnavailable { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let dir = tempdir().unwrap();
        let sink = TraceSink::create(dir.path().join("t.bin")).unwrap();
        sink.append_encoded(&[]);
        assert_eq!(sink.records_written(), 0);
    }

    #[test]
    fn test_batches_preserve_arrival_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.bin");
        let sink = TraceSink::create(path.clone()).unwrap();

        sink.append_encoded(&encode_n(2));
        sink.append_encoded(&encode_n(1));
        sink.flush();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 3 * RECORD_SIZE);
        let first: &[u8; RECORD_SIZE] = bytes[..RECORD_SIZE].try_into().unwrap();
        let second: &[u8; RECORD_SIZE] =
            bytes[RECORD_SIZE..2 * RECORD_SIZE].try_into().unwrap();
        assert_eq!(TraceRecord::decode(first).timestamp_ns, 0);
        assert_eq!(TraceRecord::decode(second).timestamp_ns, 1);
    }
}
