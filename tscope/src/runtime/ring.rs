//! Per-thread staging ring for trace records.
//!
//! Each hook-invoking thread owns one fixed-capacity ring. Appends are
//! plain vector pushes with no synchronization; the only blocking point
//! is the drain, where the owning thread encodes its batch and hands the
//! bytes to the sink under the sink's mutex. A full ring drains before
//! appending, so a record is never dropped: overflow is a recoverable
//! condition, not a failure.

use std::sync::Arc;

use tscope_common::{TraceRecord, RECORD_SIZE};

use crate::runtime::sink::TraceSink;

/// Minimum sensible capacity for production runs; tests go lower to force
/// overflow drains.
pub const DEFAULT_RING_CAPACITY: usize = 4096;

pub struct ThreadRing {
    records: Vec<TraceRecord>,
    capacity: usize,
    /// Reused encode scratch, sized once so drains never allocate
    scratch: Vec<u8>,
    sink: Arc<TraceSink>,
}

impl ThreadRing {
    #[must_use]
    pub fn new(capacity: usize, sink: Arc<TraceSink>) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            scratch: Vec::with_capacity(capacity * RECORD_SIZE),
            sink,
        }
    }

    /// Append one record, draining first if the ring is full.
    pub fn append(&mut self, record: TraceRecord) {
        if self.records.len() >= self.capacity {
            self.drain();
        }
        self.records.push(record);
    }

    /// Encode all staged records and hand them to the sink.
    pub fn drain(&mut self) {
        if self.records.is_empty() {
            return;
        }
        self.scratch.clear();
        let mut buf = [0u8; RECORD_SIZE];
        for rec in &self.records {
            rec.encode(&mut buf);
            self.scratch.extend_from_slice(&buf);
        }
        self.records.clear();
        self.sink.append_encoded(&self.scratch);
    }

    #[must_use]
    pub fn staged(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for ThreadRing {
    fn drop(&mut self) {
        // Thread exit is a drain point; whatever is staged goes out
        self.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(i: u64) -> TraceRecord {
        TraceRecord { timestamp_ns: i, ..TraceRecord::default() }
    }

    #[test]
    fn test_append_stages_until_capacity() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(TraceSink::create(dir.path().join("t.bin")).unwrap());
        let mut ring = ThreadRing::new(4, Arc::clone(&sink));

        for i in 0..4 {
            ring.append(record(i));
        }
        assert_eq!(ring.staged(), 4);
        assert_eq!(sink.records_written(), 0);
    }

    #[test]
    fn test_overflow_drains_before_append() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(TraceSink::create(dir.path().join("t.bin")).unwrap());
        let mut ring = ThreadRing::new(4, Arc::clone(&sink));

        for i in 0..5 {
            ring.append(record(i));
        }
        // The 5th append forced the first 4 out
        assert_eq!(ring.staged(), 1);
        assert_eq!(sink.records_written(), 4);
    }

    #[test]
    fn test_drop_drains_remainder() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(TraceSink::create(dir.path().join("t.bin")).unwrap());
        {
            let mut ring = ThreadRing::new(8, Arc::clone(&sink));
            ring.append(record(1));
            ring.append(record(2));
        }
        assert_eq!(sink.records_written(), 2);
    }

    #[test]
    fn test_no_record_lost_under_tight_loop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let sink = Arc::new(TraceSink::create(path.clone()).unwrap());
        {
            let mut ring = ThreadRing::new(8, Arc::clone(&sink));
            for i in 0..100 {
                ring.append(record(i));
            }
        }
        sink.flush();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 100 * RECORD_SIZE);
        // Emission order preserved end to end
        for (i, chunk) in bytes.chunks_exact(RECORD_SIZE).enumerate() {
            let arr: &[u8; RECORD_SIZE] = chunk.try_into().unwrap();
            assert_eq!(TraceRecord::decode(arr).timestamp_ns, i as u64);
        }
    }
}
