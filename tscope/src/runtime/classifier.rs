//! Memory-source classification: DISK vs BUFFER.
//!
//! The half-open mmap range of the model file is the single authority.
//! A pointer inside it is DISK with `offset = ptr - start`; everything
//! else is BUFFER, carrying the buffer-event log's id for the pointer
//! when one exists. The check is constant-time and allocation-free, so
//! it can run inside the operation hook. Per-tensor offset metadata is
//! deliberately not consulted here: tensors that live in the mmap but
//! were never individually registered still classify correctly.

use crate::domain::{MemoryClass, TracerError};
use crate::runtime::buffer_log::BufferLog;

/// Half-open byte range `[start, end)` of the memory-mapped model file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapRange {
    pub start: u64,
    pub end: u64,
}

impl MmapRange {
    /// # Errors
    /// `MmapRangeMissing` for an empty or inverted range.
    pub fn new(start: u64, end: u64) -> Result<Self, TracerError> {
        if start >= end {
            return Err(TracerError::MmapRangeMissing);
        }
        Ok(Self { start, end })
    }

    /// Check if an address falls within this range.
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Classifies raw tensor pointers against the model mmap range.
#[derive(Debug)]
pub struct MemSourceClassifier {
    range: MmapRange,
}

impl MemSourceClassifier {
    #[must_use]
    pub fn new(range: MmapRange) -> Self {
        Self { range }
    }

    #[must_use]
    pub fn range(&self) -> MmapRange {
        self.range
    }

    /// Classify a pointer. BUFFER ids come from the buffer-event log's
    /// pointer map; pointers with no alloc event get id 0.
    #[must_use]
    pub fn classify(&self, ptr: u64, buffers: &BufferLog) -> MemoryClass {
        if self.range.contains(ptr) {
            MemoryClass::Disk { offset: ptr - self.range.start }
        } else {
            MemoryClass::Buffer { buffer_id: buffers.id_for_ptr(ptr) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_log() -> (tempfile::TempDir, BufferLog) {
        let dir = tempdir().unwrap();
        let clock = crate::runtime::clock::Clock::new();
        let log = BufferLog::create(dir.path().join("buf.jsonl"), clock).unwrap();
        (dir, log)
    }

    #[test]
    fn test_range_rejects_empty() {
        assert!(MmapRange::new(0x1000, 0x1000).is_err());
        assert!(MmapRange::new(0x2000, 0x1000).is_err());
        assert!(MmapRange::new(0x1000, 0x2000).is_ok());
    }

    #[test]
    fn test_range_boundaries() {
        let range = MmapRange::new(0x1000_0000, 0x1001_0000).unwrap();
        assert!(range.contains(0x1000_0000));
        assert!(range.contains(0x1000_FFFF));
        assert!(!range.contains(0x1001_0000));
        assert!(!range.contains(0x0FFF_FFFF));
    }

    #[test]
    fn test_disk_offset_is_range_relative() {
        let (_dir, log) = test_log();
        let classifier =
            MemSourceClassifier::new(MmapRange::new(0x1000_0000, 0x1001_0000).unwrap());

        match classifier.classify(0x1000_4000, &log) {
            MemoryClass::Disk { offset } => assert_eq!(offset, 0x4000),
            MemoryClass::Buffer { .. } => panic!("expected DISK"),
        }
    }

    #[test]
    fn test_outside_range_is_buffer() {
        let (_dir, log) = test_log();
        let classifier =
            MemSourceClassifier::new(MmapRange::new(0x1000_0000, 0x1001_0000).unwrap());

        match classifier.classify(0x7FF0_0000, &log) {
            MemoryClass::Buffer { buffer_id } => assert_eq!(buffer_id, 0),
            MemoryClass::Disk { .. } => panic!("expected BUFFER"),
        }
    }

    #[test]
    fn test_buffer_id_comes_from_alloc_event() {
        let (_dir, log) = test_log();
        let classifier =
            MemSourceClassifier::new(MmapRange::new(0x1000_0000, 0x1001_0000).unwrap());

        let id = log.on_alloc(0x7FF0_0000, 4096, "kv-cache", None);
        match classifier.classify(0x7FF0_0000, &log) {
            MemoryClass::Buffer { buffer_id } => assert_eq!(buffer_id, id),
            MemoryClass::Disk { .. } => panic!("expected BUFFER"),
        }
    }
}
