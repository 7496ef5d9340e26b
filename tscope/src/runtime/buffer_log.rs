//! Buffer alloc/dealloc event log.
//!
//! Non-model allocations (activations, KV cache, scratch) are announced
//! here as they come and go. Each event is one JSON line in a dedicated
//! text file: buffer events are rare compared to op records, carry
//! variable-width labels, and are useful to humans in raw form. This path
//! is off the per-op hot path, so a mutex is fine; the pointer->id map the
//! classifier consults is kept separately behind an RwLock so hook-path
//! reads never wait on file I/O.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use log::warn;
use serde::{Deserialize, Serialize};

use tscope_common::BUFFER_ID_UNKNOWN;

use crate::domain::TracerError;
use crate::runtime::clock::Clock;

/// One line of the buffer event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BufferEventLine {
    pub timestamp_ms: u64,
    /// "alloc" or "dealloc"
    pub event: String,
    pub id: u64,
    pub ptr: u64,
    pub size: u64,
    /// Associated layer, or -1
    pub layer: i32,
    pub label: String,
}

#[derive(Debug)]
struct LogInner {
    writer: BufWriter<File>,
    next_id: u64,
    /// id -> ptr for live buffers, so dealloc can clear the pointer map
    live: HashMap<u64, u64>,
}

/// Thread-safe buffer event log.
#[derive(Debug)]
pub struct BufferLog {
    path: PathBuf,
    clock: Clock,
    inner: Mutex<LogInner>,
    /// ptr -> id, read by the classifier on the hook path
    ptr_to_id: RwLock<HashMap<u64, u64>>,
}

impl BufferLog {
    /// Open the log file for writing.
    ///
    /// # Errors
    /// `SinkUnavailable` when the file cannot be created.
    pub fn create(path: PathBuf, clock: Clock) -> Result<Self, TracerError> {
        let file = File::create(&path).map_err(|e| TracerError::SinkUnavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path,
            clock,
            inner: Mutex::new(LogInner {
                writer: BufWriter::new(file),
                // 0 is reserved for "unknown"
                next_id: 1,
                live: HashMap::new(),
            }),
            ptr_to_id: RwLock::new(HashMap::new()),
        })
    }

    /// Record an allocation and return its id.
    pub fn on_alloc(&self, ptr: u64, size: u64, label: &str, layer: Option<u16>) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.live.insert(id, ptr);

        let line = BufferEventLine {
            timestamp_ms: self.clock.now_ms(),
            event: "alloc".to_string(),
            id,
            ptr,
            size,
            layer: layer.map_or(-1, i32::from),
            label: label.to_string(),
        };
        Self::emit(&mut inner.writer, &self.path, &line);
        drop(inner);

        self.ptr_to_id.write().unwrap_or_else(std::sync::PoisonError::into_inner).insert(ptr, id);
        id
    }

    /// Record a deallocation. An id with no live alloc is logged and
    /// otherwise ignored; ids are never reused within a run.
    pub fn on_dealloc(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(ptr) = inner.live.remove(&id) else {
            warn!("dealloc for unknown buffer id {id}");
            return;
        };

        let line = BufferEventLine {
            timestamp_ms: self.clock.now_ms(),
            event: "dealloc".to_string(),
            id,
            ptr,
            size: 0,
            layer: -1,
            label: String::new(),
        };
        Self::emit(&mut inner.writer, &self.path, &line);
        drop(inner);

        let mut map = self.ptr_to_id.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        // Only clear if the pointer still maps to this id; it may have
        // been reused by a newer alloc already
        if map.get(&ptr) == Some(&id) {
            map.remove(&ptr);
        }
    }

    /// Buffer id for a pointer, or 0 when no alloc event is known.
    /// Hook-path safe: one uncontended read lock, no allocation.
    #[must_use]
    pub fn id_for_ptr(&self, ptr: u64) -> u64 {
        self.ptr_to_id
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&ptr)
            .copied()
            .unwrap_or(BUFFER_ID_UNKNOWN)
    }

    /// Flush buffered lines to disk.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Err(e) = inner.writer.flush() {
            warn!("buffer log flush failed for {}: {e}", self.path.display());
        }
    }

    fn emit(writer: &mut BufWriter<File>, path: &PathBuf, line: &BufferEventLine) {
        match serde_json::to_string(line) {
            Ok(json) => {
                if let Err(e) = writeln!(writer, "{json}") {
                    warn!("buffer log write failed for {}: {e}", path.display());
                }
            }
            Err(e) => warn!("buffer event serialization failed: {e}"),
        }
    }
}

impl Drop for BufferLog {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_ids_are_monotonic_from_one() {
        let dir = tempdir().unwrap();
        let log = BufferLog::create(dir.path().join("b.jsonl"), Clock::new()).unwrap();

        assert_eq!(log.on_alloc(0x100, 64, "a", None), 1);
        assert_eq!(log.on_alloc(0x200, 64, "b", Some(3)), 2);
        assert_eq!(log.on_alloc(0x300, 64, "c", None), 3);
    }

    #[test]
    fn test_dealloc_clears_pointer_map() {
        let dir = tempdir().unwrap();
        let log = BufferLog::create(dir.path().join("b.jsonl"), Clock::new()).unwrap();

        let id = log.on_alloc(0x100, 64, "scratch", None);
        assert_eq!(log.id_for_ptr(0x100), id);

        log.on_dealloc(id);
        assert_eq!(log.id_for_ptr(0x100), 0);
    }

    #[test]
    fn test_pointer_reuse_keeps_newest_id() {
        let dir = tempdir().unwrap();
        let log = BufferLog::create(dir.path().join("b.jsonl"), Clock::new()).unwrap();

        let old = log.on_alloc(0x100, 64, "scratch", None);
        let new = log.on_alloc(0x100, 128, "scratch2", None);
        // Deallocating the old id must not orphan the new mapping
        log.on_dealloc(old);
        assert_eq!(log.id_for_ptr(0x100), new);
    }

    #[test]
    fn test_jsonl_lines_are_well_formed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.jsonl");
        let log = BufferLog::create(path.clone(), Clock::new()).unwrap();

        let id = log.on_alloc(0xABC, 4096, "kv-cache", Some(2));
        log.on_dealloc(id);
        log.flush();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<BufferEventLine> =
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].event, "alloc");
        assert_eq!(lines[0].ptr, 0xABC);
        assert_eq!(lines[0].size, 4096);
        assert_eq!(lines[0].layer, 2);
        assert_eq!(lines[0].label, "kv-cache");
        assert_eq!(lines[1].event, "dealloc");
        assert_eq!(lines[1].id, lines[0].id);
    }

    #[test]
    fn test_unknown_dealloc_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.jsonl");
        let log = BufferLog::create(path.clone(), Clock::new()).unwrap();

        log.on_dealloc(99);
        log.flush();

        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 0);
    }
}
