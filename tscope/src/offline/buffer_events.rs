//! Buffer event JSONL parser.
//!
//! Reconstructs a buffer lifetime timeline from the alloc/dealloc stream:
//! when each buffer appeared, how large it was, which layer it served,
//! and when (if ever) it went away.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::domain::ParseError;
use crate::offline::ParseSummary;
use crate::runtime::BufferEventLine;

/// One buffer's reconstructed lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLifetime {
    pub id: u64,
    pub ptr: u64,
    pub size: u64,
    /// Layer the buffer served, or -1
    pub layer: i32,
    pub label: String,
    pub alloc_ms: u64,
    /// None for buffers still live at shutdown
    pub dealloc_ms: Option<u64>,
}

/// The parsed event stream plus derived lifetimes, in alloc order.
#[derive(Debug)]
pub struct BufferTimeline {
    pub events: Vec<BufferEventLine>,
    pub lifetimes: Vec<BufferLifetime>,
    pub summary: ParseSummary,
}

impl BufferTimeline {
    /// Lifetime lookup by buffer id.
    #[must_use]
    pub fn by_id(&self, id: u64) -> Option<&BufferLifetime> {
        self.lifetimes.iter().find(|l| l.id == id)
    }
}

/// Parse the buffer event log.
///
/// # Errors
/// `MalformedJsonl` with the line number for unparsable lines, dealloc
/// events without a matching alloc, or reused ids.
pub fn parse_buffer_log(path: &Path) -> Result<BufferTimeline, ParseError> {
    let text = fs::read_to_string(path)?;

    let mut summary = ParseSummary::default();
    let mut events = Vec::new();
    let mut lifetimes: Vec<BufferLifetime> = Vec::new();
    let mut index_by_id: HashMap<u64, usize> = HashMap::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let bad = |reason: String| ParseError::MalformedJsonl { line: line_no, reason };

        let event: BufferEventLine =
            serde_json::from_str(line).map_err(|e| bad(e.to_string()))?;

        match event.event.as_str() {
            "alloc" => {
                if index_by_id.contains_key(&event.id) {
                    return Err(bad(format!("buffer id {} reused", event.id)));
                }
                index_by_id.insert(event.id, lifetimes.len());
                lifetimes.push(BufferLifetime {
                    id: event.id,
                    ptr: event.ptr,
                    size: event.size,
                    layer: event.layer,
                    label: event.label.clone(),
                    alloc_ms: event.timestamp_ms,
                    dealloc_ms: None,
                });
            }
            "dealloc" => {
                let slot = index_by_id
                    .get(&event.id)
                    .copied()
                    .ok_or_else(|| bad(format!("dealloc for unseen buffer id {}", event.id)))?;
                if lifetimes[slot].dealloc_ms.is_some() {
                    return Err(bad(format!("double dealloc of buffer id {}", event.id)));
                }
                lifetimes[slot].dealloc_ms = Some(event.timestamp_ms);
            }
            other => return Err(bad(format!("unknown event kind '{other}'"))),
        }
        events.push(event);
    }

    summary.parsed = events.len();
    let live = lifetimes.iter().filter(|l| l.dealloc_ms.is_none()).count();
    if live > 0 {
        summary.warn(format!("{live} buffer(s) never deallocated"));
    }

    Ok(BufferTimeline { events, lifetimes, summary })
}
