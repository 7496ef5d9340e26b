//! Binary trace reader.
//!
//! Streams a trace file as fixed 256-byte records. The file has no
//! header; the stride is the whole contract. A file that holds no
//! complete record is rejected; a ragged tail after whole records is
//! ignored with a warning (a process interrupted mid-drain can leave
//! one).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tscope_common::{name_str, TraceRecord, RECORD_SIZE};

use crate::domain::{LayerId, MemoryClass, ParseError, Phase};
use crate::offline::ParseSummary;

/// One source slot, decoded and ready for correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSource {
    pub name: String,
    pub ptr: u64,
    pub size_bytes: u32,
    pub layer_id: LayerId,
    pub class: MemoryClass,
}

/// One trace record in structured form.
#[derive(Debug, Clone)]
pub struct ParsedRecord {
    pub timestamp_ns: u64,
    pub token_id: u32,
    pub layer_id: LayerId,
    pub thread_id: u16,
    pub phase: Phase,
    pub operation_type: u8,
    pub dst_name: String,
    pub sources: Vec<ParsedSource>,
    pub expert_ids: Vec<u8>,
}

impl ParsedRecord {
    fn from_wire(rec: &TraceRecord) -> Self {
        let sources = rec
            .sources
            .iter()
            .take(rec.num_sources as usize)
            .map(|slot| ParsedSource {
                name: name_str(&slot.name).to_string(),
                ptr: slot.ptr,
                size_bytes: slot.size_bytes,
                layer_id: LayerId(slot.src_layer),
                class: MemoryClass::from_wire(slot.memory_source, slot.offset_or_buffer_id),
            })
            .collect();

        Self {
            timestamp_ns: rec.timestamp_ns,
            token_id: rec.token_id,
            layer_id: LayerId(rec.layer_id),
            thread_id: rec.thread_id,
            phase: Phase::from_wire(rec.phase),
            operation_type: rec.operation_type,
            dst_name: name_str(&rec.dst_name).to_string(),
            sources,
            expert_ids: rec.expert_ids[..rec.num_experts as usize].to_vec(),
        }
    }
}

/// A fully parsed trace.
#[derive(Debug)]
pub struct TraceFile {
    pub records: Vec<ParsedRecord>,
    pub summary: ParseSummary,
}

impl TraceFile {
    /// Group record indices by token id, in file order within each token.
    #[must_use]
    pub fn by_token(&self) -> BTreeMap<u32, Vec<&ParsedRecord>> {
        let mut map: BTreeMap<u32, Vec<&ParsedRecord>> = BTreeMap::new();
        for rec in &self.records {
            map.entry(rec.token_id).or_default().push(rec);
        }
        map
    }
}

/// Read a binary trace file.
///
/// # Errors
/// `TruncatedTrace` when the file holds no complete record; I/O errors
/// pass through.
pub fn read_trace(path: &Path) -> Result<TraceFile, ParseError> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();

    if len < RECORD_SIZE as u64 {
        return Err(ParseError::TruncatedTrace { len, record_size: RECORD_SIZE });
    }

    let mut summary = ParseSummary::default();
    let tail = len % RECORD_SIZE as u64;
    if tail != 0 {
        summary.warn(format!(
            "{}: ignoring {tail}-byte partial record at end of file",
            path.display()
        ));
    }

    let whole = (len / RECORD_SIZE as u64) as usize;
    let mut reader = BufReader::new(file);
    let mut records = Vec::with_capacity(whole);
    let mut buf = [0u8; RECORD_SIZE];
    for _ in 0..whole {
        reader.read_exact(&mut buf)?;
        records.push(ParsedRecord::from_wire(&TraceRecord::decode(&buf)));
    }

    summary.parsed = records.len();
    Ok(TraceFile { records, summary })
}
