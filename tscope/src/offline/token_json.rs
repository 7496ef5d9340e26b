//! Per-token JSON writer (the downstream consumer contract).
//!
//! One file per token, `token-NNNNN.json`, carrying a faithful
//! reconstruction of that token's binary records with names resolved
//! against the memory map. `timestamp_start_ns` is monotonic and relative
//! to tracer init, like every timestamp in the trace; the wall-clock
//! epoch lives in run-level metadata. A token's file is written complete
//! or not at all: content goes to a temp file first and is renamed into
//! place.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::{MemoryClass, ParseError};
use crate::offline::trace_reader::ParsedRecord;

/// Bumped when the entry schema changes shape.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
pub struct TokenJson {
    pub metadata: TokenMetadata,
    pub entries: Vec<EntryJson>,
}

#[derive(Debug, Serialize)]
pub struct TokenMetadata {
    pub total_entries: usize,
    pub duration_ms: f64,
    /// Monotonic, relative to tracer init.
    pub timestamp_start_ns: u64,
    pub format_version: u32,
}

#[derive(Debug, Serialize)]
pub struct EntryJson {
    pub entry_id: usize,
    pub timestamp_ns: u64,
    pub timestamp_relative_ms: f64,
    pub token_id: u32,
    pub layer_id: Option<u16>,
    pub thread_id: u16,
    pub phase: &'static str,
    pub operation_type: u8,
    pub dst_name: String,
    pub num_sources: usize,
    pub sources: Vec<SourceJson>,
    pub expert_ids: Vec<u8>,
    pub num_experts: usize,
}

#[derive(Debug, Serialize)]
pub struct SourceJson {
    pub name: String,
    /// Raw pointer rendered as hex for JS consumers (u64 loses precision
    /// as a JSON number)
    pub tensor_ptr: String,
    pub size_bytes: u32,
    pub layer_id: Option<u16>,
    pub memory_source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_id: Option<u64>,
}

/// Build the JSON document for one token's records (already in emit
/// order).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn build_token_json(records: &[&ParsedRecord]) -> TokenJson {
    let start_ns = records.first().map_or(0, |r| r.timestamp_ns);
    let end_ns = records.last().map_or(0, |r| r.timestamp_ns);

    let entries = records
        .iter()
        .enumerate()
        .map(|(entry_id, rec)| EntryJson {
            entry_id,
            timestamp_ns: rec.timestamp_ns,
            timestamp_relative_ms: (rec.timestamp_ns.saturating_sub(start_ns)) as f64 / 1e6,
            token_id: rec.token_id,
            layer_id: rec.layer_id.as_option(),
            thread_id: rec.thread_id,
            phase: rec.phase.as_str(),
            operation_type: rec.operation_type,
            dst_name: rec.dst_name.clone(),
            num_sources: rec.sources.len(),
            sources: rec
                .sources
                .iter()
                .map(|src| {
                    let (disk_offset, buffer_id) = match src.class {
                        MemoryClass::Disk { offset } => (Some(offset), None),
                        MemoryClass::Buffer { buffer_id } => (None, Some(buffer_id)),
                    };
                    SourceJson {
                        name: src.name.clone(),
                        tensor_ptr: format!("0x{:x}", src.ptr),
                        size_bytes: src.size_bytes,
                        layer_id: src.layer_id.as_option(),
                        memory_source: src.class.as_str(),
                        disk_offset,
                        buffer_id,
                    }
                })
                .collect(),
            expert_ids: rec.expert_ids.clone(),
            num_experts: rec.expert_ids.len(),
        })
        .collect();

    TokenJson {
        metadata: TokenMetadata {
            total_entries: records.len(),
            duration_ms: (end_ns.saturating_sub(start_ns)) as f64 / 1e6,
            timestamp_start_ns: start_ns,
            format_version: FORMAT_VERSION,
        },
        entries,
    }
}

/// Write one token's JSON into `dir`, atomically.
///
/// # Errors
/// I/O and serialization errors; on failure no partial file is left at
/// the final path.
pub fn write_token_json(
    dir: &Path,
    token_id: u32,
    records: &[&ParsedRecord],
) -> Result<PathBuf, ParseError> {
    let doc = build_token_json(records);
    let path = dir.join(format!("token-{token_id:05}.json"));
    let tmp = dir.join(format!(".token-{token_id:05}.json.tmp"));

    let json = serde_json::to_string_pretty(&doc)?;
    fs::write(&tmp, json)?;
    fs::rename(&tmp, &path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LayerId, Phase};
    use crate::offline::trace_reader::ParsedSource;
    use tempfile::tempdir;

    fn record(ts: u64, token: u32) -> ParsedRecord {
        ParsedRecord {
            timestamp_ns: ts,
            token_id: token,
            layer_id: LayerId(0),
            thread_id: 9,
            phase: Phase::Prompt,
            operation_type: 25,
            dst_name: "Qcur-0".to_string(),
            sources: vec![
                ParsedSource {
                    name: "block.0.attn_q.weigh".to_string(),
                    ptr: 0x1000_4000,
                    size_bytes: 2048,
                    layer_id: LayerId(0),
                    class: MemoryClass::Disk { offset: 0x4000 },
                },
                ParsedSource {
                    name: "inp_embd".to_string(),
                    ptr: 0x7FF0_0000,
                    size_bytes: 1024,
                    layer_id: LayerId::NONE,
                    class: MemoryClass::Buffer { buffer_id: 3 },
                },
            ],
            expert_ids: vec![2, 5],
        }
    }

    #[test]
    fn test_metadata_and_entry_shape() {
        let recs = [record(1_000_000, 0), record(5_000_000, 0)];
        let refs: Vec<&ParsedRecord> = recs.iter().collect();
        let doc = build_token_json(&refs);

        assert_eq!(doc.metadata.total_entries, 2);
        assert_eq!(doc.metadata.timestamp_start_ns, 1_000_000);
        assert!((doc.metadata.duration_ms - 4.0).abs() < f64::EPSILON);
        assert_eq!(doc.metadata.format_version, FORMAT_VERSION);

        let entry = &doc.entries[1];
        assert_eq!(entry.entry_id, 1);
        assert!((entry.timestamp_relative_ms - 4.0).abs() < f64::EPSILON);
        assert_eq!(entry.num_sources, 2);
        assert_eq!(entry.num_experts, 2);
    }

    #[test]
    fn test_source_json_splits_offset_and_buffer_id() {
        let recs = [record(0, 0)];
        let refs: Vec<&ParsedRecord> = recs.iter().collect();
        let json = serde_json::to_value(build_token_json(&refs)).unwrap();

        let sources = &json["entries"][0]["sources"];
        assert_eq!(sources[0]["memory_source"], "DISK");
        assert_eq!(sources[0]["disk_offset"], 0x4000);
        assert!(sources[0].get("buffer_id").is_none());
        assert_eq!(sources[0]["tensor_ptr"], "0x10004000");

        assert_eq!(sources[1]["memory_source"], "BUFFER");
        assert_eq!(sources[1]["buffer_id"], 3);
        assert!(sources[1].get("disk_offset").is_none());
        assert_eq!(json["entries"][0]["sources"][1]["layer_id"], serde_json::Value::Null);
    }

    #[test]
    fn test_written_file_is_complete_and_named_by_token() {
        let dir = tempdir().unwrap();
        let recs = [record(0, 12)];
        let refs: Vec<&ParsedRecord> = recs.iter().collect();

        let path = write_token_json(dir.path(), 12, &refs).unwrap();
        assert_eq!(path.file_name().unwrap(), "token-00012.json");

        // No temp residue
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["metadata"]["total_entries"], 1);
    }
}
