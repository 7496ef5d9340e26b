//! Per-tensor access-frequency heatmap.
//!
//! Walks every trace record once: each destination counts as one write,
//! each populated source as one read. Entries are keyed by tensor name
//! plus memory class, so a runtime buffer that happens to share a disk
//! tensor's name stays a separate row. Sorted by total accesses,
//! descending.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::domain::{MemoryClass, ParseError};
use crate::offline::layout::ModelLayout;
use crate::offline::trace_reader::ParsedRecord;

/// Aggregated access statistics for one tensor.
#[derive(Debug, Clone, Serialize)]
pub struct TensorHeat {
    /// Full name when correlation recovered it, truncated otherwise.
    pub name: String,
    /// "DISK" or "BUFFER"
    pub memory_source: &'static str,
    pub total_accesses: u64,
    pub source_reads: u64,
    pub dest_writes: u64,
    pub first_access_ns: u64,
    pub last_access_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl TensorHeat {
    fn new(name: &str, disk: bool) -> Self {
        Self {
            name: name.to_string(),
            memory_source: if disk { "DISK" } else { "BUFFER" },
            total_accesses: 0,
            source_reads: 0,
            dest_writes: 0,
            first_access_ns: u64::MAX,
            last_access_ns: 0,
            offset: None,
            size_bytes: None,
        }
    }

    fn touch(&mut self, ts: u64) {
        self.total_accesses += 1;
        self.first_access_ns = self.first_access_ns.min(ts);
        self.last_access_ns = self.last_access_ns.max(ts);
    }
}

fn entry<'a>(
    heats: &'a mut HashMap<(String, bool), TensorHeat>,
    name: &str,
    disk: bool,
) -> &'a mut TensorHeat {
    heats
        .entry((name.to_string(), disk))
        .or_insert_with(|| TensorHeat::new(name, disk))
}

/// Build the heatmap from a trace and (optionally) the model layout,
/// which supplies offsets and sizes for disk-resident tensors.
#[must_use]
pub fn build_heatmap(records: &[ParsedRecord], layout: Option<&ModelLayout>) -> Vec<TensorHeat> {
    let by_name: HashMap<&str, (u64, u64)> = layout
        .map(|l| {
            l.tensors
                .iter()
                .map(|t| (t.name.as_str(), (t.offset, t.size_bytes)))
                .collect()
        })
        .unwrap_or_default();

    let mut heats: HashMap<(String, bool), TensorHeat> = HashMap::new();

    for rec in records {
        // Destination: one write. A destination carries no classification
        // of its own; layout membership decides the class.
        let dst_in_layout = by_name.contains_key(rec.dst_name.as_str());
        let dst = entry(&mut heats, &rec.dst_name, dst_in_layout);
        dst.dest_writes += 1;
        dst.touch(rec.timestamp_ns);
        if let Some(&(offset, size)) = by_name.get(rec.dst_name.as_str()) {
            dst.offset = Some(offset);
            dst.size_bytes = Some(size);
        }

        // Sources: one read each
        for src in &rec.sources {
            let disk = src.class.is_disk();
            let heat = entry(&mut heats, &src.name, disk);
            heat.source_reads += 1;
            heat.touch(rec.timestamp_ns);
            if let MemoryClass::Disk { offset } = src.class {
                heat.offset.get_or_insert(offset);
            }
            if let Some(&(offset, size)) = by_name.get(src.name.as_str()) {
                heat.offset = Some(offset);
                heat.size_bytes = Some(size);
            } else if heat.size_bytes.is_none() {
                heat.size_bytes = Some(u64::from(src.size_bytes));
            }
        }
    }

    let mut out: Vec<TensorHeat> = heats.into_values().collect();
    out.sort_by(|a, b| b.total_accesses.cmp(&a.total_accesses).then(a.name.cmp(&b.name)));
    out
}

#[derive(Debug, Serialize)]
struct HeatmapJson<'a> {
    total_records: usize,
    tensors: &'a [TensorHeat],
}

/// Write the heatmap artifact.
///
/// # Errors
/// I/O and serialization errors.
pub fn write_heatmap_json(
    path: &Path,
    records_len: usize,
    heats: &[TensorHeat],
) -> Result<(), ParseError> {
    let doc = HeatmapJson { total_records: records_len, tensors: heats };
    fs::write(path, serde_json::to_string_pretty(&doc)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LayerId, Phase};
    use crate::offline::trace_reader::ParsedSource;

    fn record(ts: u64, dst: &str, sources: Vec<ParsedSource>) -> ParsedRecord {
        ParsedRecord {
            timestamp_ns: ts,
            token_id: 0,
            layer_id: LayerId::NONE,
            thread_id: 1,
            phase: Phase::Prompt,
            operation_type: 1,
            dst_name: dst.to_string(),
            sources,
            expert_ids: Vec::new(),
        }
    }

    fn disk_source(name: &str, offset: u64) -> ParsedSource {
        ParsedSource {
            name: name.to_string(),
            ptr: 0x1000_0000 + offset,
            size_bytes: 64,
            layer_id: LayerId::NONE,
            class: MemoryClass::Disk { offset },
        }
    }

    fn buffer_source(name: &str, id: u64) -> ParsedSource {
        ParsedSource {
            name: name.to_string(),
            ptr: 0x7000_0000,
            size_bytes: 32,
            layer_id: LayerId::NONE,
            class: MemoryClass::Buffer { buffer_id: id },
        }
    }

    #[test]
    fn test_counts_and_timestamps() {
        let records = vec![
            record(10, "out-0", vec![disk_source("w.weight", 0), buffer_source("act", 1)]),
            record(20, "out-0", vec![disk_source("w.weight", 0)]),
        ];
        let heats = build_heatmap(&records, None);

        let w = heats.iter().find(|h| h.name == "w.weight").unwrap();
        assert_eq!(w.source_reads, 2);
        assert_eq!(w.dest_writes, 0);
        assert_eq!(w.total_accesses, 2);
        assert_eq!(w.memory_source, "DISK");
        assert_eq!(w.offset, Some(0));
        assert_eq!((w.first_access_ns, w.last_access_ns), (10, 20));

        let out = heats.iter().find(|h| h.name == "out-0").unwrap();
        assert_eq!(out.dest_writes, 2);
        assert_eq!(out.memory_source, "BUFFER");
    }

    #[test]
    fn test_conservation_law() {
        let records = vec![
            record(1, "a", vec![disk_source("x", 0), disk_source("y", 64)]),
            record(2, "b", vec![disk_source("x", 0)]),
            record(3, "c", vec![]),
        ];
        let heats = build_heatmap(&records, None);

        let accesses: u64 = heats.iter().map(|h| h.source_reads + h.dest_writes).sum();
        let expected = records.len() as u64
            + records.iter().map(|r| r.sources.len() as u64).sum::<u64>();
        assert_eq!(accesses, expected);
    }

    #[test]
    fn test_same_name_disk_and_buffer_stay_separate() {
        let records = vec![record(
            1,
            "dst",
            vec![disk_source("shared_name", 0), buffer_source("shared_name", 2)],
        )];
        let heats = build_heatmap(&records, None);

        let shared: Vec<_> = heats.iter().filter(|h| h.name == "shared_name").collect();
        assert_eq!(shared.len(), 2);
    }

    #[test]
    fn test_sorted_by_total_descending() {
        let records = vec![
            record(1, "hot", vec![disk_source("w", 0)]),
            record(2, "hot", vec![disk_source("w", 0)]),
            record(3, "cold", vec![]),
        ];
        let heats = build_heatmap(&records, None);
        assert!(heats[0].total_accesses >= heats[1].total_accesses);
        assert_eq!(heats.last().unwrap().total_accesses, 1);
    }
}
