//! Offline pipeline end to end: capture a trace with truncation-prone
//! names, parse the layout CSV, correlate, publish per-token JSONs and
//! the heatmap, and check the graph dumps line up with the trace.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::tempdir;

use tscope::analysis::{build_heatmap, resolve_records};
use tscope::domain::Phase;
use tscope::offline::graph_parser::parse_graphs_dir;
use tscope::offline::layout::parse_layout_csv;
use tscope::offline::token_json::write_token_json;
use tscope::offline::trace_reader::read_trace;
use tscope::runtime::{
    ComputeGraph, GraphEdge, GraphNode, OpInvocation, OpSource, Tracer, TracerConfig,
};

const MMAP_START: u64 = 0x1000_0000;
const MMAP_END: u64 = 0x1010_0000;
const OP_MUL_MAT: u8 = 25;

// Layout with two 26-char names sharing an 18-char prefix, distinct at
// char 19: the truncation boundary case.
const LAYOUT_CSV: &str = "\
name,offset,size,dtype,shape
token_embd.weight,0,4096,q4_0,\"[64, 64]\"
block.0.attention.q.weight,4096,4096,q4_0,\"[64, 64]\"
block.0.attention.k.weight,8192,4096,q4_0,\"[64, 64]\"
output.weight,12288,4096,f16,\"[64, 64]\"
";

fn capture_run(dir: &Path) {
    let tracer = Tracer::new(&TracerConfig {
        mmap_start: MMAP_START,
        mmap_end: MMAP_END,
        trace_path: dir.join("trace.bin"),
        graphs_dir: dir.join("graphs"),
        buffer_log_path: dir.join("buffers.jsonl"),
        ring_capacity: 32,
        n_tensors_hint: 16,
    })
    .expect("tracer init");

    for (name, offset) in [
        ("token_embd.weight", 0u64),
        ("block.0.attention.q.weight", 4096),
        ("block.0.attention.k.weight", 8192),
        ("output.weight", 12288),
    ] {
        tracer.register_tensor(MMAP_START + offset, name, offset, 4096).unwrap();
    }
    tracer.seal_registry();

    for (token, phase) in [(0u32, Phase::Prompt), (1, Phase::Generate)] {
        tracer.begin_decode(phase);
        tracer.on_op(&OpInvocation {
            op_code: OP_MUL_MAT,
            dst_name: "Qcur-0",
            sources: &[OpSource {
                name: "block.0.attention.q.weight",
                ptr: MMAP_START + 4096,
                size_bytes: 4096,
            }],
            expert_ids: &[],
        });
        tracer.on_op(&OpInvocation {
            op_code: OP_MUL_MAT,
            dst_name: "Kcur-0",
            sources: &[OpSource {
                name: "block.0.attention.k.weight",
                ptr: MMAP_START + 8192,
                size_bytes: 4096,
            }],
            expert_ids: &[],
        });

        tracer.dump_graph(
            token,
            &ComputeGraph {
                nodes: vec![
                    GraphNode {
                        id: "n000".to_string(),
                        label: "block.0.attention.q.weight".to_string(),
                        op: "none".to_string(),
                        shape: vec![64, 64],
                        dtype: "q4_0".to_string(),
                        ptr: MMAP_START + 4096,
                        layer_id: Some(0),
                    },
                    GraphNode {
                        id: "n001".to_string(),
                        label: "Qcur-0".to_string(),
                        op: "mul_mat".to_string(),
                        shape: vec![64, 1],
                        dtype: "f32".to_string(),
                        ptr: 0x7FF0_0000,
                        layer_id: Some(0),
                    },
                ],
                edges: vec![GraphEdge {
                    from: "n000".to_string(),
                    to: "n001".to_string(),
                    slot: 0,
                }],
            },
        );
    }
    tracer.shutdown();
}

#[test]
fn test_truncated_names_recover_full_layout_names() {
    let dir = tempdir().unwrap();
    capture_run(dir.path());

    let csv_path = dir.path().join("layout.csv");
    let mut f = fs::File::create(&csv_path).unwrap();
    write!(f, "{LAYOUT_CSV}").unwrap();
    drop(f);

    let mut trace = read_trace(&dir.path().join("trace.bin")).unwrap();
    // On the wire, both weight names were cut to 19 chars
    assert!(trace
        .records
        .iter()
        .flat_map(|r| &r.sources)
        .all(|s| s.name.len() == 19));

    let layout = parse_layout_csv(&csv_path).unwrap();
    let summary = resolve_records(&mut trace.records, &layout);

    assert_eq!(summary.ambiguous, 0);
    let names: Vec<&str> = trace
        .records
        .iter()
        .flat_map(|r| &r.sources)
        .map(|s| s.name.as_str())
        .collect();
    assert!(names.contains(&"block.0.attention.q.weight"));
    assert!(names.contains(&"block.0.attention.k.weight"));
}

#[test]
fn test_per_token_json_files_complete() {
    let dir = tempdir().unwrap();
    capture_run(dir.path());

    let trace = read_trace(&dir.path().join("trace.bin")).unwrap();
    let out_dir = dir.path().join("data");
    fs::create_dir_all(&out_dir).unwrap();

    for (token_id, records) in trace.by_token() {
        write_token_json(&out_dir, token_id, &records).unwrap();
    }

    let token0: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out_dir.join("token-00000.json")).unwrap())
            .unwrap();
    assert_eq!(token0["metadata"]["total_entries"], 2);
    assert_eq!(token0["metadata"]["format_version"], 1);
    assert_eq!(token0["entries"][0]["phase"], "prompt");
    assert_eq!(token0["entries"][0]["sources"][0]["memory_source"], "DISK");
    assert_eq!(token0["entries"][0]["sources"][0]["disk_offset"], 4096);

    let token1: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out_dir.join("token-00001.json")).unwrap())
            .unwrap();
    assert_eq!(token1["entries"][0]["phase"], "generate");
}

#[test]
fn test_heatmap_conserves_accesses() {
    let dir = tempdir().unwrap();
    capture_run(dir.path());

    let csv_path = dir.path().join("layout.csv");
    fs::write(&csv_path, LAYOUT_CSV).unwrap();

    let mut trace = read_trace(&dir.path().join("trace.bin")).unwrap();
    let layout = parse_layout_csv(&csv_path).unwrap();
    resolve_records(&mut trace.records, &layout);

    let heats = build_heatmap(&trace.records, Some(&layout));

    let accesses: u64 = heats.iter().map(|h| h.source_reads + h.dest_writes).sum();
    let expected = trace.records.len() as u64
        + trace.records.iter().map(|r| r.sources.len() as u64).sum::<u64>();
    assert_eq!(accesses, expected);

    // Disk-resident rows picked up their layout offsets and sizes
    let q = heats.iter().find(|h| h.name == "block.0.attention.q.weight").unwrap();
    assert_eq!(q.offset, Some(4096));
    assert_eq!(q.size_bytes, Some(4096));
    assert_eq!(q.source_reads, 2); // one per token
}

#[test]
fn test_graph_dumps_align_with_trace() {
    let dir = tempdir().unwrap();
    capture_run(dir.path());

    let trace = read_trace(&dir.path().join("trace.bin")).unwrap();
    let graphs = parse_graphs_dir(&dir.path().join("graphs")).unwrap();
    assert_eq!(graphs.graphs.len(), 2);

    let by_token = trace.by_token();
    for (token_id, doc) in &graphs.graphs {
        let records = &by_token[token_id];
        // Every executed-op node has a trace record with the same
        // destination name in the same token
        for node in doc.nodes.iter().filter(|n| n.op != "none") {
            assert!(
                records.iter().any(|r| r.dst_name == node.label),
                "no record for graph node '{}' in token {token_id}",
                node.label
            );
        }
    }
}
