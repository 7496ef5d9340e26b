//! Synthetic engine: exercises the whole runtime path without a real
//! model. Registers a small tensor set, simulates a prompt decode and a
//! few generate decodes (hook invocations, buffer events, graph dumps),
//! then shuts the tracer down. Artifacts land in ./tscope-demo; point the
//! offline subcommands at them:
//!
//!   cargo run --example synthetic-engine
//!   cargo run -- parse-trace tscope-demo/trace.bin --out-dir tscope-demo/data

use anyhow::Result;

use tscope::domain::Phase;
use tscope::runtime::{
    ComputeGraph, GraphEdge, GraphNode, OpInvocation, OpSource, Tracer, TracerConfig,
};

const MMAP_START: u64 = 0x1000_0000;
const MMAP_END: u64 = 0x1100_0000;
const N_LAYERS: u16 = 4;

// Op codes as a real engine enumeration would define them
const OP_GET_ROWS: u8 = 6;
const OP_MUL_MAT: u8 = 25;
const OP_SOFT_MAX: u8 = 14;
const OP_MOE_ROUTE: u8 = 40;

fn main() -> Result<()> {
    env_logger::init();

    let dir = std::path::PathBuf::from("tscope-demo");
    std::fs::create_dir_all(&dir)?;

    let tracer = Tracer::init_global(&TracerConfig {
        mmap_start: MMAP_START,
        mmap_end: MMAP_END,
        trace_path: dir.join("trace.bin"),
        graphs_dir: dir.join("graphs"),
        buffer_log_path: dir.join("buffers.jsonl"),
        ring_capacity: 256,
        n_tensors_hint: 64,
    })?;

    // "Model load": lay tensors out back to back in the fake mmap
    let mut offset = 0u64;
    let mut register = |name: &str, size: u64| -> Result<u64> {
        let ptr = MMAP_START + offset;
        tracer.register_tensor(ptr, name, offset, size)?;
        offset += size;
        Ok(ptr)
    };

    let embd = register("token_embd.weight", 1 << 20)?;
    let mut weights = Vec::new();
    for layer in 0..N_LAYERS {
        let q = register(&format!("block.{layer}.attn_q.weight"), 1 << 18)?;
        let k = register(&format!("block.{layer}.attn_k.weight"), 1 << 18)?;
        let gate = register(&format!("block.{layer}.ffn_gate.weight"), 1 << 18)?;
        weights.push((q, k, gate));
    }
    let output = register("output.weight", 1 << 20)?;
    tracer.seal_registry();

    // Runtime buffers the "allocator" announces
    let kv_cache = 0x7F00_0000u64;
    tracer.on_alloc(kv_cache, 1 << 16, "kv-cache", None);
    let scratch = 0x7F10_0000u64;
    tracer.on_alloc(scratch, 1 << 14, "scratch", None);

    // One prompt decode, three generate decodes
    decode(tracer, Phase::Prompt, embd, &weights, output, kv_cache, scratch);
    for _ in 0..3 {
        decode(tracer, Phase::Generate, embd, &weights, output, kv_cache, scratch);
    }

    tracer.shutdown();
    println!("✓ {} record(s) written to {}", tracer.records_written(), dir.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn decode(
    tracer: &Tracer,
    phase: Phase,
    embd: u64,
    weights: &[(u64, u64, u64)],
    output: u64,
    kv_cache: u64,
    scratch: u64,
) {
    let token = tracer.begin_decode(phase);

    tracer.on_op(&OpInvocation {
        op_code: OP_GET_ROWS,
        dst_name: "inp_embd",
        sources: &[OpSource { name: "token_embd.weight", ptr: embd, size_bytes: 1 << 20 }],
        expert_ids: &[],
    });

    for (layer, (q, k, gate)) in weights.iter().enumerate() {
        let q_name = format!("block.{layer}.attn_q.weight");
        let k_name = format!("block.{layer}.attn_k.weight");
        let gate_name = format!("block.{layer}.ffn_gate.weight");

        tracer.on_op(&OpInvocation {
            op_code: OP_MUL_MAT,
            dst_name: &format!("Qcur-{layer}"),
            sources: &[
                OpSource { name: &q_name, ptr: *q, size_bytes: 1 << 18 },
                OpSource { name: "inp_embd", ptr: scratch, size_bytes: 1 << 14 },
            ],
            expert_ids: &[],
        });
        tracer.on_op(&OpInvocation {
            op_code: OP_MUL_MAT,
            dst_name: &format!("Kcur-{layer}"),
            sources: &[
                OpSource { name: &k_name, ptr: *k, size_bytes: 1 << 18 },
                OpSource { name: "kv-cache", ptr: kv_cache, size_bytes: 1 << 16 },
            ],
            expert_ids: &[],
        });
        // The last block routes through a fake expert pool
        if layer == weights.len() - 1 {
            tracer.on_op(&OpInvocation {
                op_code: OP_MOE_ROUTE,
                dst_name: &format!("ffn_moe_out-{layer}"),
                sources: &[OpSource { name: &gate_name, ptr: *gate, size_bytes: 1 << 18 }],
                expert_ids: &[5, 1, 7, 2],
            });
        } else {
            tracer.on_op(&OpInvocation {
                op_code: OP_SOFT_MAX,
                dst_name: &format!("ffn_out-{layer}"),
                sources: &[OpSource { name: &gate_name, ptr: *gate, size_bytes: 1 << 18 }],
                expert_ids: &[],
            });
        }
    }

    tracer.on_op(&OpInvocation {
        op_code: OP_MUL_MAT,
        dst_name: "result_output",
        sources: &[OpSource { name: "output.weight", ptr: output, size_bytes: 1 << 20 }],
        expert_ids: &[],
    });

    tracer.dump_graph(token, &demo_graph(token));
}

// A tiny but representative graph for the dump/parse roundtrip
fn demo_graph(token: u32) -> ComputeGraph {
    ComputeGraph {
        nodes: vec![
            GraphNode {
                id: "n000".to_string(),
                label: "token_embd.weight".to_string(),
                op: "none".to_string(),
                shape: vec![4096, 32000],
                dtype: "q4_0".to_string(),
                ptr: MMAP_START,
                layer_id: None,
            },
            GraphNode {
                id: "n001".to_string(),
                label: format!("inp_embd (t{token})"),
                op: "get_rows".to_string(),
                shape: vec![4096, 1],
                dtype: "f32".to_string(),
                ptr: 0x7F10_0000,
                layer_id: None,
            },
            GraphNode {
                id: "n002".to_string(),
                label: "Qcur-0".to_string(),
                op: "mul_mat".to_string(),
                shape: vec![4096, 1],
                dtype: "f32".to_string(),
                ptr: 0x7F10_4000,
                layer_id: Some(0),
            },
        ],
        edges: vec![
            GraphEdge { from: "n000".to_string(), to: "n001".to_string(), slot: 0 },
            GraphEdge { from: "n001".to_string(), to: "n002".to_string(), slot: 1 },
        ],
    }
}
