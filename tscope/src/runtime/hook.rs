//! The operation hook: one record per executed op.
//!
//! This is the single call site the engine's dispatcher invokes, once per
//! op, from the worker holding logical rank 0 in that op's pool (the
//! engine picks that worker; rank filtering never happens here). The whole
//! path is a monomorphic straight line: stamp clock/token/thread, truncate
//! names into fixed fields, classify each source pointer, append to the
//! calling thread's ring. No allocation, no system I/O, no shared mutable
//! state beyond the ring.

use std::cell::RefCell;
use std::sync::Arc;

use tscope_common::{truncate_name, SourceSlot, TraceRecord, MAX_EXPERTS, MAX_SOURCES};

use crate::classification::layer_for_record;
use crate::runtime::buffer_log::BufferLog;
use crate::runtime::classifier::MemSourceClassifier;
use crate::runtime::clock::{short_thread_id, Clock};
use crate::runtime::registry::TensorRegistry;
use crate::runtime::ring::ThreadRing;
use crate::runtime::sink::TraceSink;
use crate::runtime::token::TokenPhaseTracker;

/// One source input as the dispatcher sees it.
#[derive(Debug, Clone, Copy)]
pub struct OpSource<'a> {
    pub name: &'a str,
    pub ptr: u64,
    pub size_bytes: u32,
}

/// One executed op, as passed to the hook by the dispatcher.
///
/// `op_code` is the engine's own op enumeration value and is recorded
/// verbatim; it is never re-encoded. For expert-routing ops, `expert_ids`
/// holds the chosen experts in routing-rank order (highest score first).
#[derive(Debug, Clone, Copy)]
pub struct OpInvocation<'a> {
    pub op_code: u8,
    pub dst_name: &'a str,
    pub sources: &'a [OpSource<'a>],
    pub expert_ids: &'a [u8],
}

/// Build the wire record for one invocation. Pure; everything it touches
/// is read-only.
pub(crate) fn materialize(
    op: &OpInvocation<'_>,
    clock: &Clock,
    tracker: &TokenPhaseTracker,
    registry: Option<&TensorRegistry>,
    classifier: &MemSourceClassifier,
    buffers: &BufferLog,
) -> TraceRecord {
    let (token_id, phase) = tracker.current();

    let mut rec = TraceRecord {
        timestamp_ns: clock.now_ns(),
        token_id,
        layer_id: layer_for_record(op.dst_name),
        thread_id: short_thread_id(),
        phase: phase.as_wire(),
        operation_type: op.op_code,
        num_sources: op.sources.len().min(MAX_SOURCES) as u8,
        num_experts: op.expert_ids.len().min(MAX_EXPERTS) as u8,
        dst_name: truncate_name(op.dst_name),
        ..TraceRecord::default()
    };

    for (slot, src) in rec.sources.iter_mut().zip(op.sources.iter()) {
        // Registered tensors carry their layer from registration; runtime
        // buffers fall back to name parsing
        let src_layer = registry
            .and_then(|r| r.lookup(src.ptr))
            .map_or_else(|| layer_for_record(src.name), |e| e.layer_id);

        let (memory_source, offset_or_buffer_id) =
            classifier.classify(src.ptr, buffers).as_wire();

        *slot = SourceSlot {
            name: truncate_name(src.name),
            ptr: src.ptr,
            size_bytes: src.size_bytes,
            src_layer,
            memory_source,
            offset_or_buffer_id,
        };
    }

    for (dst, id) in rec.expert_ids.iter_mut().zip(op.expert_ids.iter()) {
        *dst = *id;
    }

    rec
}

thread_local! {
    // Rings for this thread, keyed by sink identity so independent tracer
    // instances (tests) do not share staging
    static RINGS: RefCell<Vec<(usize, ThreadRing)>> = const { RefCell::new(Vec::new()) };
}

/// Append a record to this thread's ring for the given sink, creating the
/// ring on first use. The ring drains itself on overflow and on thread
/// exit.
pub(crate) fn append_to_thread_ring(sink: &Arc<TraceSink>, capacity: usize, record: TraceRecord) {
    let key = Arc::as_ptr(sink) as usize;
    RINGS.with(|rings| {
        let mut rings = rings.borrow_mut();
        if let Some((_, ring)) = rings.iter_mut().find(|(k, _)| *k == key) {
            ring.append(record);
        } else {
            let mut ring = ThreadRing::new(capacity, Arc::clone(sink));
            ring.append(record);
            rings.push((key, ring));
        }
    });
}

/// Drain this thread's ring for the given sink, if one exists.
pub(crate) fn drain_thread_ring(sink: &Arc<TraceSink>) {
    let key = Arc::as_ptr(sink) as usize;
    RINGS.with(|rings| {
        if let Some((_, ring)) = rings.borrow_mut().iter_mut().find(|(k, _)| *k == key) {
            ring.drain();
        }
    });
}
