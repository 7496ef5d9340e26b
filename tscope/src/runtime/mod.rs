//! In-process tracing runtime.
//!
//! [`Tracer`] owns every runtime component: the monotonic clock, the
//! tensor registry, the memory-source classifier, the trace sink, the
//! buffer-event log, the graph dumper and the token/phase tracker. The
//! engine integration surface is small:
//!
//! 1. `Tracer::init_global(&config)` once, before the engine starts
//! 2. `register_tensor` for every model tensor during load, then
//!    `seal_registry`
//! 3. `begin_decode` at each decode boundary, `on_op` from the dispatcher,
//!    `on_alloc`/`on_dealloc` from the allocator, `dump_graph` per token
//! 4. `shutdown` once the run is over
//!
//! Everything the hook touches is read-only after init, so the hot path
//! carries no cross-thread synchronization; see the module docs of
//! [`hook`] and [`ring`] for the staging discipline.

pub mod buffer_log;
pub mod classifier;
pub mod clock;
pub mod graph;
pub mod hook;
pub mod registry;
pub mod ring;
pub mod sink;
pub mod token;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};
use once_cell::sync::OnceCell;

use crate::config::Settings;
use crate::domain::{Phase, TracerError};

pub use buffer_log::{BufferEventLine, BufferLog};
pub use classifier::{MemSourceClassifier, MmapRange};
pub use clock::{short_thread_id, Clock};
pub use graph::{ComputeGraph, GraphDumper, GraphEdge, GraphNode};
pub use hook::{OpInvocation, OpSource};
pub use registry::{TensorEntry, TensorRegistry};
pub use ring::DEFAULT_RING_CAPACITY;
pub use sink::TraceSink;
pub use token::TokenPhaseTracker;

/// Everything the tracer needs to start.
#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// Half-open byte range of the model file's mmap.
    pub mmap_start: u64,
    pub mmap_end: u64,
    pub trace_path: PathBuf,
    pub graphs_dir: PathBuf,
    pub buffer_log_path: PathBuf,
    /// Per-thread staging capacity, in records.
    pub ring_capacity: usize,
    /// Expected number of model tensors; the registry is sized from this
    /// with a safety factor.
    pub n_tensors_hint: usize,
}

impl TracerConfig {
    /// Derive a config from run settings plus the engine-reported mmap
    /// range and tensor count.
    #[must_use]
    pub fn from_settings(
        settings: &Settings,
        mmap_start: u64,
        mmap_end: u64,
        n_tensors_hint: usize,
    ) -> Self {
        Self {
            mmap_start,
            mmap_end,
            trace_path: settings.trace_path.clone(),
            graphs_dir: settings.graphs_dir.clone(),
            buffer_log_path: settings.buffer_log_path.clone(),
            ring_capacity: settings.ring_capacity,
            n_tensors_hint,
        }
    }
}

/// The tracing runtime. One per process in production (via
/// [`Tracer::init_global`]); tests construct standalone instances.
#[derive(Debug)]
pub struct Tracer {
    clock: Clock,
    registry: OnceCell<TensorRegistry>,
    /// Staging area for registrations before the registry is sealed
    pending_registry: Mutex<Option<TensorRegistry>>,
    classifier: MemSourceClassifier,
    sink: Arc<TraceSink>,
    buffer_log: BufferLog,
    graphs: GraphDumper,
    tracker: TokenPhaseTracker,
    ring_capacity: usize,
}

static GLOBAL: OnceCell<Tracer> = OnceCell::new();

impl Tracer {
    /// Construct a tracer. Fails fast when the sink file, the buffer log
    /// or the graphs directory cannot be created, or when the mmap range
    /// is empty; the caller decides whether the engine then runs
    /// uninstrumented or the process aborts.
    ///
    /// # Errors
    /// `SinkUnavailable`, `GraphDirUnavailable` or `MmapRangeMissing`.
    pub fn new(config: &TracerConfig) -> Result<Self, TracerError> {
        let clock = Clock::new();
        let range = MmapRange::new(config.mmap_start, config.mmap_end)?;
        let sink = Arc::new(TraceSink::create(config.trace_path.clone())?);
        let buffer_log = BufferLog::create(config.buffer_log_path.clone(), clock)?;
        let graphs = GraphDumper::new(config.graphs_dir.clone())?;

        info!(
            "tracer up: mmap [0x{:x}, 0x{:x}), trace {}, wall epoch {} ms",
            config.mmap_start,
            config.mmap_end,
            config.trace_path.display(),
            clock.wall_epoch_ms()
        );

        Ok(Self {
            clock,
            registry: OnceCell::new(),
            pending_registry: Mutex::new(Some(TensorRegistry::for_model(config.n_tensors_hint))),
            classifier: MemSourceClassifier::new(range),
            sink,
            buffer_log,
            graphs,
            tracker: TokenPhaseTracker::new(),
            ring_capacity: config.ring_capacity.max(1),
        })
    }

    /// Install the process-global tracer.
    ///
    /// # Errors
    /// `AlreadyInitialized` on a second call, plus everything
    /// [`Tracer::new`] can fail with.
    pub fn init_global(config: &TracerConfig) -> Result<&'static Tracer, TracerError> {
        let tracer = Tracer::new(config)?;
        GLOBAL.try_insert(tracer).map_err(|_| TracerError::AlreadyInitialized)
    }

    /// The process-global tracer, if one was installed.
    #[must_use]
    pub fn global() -> Option<&'static Tracer> {
        GLOBAL.get()
    }

    /// Register one model tensor. Valid only before [`Tracer::seal_registry`].
    ///
    /// # Errors
    /// `RegistryFull` when capacity is exhausted.
    pub fn register_tensor(
        &self,
        ptr: u64,
        name: &str,
        file_offset: u64,
        size_bytes: u64,
    ) -> Result<(), TracerError> {
        let mut pending =
            self.pending_registry.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.as_mut() {
            Some(reg) => reg.register(ptr, name, file_offset, size_bytes),
            None => {
                warn!("tensor registration after seal ignored: {name}");
                Ok(())
            }
        }
    }

    /// Freeze the registry. Must happen after model load and before the
    /// first inference op; hook-path lookups are lock-free from here on.
    pub fn seal_registry(&self) {
        let taken = self
            .pending_registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reg) = taken {
            info!("tensor registry sealed: {} entries", reg.len());
            // A second seal finds nothing to take and changes nothing
            let _ = self.registry.set(reg);
        }
    }

    /// Mark a decode-call boundary and return the new token ordinal.
    pub fn begin_decode(&self, phase: Phase) -> u32 {
        self.tracker.begin_decode(phase)
    }

    /// The operation hook. Called by the dispatcher once per executed op,
    /// from the op's rank-0 worker.
    pub fn on_op(&self, op: &OpInvocation<'_>) {
        let record = hook::materialize(
            op,
            &self.clock,
            &self.tracker,
            self.registry.get(),
            &self.classifier,
            &self.buffer_log,
        );
        hook::append_to_thread_ring(&self.sink, self.ring_capacity, record);
    }

    /// Announce a runtime buffer allocation; returns its buffer id.
    pub fn on_alloc(&self, ptr: u64, size: u64, label: &str, layer: Option<u16>) -> u64 {
        self.buffer_log.on_alloc(ptr, size, label, layer)
    }

    /// Announce a runtime buffer deallocation.
    pub fn on_dealloc(&self, buffer_id: u64) {
        self.buffer_log.on_dealloc(buffer_id);
    }

    /// Dump the computation graph for a token (end of its decode call).
    pub fn dump_graph(&self, token_id: u32, graph: &ComputeGraph) {
        if let Err(e) = self.graphs.dump(token_id, graph) {
            warn!("graph dump for token {token_id} failed: {e}");
        }
    }

    /// Drain the calling thread's staging ring and flush everything to
    /// disk. Worker threads that exited earlier drained on exit; call this
    /// from the thread that drove decode once the run is over.
    pub fn shutdown(&self) {
        hook::drain_thread_ring(&self.sink);
        self.sink.flush();
        self.buffer_log.flush();
        info!(
            "tracer shutdown: {} records written{}",
            self.sink.records_written(),
            if self.sink.is_degraded() { " (degraded)" } else { "" }
        );
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    #[must_use]
    pub fn registry(&self) -> Option<&TensorRegistry> {
        self.registry.get()
    }

    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.sink.records_written()
    }
}
