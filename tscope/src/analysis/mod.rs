//! Trace analysis: name correlation and access-frequency heatmap.
//!
//! Joins the binary trace with the model's memory map: truncated record
//! names are reconciled against full layout names, then per-tensor access
//! counters are aggregated for the visualizer.

pub mod correlate;
pub mod heatmap;

pub use correlate::{resolve_records, CorrelationSummary, NameResolver, Resolution};
pub use heatmap::{build_heatmap, write_heatmap_json, TensorHeat};
