//! Offline artifact parsers.
//!
//! Pure readers for the four run artifacts (binary trace, layout CSV,
//! graph dumps, buffer JSONL) plus the per-token and memory-map JSON
//! writers. Parsers never panic on bad input: hard faults surface as
//! [`ParseError`](crate::domain::ParseError) with a line or byte
//! position, recoverable oddities accumulate in a [`ParseSummary`].

pub mod buffer_events;
pub mod graph_parser;
pub mod layout;
pub mod token_json;
pub mod trace_reader;

pub use layout::{LayoutTensor, ModelLayout};
pub use trace_reader::{ParsedRecord, ParsedSource, TraceFile};

/// Outcome summary every parser returns alongside its data: how much was
/// read and what was tolerated along the way.
#[derive(Debug, Default)]
pub struct ParseSummary {
    /// Records/rows/nodes successfully parsed.
    pub parsed: usize,
    /// Human-readable warnings, also emitted through the log.
    pub warnings: Vec<String>,
}

impl ParseSummary {
    pub fn warn(&mut self, msg: String) {
        log::warn!("{msg}");
        self.warnings.push(msg);
    }
}
