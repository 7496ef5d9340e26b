//! Truncated-name reconciliation.
//!
//! Record name fields hold at most 19 bytes, so long tensor names arrive
//! truncated. Reconstruction rules:
//!
//! - shorter than 19 characters: the name was never cut, use it as-is
//! - exactly 19 characters: find the layout names sharing that 19-char
//!   prefix; a unique match resolves, multiple matches fall back to the
//!   record's disk offset, and an unresolvable case keeps the truncated
//!   name with a warning
//!
//! BUFFER-class sources never resolve against the layout: runtime
//! buffers are not in the model file, a shared prefix there is a
//! coincidence.

use std::collections::HashMap;

use log::warn;

use tscope_common::NAME_LEN;

use crate::domain::MemoryClass;
use crate::offline::layout::{LayoutTensor, ModelLayout};
use crate::offline::trace_reader::ParsedRecord;

/// Longest name content a record field can carry.
const TRUNCATED_LEN: usize = NAME_LEN - 1;

/// Outcome of resolving one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Unique full name recovered.
    Resolved(String),
    /// Name was never truncated, or no layout candidate exists.
    Unchanged,
    /// Several candidates and nothing to break the tie; kept truncated.
    Ambiguous,
}

/// Aggregate outcome over a whole trace.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CorrelationSummary {
    pub resolved: usize,
    pub unchanged: usize,
    pub ambiguous: usize,
}

/// Prefix index over the model layout.
pub struct NameResolver<'a> {
    by_prefix: HashMap<&'a str, Vec<&'a LayoutTensor>>,
}

impl<'a> NameResolver<'a> {
    #[must_use]
    pub fn new(layout: &'a ModelLayout) -> Self {
        let mut by_prefix: HashMap<&str, Vec<&LayoutTensor>> = HashMap::new();
        for tensor in &layout.tensors {
            let end = tensor
                .name
                .char_indices()
                .nth(TRUNCATED_LEN)
                .map_or(tensor.name.len(), |(i, _)| i);
            by_prefix.entry(&tensor.name[..end]).or_default().push(tensor);
        }
        Self { by_prefix }
    }

    /// Resolve one truncated name. `class` is the record's memory-source
    /// classification when resolving a source slot; `None` for
    /// destination names, which carry no classification.
    #[must_use]
    pub fn resolve(&self, truncated: &str, class: Option<MemoryClass>) -> Resolution {
        if truncated.chars().count() < TRUNCATED_LEN {
            return Resolution::Unchanged;
        }
        // A BUFFER source is a runtime tensor; the layout has nothing to
        // say about it
        if matches!(class, Some(MemoryClass::Buffer { .. })) {
            return Resolution::Unchanged;
        }

        let Some(candidates) = self.by_prefix.get(truncated) else {
            return Resolution::Unchanged;
        };

        match candidates.as_slice() {
            [] => Resolution::Unchanged,
            [single] => Resolution::Resolved(single.name.clone()),
            many => {
                if let Some(MemoryClass::Disk { offset }) = class {
                    if let Some(hit) = many
                        .iter()
                        .find(|t| offset >= t.offset && offset < t.offset + t.size_bytes)
                    {
                        return Resolution::Resolved(hit.name.clone());
                    }
                }
                Resolution::Ambiguous
            }
        }
    }
}

/// Resolve every name in a trace in place, returning counts.
pub fn resolve_records(
    records: &mut [ParsedRecord],
    layout: &ModelLayout,
) -> CorrelationSummary {
    let resolver = NameResolver::new(layout);
    let mut summary = CorrelationSummary::default();

    let mut apply = |name: &mut String, class: Option<MemoryClass>| {
        match resolver.resolve(name, class) {
            Resolution::Resolved(full) => {
                *name = full;
                summary.resolved += 1;
            }
            Resolution::Unchanged => summary.unchanged += 1,
            Resolution::Ambiguous => {
                warn!("ambiguous truncated name '{name}' kept as-is");
                summary.ambiguous += 1;
            }
        }
    };

    for rec in records.iter_mut() {
        apply(&mut rec.dst_name, None);
        for src in &mut rec.sources {
            apply(&mut src.name, Some(src.class));
        }
    }

    summary
}
