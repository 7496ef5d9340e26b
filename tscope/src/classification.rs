//! Tensor-name classification heuristics.
//!
//! Tensor and node names are the only cheap signal the tracer and the
//! offline pipeline share, so all name-based inference lives here:
//!
//! 1. **Layer extraction** - `block.N.` prefixed weight names carry the
//!    transformer block ordinal directly.
//! 2. **Label suffixes** - intermediate tensors are labeled `<op>-N`
//!    (e.g. `kqv_out-17`); only suffixes in 0..=99 count, to reject
//!    false positives like hashes or large shape digits.
//! 3. **Category prefixes** - weight-name prefixes map to coarse
//!    categories (embedding, attention, feed-forward, norm, output).

use tscope_common::LAYER_NONE;

/// Coarse tensor category inferred from the logical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorCategory {
    Embedding,
    Attention,
    FeedForward,
    Norm,
    Output,
    #[default]
    Other,
}

impl TensorCategory {
    /// Label used in the memory-map JSON.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TensorCategory::Embedding => "embedding",
            TensorCategory::Attention => "attention",
            TensorCategory::FeedForward => "feed-forward",
            TensorCategory::Norm => "norm",
            TensorCategory::Output => "output",
            TensorCategory::Other => "other",
        }
    }
}

/// Classification of a computation-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    /// Token/position embedding lookup
    Embedding,
    /// Inside transformer block N
    LayerInternal(u16),
    /// Final head / logits
    Output,
    /// Constants, masks, leaves with no layer affiliation
    Infrastructure,
}

/// Extract a transformer block ordinal from a `block.N.` name prefix.
///
/// Returns `None` for anything else, including `block.` with a non-numeric
/// or unterminated ordinal.
#[must_use]
pub fn layer_from_name(name: &str) -> Option<u16> {
    let rest = name.strip_prefix("block.")?;
    let dot = rest.find('.')?;
    rest[..dot].parse::<u16>().ok()
}

/// Same extraction, collapsed to the wire sentinel for record fields.
#[must_use]
pub fn layer_for_record(name: &str) -> u16 {
    layer_from_name(name).unwrap_or(LAYER_NONE)
}

/// Extract a layer ordinal from a trailing `-N` label suffix.
///
/// Intermediate-tensor labels carry the block they were produced in as a
/// suffix (`ffn_gate-12`). Only 0..=99 is accepted; larger numbers are
/// usually dimensions or counters, not layer ids.
#[must_use]
pub fn layer_from_label_suffix(label: &str) -> Option<u16> {
    let dash = label.rfind('-')?;
    let digits = &label[dash + 1..];
    if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u16>().ok()
}

/// Extract an expert ordinal from an `expert.M` name segment.
#[must_use]
pub fn expert_from_name(name: &str) -> Option<u32> {
    let idx = name.find("expert.")?;
    let digits: String = name[idx + "expert.".len()..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u32>().ok()
}

/// Infer the coarse category of a layout tensor from its full name.
#[must_use]
pub fn categorize(name: &str) -> TensorCategory {
    // Strip the block prefix so per-layer names classify by their tail
    let tail = layer_from_name(name)
        .and_then(|_| name.splitn(3, '.').nth(2))
        .unwrap_or(name);

    if tail.starts_with("token_embd") || tail.starts_with("position_embd") {
        TensorCategory::Embedding
    } else if tail.contains("norm") {
        TensorCategory::Norm
    } else if tail.starts_with("attn") {
        TensorCategory::Attention
    } else if tail.starts_with("ffn") {
        TensorCategory::FeedForward
    } else if tail.starts_with("output") || tail.starts_with("result") {
        TensorCategory::Output
    } else {
        TensorCategory::Other
    }
}

/// Split a tensor name into its component label and component type.
///
/// `block.12.attn_q.weight` yields `("attn_q", "weight")`;
/// `token_embd.weight` yields `("token_embd", "weight")`;
/// names without a type suffix yield an empty type.
#[must_use]
pub fn component_of(name: &str) -> (&str, &str) {
    let tail = if layer_from_name(name).is_some() {
        name.splitn(3, '.').nth(2).unwrap_or(name)
    } else {
        name
    };
    match tail.rsplit_once('.') {
        Some((component, kind)) if kind == "weight" || kind == "bias" => (component, kind),
        _ => (tail, ""),
    }
}

/// Classify a graph node from its display label.
///
/// Priority order: explicit `block.N.` weight names win, then `-N` label
/// suffixes, then embedding/output name patterns, then infrastructure.
#[must_use]
pub fn classify_node(label: &str) -> NodeClass {
    if let Some(layer) = layer_from_name(label) {
        return NodeClass::LayerInternal(layer);
    }
    if let Some(layer) = layer_from_label_suffix(label) {
        return NodeClass::LayerInternal(layer);
    }
    if label.starts_with("token_embd") || label.starts_with("inp_embd") {
        return NodeClass::Embedding;
    }
    if label.starts_with("output") || label.starts_with("result") || label.starts_with("logits") {
        return NodeClass::Output;
    }
    // Everything else: constants, masks, leaves with no layer affiliation
    NodeClass::Infrastructure
}
