//! Tensor-layout CSV parser and memory-map JSON writer.
//!
//! The model-file dump tool emits one CSV row per tensor, sorted by byte
//! offset: `name,offset,size,dtype,shape`. The shape column is a
//! bracketed, comma-delimited dimension list and always comes last, so
//! the row is split on the first four commas only.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::classification::{categorize, component_of, expert_from_name, layer_from_name, TensorCategory};
use crate::domain::ParseError;
use crate::offline::ParseSummary;

/// One tensor as laid out in the model file.
#[derive(Debug, Clone)]
pub struct LayoutTensor {
    pub name: String,
    pub offset: u64,
    pub size_bytes: u64,
    pub dtype: String,
    pub shape: Vec<u64>,
    pub category: TensorCategory,
    pub layer_id: Option<u16>,
    pub expert_id: Option<u32>,
    pub component: String,
    pub component_type: String,
}

/// The model's on-disk tensor layout, ordered by offset.
#[derive(Debug)]
pub struct ModelLayout {
    pub tensors: Vec<LayoutTensor>,
    pub summary: ParseSummary,
}

impl ModelLayout {
    /// Total bytes covered by tensor data (end of the last tensor).
    #[must_use]
    pub fn covered_bytes(&self) -> u64 {
        self.tensors.last().map_or(0, |t| t.offset + t.size_bytes)
    }

    /// Number of transformer blocks implied by the layout.
    #[must_use]
    pub fn n_layers(&self) -> u16 {
        self.tensors
            .iter()
            .filter_map(|t| t.layer_id)
            .max()
            .map_or(0, |max| max + 1)
    }

    /// (n_embd, n_vocab) from the embedding tensor's shape, when present.
    #[must_use]
    pub fn embedding_dims(&self) -> (u64, u64) {
        self.tensors
            .iter()
            .find(|t| t.category == TensorCategory::Embedding && t.shape.len() >= 2)
            .map_or((0, 0), |t| (t.shape[0], t.shape[1]))
    }
}

const EXPECTED_HEADER: [&str; 5] = ["name", "offset", "size", "dtype", "shape"];

/// Parse the layout CSV.
///
/// Rows are re-sorted by offset; strictly increasing offsets are then
/// enforced. An overlap is a hard error, a gap (format alignment padding)
/// only warns.
///
/// # Errors
/// `MalformedCsv` with the offending line number.
pub fn parse_layout_csv(path: &Path) -> Result<ModelLayout, ParseError> {
    let text = fs::read_to_string(path)?;
    let mut lines = text.lines().enumerate();

    let (_, header) = lines.next().ok_or(ParseError::MalformedCsv {
        line: 1,
        reason: "empty file, header line required".to_string(),
    })?;
    validate_header(header)?;

    let mut summary = ParseSummary::default();
    let mut tensors = Vec::new();
    for (idx, line) in lines {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        tensors.push(parse_row(line, line_no)?);
    }

    tensors.sort_by_key(|t: &LayoutTensor| t.offset);
    validate_offsets(&tensors, &mut summary)?;

    summary.parsed = tensors.len();
    Ok(ModelLayout { tensors, summary })
}

fn validate_header(header: &str) -> Result<(), ParseError> {
    let cols: Vec<&str> = header.split(',').map(str::trim).collect();
    if cols.len() != EXPECTED_HEADER.len()
        || !cols.iter().zip(EXPECTED_HEADER.iter()).all(|(a, b)| a.eq_ignore_ascii_case(b))
    {
        return Err(ParseError::MalformedCsv {
            line: 1,
            reason: format!("expected header 'name,offset,size,dtype,shape', got '{header}'"),
        });
    }
    Ok(())
}

fn parse_row(line: &str, line_no: usize) -> Result<LayoutTensor, ParseError> {
    let bad = |reason: String| ParseError::MalformedCsv { line: line_no, reason };

    // Shape is last and may contain commas; split on the first four only
    let mut parts = line.splitn(5, ',');
    let name = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let offset = parts.next().map(str::trim);
    let size = parts.next().map(str::trim);
    let dtype = parts.next().map(str::trim);
    let shape = parts.next().map(str::trim);

    let (Some(name), Some(offset), Some(size), Some(dtype), Some(shape)) =
        (name, offset, size, dtype, shape)
    else {
        return Err(bad(format!("expected 5 columns, got '{line}'")));
    };

    let offset: u64 =
        offset.parse().map_err(|_| bad(format!("bad offset '{offset}'")))?;
    let size_bytes: u64 = size.parse().map_err(|_| bad(format!("bad size '{size}'")))?;
    let shape = parse_shape(shape).map_err(bad)?;

    let (component, component_type) = component_of(name);
    Ok(LayoutTensor {
        name: name.to_string(),
        offset,
        size_bytes,
        dtype: dtype.to_string(),
        shape,
        category: categorize(name),
        layer_id: layer_from_name(name),
        expert_id: expert_from_name(name),
        component: component.to_string(),
        component_type: component_type.to_string(),
    })
}

fn parse_shape(raw: &str) -> Result<Vec<u64>, String> {
    // Dump tools quote the shape column since it embeds commas
    let raw = raw.trim().trim_matches('"');
    let inner = raw
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| format!("shape '{raw}' not bracketed"))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|d| d.trim().parse::<u64>().map_err(|_| format!("bad dimension '{d}' in {raw}")))
        .collect()
}

fn validate_offsets(tensors: &[LayoutTensor], summary: &mut ParseSummary) -> Result<(), ParseError> {
    for pair in tensors.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let a_end = a.offset + a.size_bytes;
        if b.offset < a_end {
            return Err(ParseError::MalformedCsv {
                line: 0,
                reason: format!(
                    "tensor '{}' at offset {} overlaps '{}' ending at {a_end}",
                    b.name, b.offset, a.name
                ),
            });
        }
        if b.offset > a_end {
            summary.warn(format!(
                "{}-byte gap between '{}' and '{}' (alignment padding?)",
                b.offset - a_end,
                a.name,
                b.name
            ));
        }
    }
    Ok(())
}

// --- memory-map JSON (consumer contract) ---

#[derive(Debug, Serialize)]
pub struct MemoryMapJson {
    pub model_name: String,
    pub total_size_bytes: u64,
    pub metadata: MemoryMapMetadata,
    pub tensors: Vec<MemoryMapTensor>,
}

#[derive(Debug, Serialize)]
pub struct MemoryMapMetadata {
    pub n_layers: u16,
    pub n_vocab: u64,
    pub n_embd: u64,
    pub n_tensors: usize,
}

#[derive(Debug, Serialize)]
pub struct MemoryMapTensor {
    pub name: String,
    pub offset_start: u64,
    pub offset_end: u64,
    pub size_bytes: u64,
    pub shape: Vec<u64>,
    pub category: String,
    pub layer_id: Option<u16>,
    pub component: String,
    pub component_type: String,
    pub expert_id: Option<u32>,
}

/// Build the memory-map JSON document from a parsed layout.
#[must_use]
pub fn memory_map_json(layout: &ModelLayout, model_name: &str) -> MemoryMapJson {
    let (n_embd, n_vocab) = layout.embedding_dims();
    MemoryMapJson {
        model_name: model_name.to_string(),
        total_size_bytes: layout.covered_bytes(),
        metadata: MemoryMapMetadata {
            n_layers: layout.n_layers(),
            n_vocab,
            n_embd,
            n_tensors: layout.tensors.len(),
        },
        tensors: layout
            .tensors
            .iter()
            .map(|t| MemoryMapTensor {
                name: t.name.clone(),
                offset_start: t.offset,
                offset_end: t.offset + t.size_bytes,
                size_bytes: t.size_bytes,
                shape: t.shape.clone(),
                category: t.category.as_str().to_string(),
                layer_id: t.layer_id,
                component: t.component.clone(),
                component_type: t.component_type.clone(),
                expert_id: t.expert_id,
            })
            .collect(),
    }
}
