//! Per-token graph dump parser.
//!
//! Reads the dumper's text form back into nodes and edges and attaches a
//! classification to every node: embedding, layer-internal (with the
//! block ordinal), output, or infrastructure. Layer ids come from
//! `block.N.` weight names and from trailing `-N` label suffixes
//! (0..=99 only, larger numbers are dimensions or counters).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::classification::{classify_node, NodeClass};
use crate::domain::ParseError;
use crate::offline::ParseSummary;

/// One node read back from a dump.
#[derive(Debug, Clone)]
pub struct ParsedNode {
    pub id: String,
    pub label: String,
    pub op: String,
    pub shape: Vec<u64>,
    pub dtype: String,
    pub ptr: u64,
    pub layer_id: Option<u16>,
    pub class: NodeClass,
}

/// One producer -> consumer edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEdge {
    pub from: String,
    pub to: String,
    pub slot: u8,
}

/// One token's parsed graph.
#[derive(Debug)]
pub struct GraphDoc {
    pub token_id: u32,
    pub nodes: Vec<ParsedNode>,
    pub edges: Vec<ParsedEdge>,
}

/// All graphs of a run, keyed by token, plus the parse summary.
#[derive(Debug)]
pub struct GraphSet {
    pub graphs: BTreeMap<u32, GraphDoc>,
    pub summary: ParseSummary,
}

/// Parse a single `token-NNNNN.dot` file.
///
/// # Errors
/// `MalformedGraph` with the file and line of the first offending line.
pub fn parse_graph_file(path: &Path) -> Result<GraphDoc, ParseError> {
    let token_id = token_id_from_file_name(path).ok_or_else(|| ParseError::MalformedGraph {
        file: path.display().to_string(),
        line: 0,
        reason: "file name does not match token-NNNNN.dot".to_string(),
    })?;

    let text = fs::read_to_string(path)?;
    let mut nodes = Vec::new();
    let mut edges = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("digraph") || trimmed == "}" {
            continue;
        }
        let fail = |reason: String| ParseError::MalformedGraph {
            file: path.display().to_string(),
            line: line_no,
            reason,
        };

        if trimmed.contains("->") {
            edges.push(parse_edge_line(trimmed).map_err(fail)?);
        } else {
            nodes.push(parse_node_line(trimmed).map_err(fail)?);
        }
    }

    Ok(GraphDoc { token_id, nodes, edges })
}

/// Parse every graph dump in a directory.
///
/// # Errors
/// `DuplicateGraphForToken` when two files resolve to the same token.
pub fn parse_graphs_dir(dir: &Path) -> Result<GraphSet, ParseError> {
    let mut summary = ParseSummary::default();
    let mut graphs: BTreeMap<u32, GraphDoc> = BTreeMap::new();

    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "dot"))
        .collect();
    paths.sort();

    for path in paths {
        let doc = parse_graph_file(&path)?;
        if graphs.contains_key(&doc.token_id) {
            return Err(ParseError::DuplicateGraphForToken(doc.token_id));
        }
        summary.parsed += doc.nodes.len();
        graphs.insert(doc.token_id, doc);
    }

    Ok(GraphSet { graphs, summary })
}

fn token_id_from_file_name(path: &Path) -> Option<u32> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("token-")?
        .parse::<u32>()
        .ok()
}

// `  n001 [label="Qcur-0" op=mul_mat shape="[4096,7]" dtype=f32 ptr=0x7ff00000 layer=0]`
fn parse_node_line(line: &str) -> Result<ParsedNode, String> {
    let (id, attrs) = split_attrs(line)?;
    let label = attr(attrs, "label").ok_or("missing label")?.to_string();
    let op = attr(attrs, "op").unwrap_or("none").to_string();
    let dtype = attr(attrs, "dtype").unwrap_or("").to_string();

    let shape = match attr(attrs, "shape") {
        Some(raw) => parse_dims(raw)?,
        None => Vec::new(),
    };
    let ptr = match attr(attrs, "ptr") {
        Some(raw) => u64::from_str_radix(raw.trim_start_matches("0x"), 16)
            .map_err(|_| format!("bad ptr '{raw}'"))?,
        None => 0,
    };
    let layer_id = match attr(attrs, "layer") {
        Some("-1") | None => None,
        Some(raw) => Some(raw.parse::<u16>().map_err(|_| format!("bad layer '{raw}'"))?),
    };

    let class = classify_node(&label);
    Ok(ParsedNode { id: id.to_string(), label, op, shape, dtype, ptr, layer_id, class })
}

// `  n000 -> n001 [slot=0]`
fn parse_edge_line(line: &str) -> Result<ParsedEdge, String> {
    let (pair, attrs) = split_attrs(line)?;
    let (from, to) = pair.split_once("->").ok_or("missing '->'")?;
    let slot = attr(attrs, "slot")
        .ok_or("missing slot")?
        .parse::<u8>()
        .map_err(|_| "bad slot".to_string())?;
    Ok(ParsedEdge { from: from.trim().to_string(), to: to.trim().to_string(), slot })
}

/// Split `lhs [k=v ...]` into the lhs text and the attribute body.
fn split_attrs(line: &str) -> Result<(&str, &str), String> {
    let open = line.find('[').ok_or("missing '['")?;
    let close = line.rfind(']').ok_or("missing ']'")?;
    if close < open {
        return Err("malformed attribute list".to_string());
    }
    Ok((line[..open].trim(), &line[open + 1..close]))
}

/// Pull one `key=value` attribute out of the body; values may be quoted.
fn attr<'a>(body: &'a str, key: &str) -> Option<&'a str> {
    let mut rest = body;
    loop {
        let idx = rest.find(key)?;
        let after = &rest[idx + key.len()..];
        // Guard against matching a key suffix (e.g. `slot` inside `myslot`)
        let boundary_ok = idx == 0
            || rest.as_bytes()[idx - 1] == b' '
            || rest.as_bytes()[idx - 1] == b'"';
        if boundary_ok {
            if let Some(value) = after.strip_prefix('=') {
                let value = value.trim_start();
                return Some(if let Some(stripped) = value.strip_prefix('"') {
                    let end = stripped.find('"')?;
                    &stripped[..end]
                } else {
                    let end = value.find(' ').unwrap_or(value.len());
                    &value[..end]
                });
            }
        }
        rest = &rest[idx + key.len()..];
    }
}

fn parse_dims(raw: &str) -> Result<Vec<u64>, String> {
    let inner = raw
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| format!("shape '{raw}' not bracketed"))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|d| d.trim().parse::<u64>().map_err(|_| format!("bad dimension '{d}'")))
        .collect()
}
