//! Per-token computation-graph dumps.
//!
//! At the end of each decode call the engine hands its graph over and one
//! text file per token lands in the graphs directory, named by token
//! ordinal (`token-00007.dot`). The format is the engine's human-readable
//! node/edge dump: two-space indentation, `->` arrows, no binary encoding.
//! Re-dumping a token overwrites the prior file.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::domain::TracerError;

/// One graph node as the engine describes it: every executed op plus every
/// input constant/leaf.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Short node id, unique within the graph (e.g. `n042`)
    pub id: String,
    /// Display label (tensor name or intermediate label like `kqv_out-3`)
    pub label: String,
    /// Op kind, `none` for leaves
    pub op: String,
    pub shape: Vec<u64>,
    pub dtype: String,
    /// Output data pointer value
    pub ptr: u64,
    pub layer_id: Option<u16>,
}

/// Directed producer -> consumer relationship, labeled by the consumer's
/// source-slot index.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub slot: u8,
}

#[derive(Debug, Clone, Default)]
pub struct ComputeGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug)]
pub struct GraphDumper {
    dir: PathBuf,
}

impl GraphDumper {
    /// # Errors
    /// `GraphDirUnavailable` when the directory cannot be created.
    pub fn new(dir: PathBuf) -> Result<Self, TracerError> {
        fs::create_dir_all(&dir).map_err(|e| TracerError::GraphDirUnavailable {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { dir })
    }

    /// File name for a token's dump.
    #[must_use]
    pub fn file_name(token_id: u32) -> String {
        format!("token-{token_id:05}.dot")
    }

    /// Write one token's graph; overwrites any prior dump for the token.
    ///
    /// # Errors
    /// Propagates I/O errors; callers log and continue, a missing graph
    /// dump never disturbs the engine.
    pub fn dump(&self, token_id: u32, graph: &ComputeGraph) -> Result<PathBuf, TracerError> {
        let path = self.dir.join(Self::file_name(token_id));
        let mut w = BufWriter::new(File::create(&path)?);

        writeln!(w, "digraph \"token-{token_id:05}\" {{")?;
        for node in &graph.nodes {
            let shape = format_shape(&node.shape);
            let layer = node.layer_id.map_or(-1, i32::from);
            writeln!(
                w,
                "  {} [label=\"{}\" op={} shape=\"{}\" dtype={} ptr=0x{:x} layer={}]",
                node.id, node.label, node.op, shape, node.dtype, node.ptr, layer
            )?;
        }
        for edge in &graph.edges {
            writeln!(w, "  {} -> {} [slot={}]", edge.from, edge.to, edge.slot)?;
        }
        writeln!(w, "}}")?;
        w.flush()?;
        Ok(path)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn format_shape(shape: &[u64]) -> String {
    let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
    format!("[{}]", dims.join(","))
}
