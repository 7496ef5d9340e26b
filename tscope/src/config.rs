//! Run settings loaded from a JSON file.
//!
//! One settings object drives both the instrumented engine run and the
//! offline pipeline, so a single file describes a whole experiment.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Experiment settings.
///
/// `model_path` dictates the mmap range the memory-source classifier uses;
/// `prompt`/`n_predict` only drive the engine. The path fields say where the
/// tracer writes and where the offline pipeline deposits final artifacts.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Model file to run; the classifier's mmap range covers this file.
    pub model_path: PathBuf,

    /// Prompt fed to the engine.
    #[serde(default)]
    pub prompt: String,

    /// Number of tokens to generate.
    #[serde(default = "default_n_predict")]
    pub n_predict: u32,

    /// Binary trace output file.
    #[serde(default = "default_trace_path")]
    pub trace_path: PathBuf,

    /// Directory for per-token graph dumps.
    #[serde(default = "default_graphs_dir")]
    pub graphs_dir: PathBuf,

    /// Buffer alloc/dealloc JSONL file.
    #[serde(default = "default_buffer_log_path")]
    pub buffer_log_path: PathBuf,

    /// Where the offline pipeline deposits per-token JSONs, the memory map
    /// and the heatmap (the visualizer's data directory).
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Instrumented inference engine binary (experiment runner only).
    #[serde(default)]
    pub engine_bin: Option<PathBuf>,

    /// Tensor-layout dump tool (experiment runner only). When absent the
    /// runner expects `layout_csv_path` to already exist.
    #[serde(default)]
    pub layout_tool_bin: Option<PathBuf>,

    /// Tensor-layout CSV produced by the dump tool.
    #[serde(default = "default_layout_csv_path")]
    pub layout_csv_path: PathBuf,

    /// Model display name carried into the memory-map JSON.
    #[serde(default)]
    pub model_name: String,

    /// Per-thread staging ring capacity, in records.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
}

fn default_n_predict() -> u32 {
    16
}

fn default_trace_path() -> PathBuf {
    PathBuf::from("trace.bin")
}

fn default_graphs_dir() -> PathBuf {
    PathBuf::from("graphs")
}

fn default_buffer_log_path() -> PathBuf {
    PathBuf::from("buffers.jsonl")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_layout_csv_path() -> PathBuf {
    PathBuf::from("layout.csv")
}

fn default_ring_capacity() -> usize {
    4096
}

impl Settings {
    /// Load settings from a JSON file.
    ///
    /// # Errors
    /// Fails if the file cannot be read or does not match the schema
    /// (unknown fields are rejected to catch typos early).
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        Ok(settings)
    }

    /// Model name for artifacts: the configured display name, or the model
    /// file stem when unset.
    #[must_use]
    pub fn display_model_name(&self) -> String {
        if self.model_name.is_empty() {
            self.model_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "model".to_string())
        } else {
            self.model_name.clone()
        }
    }
}
