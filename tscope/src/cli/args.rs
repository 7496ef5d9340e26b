//! CLI argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tscope",
    about = "Tensor-access tracing for LLM inference runs",
    after_help = "\
EXAMPLES:
    tscope run --config experiment.json        Full instrumented run + pipeline
    tscope parse-trace trace.bin --layout layout.csv --out-dir data
    tscope heatmap trace.bin layout.csv --out data/heatmap.json"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the whole experiment: engine, parsers, published artifacts
    Run {
        /// Settings JSON driving the run
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Parse a binary trace into per-token JSON files
    ParseTrace {
        /// Binary trace file
        trace: PathBuf,

        /// Layout CSV for name correlation (skipped when absent)
        #[arg(long)]
        layout: Option<PathBuf>,

        /// Directory for the per-token JSON files
        #[arg(long, default_value = "data")]
        out_dir: PathBuf,
    },

    /// Parse the layout CSV and emit the memory-map JSON
    ParseLayout {
        /// Layout CSV from the model dump tool
        csv: PathBuf,

        /// Model display name for the artifact
        #[arg(long, default_value = "model")]
        model_name: String,

        /// Output file
        #[arg(long, default_value = "memory_map.json")]
        out: PathBuf,
    },

    /// Parse and classify per-token graph dumps
    ParseGraphs {
        /// Directory holding token-NNNNN.dot files
        dir: PathBuf,
    },

    /// Parse the buffer event log and print the lifetime timeline
    ParseBuffers {
        /// Buffer JSONL file
        log: PathBuf,
    },

    /// Build the per-tensor access heatmap
    Heatmap {
        /// Binary trace file
        trace: PathBuf,

        /// Layout CSV for names, offsets and sizes
        layout: PathBuf,

        /// Output file
        #[arg(long, default_value = "heatmap.json")]
        out: PathBuf,
    },
}
