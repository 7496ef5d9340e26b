//! Experiment runner: one end-to-end instrumented run.
//!
//! Drives the whole experiment as named sequential steps: clean stale
//! artifacts, dump the tensor layout, run the instrumented engine, parse
//! everything, and deposit per-token JSONs, the memory map and the
//! heatmap in the visualizer's data directory. The first failing step
//! stops the run; artifacts from earlier steps stay in place and the
//! failing step is named in the error.

use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use log::info;

use crate::analysis::{build_heatmap, resolve_records, write_heatmap_json};
use crate::config::Settings;
use crate::domain::RunnerError;
use crate::offline::buffer_events::parse_buffer_log;
use crate::offline::graph_parser::parse_graphs_dir;
use crate::offline::layout::{memory_map_json, parse_layout_csv, ModelLayout};
use crate::offline::token_json::write_token_json;
use crate::offline::trace_reader::read_trace;

/// Run the full experiment.
///
/// # Errors
/// A [`RunnerError`] naming the failed step; everything produced by the
/// preceding steps is left on disk.
pub fn run_experiment(settings: &Settings) -> Result<(), RunnerError> {
    step("clean artifacts", || clean_artifacts(settings))?;
    step("dump tensor layout", || dump_layout(settings))?;
    step("run engine", || run_engine(settings))?;
    let layout = step("parse layout", || parse_layout_csv(&settings.layout_csv_path).map_err(Into::into))?;
    step("parse graphs", || {
        let set = parse_graphs_dir(&settings.graphs_dir)?;
        info!("parsed {} graph dump(s)", set.graphs.len());
        Ok(())
    })?;
    step("parse buffer events", || {
        let timeline = parse_buffer_log(&settings.buffer_log_path)?;
        info!("parsed {} buffer event(s)", timeline.events.len());
        Ok(())
    })?;
    step("correlate and publish", || publish(settings, &layout))?;
    Ok(())
}

fn step<T>(name: &'static str, body: impl FnOnce() -> Result<T>) -> Result<T, RunnerError> {
    info!("step: {name}");
    body().map_err(|cause| RunnerError { step: name, cause })
}

/// Remove outputs of any previous run so a partial failure can never be
/// mistaken for fresh data.
fn clean_artifacts(settings: &Settings) -> Result<()> {
    remove_if_exists(&settings.trace_path)?;
    remove_if_exists(&settings.buffer_log_path)?;

    if settings.graphs_dir.exists() {
        for entry in fs::read_dir(&settings.graphs_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "dot") {
                fs::remove_file(&path)?;
            }
        }
    } else {
        fs::create_dir_all(&settings.graphs_dir)?;
    }

    if settings.output_dir.exists() {
        for entry in fs::read_dir(&settings.output_dir)? {
            let path = entry?.path();
            let stale = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| {
                    (n.starts_with("token-") && n.ends_with(".json"))
                        || n == "memory_map.json"
                        || n == "heatmap.json"
                });
            if stale {
                fs::remove_file(&path)?;
            }
        }
    } else {
        fs::create_dir_all(&settings.output_dir)?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale {}", path.display()))?;
    }
    Ok(())
}

/// Produce the layout CSV, either by invoking the configured dump tool or
/// by accepting a pre-existing file.
fn dump_layout(settings: &Settings) -> Result<()> {
    if let Some(tool) = &settings.layout_tool_bin {
        let status = Command::new(tool)
            .arg(&settings.model_path)
            .arg("--output")
            .arg(&settings.layout_csv_path)
            .status()
            .with_context(|| format!("Failed to launch layout tool {}", tool.display()))?;
        if !status.success() {
            bail!("layout tool exited with {status}");
        }
    } else if !settings.layout_csv_path.exists() {
        bail!(
            "no layout_tool_bin configured and {} does not exist",
            settings.layout_csv_path.display()
        );
    }
    Ok(())
}

/// Run the instrumented engine as a child process. The engine links the
/// tracing runtime and writes the trace, graph and buffer artifacts
/// itself.
fn run_engine(settings: &Settings) -> Result<()> {
    let Some(engine) = &settings.engine_bin else {
        bail!("engine_bin not configured");
    };
    let status = Command::new(engine)
        .arg("--model")
        .arg(&settings.model_path)
        .arg("--prompt")
        .arg(&settings.prompt)
        .arg("--n-predict")
        .arg(settings.n_predict.to_string())
        .arg("--trace")
        .arg(&settings.trace_path)
        .arg("--graphs")
        .arg(&settings.graphs_dir)
        .arg("--buffer-log")
        .arg(&settings.buffer_log_path)
        .status()
        .with_context(|| format!("Failed to launch engine {}", engine.display()))?;
    if !status.success() {
        bail!("engine exited with {status}");
    }
    Ok(())
}

/// Parse the trace, correlate names against the layout, and write every
/// consumer artifact into the output directory.
fn publish(settings: &Settings, layout: &ModelLayout) -> Result<()> {
    let mut trace = read_trace(&settings.trace_path)?;
    let correlation = resolve_records(&mut trace.records, layout);
    info!(
        "correlation: {} resolved, {} unchanged, {} ambiguous",
        correlation.resolved, correlation.unchanged, correlation.ambiguous
    );

    for (token_id, records) in trace.by_token() {
        write_token_json(&settings.output_dir, token_id, &records)?;
    }

    let map = memory_map_json(layout, &settings.display_model_name());
    fs::write(
        settings.output_dir.join("memory_map.json"),
        serde_json::to_string_pretty(&map)?,
    )?;

    let heats = build_heatmap(&trace.records, Some(layout));
    write_heatmap_json(
        &settings.output_dir.join("heatmap.json"),
        trace.records.len(),
        &heats,
    )?;

    info!(
        "published {} token file(s), memory map and heatmap to {}",
        trace.by_token().len(),
        settings.output_dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn settings_in(dir: &Path) -> Settings {
        let raw = serde_json::json!({
            "model_path": dir.join("model.gguf"),
            "trace_path": dir.join("trace.bin"),
            "graphs_dir": dir.join("graphs"),
            "buffer_log_path": dir.join("buffers.jsonl"),
            "output_dir": dir.join("out"),
            "layout_csv_path": dir.join("layout.csv"),
        });
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_clean_creates_directories() {
        let dir = tempdir().unwrap();
        let settings = settings_in(dir.path());

        clean_artifacts(&settings).unwrap();
        assert!(settings.graphs_dir.is_dir());
        assert!(settings.output_dir.is_dir());
    }

    #[test]
    fn test_clean_removes_stale_outputs() {
        let dir = tempdir().unwrap();
        let settings = settings_in(dir.path());
        fs::create_dir_all(&settings.output_dir).unwrap();
        fs::create_dir_all(&settings.graphs_dir).unwrap();

        fs::write(&settings.trace_path, b"old").unwrap();
        fs::write(settings.graphs_dir.join("token-00000.dot"), b"old").unwrap();
        fs::write(settings.output_dir.join("token-00000.json"), b"old").unwrap();
        fs::write(settings.output_dir.join("heatmap.json"), b"old").unwrap();
        fs::write(settings.output_dir.join("keep.txt"), b"mine").unwrap();

        clean_artifacts(&settings).unwrap();
        assert!(!settings.trace_path.exists());
        assert!(!settings.graphs_dir.join("token-00000.dot").exists());
        assert!(!settings.output_dir.join("token-00000.json").exists());
        assert!(!settings.output_dir.join("heatmap.json").exists());
        assert!(settings.output_dir.join("keep.txt").exists());
    }

    #[test]
    fn test_missing_engine_fails_with_step_name() {
        let dir = tempdir().unwrap();
        let mut settings = settings_in(dir.path());
        settings.engine_bin = None;
        fs::write(&settings.layout_csv_path, "name,offset,size,dtype,shape\n").unwrap();

        let err = run_experiment(&settings).unwrap_err();
        assert_eq!(err.step, "run engine");
    }

    #[test]
    fn test_missing_layout_fails_with_step_name() {
        let dir = tempdir().unwrap();
        let mut settings = settings_in(dir.path());
        settings.engine_bin = Some(PathBuf::from("/bin/true"));

        let err = run_experiment(&settings).unwrap_err();
        assert_eq!(err.step, "dump tensor layout");
    }
}
