use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use tscope::analysis::{build_heatmap, resolve_records, write_heatmap_json};
use tscope::cli::{Args, Command};
use tscope::config::Settings;
use tscope::domain::TracerError;
use tscope::offline::buffer_events::parse_buffer_log;
use tscope::offline::graph_parser::parse_graphs_dir;
use tscope::offline::layout::{memory_map_json, parse_layout_csv};
use tscope::offline::token_json::write_token_json;
use tscope::offline::trace_reader::read_trace;
use tscope::runner::run_experiment;

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            // Init failures carry their own distinct exit codes
            let code = err
                .downcast_ref::<TracerError>()
                .map_or(1, TracerError::exit_code);
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            ExitCode::from(code as u8)
        }
    }
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Run { config } => {
            let settings = Settings::from_file(&config)?;
            run_experiment(&settings)?;
            println!("✓ experiment complete, artifacts in {}", settings.output_dir.display());
        }

        Command::ParseTrace { trace, layout, out_dir } => {
            let mut parsed = read_trace(&trace)
                .with_context(|| format!("Failed to parse trace {}", trace.display()))?;
            info!("parsed {} record(s)", parsed.records.len());

            if let Some(layout_path) = layout {
                let layout = parse_layout_csv(&layout_path)?;
                let summary = resolve_records(&mut parsed.records, &layout);
                info!(
                    "correlation: {} resolved, {} ambiguous",
                    summary.resolved, summary.ambiguous
                );
            }

            std::fs::create_dir_all(&out_dir)?;
            let by_token = parsed.by_token();
            for (token_id, records) in &by_token {
                write_token_json(&out_dir, *token_id, records)?;
            }
            println!("✓ {} token file(s) written to {}", by_token.len(), out_dir.display());
        }

        Command::ParseLayout { csv, model_name, out } => {
            let layout = parse_layout_csv(&csv)?;
            let map = memory_map_json(&layout, &model_name);
            std::fs::write(&out, serde_json::to_string_pretty(&map)?)?;
            println!(
                "✓ {} tensor(s), {} warning(s), memory map at {}",
                layout.tensors.len(),
                layout.summary.warnings.len(),
                out.display()
            );
        }

        Command::ParseGraphs { dir } => {
            let set = parse_graphs_dir(&dir)?;
            for (token_id, doc) in &set.graphs {
                println!(
                    "token {token_id}: {} node(s), {} edge(s)",
                    doc.nodes.len(),
                    doc.edges.len()
                );
            }
            println!("✓ {} graph(s) parsed", set.graphs.len());
        }

        Command::ParseBuffers { log } => {
            let timeline = parse_buffer_log(&log)?;
            for life in &timeline.lifetimes {
                let end = life
                    .dealloc_ms
                    .map_or("live".to_string(), |ms| format!("{ms} ms"));
                println!(
                    "#{} {} {} bytes, layer {}: {} ms -> {end}",
                    life.id, life.label, life.size, life.layer, life.alloc_ms
                );
            }
            println!("✓ {} event(s), {} buffer(s)", timeline.events.len(), timeline.lifetimes.len());
        }

        Command::Heatmap { trace, layout, out } => {
            let mut parsed = read_trace(&trace)?;
            let layout = parse_layout_csv(&layout)?;
            resolve_records(&mut parsed.records, &layout);

            let heats = build_heatmap(&parsed.records, Some(&layout));
            write_heatmap_json(&out, parsed.records.len(), &heats)?;
            println!("✓ heatmap for {} tensor(s) at {}", heats.len(), out.display());
        }
    }
    Ok(())
}
