//! CLI binary for validating and running rulepipe pipelines.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rulepipe_pipeline::{
    validate, NodeRole, PipelineDefinition, PipelineEngine, PipelineGraph, RunReport, Severity,
};
use rulepipe_types::Record;

#[derive(Parser)]
#[command(name = "rulepipe", version, about = "Rule-based record pipeline runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run JSONL records through a pipeline
    Run {
        /// Path to the pipeline .json definition
        pipeline: PathBuf,

        /// JSONL input file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Records evaluated at the same time
        #[arg(short, long, default_value = "4")]
        concurrency: usize,

        /// Per-record time limit in milliseconds, overriding the definition
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Include the per-node trail in each output line
        #[arg(long)]
        trace: bool,
    },

    /// Validate a pipeline definition
    Validate {
        /// Path to the pipeline .json definition
        pipeline: PathBuf,
    },

    /// Show information about a pipeline
    Info {
        /// Path to the pipeline .json definition
        pipeline: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries results.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            pipeline,
            input,
            concurrency,
            timeout_ms,
            trace,
        } => {
            cmd_run(&pipeline, input.as_deref(), concurrency, timeout_ms, trace).await?;
        }
        Commands::Validate { pipeline } => {
            cmd_validate(&pipeline)?;
        }
        Commands::Info { pipeline } => {
            cmd_info(&pipeline)?;
        }
    }

    Ok(())
}

fn load_definition(path: &Path) -> anyhow::Result<PipelineDefinition> {
    PipelineDefinition::from_path(path)
        .with_context(|| format!("Failed to load pipeline '{}'", path.display()))
}

fn load_pipeline(path: &Path) -> anyhow::Result<PipelineGraph> {
    let definition = load_definition(path)?;
    let graph = definition.build()?;
    Ok(graph)
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let definition = load_definition(path)?;
    let graph = match definition.build() {
        Ok(graph) => graph,
        Err(e) => {
            println!("[ERROR] build: {}", e);
            std::process::exit(1);
        }
    };
    let diagnostics = validate(&graph);

    if diagnostics.is_empty() {
        println!("Pipeline is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let graph = load_pipeline(path)?;

    println!("Pipeline: {}", graph.name());
    println!("Entry: {}", graph.entry().id);
    println!("Nodes: {}", graph.node_count());
    println!("Edges: {}", graph.edges().len());
    println!(
        "Max depth: {}{}",
        graph.settings().max_depth,
        graph
            .settings()
            .timeout_ms
            .map(|ms| format!(", timeout: {}ms", ms))
            .unwrap_or_default()
    );

    println!("\nNodes:");
    for node in graph.nodes() {
        let role = match &node.role {
            NodeRole::Handler { handler, .. } => handler.kind().to_string(),
            NodeRole::Sink => "sink".to_string(),
            NodeRole::Drop => "drop".to_string(),
        };
        println!("  {} [{}] {}", node.id, node.spec.kind_name(), role);
    }

    println!("\nEdges:");
    for edge in graph.edges() {
        match &edge.port {
            Some(port) => println!("  {} -> {} ({})", edge.from, edge.to, port),
            None => println!("  {} -> {}", edge.from, edge.to),
        }
    }

    Ok(())
}

async fn cmd_run(
    path: &Path,
    input: Option<&Path>,
    concurrency: usize,
    timeout_ms: Option<u64>,
    trace: bool,
) -> anyhow::Result<()> {
    let graph = load_pipeline(path)?;
    let mut engine = PipelineEngine::new(Arc::new(graph));
    if let Some(ms) = timeout_ms {
        let mut config = engine.config().clone();
        config.timeout = Some(Duration::from_millis(ms));
        engine = engine.with_config(config);
    }

    let source = match input {
        Some(file) => std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read input '{}'", file.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read records from stdin")?;
            buf
        }
    };
    let records = parse_records(&source)?;
    tracing::info!(
        pipeline = %engine.graph().name(),
        records = records.len(),
        concurrency,
        "Running pipeline"
    );

    let reports = engine.run_batch(records, concurrency).await;

    let (mut succeeded, mut dropped, mut failed) = (0usize, 0usize, 0usize);
    for report in &reports {
        match report.outcome.status() {
            "success" => succeeded += 1,
            "dropped" => dropped += 1,
            _ => failed += 1,
        }
        println!("{}", render_report(report, trace)?);
    }
    tracing::info!(succeeded, dropped, failed, "Pipeline finished");

    Ok(())
}

/// Parse JSONL: one JSON object per non-blank line.
fn parse_records(source: &str) -> anyhow::Result<Vec<Record>> {
    source
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let value: serde_json::Value = serde_json::from_str(line)
                .with_context(|| format!("Line {}: invalid JSON", i + 1))?;
            Record::from_json(value).with_context(|| format!("Line {}: not a record", i + 1))
        })
        .collect()
}

fn render_report(report: &RunReport, trace: bool) -> anyhow::Result<String> {
    let mut line = serde_json::to_value(&report.outcome)?;
    if trace {
        if let Some(obj) = line.as_object_mut() {
            obj.insert("run_id".into(), serde_json::to_value(report.run_id)?);
            obj.insert("trail".into(), serde_json::to_value(&report.trail)?);
        }
    }
    Ok(serde_json::to_string(&line)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const PIPELINE: &str = r#"{
        "name": "adults",
        "nodes": [
            {"id": "adult", "kind": "condition", "predicate": "age >= 18"},
            {"id": "out", "kind": "sink"},
            {"id": "minor", "kind": "drop"}
        ],
        "edges": [
            {"from": "adult", "to": "out", "port": "true"},
            {"from": "adult", "to": "minor", "port": "false"}
        ]
    }"#;

    fn pipeline_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "rulepipe", "run", "p.json", "--input", "in.jsonl", "--concurrency", "8",
            "--timeout-ms", "50", "--trace", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                pipeline,
                input,
                concurrency,
                timeout_ms,
                trace,
            } => {
                assert_eq!(pipeline, PathBuf::from("p.json"));
                assert_eq!(input, Some(PathBuf::from("in.jsonl")));
                assert_eq!(concurrency, 8);
                assert_eq!(timeout_ms, Some(50));
                assert!(trace);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn loads_pipeline_from_file() {
        let file = pipeline_file(PIPELINE);
        let graph = load_pipeline(file.path()).unwrap();
        assert_eq!(graph.name(), "adults");
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn load_reports_build_errors() {
        let file = pipeline_file(r#"{"name": "empty", "nodes": []}"#);
        let err = load_pipeline(file.path()).unwrap_err();
        assert!(err.to_string().contains("declares no nodes"), "{err}");

        let missing = load_pipeline(Path::new("/nonexistent/pipeline.json")).unwrap_err();
        assert!(missing.to_string().contains("Failed to load pipeline"));
    }

    #[test]
    fn parses_jsonl_and_skips_blank_lines() {
        let records = parse_records("{\"age\": 1}\n\n  \n{\"age\": 2}\n").unwrap();
        assert_eq!(records.len(), 2);

        let err = parse_records("{\"age\": 1}\n[1, 2]\n").unwrap_err();
        assert!(err.to_string().contains("Line 2"), "{err}");
        let err = parse_records("{oops\n").unwrap_err();
        assert!(err.to_string().contains("Line 1"), "{err}");
    }

    #[tokio::test]
    async fn renders_one_line_per_record() {
        let file = pipeline_file(PIPELINE);
        let engine = PipelineEngine::new(Arc::new(load_pipeline(file.path()).unwrap()));
        let records = parse_records("{\"age\": 30}\n{\"age\": 3}\n").unwrap();
        let reports = engine.run_batch(records, 2).await;

        let lines: Vec<serde_json::Value> = reports
            .iter()
            .map(|r| serde_json::from_str(&render_report(r, false).unwrap()).unwrap())
            .collect();
        assert_eq!(lines[0], json!({"status": "success", "record": {"age": 30}}));
        assert_eq!(lines[1], json!({"status": "dropped", "node": "minor"}));

        let traced: serde_json::Value =
            serde_json::from_str(&render_report(&reports[0], true).unwrap()).unwrap();
        assert_eq!(traced["trail"].as_array().map(Vec::len), Some(2));
        assert!(traced["run_id"].is_string());
    }
}
