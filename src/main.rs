mod config;
mod engine;
mod rules;
mod scan;
mod telemetry;
#[cfg(test)]
mod test_harness;
mod tree;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, PropertyBag, ReportingDescriptor, Result as SarifResult, Run, SCHEMA_URL,
    Sarif, Tool, ToolComponent,
};
use tracing::{error, info};

use crate::config::RuleProperties;
use crate::engine::{Engine, build_context};
use crate::scan::scan_inputs;
use crate::telemetry::{Telemetry, init_logging, with_span};

/// CLI arguments for annolint execution.
#[derive(Parser, Debug)]
#[command(
    name = "annolint",
    about = "Nullability annotation checks over parsed Java syntax trees, reported as SARIF.",
    version
)]
struct Cli {
    /// Tree dump (.json) or directory of tree dumps.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Rule property as RULE_ID.key=value, e.g. NULL_ANNOTATIONS.tokens=METHOD_DEF,CTOR_DEF.
    #[arg(long = "property", value_name = "RULE_ID.KEY=VALUE")]
    properties: Vec<String>,
    /// OTLP/HTTP endpoint that receives trace spans.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    let properties = RuleProperties::parse(&cli.properties)?;
    let engine = Engine::new(&properties)?;
    let telemetry = cli
        .otel
        .as_deref()
        .map(Telemetry::new)
        .transpose()?
        .map(Arc::new);

    let outcome = analyze_and_write(&cli, engine, telemetry.clone());
    if let Some(telemetry) = telemetry {
        if let Err(err) = telemetry.shutdown() {
            error!("{err:#}");
        }
    }
    outcome
}

fn analyze_and_write(cli: &Cli, engine: Engine, telemetry: Option<Arc<Telemetry>>) -> Result<()> {
    let started_at = Instant::now();
    let scan_started_at = Instant::now();
    let scan = with_span(
        telemetry.as_deref(),
        "scan",
        &[opentelemetry::KeyValue::new("annolint.phase", "scan")],
        || scan_inputs(&cli.input, telemetry.as_deref()),
    )?;
    let scan_duration_ms = scan_started_at.elapsed().as_millis();
    let invocation_stats = InvocationStats {
        scan_duration_ms,
        tree_count: scan.units.len(),
        artifact_count: scan.artifacts.len(),
    };

    let context = build_context(scan.units, &scan.artifacts, telemetry);
    let analysis_started_at = Instant::now();
    let output = engine.analyze(&context)?;
    let analysis_duration_ms = analysis_started_at.elapsed().as_millis();
    info!(
        trees = invocation_stats.tree_count,
        results = output.results.len(),
        "analysis finished"
    );

    let invocation = build_invocation(&invocation_stats);
    let sarif = build_sarif(scan.artifacts, invocation, output.rules, output.results);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} analysis_ms={} trees={} artifacts={}",
            started_at.elapsed().as_millis(),
            scan_duration_ms,
            analysis_duration_ms,
            invocation_stats.tree_count,
            invocation_stats.artifact_count
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Metadata captured for SARIF invocation properties.
struct InvocationStats {
    scan_duration_ms: u128,
    tree_count: usize,
    artifact_count: usize,
}

fn build_invocation(stats: &InvocationStats) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let mut properties = BTreeMap::new();
    properties.insert("annolint.scan_ms".to_string(), json!(stats.scan_duration_ms));
    properties.insert("annolint.tree_count".to_string(), json!(stats.tree_count));
    properties.insert(
        "annolint.artifact_count".to_string(),
        json!(stats.artifact_count),
    );

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .properties(PropertyBag::builder().additional_properties(properties).build())
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    rules: Vec<ReportingDescriptor>,
    results: Vec<SarifResult>,
) -> Sarif {
    let driver = if rules.is_empty() {
        ToolComponent::builder()
            .name("annolint")
            .version(env!("CARGO_PKG_VERSION"))
            .build()
    } else {
        ToolComponent::builder()
            .name("annolint")
            .version(env!("CARGO_PKG_VERSION"))
            .rules(rules)
            .build()
    };
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
