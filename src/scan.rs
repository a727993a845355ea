use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use tracing::{debug, warn};

use crate::telemetry::Telemetry;
use crate::tree::{RawTree, SyntaxTree};

/// A parsed tree and the index of the artifact it was loaded from.
pub(crate) struct SourceUnit {
    pub(crate) tree: SyntaxTree,
    pub(crate) artifact_index: i64,
}

/// Snapshot of loaded artifacts and trees for a scan.
pub(crate) struct ScanOutput {
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) units: Vec<SourceUnit>,
}

pub(crate) fn scan_inputs(input: &Path, telemetry: Option<&Telemetry>) -> Result<ScanOutput> {
    let mut output = ScanOutput {
        artifacts: Vec::new(),
        units: Vec::new(),
    };
    if input.is_dir() {
        scan_dir(input, telemetry, &mut output)?;
    } else {
        if !is_tree_dump(input) {
            anyhow::bail!("unsupported input file: {}", input.display());
        }
        scan_tree_file(input, telemetry, &mut output)?;
    }
    debug!(trees = output.units.len(), "scan finished");
    Ok(output)
}

fn scan_dir(path: &Path, telemetry: Option<&Telemetry>, output: &mut ScanOutput) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    // Keep deterministic ordering regardless of filesystem listing order.
    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, telemetry, output)?;
        } else if is_tree_dump(&entry) {
            scan_tree_file(&entry, telemetry, output)?;
        } else {
            debug!(path = %entry.display(), "skipping non-tree file");
        }
    }

    Ok(())
}

fn scan_tree_file(
    path: &Path,
    telemetry: Option<&Telemetry>,
    output: &mut ScanOutput,
) -> Result<()> {
    let load = || -> Result<(u64, SyntaxTree)> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let tree =
            parse_tree(&text).with_context(|| format!("failed to parse {}", path.display()))?;
        Ok((text.len() as u64, tree))
    };
    let (len, tree) = match telemetry {
        Some(telemetry) => {
            let span_attributes = [KeyValue::new(
                "annolint.tree_path",
                path.display().to_string(),
            )];
            telemetry.in_span("tree.scan", &span_attributes, load)?
        }
        None => load()?,
    };
    if tree.path().is_empty() {
        warn!(path = %path.display(), "tree dump has no source path; using dump location");
    }

    let uri = if tree.path().is_empty() {
        path_to_uri(path)
    } else {
        tree.path().to_string()
    };
    let roles = vec![
        serde_json::to_value(ArtifactRoles::AnalysisTarget).context("serialize artifact role")?,
    ];
    let artifact_index = push_artifact(uri, len, roles, &mut output.artifacts);
    output.units.push(SourceUnit {
        tree,
        artifact_index,
    });
    Ok(())
}

/// Parse a JSON tree dump, reporting the JSON path of any mismatch.
pub(crate) fn parse_tree(text: &str) -> Result<SyntaxTree> {
    let mut deserializer = serde_json::Deserializer::from_str(text);
    let raw: RawTree = serde_path_to_error::deserialize(&mut deserializer)
        .context("invalid syntax tree")?;
    deserializer.end().context("trailing data after syntax tree")?;
    Ok(SyntaxTree::from_raw(raw))
}

fn push_artifact(uri: String, len: u64, roles: Vec<Value>, artifacts: &mut Vec<Artifact>) -> i64 {
    let location = ArtifactLocation::builder().uri(uri).build();
    let artifact = Artifact::builder()
        .location(location)
        .length(len as i64)
        .roles(roles)
        .build();
    let index = artifacts.len() as i64;
    artifacts.push(artifact);
    index
}

fn is_tree_dump(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("json")
}

fn path_to_uri(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("file://{}", absolute.to_string_lossy())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
