use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use opentelemetry::{Context as OtelContext, KeyValue};
use rayon::prelude::*;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, MultiformatMessageString, PropertyBag, ReportingDescriptor, Result as SarifResult,
};
use tracing::debug;

use crate::config::{RuleProperties, TOKENS_PROPERTY, split_list};
use crate::rules::{Diagnostic, Rule, RuleMetadata, all_rules, result_message, source_location};
use crate::scan::SourceUnit;
use crate::telemetry::{Telemetry, with_parent_span, with_span};
use crate::tree::NodeKind;

/// Inputs shared by analysis rules.
pub(crate) struct AnalysisContext {
    pub(crate) units: Vec<SourceUnit>,
    artifact_uris: BTreeMap<i64, String>,
    telemetry: Option<Arc<Telemetry>>,
}

/// A registered rule together with the node kinds it is dispatched.
struct ConfiguredRule {
    rule: Box<dyn Rule>,
    tokens: BTreeSet<NodeKind>,
}

/// Analysis engine that executes configured rules.
pub(crate) struct Engine {
    rules: Vec<ConfiguredRule>,
}

impl Engine {
    pub(crate) fn new(properties: &RuleProperties) -> Result<Self> {
        let mut rules = all_rules();
        rules.sort_by(|a, b| a.metadata().id.cmp(b.metadata().id));

        let known: BTreeSet<&str> = rules.iter().map(|rule| rule.metadata().id).collect();
        for rule_id in properties.rule_ids() {
            if !known.contains(rule_id) {
                bail!("unknown rule in properties: {rule_id}");
            }
        }

        let mut configured = Vec::with_capacity(rules.len());
        for mut rule in rules {
            let id = rule.metadata().id;
            let mut rule_properties = properties.for_rule(id);
            let tokens = effective_tokens(rule.as_ref(), rule_properties.remove(TOKENS_PROPERTY))
                .with_context(|| format!("failed to configure {id}"))?;
            rule.configure(&rule_properties)
                .with_context(|| format!("failed to configure {id}"))?;
            debug!(rule = id, tokens = ?tokens, "configured rule");
            configured.push(ConfiguredRule { rule, tokens });
        }
        Ok(Self { rules: configured })
    }

    pub(crate) fn analyze(&self, context: &AnalysisContext) -> Result<EngineOutput> {
        let rules = self
            .rules
            .iter()
            .map(|configured| rule_descriptor(&configured.rule.metadata()))
            .collect();

        // One buffer per tree; collecting keeps input order regardless of scheduling.
        let per_unit: Vec<Vec<SarifResult>> = context.with_span(
            "analysis",
            &[KeyValue::new("annolint.phase", "analysis")],
            || {
                let parent_cx = OtelContext::current();
                context
                    .units
                    .par_iter()
                    .map(|unit| self.analyze_unit(context, unit, &parent_cx))
                    .collect::<Result<Vec<_>>>()
            },
        )?;
        let results = per_unit.into_iter().flatten().collect();

        Ok(EngineOutput { rules, results })
    }

    fn analyze_unit(
        &self,
        context: &AnalysisContext,
        unit: &SourceUnit,
        parent_cx: &OtelContext,
    ) -> Result<Vec<SarifResult>> {
        let artifact_uri = context.artifact_uri(unit.artifact_index);
        let mut attributes = vec![KeyValue::new("annolint.tree", unit.tree.path().to_string())];
        if let Some(uri) = artifact_uri {
            attributes.push(KeyValue::new("annolint.artifact_uri", uri.to_string()));
        }
        with_parent_span(
            context.telemetry(),
            "tree",
            &attributes,
            parent_cx,
            || self.run_rules(context, unit, artifact_uri),
        )
    }

    fn run_rules(
        &self,
        context: &AnalysisContext,
        unit: &SourceUnit,
        artifact_uri: Option<&str>,
    ) -> Result<Vec<SarifResult>> {
        let mut results = Vec::new();
        for configured in &self.rules {
            let metadata = configured.rule.metadata();
            let rule_span_attributes = [KeyValue::new("annolint.rule_id", metadata.id)];
            let diagnostics = context.with_span(
                &format!("rule:{}", metadata.id),
                &rule_span_attributes,
                || dispatch(configured, unit),
            )?;
            debug!(
                rule = metadata.id,
                tree = unit.tree.path(),
                diagnostics = diagnostics.len(),
                "rule finished"
            );
            results.extend(
                diagnostics
                    .into_iter()
                    .map(|diagnostic| sarif_result(metadata.id, artifact_uri, diagnostic)),
            );
        }
        Ok(results)
    }
}

/// Aggregated SARIF payload from rule execution.
pub(crate) struct EngineOutput {
    pub(crate) rules: Vec<ReportingDescriptor>,
    pub(crate) results: Vec<SarifResult>,
}

fn dispatch(configured: &ConfiguredRule, unit: &SourceUnit) -> Result<Vec<Diagnostic>> {
    let mut diagnostics = Vec::new();
    for node in unit.tree.root().descendants() {
        if !configured.tokens.contains(&node.kind()) {
            continue;
        }
        configured.rule.visit(node, &mut diagnostics).with_context(|| {
            format!(
                "{} failed on {}",
                configured.rule.metadata().id,
                unit.tree.path()
            )
        })?;
    }
    Ok(diagnostics)
}

/// Configured tokens (or the defaults) plus the rule's required tokens.
fn effective_tokens(rule: &dyn Rule, configured: Option<String>) -> Result<BTreeSet<NodeKind>> {
    let mut tokens = BTreeSet::new();
    match configured {
        Some(value) => {
            for name in split_list(&value) {
                let kind: NodeKind = name.parse()?;
                if !rule.acceptable_tokens().contains(&kind) {
                    bail!("token {kind} is not acceptable");
                }
                tokens.insert(kind);
            }
            if tokens.is_empty() {
                bail!("tokens must not be empty");
            }
        }
        None => tokens.extend(rule.default_tokens().iter().copied()),
    }
    tokens.extend(rule.required_tokens().iter().copied());
    Ok(tokens)
}

fn sarif_result(rule_id: &str, artifact_uri: Option<&str>, diagnostic: Diagnostic) -> SarifResult {
    let location = source_location(artifact_uri, diagnostic.position, &diagnostic.subject);
    let properties = PropertyBag::builder()
        .additional_properties(BTreeMap::from([(
            "messageKey".to_string(),
            json!(diagnostic.message_key),
        )]))
        .build();
    let mut result = SarifResult::builder()
        .message(result_message(diagnostic.message))
        .locations(vec![location])
        .properties(properties)
        .build();
    result.rule_id = Some(rule_id.to_string());
    result
}

pub(crate) fn build_context(
    units: Vec<SourceUnit>,
    artifacts: &[Artifact],
    telemetry: Option<Arc<Telemetry>>,
) -> AnalysisContext {
    let artifact_uris = with_span(
        telemetry.as_deref(),
        "artifact_analysis",
        &[KeyValue::new("annolint.phase", "artifact_analysis")],
        || artifact_uris(artifacts),
    );
    AnalysisContext {
        units,
        artifact_uris,
        telemetry,
    }
}

fn rule_descriptor(metadata: &RuleMetadata) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(metadata.id)
        .name(metadata.name)
        .short_description(
            MultiformatMessageString::builder()
                .text(metadata.description)
                .build(),
        )
        .build()
}

impl AnalysisContext {
    pub(crate) fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_deref()
    }

    pub(crate) fn with_span<T, F>(&self, name: &str, attributes: &[KeyValue], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        with_span(self.telemetry(), name, attributes, f)
    }

    pub(crate) fn artifact_uri(&self, index: i64) -> Option<&str> {
        self.artifact_uris.get(&index).map(|value| value.as_str())
    }
}

fn artifact_uris(artifacts: &[Artifact]) -> BTreeMap<i64, String> {
    let mut uris = BTreeMap::new();
    for (index, artifact) in artifacts.iter().enumerate() {
        if let Some(uri) = artifact
            .location
            .as_ref()
            .and_then(|location| location.uri.as_ref())
        {
            uris.insert(index as i64, uri.clone());
        }
    }
    uris
}
