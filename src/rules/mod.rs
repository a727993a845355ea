use anyhow::Result;
use serde_sarif::sarif::{
    ArtifactLocation, Location, LogicalLocation, Message, PhysicalLocation, Region,
};

use crate::config::Properties;
use crate::tree::{Node, NodeKind, Position};

// Rule modules are auto-discovered by build.rs (do not edit manually).
include!(concat!(env!("OUT_DIR"), "/rule_modules.rs"));

/// Metadata describing an analysis rule.
#[derive(Clone, Debug)]
pub(crate) struct RuleMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

/// Diagnostic reported by a rule for a single node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Diagnostic {
    pub(crate) position: Position,
    pub(crate) message_key: &'static str,
    pub(crate) message: String,
    /// Name of the declaration the diagnostic is about.
    pub(crate) subject: String,
}

/// Receiver for diagnostics produced while visiting nodes.
pub(crate) trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

/// Rule interface for node dispatch.
///
/// The engine walks each tree and calls `visit` for every node whose kind is
/// in the rule's effective token set (configured tokens, or the default
/// tokens, plus the required tokens).
pub(crate) trait Rule: Send + Sync {
    fn metadata(&self) -> RuleMetadata;

    fn default_tokens(&self) -> &'static [NodeKind];

    fn acceptable_tokens(&self) -> &'static [NodeKind];

    fn required_tokens(&self) -> &'static [NodeKind] {
        &[]
    }

    /// Apply rule-specific properties. The shared `tokens` property is handled by the engine.
    fn configure(&mut self, properties: &Properties) -> Result<()> {
        if let Some(key) = properties.keys().next() {
            anyhow::bail!("{} has no property named {key}", self.metadata().id);
        }
        Ok(())
    }

    fn visit(&self, node: Node<'_>, sink: &mut dyn DiagnosticSink) -> Result<()>;
}

/// Wrapper struct for rule factory functions to enable inventory collection.
pub(crate) struct RuleFactory(pub fn() -> Box<dyn Rule>);

inventory::collect!(RuleFactory);

/// Macro to register a rule implementation.
///
/// Usage: `register_rule!(RuleName);`
#[macro_export]
macro_rules! register_rule {
    ($rule_type:ty) => {
        inventory::submit! {
            $crate::rules::RuleFactory(|| Box::new(<$rule_type>::default()))
        }
    };
}

/// Returns all registered rules as boxed trait objects.
pub(crate) fn all_rules() -> Vec<Box<dyn Rule>> {
    inventory::iter::<RuleFactory>
        .into_iter()
        .map(|factory| (factory.0)())
        .collect()
}

/// Location of a declaration inside a source file.
pub(crate) fn source_location(
    artifact_uri: Option<&str>,
    position: Position,
    subject: &str,
) -> Location {
    let logical = LogicalLocation::builder()
        .name(subject)
        .kind("declaration")
        .build();
    let Some(uri) = artifact_uri else {
        return Location::builder().logical_locations(vec![logical]).build();
    };
    let artifact_location = ArtifactLocation::builder().uri(uri.to_string()).build();
    let region = Region::builder()
        .start_line(position.line as i64)
        .start_column(position.column as i64)
        .build();
    let physical = PhysicalLocation::builder()
        .artifact_location(artifact_location)
        .region(region)
        .build();
    Location::builder()
        .logical_locations(vec![logical])
        .physical_location(physical)
        .build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_rules_have_unique_ids() {
        let rules = all_rules();
        assert!(!rules.is_empty(), "At least one rule must be registered");

        let mut ids: Vec<_> = rules.iter().map(|r| r.metadata().id).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total, "Rule IDs must be unique");
    }

    #[test]
    fn all_rules_have_non_empty_metadata() {
        for rule in all_rules() {
            let meta = rule.metadata();
            assert!(!meta.id.is_empty(), "Rule ID must not be empty");
            assert!(!meta.name.is_empty(), "Rule name must not be empty");
            assert!(
                !meta.description.is_empty(),
                "Rule description must not be empty"
            );
        }
    }

    #[test]
    fn default_and_required_tokens_are_acceptable() {
        for rule in all_rules() {
            let acceptable = rule.acceptable_tokens();
            for token in rule.default_tokens().iter().chain(rule.required_tokens()) {
                assert!(
                    acceptable.contains(token),
                    "{} lists {token} outside its acceptable tokens",
                    rule.metadata().id
                );
            }
        }
    }

    #[test]
    fn source_location_carries_region_and_subject() {
        let location = source_location(Some("src/Foo.java"), Position::new(7, 3), "name");
        let value = serde_json::to_value(&location).expect("serialize location");

        assert_eq!(
            value["physicalLocation"]["artifactLocation"]["uri"],
            "src/Foo.java"
        );
        assert_eq!(value["physicalLocation"]["region"]["startLine"], 7);
        assert_eq!(value["physicalLocation"]["region"]["startColumn"], 3);
        assert_eq!(value["logicalLocations"][0]["name"], "name");
    }

    #[test]
    fn source_location_without_artifact_is_logical_only() {
        let location = source_location(None, Position::new(1, 1), "name");
        let value = serde_json::to_value(&location).expect("serialize location");

        assert!(value.get("physicalLocation").is_none());
        assert_eq!(value["logicalLocations"][0]["kind"], "declaration");
    }
}
