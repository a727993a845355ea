use std::collections::BTreeSet;

use anyhow::{Context, Result, anyhow, bail};
use tracing::trace;

use crate::config::Properties;
use crate::rules::{Diagnostic, DiagnosticSink, Rule, RuleMetadata};
use crate::tree::{Modifier, Node, NodeKind, Position, TypeTag};

const NON_NULL_PROPERTY: &str = "nonNullAnnotation";
const NULLABLE_PROPERTY: &str = "nullableAnnotation";

const TOKENS: &[NodeKind] = &[NodeKind::VariableDef, NodeKind::MethodDef, NodeKind::CtorDef];

/// Simple names of the two nullability annotations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct AnnotationNames {
    pub(crate) non_null: String,
    pub(crate) nullable: String,
}

impl Default for AnnotationNames {
    fn default() -> Self {
        Self {
            non_null: "NonNull".to_string(),
            nullable: "Nullable".to_string(),
        }
    }
}

/// Type tags whose values can never be null.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct NonNullableTypes(BTreeSet<TypeTag>);

impl NonNullableTypes {
    pub(crate) fn new(tags: impl IntoIterator<Item = TypeTag>) -> Self {
        Self(tags.into_iter().collect())
    }

    pub(crate) fn contains(&self, tag: TypeTag) -> bool {
        self.0.contains(&tag)
    }
}

impl Default for NonNullableTypes {
    /// The eight primitive kinds plus `void`.
    fn default() -> Self {
        Self::new(
            TypeTag::ALL
                .into_iter()
                .filter(|tag| tag.is_primitive() || *tag == TypeTag::Void),
        )
    }
}

/// Outcome of classifying one subject.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FindingKind {
    MissingAnnotation,
    RedundantAnnotation,
}

impl FindingKind {
    pub(crate) fn message_key(self) -> &'static str {
        match self {
            FindingKind::MissingAnnotation => "null.annotations.missing",
            FindingKind::RedundantAnnotation => "null.annotations.redundant",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Finding {
    pub(crate) line: u32,
    pub(crate) column: u32,
    pub(crate) kind: FindingKind,
    pub(crate) subject: String,
}

/// Decides, per declaration, whether a nullability annotation is required and present.
///
/// Fields, method returns, constructors and parameters are subjects. A subject
/// is ignored when its type cannot hold null (primitives, `void`), when it is a
/// constructor, or when it is a `static final` field. Ignored subjects must not
/// carry an annotation; all others must carry one.
#[derive(Clone, Debug, Default)]
pub(crate) struct NullAnnotationsClassifier {
    annotations: AnnotationNames,
    non_nullable: NonNullableTypes,
}

impl NullAnnotationsClassifier {
    pub(crate) fn new(annotations: AnnotationNames, non_nullable: NonNullableTypes) -> Self {
        Self {
            annotations,
            non_nullable,
        }
    }

    pub(crate) fn annotations(&self) -> &AnnotationNames {
        &self.annotations
    }

    /// Findings for a field, method, or constructor node, in visit order.
    pub(crate) fn classify(&self, node: Node<'_>) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        match node.kind() {
            NodeKind::VariableDef => {
                if node.is_class_field() {
                    self.visit_field(node, &mut findings)?;
                }
            }
            NodeKind::MethodDef | NodeKind::CtorDef => self.visit_method(node, &mut findings)?,
            _ => {}
        }
        Ok(findings)
    }

    fn visit_field(&self, field: Node<'_>, findings: &mut Vec<Finding>) -> Result<()> {
        let constant = field.has_modifier(Modifier::Static) && field.has_modifier(Modifier::Final);
        self.check_subject(field, constant, findings)
    }

    fn visit_method(&self, method: Node<'_>, findings: &mut Vec<Finding>) -> Result<()> {
        self.check_subject(method, false, findings)?;
        // Native parameters cannot be verified against a body; abstract ones still are.
        if method.has_modifier(Modifier::Native) {
            return Ok(());
        }
        for parameter in method.parameters() {
            self.check_subject(parameter, false, findings)?;
        }
        Ok(())
    }

    fn check_subject(
        &self,
        subject: Node<'_>,
        structurally_ignored: bool,
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        let ident = subject
            .ident()
            .ok_or_else(|| malformed(subject, "has no identifier"))?;
        let has_annotation = subject.has_annotation(&self.annotations.non_null)
            || subject.has_annotation(&self.annotations.nullable);
        let ignored = structurally_ignored || self.is_ignored_by_type(subject)?;

        let kind = match (ignored, has_annotation) {
            (false, false) => FindingKind::MissingAnnotation,
            (true, true) => FindingKind::RedundantAnnotation,
            _ => return Ok(()),
        };
        let Position { line, column } = subject.first_token_position();
        trace!(
            subject = ident.text.as_str(),
            line,
            column,
            key = kind.message_key(),
            "null annotation finding"
        );
        findings.push(Finding {
            line,
            column,
            kind,
            subject: ident.text.clone(),
        });
        Ok(())
    }

    fn is_ignored_by_type(&self, subject: Node<'_>) -> Result<bool> {
        if subject.kind() == NodeKind::CtorDef {
            return Ok(true);
        }
        let type_node = subject
            .type_node()
            .ok_or_else(|| malformed(subject, "has no type"))?;
        Ok(self.non_nullable.contains(type_node.tag))
    }
}

fn malformed(node: Node<'_>, problem: &str) -> anyhow::Error {
    anyhow!(
        "malformed tree: {} at {} {problem}",
        node.kind(),
        node.position()
    )
}

/// Rule that requires `@NonNull`/`@Nullable` where null is possible and forbids it elsewhere.
#[derive(Default)]
pub(crate) struct NullAnnotationsRule {
    classifier: NullAnnotationsClassifier,
}

crate::register_rule!(NullAnnotationsRule);

impl NullAnnotationsRule {
    fn message(&self, finding: &Finding) -> String {
        let names = self.classifier.annotations();
        match finding.kind {
            FindingKind::MissingAnnotation => format!(
                "Missing @{} or @{} annotation on '{}'",
                names.non_null, names.nullable, finding.subject
            ),
            FindingKind::RedundantAnnotation => format!(
                "Redundant @{}/@{} annotation on '{}'",
                names.non_null, names.nullable, finding.subject
            ),
        }
    }
}

impl Rule for NullAnnotationsRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "NULL_ANNOTATIONS",
            name: "Null annotations",
            description: "Declarations that can hold null need @NonNull or @Nullable; others must not carry them",
        }
    }

    fn default_tokens(&self) -> &'static [NodeKind] {
        TOKENS
    }

    fn acceptable_tokens(&self) -> &'static [NodeKind] {
        TOKENS
    }

    fn configure(&mut self, properties: &Properties) -> Result<()> {
        let mut names = self.classifier.annotations().clone();
        for (key, value) in properties {
            let slot = match key.as_str() {
                NON_NULL_PROPERTY => &mut names.non_null,
                NULLABLE_PROPERTY => &mut names.nullable,
                _ => bail!("NULL_ANNOTATIONS has no property named {key}"),
            };
            *slot = annotation_name(value).with_context(|| format!("invalid {key}"))?;
        }
        self.classifier = NullAnnotationsClassifier::new(names, NonNullableTypes::default());
        Ok(())
    }

    fn visit(&self, node: Node<'_>, sink: &mut dyn DiagnosticSink) -> Result<()> {
        for finding in self.classifier.classify(node)? {
            sink.report(Diagnostic {
                position: Position::new(finding.line, finding.column),
                message_key: finding.kind.message_key(),
                message: self.message(&finding),
                subject: finding.subject,
            });
        }
        Ok(())
    }
}

/// Accept a simple Java identifier; a leading `@` is tolerated.
fn annotation_name(value: &str) -> Result<String> {
    let name = value.trim().trim_start_matches('@');
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        bail!("annotation name must not be empty");
    };
    let valid = (first.is_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    if !valid {
        bail!("not a simple annotation name: {value}");
    }
    Ok(name.to_string())
}
