use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};

/// Property key shared by every rule to narrow the node kinds it is dispatched.
pub(crate) const TOKENS_PROPERTY: &str = "tokens";

/// Properties for a single rule, keyed by property name.
pub(crate) type Properties = BTreeMap<String, String>;

/// Rule properties collected from `RULE_ID.key=value` command line entries.
#[derive(Clone, Debug, Default)]
pub(crate) struct RuleProperties {
    by_rule: BTreeMap<String, Properties>,
}

impl RuleProperties {
    pub(crate) fn parse(entries: &[String]) -> Result<Self> {
        let mut by_rule: BTreeMap<String, Properties> = BTreeMap::new();
        for entry in entries {
            let (rule_id, key, value) = parse_entry(entry)
                .with_context(|| format!("invalid property: {entry}"))?;
            let properties = by_rule.entry(rule_id.to_string()).or_default();
            if properties.insert(key.to_string(), value.to_string()).is_some() {
                bail!("duplicate property: {rule_id}.{key}");
            }
        }
        Ok(Self { by_rule })
    }

    pub(crate) fn rule_ids(&self) -> impl Iterator<Item = &str> {
        self.by_rule.keys().map(String::as_str)
    }

    pub(crate) fn for_rule(&self, rule_id: &str) -> Properties {
        self.by_rule.get(rule_id).cloned().unwrap_or_default()
    }
}

fn parse_entry(entry: &str) -> Result<(&str, &str, &str)> {
    let Some((name, value)) = entry.split_once('=') else {
        bail!("expected RULE_ID.key=value");
    };
    let Some((rule_id, key)) = name.trim().split_once('.') else {
        bail!("expected RULE_ID.key=value");
    };
    if rule_id.is_empty() || key.is_empty() {
        bail!("rule id and property name must not be empty");
    }
    Ok((rule_id, key, value.trim()))
}

/// Split a comma-separated property value, dropping empty items.
pub(crate) fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parse_groups_properties_by_rule() {
        let properties = RuleProperties::parse(&entries(&[
            "NULL_ANNOTATIONS.tokens=METHOD_DEF, CTOR_DEF",
            "NULL_ANNOTATIONS.nonNullAnnotation=NotNull",
            "OTHER.flag=true",
        ]))
        .expect("parse properties");

        let rule = properties.for_rule("NULL_ANNOTATIONS");
        assert_eq!(rule.get("tokens").map(String::as_str), Some("METHOD_DEF, CTOR_DEF"));
        assert_eq!(
            rule.get("nonNullAnnotation").map(String::as_str),
            Some("NotNull")
        );
        assert_eq!(
            properties.rule_ids().collect::<Vec<_>>(),
            vec!["NULL_ANNOTATIONS", "OTHER"]
        );
        assert!(properties.for_rule("MISSING").is_empty());
    }

    #[test]
    fn parse_rejects_malformed_entries() {
        assert!(RuleProperties::parse(&entries(&["tokens=METHOD_DEF"])).is_err());
        assert!(RuleProperties::parse(&entries(&["NULL_ANNOTATIONS.tokens"])).is_err());
        assert!(RuleProperties::parse(&entries(&[".tokens=METHOD_DEF"])).is_err());
    }

    #[test]
    fn parse_rejects_duplicate_keys() {
        let result = RuleProperties::parse(&entries(&[
            "NULL_ANNOTATIONS.tokens=METHOD_DEF",
            "NULL_ANNOTATIONS.tokens=CTOR_DEF",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn split_list_trims_items() {
        let items: Vec<_> = split_list(" METHOD_DEF, ,CTOR_DEF ").collect();
        assert_eq!(items, vec!["METHOD_DEF", "CTOR_DEF"]);
    }
}
