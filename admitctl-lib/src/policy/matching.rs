use crate::resource::{GroupVersionKind, Resource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Match `value` against a pattern where `*` matches any run of characters and
/// `?` matches exactly one
#[must_use]
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();

    let mut p = 0;
    let mut v = 0;
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        match (pattern.get(p), value.get(v)) {
            (Some('*'), _) => {
                backtrack = Some((p, v));
                p += 1;
            }
            (Some(expected), Some(actual)) if *expected == '?' || expected == actual => {
                p += 1;
                v += 1;
            }
            _ => match backtrack {
                Some((star, mark)) => {
                    p = star + 1;
                    v = mark + 1;
                    backtrack = Some((star, mark + 1));
                }
                None => return false,
            },
        }
    }

    pattern.iter().skip(p).all(|c| *c == '*')
}

/// One entry of a rule's `kinds` list
///
/// Accepted shapes are `Kind`, `Kind/subresource`, `version/Kind`,
/// `group/version/Kind` and `group/version/Kind/subresource`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindPattern<'a> {
    pub group: Option<&'a str>,
    pub version: Option<&'a str>,
    pub kind: &'a str,
    pub subresource: Option<&'a str>,
}

impl<'a> KindPattern<'a> {
    #[must_use]
    pub fn parse(pattern: &'a str) -> Self {
        let parts: Vec<&str> = pattern.split('/').collect();
        let looks_like_kind = |s: &str| s.starts_with(|c: char| c.is_ascii_uppercase() || c == '*');

        match *parts.as_slice() {
            [kind] => Self::new(None, None, kind, None),
            [first, second] if looks_like_kind(first) => Self::new(None, None, first, Some(second)),
            [version, kind] => Self::new(None, Some(version), kind, None),
            [version, kind, subresource] if looks_like_kind(kind) => Self::new(None, Some(version), kind, Some(subresource)),
            [group, version, kind] => Self::new(Some(group), Some(version), kind, None),
            [group, version, kind, subresource, ..] => Self::new(Some(group), Some(version), kind, Some(subresource)),
            [] => Self::new(None, None, pattern, None),
        }
    }

    const fn new(group: Option<&'a str>, version: Option<&'a str>, kind: &'a str, subresource: Option<&'a str>) -> Self {
        Self {
            group,
            version,
            kind,
            subresource,
        }
    }

    /// Whether a resource of type `gvk`, addressed through `subresource`
    /// (empty for the main resource), is selected by this pattern
    #[must_use]
    pub fn matches(&self, gvk: &GroupVersionKind, subresource: &str) -> bool {
        if !wildcard_match(self.kind, &gvk.kind) {
            return false;
        }
        if let Some(group) = self.group
            && !wildcard_match(group, &gvk.group)
        {
            return false;
        }
        if let Some(version) = self.version
            && !wildcard_match(version, &gvk.version)
        {
            return false;
        }
        match self.subresource {
            Some(expected) => wildcard_match(expected, subresource),
            None => subresource.is_empty() || self.kind == "*",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelSelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: LabelSelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Selects objects by their labels; an empty selector selects everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let labels_match = self.match_labels.iter().all(|(key, value)| labels.get(key) == Some(value));

        labels_match
            && self.match_expressions.iter().all(|requirement| {
                let actual = labels.get(&requirement.key);
                match requirement.operator {
                    LabelSelectorOperator::In => actual.is_some_and(|v| requirement.values.contains(v)),
                    LabelSelectorOperator::NotIn => actual.is_none_or(|v| !requirement.values.contains(v)),
                    LabelSelectorOperator::Exists => actual.is_some(),
                    LabelSelectorOperator::DoesNotExist => actual.is_none(),
                }
            })
    }
}

/// Resource description used by a rule's `match` and `exclude` blocks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFilter {
    #[serde(default)]
    pub kinds: Vec<String>,

    #[serde(default)]
    pub names: Vec<String>,

    #[serde(default)]
    pub namespaces: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

impl ResourceFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
            && self.names.is_empty()
            && self.namespaces.is_empty()
            && self.selector.is_none()
            && self.namespace_selector.is_none()
    }

    /// Whether every populated criterion accepts the resource
    #[must_use]
    pub fn matches(
        &self,
        resource: &Resource,
        gvk: &GroupVersionKind,
        subresource: &str,
        namespace_labels: &BTreeMap<String, String>,
    ) -> bool {
        if !self.kinds.is_empty() && !self.kinds.iter().any(|k| KindPattern::parse(k).matches(gvk, subresource)) {
            return false;
        }
        if !self.names.is_empty() && !self.names.iter().any(|n| wildcard_match(n, resource.name())) {
            return false;
        }
        if !self.namespaces.is_empty() && !self.namespaces.iter().any(|n| wildcard_match(n, resource.namespace())) {
            return false;
        }
        if let Some(selector) = &self.selector
            && !selector.matches(&resource.labels())
        {
            return false;
        }
        if let Some(selector) = &self.namespace_selector
            && !selector.matches(namespace_labels)
        {
            return false;
        }
        true
    }
}

/// The `match` or `exclude` block of a rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResources {
    #[serde(default)]
    pub resources: ResourceFilter,

    /// Alternatives, any of which selects the resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<MatchResourcesEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResourcesEntry {
    #[serde(default)]
    pub resources: ResourceFilter,
}

impl MatchResources {
    /// Every kind pattern this block names
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.resources
            .kinds
            .iter()
            .chain(self.any.iter().flat_map(|entry| entry.resources.kinds.iter()))
            .map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.any.is_empty()
    }

    #[must_use]
    pub fn matches(
        &self,
        resource: &Resource,
        gvk: &GroupVersionKind,
        subresource: &str,
        namespace_labels: &BTreeMap<String, String>,
    ) -> bool {
        let primary = self.resources.is_empty() || self.resources.matches(resource, gvk, subresource, namespace_labels);
        let alternatives = self.any.is_empty()
            || self
                .any
                .iter()
                .any(|entry| entry.resources.matches(resource, gvk, subresource, namespace_labels));
        primary && alternatives
    }
}
