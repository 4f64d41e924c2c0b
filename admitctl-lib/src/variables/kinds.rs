use super::Subresource;
use crate::policy::{KindPattern, RulePolicy};
use std::collections::BTreeSet;

/// The kinds a policy's rules select
///
/// Subresource patterns such as `Deployment/scale` resolve to the
/// subresource's own kind when a matching mapping is known.
#[must_use]
pub fn policy_kinds(policy: &RulePolicy, subresources: &[Subresource]) -> BTreeSet<String> {
    let mut kinds = BTreeSet::new();
    for rule in policy.rules() {
        for pattern in rule.match_resources.kinds() {
            let parsed = KindPattern::parse(pattern);
            let kind = parsed
                .subresource
                .and_then(|sub| {
                    subresources
                        .iter()
                        .find(|s| s.parent_resource.kind == parsed.kind && s.short_name() == sub)
                })
                .map_or_else(|| parsed.kind.to_string(), |s| s.subresource.kind.clone());
            let _ = kinds.insert(kind);
        }
    }
    kinds
}
