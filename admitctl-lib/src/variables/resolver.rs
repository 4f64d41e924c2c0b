use super::{Subresource, Values};
use crate::Result;
use crate::context::referenced_variables;
use crate::policy::RulePolicy;
use core::fmt::Debug;
use ohno::{IntoAppError, bail};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

const LOG_TARGET: &str = " variables";

/// Paths the evaluation context provides on its own
const BUILTIN_PREFIXES: &[&str] = &[
    "request.object",
    "request.oldObject",
    "request.operation",
    "request.userInfo",
    "request.roles",
    "request.clusterRoles",
    "request.namespace",
    "serviceAccountName",
    "serviceAccountNamespace",
    "images",
    "element",
    "elementIndex",
    "target",
    "@",
];

/// Computes the variable bindings for a policy applied to a resource
pub trait VariableResolver: Debug + Send + Sync {
    /// `kinds` are the kinds the policy selects; required variables are only
    /// enforced when `resource_kind` is one of them
    fn compute_variables(
        &self,
        policy: &RulePolicy,
        resource_name: &str,
        resource_kind: &str,
        kinds: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Value>>;
}

/// User-supplied variables from a values file and `--set` pairs
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: Option<Values>,
    overrides: BTreeMap<String, Value>,
}

impl Variables {
    #[must_use]
    pub const fn new(values: Option<Values>, overrides: BTreeMap<String, Value>) -> Self {
        Self { values, overrides }
    }

    /// Parse `key=value` pairs, each argument possibly holding several comma-separated pairs
    pub fn parse_set<S: AsRef<str>>(pairs: &[S]) -> Result<BTreeMap<String, Value>> {
        let mut overrides = BTreeMap::new();
        for pair in pairs.iter().flat_map(|p| p.as_ref().split(',')) {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((key, value)) = pair.split_once('=') else {
                bail!("invalid variable '{pair}', expected key=value");
            };
            let key = key.trim();
            if key.is_empty() {
                bail!("invalid variable '{pair}', the key is empty");
            }
            let _ = overrides.insert(key.to_string(), Value::String(value.trim().to_string()));
        }
        Ok(overrides)
    }

    #[must_use]
    pub fn values(&self) -> Option<&Values> {
        self.values.as_ref()
    }

    #[must_use]
    pub fn subresources(&self) -> &[Subresource] {
        self.values.as_ref().map(|values| values.subresources.as_slice()).unwrap_or_default()
    }

    #[must_use]
    pub fn namespace_labels(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.values.as_ref().map(Values::namespace_labels).unwrap_or_default()
    }
}

impl VariableResolver for Variables {
    fn compute_variables(
        &self,
        policy: &RulePolicy,
        resource_name: &str,
        resource_kind: &str,
        kinds: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Value>> {
        let mut bindings = BTreeMap::new();
        if let Some(values) = &self.values {
            bindings.extend(values.global_values.clone());
            if let Some(resource_values) = values.resource_values(policy.name(), resource_name) {
                bindings.extend(resource_values.clone());
            }
        }
        bindings.extend(self.overrides.clone());

        if kinds.contains(resource_kind) {
            let missing: Vec<String> = required_variables(policy)?
                .into_iter()
                .filter(|variable| !bindings.contains_key(variable))
                .collect();
            if !missing.is_empty() {
                bail!("no values for {}", missing.join(", "));
            }
        }

        log::debug!(target: LOG_TARGET, "Computed {} variable(s) for policy '{}' and resource '{resource_name}'", bindings.len(), policy.name());
        Ok(bindings)
    }
}

/// Variables a policy references that the evaluation context does not provide itself
pub fn required_variables(policy: &RulePolicy) -> Result<BTreeSet<String>> {
    let text = serde_json::to_string(policy.rules()).into_app_err("serializing policy rules")?;
    Ok(referenced_variables(&text)
        .into_iter()
        .filter(|variable| !is_builtin(variable))
        .collect())
}

fn is_builtin(variable: &str) -> bool {
    BUILTIN_PREFIXES.iter().any(|prefix| {
        variable
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(['.', '[']))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy_with_team_variable() -> RulePolicy {
        serde_json::from_value(json!({
            "metadata": {"name": "add-labels"},
            "spec": {"rules": [{
                "name": "add-team",
                "match": {"resources": {"kinds": ["Pod"]}},
                "mutate": {"patchStrategicMerge": {"metadata": {"labels": {
                    "team": "{{ team }}",
                    "name": "{{ request.object.metadata.name }}"
                }}}}
            }]}
        }))
        .unwrap()
    }

    fn pod_kinds() -> BTreeSet<String> {
        ["Pod".to_string()].into()
    }

    #[test]
    fn test_parse_set() {
        let parsed = Variables::parse_set(&["a=1,b=two", " c = x "]).unwrap();
        assert_eq!(parsed["a"], json!("1"));
        assert_eq!(parsed["b"], json!("two"));
        assert_eq!(parsed["c"], json!("x"));

        let _ = Variables::parse_set(&["novalue"]).unwrap_err();
        let _ = Variables::parse_set(&["=x"]).unwrap_err();
    }

    #[test]
    fn test_required_variables_skip_builtins() {
        let required = required_variables(&policy_with_team_variable()).unwrap();
        assert_eq!(required.into_iter().collect::<Vec<_>>(), ["team"]);
    }

    #[test]
    fn test_precedence_global_resource_override() {
        let values = Values::from_yaml(
            "globalValues:\n  team: global\n  env: dev\npolicies:\n  - name: add-labels\n    resources:\n      - name: web\n        values:\n          team: resource\n",
        )
        .unwrap();
        let overrides = Variables::parse_set(&["env=prod"]).unwrap();
        let variables = Variables::new(Some(values), overrides);

        let bindings = variables
            .compute_variables(&policy_with_team_variable(), "web", "Pod", &pod_kinds())
            .unwrap();
        assert_eq!(bindings["team"], json!("resource"));
        assert_eq!(bindings["env"], json!("prod"));
    }

    #[test]
    fn test_missing_variable_fails_only_for_selected_kinds() {
        let variables = Variables::default();
        let policy = policy_with_team_variable();

        let err = variables.compute_variables(&policy, "web", "Pod", &pod_kinds()).unwrap_err();
        assert!(err.to_string().contains("no values for team"));

        let bindings = variables.compute_variables(&policy, "cm", "ConfigMap", &pod_kinds()).unwrap();
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_is_builtin() {
        assert!(is_builtin("request.object"));
        assert!(is_builtin("request.object.metadata.name"));
        assert!(is_builtin("images.containers"));
        assert!(!is_builtin("request.objects"));
        assert!(!is_builtin("team"));
    }
}
