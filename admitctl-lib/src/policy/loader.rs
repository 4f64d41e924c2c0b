use super::{AdmissionPolicy, AdmissionPolicyBinding, CelPolicy, CelPolicyException, PolicyException, RulePolicy};
use crate::Result;
use crate::resource::Resource;
use camino::{Utf8Path, Utf8PathBuf};
use ohno::{IntoAppError, app_err, bail};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::sync::Arc;

const LOG_TARGET: &str = "  policies";

/// Split a multi-document YAML stream into JSON values
///
/// Empty documents are dropped and `kind: List` documents are flattened into
/// their items.
pub fn load_documents(text: &str) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document).into_app_err("parsing YAML document")?;
        if value.is_null() {
            continue;
        }

        if value.get("kind").and_then(Value::as_str) == Some("List") {
            if let Some(Value::Array(items)) = value.get("items") {
                documents.extend(items.iter().cloned());
            }
            continue;
        }

        documents.push(value);
    }
    Ok(documents)
}

/// Parse every document of a YAML stream as a resource
pub fn load_resources(text: &str) -> Result<Vec<Resource>> {
    load_documents(text)?.into_iter().map(Resource::from_value).collect()
}

/// Every policy-like document read for one run, grouped by kind
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    pub policies: Vec<Arc<RulePolicy>>,
    pub admission_policies: Vec<Arc<AdmissionPolicy>>,
    pub admission_bindings: Vec<Arc<AdmissionPolicyBinding>>,
    pub cel_policies: Vec<Arc<CelPolicy>>,
    pub cel_exceptions: Vec<Arc<CelPolicyException>>,
    pub exceptions: Vec<Arc<PolicyException>>,
}

impl PolicySet {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut set = Self::default();
        set.add_yaml(text)?;
        Ok(set)
    }

    /// Load policies from files, or from every `.yaml`/`.yml` file of a directory
    pub fn load_files<P: AsRef<Utf8Path>>(paths: &[P]) -> Result<Self> {
        let mut set = Self::default();
        for path in paths {
            for file in expand_path(path.as_ref())? {
                let text = fs::read_to_string(&file).into_app_err_with(|| format!("reading policy file '{file}'"))?;
                set.add_yaml(&text)
                    .map_err(|e| app_err!("loading policies from '{file}': {e}"))?;
            }
        }
        Ok(set)
    }

    pub fn add_yaml(&mut self, text: &str) -> Result<()> {
        for document in load_documents(text)? {
            self.add_document(document)?;
        }
        Ok(())
    }

    /// Add one document, dispatching on its `kind`
    pub fn add_document(&mut self, document: Value) -> Result<()> {
        let kind = document.get("kind").and_then(Value::as_str).unwrap_or_default().to_string();
        match kind.as_str() {
            "ClusterPolicy" | "Policy" => self.policies.push(Arc::new(parse(document, &kind)?)),
            "ValidatingAdmissionPolicy" => self.admission_policies.push(Arc::new(parse(document, &kind)?)),
            "ValidatingAdmissionPolicyBinding" => self.admission_bindings.push(Arc::new(parse(document, &kind)?)),
            "ValidatingPolicy" => self.cel_policies.push(Arc::new(parse(document, &kind)?)),
            "CELPolicyException" => self.cel_exceptions.push(Arc::new(parse(document, &kind)?)),
            "PolicyException" => self.exceptions.push(Arc::new(parse(document, &kind)?)),
            "" => bail!("policy document has no 'kind'"),
            other => bail!("unsupported policy kind '{other}'"),
        }
        Ok(())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
            && self.admission_policies.is_empty()
            && self.admission_bindings.is_empty()
            && self.cel_policies.is_empty()
            && self.cel_exceptions.is_empty()
            && self.exceptions.is_empty()
    }
}

fn parse<T: DeserializeOwned>(document: Value, kind: &str) -> Result<T> {
    let name = document
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    log::debug!(target: LOG_TARGET, "Loading {kind} '{name}'");
    serde_json::from_value(document).into_app_err_with(|| format!("parsing {kind} '{name}'"))
}

fn expand_path(path: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in path.read_dir_utf8().into_app_err_with(|| format!("reading directory '{path}'"))? {
        let entry = entry.into_app_err_with(|| format!("reading directory '{path}'"))?;
        let file = entry.path();
        if matches!(file.extension(), Some("yaml" | "yml")) {
            files.push(file.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &str = r"
apiVersion: kyverno.io/v1
kind: ClusterPolicy
metadata:
  name: add-labels
spec:
  rules:
    - name: add-foo
      match:
        resources:
          kinds: [Pod]
      mutate:
        patchStrategicMerge:
          metadata:
            labels:
              foo: bar
---
apiVersion: admissionregistration.k8s.io/v1
kind: ValidatingAdmissionPolicy
metadata:
  name: max-replicas
spec:
  validations:
    - expression: object.spec.replicas <= 5
---
apiVersion: admissionregistration.k8s.io/v1
kind: ValidatingAdmissionPolicyBinding
metadata:
  name: max-replicas-binding
spec:
  policyName: max-replicas
  validationActions: [Deny]
---
apiVersion: policies.kyverno.io/v1alpha1
kind: ValidatingPolicy
metadata:
  name: check-labels
spec:
  validations:
    - expression: has(object.metadata.labels)
---
";

    #[test]
    fn test_mixed_documents_are_dispatched() {
        let set = PolicySet::from_yaml(MIXED).unwrap();
        assert_eq!(set.policies.len(), 1);
        assert_eq!(set.policies[0].name(), "add-labels");
        assert_eq!(set.admission_policies.len(), 1);
        assert_eq!(set.admission_bindings.len(), 1);
        assert_eq!(set.cel_policies.len(), 1);
        assert!(set.exceptions.is_empty());
        assert!(!set.is_empty());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = PolicySet::from_yaml("kind: Deployment\nmetadata:\n  name: x\n").unwrap_err();
        assert!(err.to_string().contains("unsupported policy kind 'Deployment'"));
    }

    #[test]
    fn test_list_documents_are_flattened() {
        let text = "kind: List\nitems:\n  - kind: ConfigMap\n    apiVersion: v1\n    metadata:\n      name: a\n  - kind: ConfigMap\n    apiVersion: v1\n    metadata:\n      name: b\n";
        let resources = load_resources(text).unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[1].name(), "b");
    }

    #[test]
    fn test_scalar_document_is_not_a_resource() {
        let _ = load_resources("just a string\n").unwrap_err();
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_load_files_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::write(root.join("a.yaml"), MIXED).unwrap();
        fs::write(root.join("notes.txt"), "ignored").unwrap();

        let set = PolicySet::load_files(&[root]).unwrap();
        assert_eq!(set.policies.len(), 1);
        assert_eq!(set.cel_policies.len(), 1);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_missing_file_is_reported() {
        let err = PolicySet::load_files(&["/nonexistent/policy.yaml"]).unwrap_err();
        assert!(err.to_string().contains("reading policy file"));
    }
}
