use super::{JsonContext, Operation, RequestInfo};
use crate::policy::{PolicyException, RulePolicy};
use crate::resource::{GroupVersionKind, Resource};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything a rule engine sees when evaluating one policy against one resource
///
/// Built fresh for every (policy, phase) pair by
/// [`build_policy_context`](super::build_policy_context) and never modified afterwards.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub(super) policy: Arc<RulePolicy>,
    pub(super) new_resource: Resource,
    pub(super) old_resource: Option<Resource>,
    pub(super) operation: Operation,
    pub(super) request_info: RequestInfo,
    pub(super) namespace_labels: BTreeMap<String, String>,
    pub(super) gvk: GroupVersionKind,
    pub(super) subresource: String,
    pub(super) json_context: JsonContext,
    pub(super) exceptions: Vec<Arc<PolicyException>>,
}

impl PolicyContext {
    #[must_use]
    pub const fn policy(&self) -> &Arc<RulePolicy> {
        &self.policy
    }

    #[must_use]
    pub const fn new_resource(&self) -> &Resource {
        &self.new_resource
    }

    /// The prior resource state, present for updates and deletes
    #[must_use]
    pub const fn old_resource(&self) -> Option<&Resource> {
        self.old_resource.as_ref()
    }

    /// The resource rules match against: the new one, or the old one when deleting
    ///
    /// A DELETE context keeps the resource under evaluation as its new resource
    /// too, so engines always have an object to report on. Both sides are the
    /// same document and matching sees the object being deleted.
    #[must_use]
    pub fn match_resource(&self) -> &Resource {
        match (&self.operation, &self.old_resource) {
            (Operation::Delete, Some(old)) => old,
            _ => &self.new_resource,
        }
    }

    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    #[must_use]
    pub const fn request_info(&self) -> &RequestInfo {
        &self.request_info
    }

    #[must_use]
    pub const fn namespace_labels(&self) -> &BTreeMap<String, String> {
        &self.namespace_labels
    }

    #[must_use]
    pub const fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    #[must_use]
    pub fn subresource(&self) -> &str {
        &self.subresource
    }

    #[must_use]
    pub const fn json_context(&self) -> &JsonContext {
        &self.json_context
    }

    /// Exceptions naming this context's policy
    #[must_use]
    pub fn exceptions(&self) -> &[Arc<PolicyException>] {
        &self.exceptions
    }

    /// The first exception suppressing `rule_name` for this resource
    #[must_use]
    pub fn exception_for(&self, rule_name: &str) -> Option<&PolicyException> {
        let resource = self.match_resource();
        self.exceptions
            .iter()
            .find(|exception| {
                exception.applies(
                    self.policy.name(),
                    rule_name,
                    resource,
                    &self.gvk,
                    &self.subresource,
                    &self.namespace_labels,
                )
            })
            .map(AsRef::as_ref)
    }
}
