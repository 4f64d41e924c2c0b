//! User-supplied variables
//!
//! Variables come from a values file (global values, per-policy/per-resource
//! values, namespace labels and subresource mappings) and from `--set`
//! overrides. [`Variables`] resolves them per policy and resource through the
//! [`VariableResolver`] trait.

mod kinds;
mod resolver;
mod values;

pub use kinds::policy_kinds;
pub use resolver::{VariableResolver, Variables, required_variables};
pub use values::{ApiResourceRef, NamespaceSelector, PolicyValues, ResourceValues, Subresource, Values};
