//! Per-policy evaluation contexts
//!
//! A [`PolicyContext`] bundles a policy with the resource it is evaluated
//! against, the simulated admission operation, the caller identity and a
//! [`JsonContext`] holding every variable binding. Contexts are created by
//! [`build_policy_context`], which resolves the user's variables and derives
//! the operation from the `request.operation` binding.

mod builder;
mod json_context;
mod operation;
mod policy_context;
mod request_info;
mod substitute;

pub use builder::{ContextInputs, build_policy_context};
pub use json_context::{JsonContext, OBJECT_BINDING, OLD_OBJECT_BINDING};
pub use operation::{OPERATION_BINDING, Operation, infer_operation};
pub use policy_context::PolicyContext;
pub use request_info::{RequestInfo, UserInfo};
pub use substitute::{referenced_variables, substitute_text, substitute_variables};
