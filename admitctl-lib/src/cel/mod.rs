//! CEL validating policies
//!
//! Expressions are compiled with `cel-interpreter` and evaluated against a
//! [`Context`](cel_interpreter::Context) built from the request. Admission
//! requests bind `object`, `oldObject`, `request` and `namespaceObject`; JSON
//! payloads bind only `object`. Policy variables are exposed under
//! `variables`, and resource lookups go through a [`CelContextProvider`]
//! selected once per run by [`select_context_provider`].

mod context_document;
mod engine;
mod expression;
mod functions;
mod provider;
mod request;
mod validator;
mod value;

pub use context_document::{ContextDocument, ContextSpec, select_context_provider};
pub use engine::{CelEngine, CelPolicyEngine, CelPolicyResponse, CelResponse};
pub use expression::CompiledExpression;
pub use functions::register_provider_functions;
pub use provider::{CelContextProvider, GlobalContextStore, LiveContextProvider, StaticContextProvider};
pub use request::{AdmissionAttributes, CelRequest, RequestPayload};
pub use validator::{VARIABLES_BINDING, bind_variables, conditions_hold, failed_validations};
pub use value::{cel_map, cel_string, to_cel_value};
