//! The multi-phase evaluation pipeline
//!
//! A [`PolicyProcessor`] takes one [`EvaluationRequest`] through six phases:
//!
//! 1. **Mutate**: rule policies with mutate rules, each seeing the previous result
//! 2. **Verify images**: image verification, recording verified images as an annotation
//! 3. **Validate**: rule policies with validate rules or image checks
//! 4. **Admission**: validating admission policies with their bindings
//! 5. **CEL**: CEL validating policies against the resource and the JSON payload
//! 6. **Generate**: generate rules, producing new resources
//!
//! Mutated and generated resources are written to an
//! [`OutputSink`](crate::engine::OutputSink) such as [`YamlOutput`], and every
//! outcome is tallied in [`ResultCounts`].

mod output;
mod policy_processor;
mod request;
mod result_counts;

pub use output::{MutateLog, YamlOutput};
pub use policy_processor::PolicyProcessor;
pub use request::{Collaborators, EvaluationRequest};
pub use result_counts::{Phase, ResultCounts, Tally};
