//! Policy evaluation engines and their responses
//!
//! The pipeline talks to its engines through the traits in this module:
//! [`RuleEngine`] for rule-based policies, [`AdmissionEvaluator`] for validating
//! admission policies and [`GenerateHandler`] for resource generation. Every
//! evaluation yields an [`EngineResponse`] carrying one [`RuleResponse`] per rule
//! that applied. [`OutputSink`] receives the resources produced along the way.

mod admission;
mod builtin;
mod collaborators;
mod generate;
mod image_metadata;
mod images;
mod response;

pub use admission::CelAdmissionEvaluator;
pub use builtin::BuiltinRuleEngine;
pub use collaborators::{AdmissionEvaluator, GenerateHandler, OutputSink, RuleEngine};
pub use generate::TemplateGenerateHandler;
pub use image_metadata::{ImageVerificationMetadata, ImageVerificationStatus, VERIFY_IMAGES_ANNOTATION};
pub use images::{container_images, is_digest_pinned};
pub use response::{EngineResponse, PolicyRef, RuleResponse, RuleStatus, RuleType};
