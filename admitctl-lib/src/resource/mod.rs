//! Structured resources and their type identifiers
//!
//! Resources are kept untyped: a [`Resource`] is a JSON object with a few
//! accessors for the metadata every admission input carries. Type identity is
//! expressed with [`GroupVersionKind`], collections with [`GroupVersionResource`],
//! and the translation between the two is done by a [`DiscoveryRestMapper`]
//! built either from a cluster's discovery document or from the snapshot bundled
//! with this crate.

mod gvk;
mod rest_mapper;
mod unstructured;

pub use gvk::{GroupKind, GroupVersionKind, GroupVersionResource};
pub use rest_mapper::{ApiGroupResources, ApiResource, ApiVersionResources, DiscoveryRestMapper, ResourceMapping, Scope};
pub use unstructured::Resource;
