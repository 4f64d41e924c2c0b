//! JSON patch documents (RFC 6902) and their application
//!
//! Operations are the [`json_patch`] crate's types. Engines build them with
//! [`add_operation`], [`convert_patches`] and [`join_patches`] turn a list of
//! operations into one document, [`decode_patch`] reads it back and [`apply`]
//! runs it against a serialized resource under a set of [`ApplyOptions`].

mod apply;
mod codec;
mod pointer;

pub use apply::{ApplyOptions, apply, apply_to_value};
pub use codec::{add_operation, convert_patches, decode_patch, join_patches};
pub use json_patch::{Patch, PatchOperation};
