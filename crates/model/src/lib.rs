#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Element trees, resources and virtual locations shared by the change and repository layers.

mod element;
mod error;
mod reference;
mod resource;
mod uri;

pub use element::{Element, ElementId, Slot};
pub use error::ModelError;
pub use reference::{ElementRef, KeyAttributes, PathSegment, ROOTS_SLOT};
pub use resource::{ModelResource, Placement, ResourceDocument, RESOURCE_FORMAT_VERSION};
pub use uri::VirtualUri;

/// Parses the JSON bytes of a persisted resource
pub fn decode_resource(bytes: &[u8]) -> Result<ModelResource, ModelError> {
	ModelResource::from_document(serde_json::from_slice(bytes)?)
}

/// Renders a resource to the JSON bytes it is persisted as
pub fn encode_resource(resource: &ModelResource, pretty: bool) -> Result<Vec<u8>, ModelError> {
	let document = resource.to_document();
	Ok(if pretty {
		serde_json::to_vec_pretty(&document)?
	} else {
		serde_json::to_vec(&document)?
	})
}
