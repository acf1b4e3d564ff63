use std::fmt;

use serde::{Deserialize, Serialize};
use vsum_model::ElementRef;

/// Stable identifier of an element: `<type system>:<uri>#/<path>`.
///
/// Derived from the type system, the location and the containment path of an element, so it
/// survives reloads and object replacement, but changes whenever the element is moved, retyped
/// or has its key attribute renamed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sid(String);

impl Sid {
	#[must_use]
	pub fn derive(type_system: &str, element: &ElementRef) -> Self {
		Self(format!("{type_system}:{element}"))
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Sid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use vsum_model::{Element, ModelResource, VirtualUri, ROOTS_SLOT};

	#[test]
	fn sids_embed_type_system_location_and_path() {
		let mut resource = ModelResource::new(VirtualUri::parse("./a.x").unwrap());
		let root = Element::new("Root");
		resource.insert(None, ROOTS_SLOT, None, root.clone()).unwrap();

		let element = resource.locate(root.id(), &()).unwrap();
		assert_eq!(Sid::derive("x", &element).as_str(), "x:a.x#/roots.Root[@0]");
	}
}
