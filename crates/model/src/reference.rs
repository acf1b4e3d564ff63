use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Element, ElementId, VirtualUri};

/// Name of the pseudo slot holding the root elements of a resource
pub const ROOTS_SLOT: &str = "roots";

/// Tells which attribute, if any, identifies instances of a class among their siblings.
pub trait KeyAttributes {
	fn key_attribute(&self, class: &str) -> Option<&str>;
}

/// Every class is positional when no key attributes are known
impl KeyAttributes for () {
	fn key_attribute(&self, _class: &str) -> Option<&str> {
		None
	}
}

/// One step of a containment path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathSegment {
	pub slot: String,
	pub class: String,
	pub index: usize,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub key: Option<String>,
}

impl PathSegment {
	pub(crate) fn of(
		element: &Element,
		slot: &str,
		index: usize,
		keys: &impl KeyAttributes,
	) -> Self {
		let key = keys
			.key_attribute(element.class())
			.and_then(|attribute| element.attribute(attribute))
			.and_then(key_of);

		Self {
			slot: slot.to_string(),
			class: element.class().to_string(),
			index,
			key,
		}
	}
}

/// Path key spelled by a key attribute value. Empty strings and non scalar values have none.
pub(crate) fn key_of(value: &serde_json::Value) -> Option<String> {
	match value {
		serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
		serde_json::Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

impl fmt::Display for PathSegment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.key {
			Some(key) => write!(f, "{}.{}[{key}]", self.slot, self.class),
			None => write!(f, "{}.{}[@{}]", self.slot, self.class, self.index),
		}
	}
}

/// Snapshot of everything identity relevant about an element: where it lives and what it is.
///
/// This is the "direct reference" correspondences keep next to the stable identifier. It goes
/// stale as soon as the element is moved, renamed or retyped, which is exactly when the
/// correspondence indices need to be rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementRef {
	pub uri: VirtualUri,
	pub id: ElementId,
	/// Containment path from the resource down to the element, never empty
	pub path: Vec<PathSegment>,
}

impl ElementRef {
	#[must_use]
	pub fn class(&self) -> &str {
		self.path
			.last()
			.map(|segment| segment.class.as_str())
			.unwrap_or_default()
	}

	#[must_use]
	pub fn is_root(&self) -> bool {
		self.path.len() == 1
	}

	/// Slash separated rendering of the containment path
	#[must_use]
	pub fn path_string(&self) -> String {
		self.path
			.iter()
			.map(ToString::to_string)
			.collect::<Vec<_>>()
			.join("/")
	}
}

impl fmt::Display for ElementRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}#/{}", self.uri, self.path_string())
	}
}
