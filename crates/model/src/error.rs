use crate::ElementId;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
	#[error("invalid virtual uri <uri='{uri}'>: {reason}")]
	InvalidUri { uri: String, reason: String },
	#[error("element not found: {0}")]
	UnknownElement(ElementId),
	#[error("element already present in resource: {0}")]
	DuplicateElement(ElementId),
	#[error("key '{key}' is already used by a {class} in slot '{slot}'")]
	DuplicateKey {
		slot: String,
		class: String,
		key: String,
	},
	#[error("slot '{slot}' of element {element} is not a containment")]
	NotAContainment { element: ElementId, slot: String },
	#[error("index {index} out of bounds for slot '{slot}' of length {len}")]
	IndexOutOfBounds {
		slot: String,
		index: usize,
		len: usize,
	},
	#[error("unsupported resource format version: {0}")]
	UnsupportedVersion(u32),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
}
