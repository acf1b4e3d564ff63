use serde::{Deserialize, Serialize};
use serde_json::Value;
use vsum_model::{Element, ElementId, VirtualUri};

use crate::ChangeError;

/// One atomic edit of a model resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EChange {
	/// Inserts a new root. The only primitive allowed to materialize a resource.
	CreateAndInsertRoot {
		element: Element,
		#[serde(default)]
		index: Option<usize>,
	},
	InsertElement {
		parent: ElementId,
		slot: String,
		#[serde(default)]
		index: Option<usize>,
		element: Element,
	},
	/// Detaches an element and its subtree. `parent` is `None` for roots.
	RemoveElement {
		parent: Option<ElementId>,
		slot: String,
		element: ElementId,
	},
	MoveElement {
		element: ElementId,
		new_parent: Option<ElementId>,
		slot: String,
		#[serde(default)]
		index: Option<usize>,
	},
	/// Swaps the element at `index` for `new` in one step
	ReplaceInList {
		parent: Option<ElementId>,
		slot: String,
		index: usize,
		old: ElementId,
		new: Element,
	},
	UnsetFeature {
		element: ElementId,
		slot: String,
	},
	ReplaceAttribute {
		element: ElementId,
		slot: String,
		#[serde(default)]
		old: Option<Value>,
		new: Value,
	},
}

impl EChange {
	#[must_use]
	pub const fn is_root_creation(&self) -> bool {
		matches!(self, Self::CreateAndInsertRoot { .. })
	}

	/// Elements that must already be live for this change to apply
	#[must_use]
	pub fn before_references(&self) -> Vec<ElementId> {
		match self {
			Self::CreateAndInsertRoot { .. } => vec![],
			Self::InsertElement { parent, .. } => vec![*parent],
			Self::RemoveElement {
				parent, element, ..
			} => parent.iter().copied().chain([*element]).collect(),
			Self::MoveElement {
				element,
				new_parent,
				..
			} => [*element].into_iter().chain(*new_parent).collect(),
			Self::ReplaceInList { parent, old, .. } => {
				parent.iter().copied().chain([*old]).collect()
			}
			Self::UnsetFeature { element, .. } | Self::ReplaceAttribute { element, .. } => {
				vec![*element]
			}
		}
	}

	/// Elements this change brings into the resource, including their descendants
	#[must_use]
	pub fn introduced(&self) -> Vec<ElementId> {
		match self {
			Self::CreateAndInsertRoot { element, .. }
			| Self::InsertElement { element, .. }
			| Self::ReplaceInList { new: element, .. } => element.subtree_ids(),
			_ => vec![],
		}
	}

	/// Element this change takes out of the resource, if any
	#[must_use]
	pub const fn removed(&self) -> Option<ElementId> {
		match self {
			Self::RemoveElement { element, .. } | Self::ReplaceInList { old: element, .. } => {
				Some(*element)
			}
			_ => None,
		}
	}

	#[must_use]
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::CreateAndInsertRoot { .. } => "create_and_insert_root",
			Self::InsertElement { .. } => "insert_element",
			Self::RemoveElement { .. } => "remove_element",
			Self::MoveElement { .. } => "move_element",
			Self::ReplaceInList { .. } => "replace_in_list",
			Self::UnsetFeature { .. } => "unset_feature",
			Self::ReplaceAttribute { .. } => "replace_attribute",
		}
	}
}

#[derive(Deserialize)]
struct RawChangeBatch {
	uri: VirtualUri,
	changes: Vec<EChange>,
}

/// Non empty, ordered sequence of changes targeting one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawChangeBatch")]
pub struct ChangeBatch {
	uri: VirtualUri,
	changes: Vec<EChange>,
}

impl ChangeBatch {
	pub fn new(uri: VirtualUri, changes: Vec<EChange>) -> Result<Self, ChangeError> {
		if changes.is_empty() {
			return Err(ChangeError::EmptyBatch(uri));
		}

		Ok(Self { uri, changes })
	}

	#[must_use]
	pub fn single(uri: VirtualUri, change: EChange) -> Self {
		Self {
			uri,
			changes: vec![change],
		}
	}

	#[must_use]
	pub const fn uri(&self) -> &VirtualUri {
		&self.uri
	}

	#[must_use]
	pub fn changes(&self) -> &[EChange] {
		&self.changes
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.changes.len()
	}

	/// Always `false`, batches are validated on construction
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.changes.is_empty()
	}

	/// Whether the batch may create its target resource
	#[must_use]
	pub fn starts_with_root_creation(&self) -> bool {
		self.changes.first().is_some_and(EChange::is_root_creation)
	}
}

impl TryFrom<RawChangeBatch> for ChangeBatch {
	type Error = ChangeError;

	fn try_from(raw: RawChangeBatch) -> Result<Self, Self::Error> {
		Self::new(raw.uri, raw.changes)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use serde_json::json;

	fn uri() -> VirtualUri {
		VirtualUri::parse("a.x").unwrap()
	}

	#[test]
	fn empty_batches_are_rejected() {
		assert!(matches!(
			ChangeBatch::new(uri(), vec![]),
			Err(ChangeError::EmptyBatch(_))
		));

		let raw = json!({ "uri": "a.x", "changes": [] });
		assert!(serde_json::from_value::<ChangeBatch>(raw).is_err());
	}

	#[test]
	fn before_references_cover_optional_parents() {
		let element = ElementId::new();
		let parent = ElementId::new();

		let remove_root = EChange::RemoveElement {
			parent: None,
			slot: "roots".to_string(),
			element,
		};
		let move_child = EChange::MoveElement {
			element,
			new_parent: Some(parent),
			slot: "children".to_string(),
			index: None,
		};

		assert_eq!(remove_root.before_references(), vec![element]);
		assert_eq!(move_child.before_references(), vec![element, parent]);
		assert_eq!(remove_root.removed(), Some(element));
	}

	#[test]
	fn batches_deserialize_from_tagged_changes() {
		let root = Element::new("Root");
		let raw = json!({
			"uri": "a.x",
			"changes": [{ "type": "create_and_insert_root", "element": root }],
		});

		let batch: ChangeBatch = serde_json::from_value(raw).unwrap();
		assert!(batch.starts_with_root_creation());
		assert_eq!(batch.len(), 1);
	}
}
