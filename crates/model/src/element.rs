use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Object identity of an element.
///
/// Unlike a stable identifier, which is derived from where an element lives, the `ElementId`
/// never changes for the lifetime of the element, including across save and load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(Uuid);

impl ElementId {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}

	#[must_use]
	pub const fn from_uuid(uuid: Uuid) -> Self {
		Self(uuid)
	}

	#[must_use]
	pub const fn as_uuid(&self) -> &Uuid {
		&self.0
	}
}

impl Default for ElementId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for ElementId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// Value held by one structural slot of an element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Slot {
	Attribute(Value),
	Containment(Vec<Element>),
	Reference(Vec<ElementId>),
}

impl Slot {
	#[must_use]
	pub const fn as_attribute(&self) -> Option<&Value> {
		match self {
			Self::Attribute(value) => Some(value),
			_ => None,
		}
	}

	#[must_use]
	pub fn as_containment(&self) -> Option<&[Element]> {
		match self {
			Self::Containment(children) => Some(children),
			_ => None,
		}
	}
}

/// A typed node of a model with named structural slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
	id: ElementId,
	class: String,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	slots: BTreeMap<String, Slot>,
}

impl Element {
	pub fn new(class: impl Into<String>) -> Self {
		Self::with_id(ElementId::new(), class)
	}

	pub fn with_id(id: ElementId, class: impl Into<String>) -> Self {
		Self {
			id,
			class: class.into(),
			slots: BTreeMap::new(),
		}
	}

	/// Builder style attribute assignment
	#[must_use]
	pub fn with_attribute(mut self, slot: impl Into<String>, value: impl Into<Value>) -> Self {
		self.set_attribute(slot, value);
		self
	}

	/// Builder style child insertion at the end of a containment slot
	#[must_use]
	pub fn with_child(mut self, slot: impl Into<String>, child: Self) -> Self {
		self.containment_mut(slot).push(child);
		self
	}

	#[must_use]
	pub const fn id(&self) -> ElementId {
		self.id
	}

	#[must_use]
	pub fn class(&self) -> &str {
		&self.class
	}

	pub fn set_class(&mut self, class: impl Into<String>) {
		self.class = class.into();
	}

	#[must_use]
	pub fn slot(&self, name: &str) -> Option<&Slot> {
		self.slots.get(name)
	}

	pub fn slots(&self) -> impl Iterator<Item = (&str, &Slot)> {
		self.slots.iter().map(|(name, slot)| (name.as_str(), slot))
	}

	#[must_use]
	pub fn attribute(&self, name: &str) -> Option<&Value> {
		self.slots.get(name).and_then(Slot::as_attribute)
	}

	/// Returns the previous attribute value, if the slot held one
	pub fn set_attribute(
		&mut self,
		slot: impl Into<String>,
		value: impl Into<Value>,
	) -> Option<Value> {
		match self.slots.insert(slot.into(), Slot::Attribute(value.into())) {
			Some(Slot::Attribute(old)) => Some(old),
			_ => None,
		}
	}

	/// Clears a slot, whatever kind of value it held
	pub fn unset(&mut self, slot: &str) -> Option<Slot> {
		self.slots.remove(slot)
	}

	#[must_use]
	pub fn children(&self, slot: &str) -> &[Element] {
		self.slots
			.get(slot)
			.and_then(Slot::as_containment)
			.unwrap_or_default()
	}

	/// Mutable access to a containment slot, creating it when absent.
	///
	/// A slot currently holding a non containment value is replaced by an empty list.
	pub fn containment_mut(&mut self, slot: impl Into<String>) -> &mut Vec<Self> {
		let slot = self
			.slots
			.entry(slot.into())
			.or_insert_with(|| Slot::Containment(Vec::new()));

		if !matches!(slot, Slot::Containment(_)) {
			*slot = Slot::Containment(Vec::new());
		}

		match slot {
			Slot::Containment(children) => children,
			_ => unreachable!("slot was just made a containment"),
		}
	}

	pub(crate) fn containment_if_exists_mut(&mut self, slot: &str) -> Option<&mut Vec<Self>> {
		match self.slots.get_mut(slot) {
			Some(Slot::Containment(children)) => Some(children),
			_ => None,
		}
	}

	/// Every containment slot with its children, in slot name order
	pub fn containments(&self) -> impl Iterator<Item = (&str, &[Element])> {
		self.slots.iter().filter_map(|(name, slot)| {
			slot.as_containment()
				.map(|children| (name.as_str(), children))
		})
	}

	pub(crate) fn containments_mut(&mut self) -> impl Iterator<Item = (&String, &mut Vec<Self>)> {
		self.slots.iter_mut().filter_map(|(name, slot)| match slot {
			Slot::Containment(children) => Some((name, children)),
			_ => None,
		})
	}

	/// Searches this element and its containment subtree
	#[must_use]
	pub fn find(&self, id: ElementId) -> Option<&Self> {
		if self.id == id {
			return Some(self);
		}

		self.containments()
			.flat_map(|(_, children)| children)
			.find_map(|child| child.find(id))
	}

	pub fn find_mut(&mut self, id: ElementId) -> Option<&mut Self> {
		if self.id == id {
			return Some(self);
		}

		self.containments_mut()
			.flat_map(|(_, children)| children.iter_mut())
			.find_map(|child| child.find_mut(id))
	}

	#[must_use]
	pub fn contains(&self, id: ElementId) -> bool {
		self.find(id).is_some()
	}

	/// Ids of this element and all of its descendants, pre-order
	#[must_use]
	pub fn subtree_ids(&self) -> Vec<ElementId> {
		let mut ids = vec![self.id];
		for (_, children) in self.containments() {
			for child in children {
				ids.extend(child.subtree_ids());
			}
		}
		ids
	}
}
