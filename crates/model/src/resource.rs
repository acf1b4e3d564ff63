use std::{collections::HashSet, ops::ControlFlow};

use serde::{Deserialize, Serialize};

use crate::{
	reference::{key_of, ROOTS_SLOT},
	Element, ElementId, ElementRef, KeyAttributes, ModelError, PathSegment, VirtualUri,
};

/// Current on-disk format version of a resource document
pub const RESOURCE_FORMAT_VERSION: u32 = 1;

/// Where an element sits inside its resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
	/// `None` for root elements
	pub parent: Option<ElementId>,
	pub slot: String,
	pub index: usize,
}

/// Serialized form of a [`ModelResource`]
#[derive(Debug, Serialize, Deserialize)]
pub struct ResourceDocument {
	pub version: u32,
	pub uri: VirtualUri,
	#[serde(default)]
	pub roots: Vec<Element>,
}

/// In-memory container of the root elements stored at one virtual location
#[derive(Debug, Clone)]
pub struct ModelResource {
	uri: VirtualUri,
	roots: Vec<Element>,
	modified: bool,
}

impl ModelResource {
	#[must_use]
	pub const fn new(uri: VirtualUri) -> Self {
		Self {
			uri,
			roots: Vec::new(),
			modified: false,
		}
	}

	/// Rebuilds a resource from its document. A freshly loaded resource is never modified.
	pub fn from_document(document: ResourceDocument) -> Result<Self, ModelError> {
		if document.version > RESOURCE_FORMAT_VERSION {
			return Err(ModelError::UnsupportedVersion(document.version));
		}

		let mut resource = Self::new(document.uri);
		for root in document.roots {
			resource.insert(None, ROOTS_SLOT, None, root)?;
		}
		resource.modified = false;
		Ok(resource)
	}

	#[must_use]
	pub fn to_document(&self) -> ResourceDocument {
		ResourceDocument {
			version: RESOURCE_FORMAT_VERSION,
			uri: self.uri.clone(),
			roots: self.roots.clone(),
		}
	}

	#[must_use]
	pub const fn uri(&self) -> &VirtualUri {
		&self.uri
	}

	#[must_use]
	pub fn root_elements(&self) -> &[Element] {
		&self.roots
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.roots.is_empty()
	}

	#[must_use]
	pub const fn is_modified(&self) -> bool {
		self.modified
	}

	pub fn set_modified(&mut self, modified: bool) {
		self.modified = modified;
	}

	/// Swaps in the contents of another resource, used when reloading from storage
	pub fn replace_contents(&mut self, other: Self) {
		self.roots = other.roots;
		self.modified = other.modified;
	}

	#[must_use]
	pub fn find(&self, id: ElementId) -> Option<&Element> {
		self.roots.iter().find_map(|root| root.find(id))
	}

	pub fn find_mut(&mut self, id: ElementId) -> Option<&mut Element> {
		self.roots.iter_mut().find_map(|root| root.find_mut(id))
	}

	#[must_use]
	pub fn contains(&self, id: ElementId) -> bool {
		self.find(id).is_some()
	}

	/// Computes the current [`ElementRef`] of an element
	#[must_use]
	pub fn locate(&self, id: ElementId, keys: &impl KeyAttributes) -> Option<ElementRef> {
		let mut found = None;
		self.walk(keys, &mut |element, path| {
			if element.id() == id {
				found = Some(self.element_ref(element, path));
				ControlFlow::Break(())
			} else {
				ControlFlow::Continue(())
			}
		});
		found
	}

	/// References of every element in the resource, pre-order
	#[must_use]
	pub fn element_refs(&self, keys: &impl KeyAttributes) -> Vec<ElementRef> {
		let mut refs = Vec::new();
		self.walk(keys, &mut |element, path| {
			refs.push(self.element_ref(element, path));
			ControlFlow::Continue(())
		});
		refs
	}

	fn element_ref(&self, element: &Element, path: &[PathSegment]) -> ElementRef {
		ElementRef {
			uri: self.uri.clone(),
			id: element.id(),
			path: path.to_vec(),
		}
	}

	fn walk(
		&self,
		keys: &impl KeyAttributes,
		visit: &mut impl FnMut(&Element, &[PathSegment]) -> ControlFlow<()>,
	) {
		fn walk_list(
			elements: &[Element],
			slot: &str,
			path: &mut Vec<PathSegment>,
			keys: &impl KeyAttributes,
			visit: &mut impl FnMut(&Element, &[PathSegment]) -> ControlFlow<()>,
		) -> ControlFlow<()> {
			for (index, element) in elements.iter().enumerate() {
				path.push(PathSegment::of(element, slot, index, keys));
				visit(element, path)?;
				for (child_slot, children) in element.containments() {
					walk_list(children, child_slot, path, keys, visit)?;
				}
				path.pop();
			}
			ControlFlow::Continue(())
		}

		let _ = walk_list(&self.roots, ROOTS_SLOT, &mut Vec::new(), keys, visit);
	}

	/// Finds the parent, slot and index of an element
	#[must_use]
	pub fn placement(&self, id: ElementId) -> Option<Placement> {
		fn search(parent: &Element, id: ElementId) -> Option<Placement> {
			for (slot, children) in parent.containments() {
				for (index, child) in children.iter().enumerate() {
					if child.id() == id {
						return Some(Placement {
							parent: Some(parent.id()),
							slot: slot.to_string(),
							index,
						});
					}
					if let Some(found) = search(child, id) {
						return Some(found);
					}
				}
			}
			None
		}

		self.roots.iter().enumerate().find_map(|(index, root)| {
			if root.id() == id {
				Some(Placement {
					parent: None,
					slot: ROOTS_SLOT.to_string(),
					index,
				})
			} else {
				search(root, id)
			}
		})
	}

	/// Inserts `element` under `parent`'s containment `slot`, or as a root when `parent` is
	/// `None` (the slot is ignored for roots). `index` defaults to appending.
	///
	/// Returns the index the element ended up at.
	pub fn insert(
		&mut self,
		parent: Option<ElementId>,
		slot: &str,
		index: Option<usize>,
		element: Element,
	) -> Result<usize, ModelError> {
		if let Some(duplicate) = element
			.subtree_ids()
			.into_iter()
			.find(|id| self.contains(*id))
		{
			return Err(ModelError::DuplicateElement(duplicate));
		}

		let list = match parent {
			None => &mut self.roots,
			Some(parent_id) => {
				let parent = self
					.find_mut(parent_id)
					.ok_or(ModelError::UnknownElement(parent_id))?;
				if parent
					.slot(slot)
					.is_some_and(|existing| existing.as_containment().is_none())
				{
					return Err(ModelError::NotAContainment {
						element: parent_id,
						slot: slot.to_string(),
					});
				}
				parent.containment_mut(slot)
			}
		};

		let index = index.unwrap_or(list.len());
		if index > list.len() {
			return Err(ModelError::IndexOutOfBounds {
				slot: slot.to_string(),
				index,
				len: list.len(),
			});
		}

		list.insert(index, element);
		self.modified = true;

		Ok(index)
	}

	/// Fails when inserting `element` under `parent`'s `slot` would give two keyed siblings the
	/// same path segment, either against the current children or inside `element`'s subtree.
	///
	/// Elements listed in `replaced` are about to leave the list and are not counted.
	pub fn ensure_insertable(
		&self,
		parent: Option<ElementId>,
		slot: &str,
		element: &Element,
		replaced: &[ElementId],
		keys: &impl KeyAttributes,
	) -> Result<(), ModelError> {
		if let Some(key) = PathSegment::of(element, slot, 0, keys).key {
			let mut skip = replaced.to_vec();
			skip.push(element.id());
			self.ensure_free_key(parent, slot, element.class(), &key, &skip, keys)?;
		}

		nested_keys_unique(element, keys)
	}

	/// Fails when setting `attribute` of element `id` to `value` would clash with the key of a
	/// sibling. Attributes that are not the key of the element's class always pass.
	pub fn ensure_rekeyable(
		&self,
		id: ElementId,
		attribute: &str,
		value: &serde_json::Value,
		keys: &impl KeyAttributes,
	) -> Result<(), ModelError> {
		let element = self.find(id).ok_or(ModelError::UnknownElement(id))?;
		if keys.key_attribute(element.class()) != Some(attribute) {
			return Ok(());
		}
		let Some(key) = key_of(value) else {
			return Ok(());
		};
		let placement = self.placement(id).ok_or(ModelError::UnknownElement(id))?;

		self.ensure_free_key(
			placement.parent,
			&placement.slot,
			element.class(),
			&key,
			&[id],
			keys,
		)
	}

	fn ensure_free_key(
		&self,
		parent: Option<ElementId>,
		slot: &str,
		class: &str,
		key: &str,
		skip: &[ElementId],
		keys: &impl KeyAttributes,
	) -> Result<(), ModelError> {
		let siblings = match parent {
			None => self.roots.as_slice(),
			Some(parent) => self
				.find(parent)
				.and_then(|parent| parent.slot(slot))
				.and_then(|slot| slot.as_containment())
				.unwrap_or_default(),
		};

		let clash = siblings
			.iter()
			.enumerate()
			.filter(|(_, sibling)| sibling.class() == class && !skip.contains(&sibling.id()))
			.any(|(index, sibling)| {
				PathSegment::of(sibling, slot, index, keys).key.as_deref() == Some(key)
			});

		if clash {
			Err(ModelError::DuplicateKey {
				slot: slot.to_string(),
				class: class.to_string(),
				key: key.to_string(),
			})
		} else {
			Ok(())
		}
	}

	/// Removes an element (with its subtree) from wherever it is contained
	pub fn detach(&mut self, id: ElementId) -> Result<(Element, Placement), ModelError> {
		let placement = self.placement(id).ok_or(ModelError::UnknownElement(id))?;

		let list = match placement.parent {
			None => &mut self.roots,
			Some(parent_id) => self
				.find_mut(parent_id)
				.and_then(|parent| parent.containment_if_exists_mut(&placement.slot))
				.ok_or(ModelError::UnknownElement(parent_id))?,
		};

		let element = list.remove(placement.index);
		self.modified = true;

		Ok((element, placement))
	}
}

fn nested_keys_unique(element: &Element, keys: &impl KeyAttributes) -> Result<(), ModelError> {
	for (slot, children) in element.containments() {
		let mut seen = HashSet::new();
		for (index, child) in children.iter().enumerate() {
			let segment = PathSegment::of(child, slot, index, keys);
			if let Some(key) = segment.key {
				if !seen.insert((child.class(), key.clone())) {
					return Err(ModelError::DuplicateKey {
						slot: slot.to_string(),
						class: child.class().to_string(),
						key,
					});
				}
			}
			nested_keys_unique(child, keys)?;
		}
	}

	Ok(())
}
