use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use vsum_model::{
	Element, ElementId, ElementRef, KeyAttributes, ModelError, ModelResource, ROOTS_SLOT,
};

use crate::{ChangeBatch, ChangeError, EChange};

/// Progress of one change batch through resolution and application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "lowercase")]
pub enum ApplicationState {
	/// Batch accepted, target resource not yet checked
	Unresolved,
	/// Before references are being checked against the live resource
	Resolving,
	/// Changes are being applied in order
	Applying,
	Applied,
	Failed,
}

impl ApplicationState {
	#[must_use]
	pub const fn is_terminal(&self) -> bool {
		matches!(self, Self::Applied | Self::Failed)
	}
}

/// An element whose reference differs before and after a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityChange {
	pub old: ElementRef,
	pub new: ElementRef,
}

/// Outcome of a fully applied batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
	pub batch: ChangeBatch,
	pub identity_changes: Vec<IdentityChange>,
	pub created: Vec<ElementRef>,
	pub removed: Vec<ElementRef>,
}

impl AppliedChange {
	/// Whether the batch touched the identity of any element that existed before it
	#[must_use]
	pub fn changes_identities(&self) -> bool {
		!self.identity_changes.is_empty()
	}
}

/// Drives one [`ChangeBatch`] through the
/// `Unresolved -> Resolving -> Applying -> Applied | Failed` states.
///
/// Applied changes are never rolled back: when a change fails partway, the resource keeps
/// whatever the previous changes did and [`ChangeApplication::applied`] says how many.
#[derive(Debug)]
pub struct ChangeApplication {
	batch: ChangeBatch,
	state: ApplicationState,
	applied: usize,
	before: HashMap<ElementId, ElementRef>,
}

impl ChangeApplication {
	#[must_use]
	pub fn new(batch: ChangeBatch) -> Self {
		Self {
			batch,
			state: ApplicationState::Unresolved,
			applied: 0,
			before: HashMap::new(),
		}
	}

	#[must_use]
	pub const fn batch(&self) -> &ChangeBatch {
		&self.batch
	}

	#[must_use]
	pub const fn state(&self) -> ApplicationState {
		self.state
	}

	/// Number of changes applied so far
	#[must_use]
	pub const fn applied(&self) -> usize {
		self.applied
	}

	/// Whether this batch is allowed to create its resource when none is registered
	#[must_use]
	pub fn may_create_resource(&self) -> bool {
		self.batch.starts_with_root_creation()
	}

	fn expect_state(&self, expected: ApplicationState) -> Result<(), ChangeError> {
		if self.state == expected {
			Ok(())
		} else {
			Err(ChangeError::InvalidState {
				found: self.state,
				expected,
			})
		}
	}

	/// Checks every before reference of the batch against `resource`.
	///
	/// References may point at elements introduced by earlier changes of the same batch, but
	/// not at elements an earlier change removed.
	pub fn resolve(&mut self, resource: &ModelResource) -> Result<(), ChangeError> {
		self.expect_state(ApplicationState::Unresolved)?;
		self.state = ApplicationState::Resolving;

		let mut live = resource
			.root_elements()
			.iter()
			.flat_map(Element::subtree_ids)
			.collect::<HashSet<_>>();

		for (index, change) in self.batch.changes().iter().enumerate() {
			if let Some(element) = change
				.before_references()
				.into_iter()
				.find(|element| !live.contains(element))
			{
				self.state = ApplicationState::Failed;
				return Err(ChangeError::Unresolved {
					change: index,
					element,
				});
			}

			if let Some(removed) = change.removed() {
				live.remove(&removed);
			}
			live.extend(change.introduced());
		}

		trace!(uri = %self.batch.uri(), changes = self.batch.len(), "Resolved change batch");
		self.state = ApplicationState::Applying;

		Ok(())
	}

	/// Applies every change in order and reports how element identities moved
	pub fn apply(
		&mut self,
		resource: &mut ModelResource,
		keys: &impl KeyAttributes,
	) -> Result<AppliedChange, ChangeError> {
		self.expect_state(ApplicationState::Applying)?;

		self.before = index_refs(resource.element_refs(keys));

		for (index, change) in self.batch.changes().iter().enumerate() {
			if let Err(e) = apply_one(resource, index, change, keys) {
				self.state = ApplicationState::Failed;
				return Err(e);
			}
			self.applied += 1;
		}

		let (identity_changes, created, removed) = self.diff(resource, keys);

		self.state = ApplicationState::Applied;
		debug!(
			uri = %self.batch.uri(),
			applied = self.applied,
			identity_changes = identity_changes.len(),
			created = created.len(),
			removed = removed.len(),
			"Applied change batch",
		);

		Ok(AppliedChange {
			batch: self.batch.clone(),
			identity_changes,
			created,
			removed,
		})
	}

	/// Identity changes made by the changes applied so far.
	///
	/// After a failure this is what the partially applied batch did to elements that existed
	/// before it, so callers can keep their indices in step with the resource.
	#[must_use]
	pub fn identity_changes(
		&self,
		resource: &ModelResource,
		keys: &impl KeyAttributes,
	) -> Vec<IdentityChange> {
		self.diff(resource, keys).0
	}

	fn diff(
		&self,
		resource: &ModelResource,
		keys: &impl KeyAttributes,
	) -> (Vec<IdentityChange>, Vec<ElementRef>, Vec<ElementRef>) {
		let mut after = index_refs(resource.element_refs(keys));

		let mut identity_changes = Vec::new();
		let mut removed = Vec::new();
		for (id, old) in &self.before {
			match after.remove(id) {
				Some(new) if &new != old => identity_changes.push(IdentityChange {
					old: old.clone(),
					new,
				}),
				Some(_) => {}
				None => removed.push(old.clone()),
			}
		}
		let mut created = after.into_values().collect::<Vec<_>>();

		identity_changes.sort_by(|a, b| a.old.path.cmp(&b.old.path));
		removed.sort_by(|a, b| a.path.cmp(&b.path));
		created.sort_by(|a, b| a.path.cmp(&b.path));

		(identity_changes, created, removed)
	}

	/// Resolves then applies
	pub fn run(
		&mut self,
		resource: &mut ModelResource,
		keys: &impl KeyAttributes,
	) -> Result<AppliedChange, ChangeError> {
		self.resolve(resource)?;
		self.apply(resource, keys)
	}
}

fn index_refs(refs: Vec<ElementRef>) -> HashMap<ElementId, ElementRef> {
	refs.into_iter().map(|r| (r.id, r)).collect()
}

fn apply_one(
	resource: &mut ModelResource,
	index: usize,
	change: &EChange,
	keys: &impl KeyAttributes,
) -> Result<(), ChangeError> {
	let invalid = |reason: String| ChangeError::InvalidTarget {
		change: index,
		kind: change.kind(),
		reason,
	};
	let model = |source: ModelError| ChangeError::Model {
		change: index,
		source,
	};

	match change {
		EChange::CreateAndInsertRoot { element, index: at } => {
			resource
				.ensure_insertable(None, ROOTS_SLOT, element, &[], keys)
				.map_err(model)?;
			resource
				.insert(None, ROOTS_SLOT, *at, element.clone())
				.map_err(model)?;
		}

		EChange::InsertElement {
			parent,
			slot,
			index: at,
			element,
		} => {
			resource
				.ensure_insertable(Some(*parent), slot, element, &[], keys)
				.map_err(model)?;
			resource
				.insert(Some(*parent), slot, *at, element.clone())
				.map_err(model)?;
		}

		EChange::RemoveElement {
			parent,
			slot,
			element,
		} => {
			let placement = resource
				.placement(*element)
				.ok_or_else(|| invalid(format!("element {element} is not contained")))?;

			if placement.parent != *parent || (parent.is_some() && placement.slot != *slot) {
				return Err(invalid(format!(
					"element {element} is not contained in slot '{slot}' of the given parent"
				)));
			}

			resource.detach(*element).map_err(model)?;
		}

		EChange::MoveElement {
			element,
			new_parent,
			slot,
			index: at,
		} => {
			if let Some(new_parent) = new_parent {
				if resource
					.find(*element)
					.is_some_and(|moved| moved.contains(*new_parent))
				{
					return Err(invalid(format!(
						"cannot move element {element} into its own subtree"
					)));
				}
			}

			if let Some(moved) = resource.find(*element) {
				resource
					.ensure_insertable(*new_parent, slot, moved, &[], keys)
					.map_err(model)?;
			}

			let (detached, placement) = resource.detach(*element).map_err(model)?;
			if let Err(e) = resource.insert(*new_parent, slot, *at, detached.clone()) {
				// Restore the original placement
				resource
					.insert(placement.parent, &placement.slot, Some(placement.index), detached)
					.map_err(model)?;
				return Err(model(e));
			}
		}

		EChange::ReplaceInList {
			parent,
			slot,
			index: at,
			old,
			new,
		} => {
			let placement = resource
				.placement(*old)
				.ok_or_else(|| invalid(format!("element {old} is not contained")))?;

			if placement.parent != *parent
				|| placement.index != *at
				|| (parent.is_some() && placement.slot != *slot)
			{
				return Err(invalid(format!(
					"element {old} is not at index {at} of slot '{slot}'"
				)));
			}

			resource
				.ensure_insertable(*parent, slot, new, &[*old], keys)
				.map_err(model)?;

			let (previous, _) = resource.detach(*old).map_err(model)?;
			if let Err(e) = resource.insert(*parent, slot, Some(*at), new.clone()) {
				resource
					.insert(*parent, slot, Some(*at), previous)
					.map_err(model)?;
				return Err(model(e));
			}
		}

		EChange::UnsetFeature { element, slot } => {
			let target = resource
				.find_mut(*element)
				.ok_or_else(|| invalid(format!("element {element} not found")))?;

			if target.unset(slot).is_some() {
				resource.set_modified(true);
			}
		}

		EChange::ReplaceAttribute {
			element,
			slot,
			old,
			new,
		} => {
			let current = resource
				.find(*element)
				.ok_or_else(|| invalid(format!("element {element} not found")))?;

			if current.attribute(slot) != old.as_ref() {
				return Err(invalid(format!(
					"attribute '{slot}' of element {element} no longer holds the expected value"
				)));
			}

			resource
				.ensure_rekeyable(*element, slot, new, keys)
				.map_err(model)?;

			if let Some(target) = resource.find_mut(*element) {
				target.set_attribute(slot.clone(), new.clone());
				resource.set_modified(true);
			}
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	use serde_json::json;
	use vsum_model::VirtualUri;

	struct NameKeys;

	impl KeyAttributes for NameKeys {
		fn key_attribute(&self, _class: &str) -> Option<&str> {
			Some("name")
		}
	}

	fn uri() -> VirtualUri {
		VirtualUri::parse("a.x").unwrap()
	}

	#[test]
	fn states_progress_to_applied() {
		let mut resource = ModelResource::new(uri());
		let root = Element::new("Root");
		let mut application = ChangeApplication::new(ChangeBatch::single(
			uri(),
			EChange::CreateAndInsertRoot {
				element: root.clone(),
				index: None,
			},
		));

		assert_eq!(application.state(), ApplicationState::Unresolved);
		assert!(application.may_create_resource());

		application.resolve(&resource).unwrap();
		assert_eq!(application.state(), ApplicationState::Applying);

		let applied = application.apply(&mut resource, &()).unwrap();
		assert_eq!(application.state(), ApplicationState::Applied);
		assert!(application.state().is_terminal());
		assert_eq!(applied.created.len(), 1);
		assert_eq!(applied.created[0].id, root.id());
		assert!(resource.contains(root.id()));
	}

	#[test]
	fn apply_before_resolve_is_rejected() {
		let mut resource = ModelResource::new(uri());
		let mut application = ChangeApplication::new(ChangeBatch::single(
			uri(),
			EChange::CreateAndInsertRoot {
				element: Element::new("Root"),
				index: None,
			},
		));

		assert!(matches!(
			application.apply(&mut resource, &()),
			Err(ChangeError::InvalidState {
				found: ApplicationState::Unresolved,
				expected: ApplicationState::Applying,
			})
		));
	}

	#[test]
	fn references_to_elements_created_earlier_in_the_batch_resolve() {
		let resource = ModelResource::new(uri());
		let root = Element::new("Root");
		let batch = ChangeBatch::new(
			uri(),
			vec![
				EChange::CreateAndInsertRoot {
					element: root.clone(),
					index: None,
				},
				EChange::InsertElement {
					parent: root.id(),
					slot: "children".to_string(),
					index: None,
					element: Element::new("Child"),
				},
			],
		)
		.unwrap();

		let mut application = ChangeApplication::new(batch);
		application.resolve(&resource).unwrap();
	}

	#[test]
	fn references_to_removed_elements_fail_resolution() {
		let mut resource = ModelResource::new(uri());
		let root = Element::new("Root");
		resource
			.insert(None, ROOTS_SLOT, None, root.clone())
			.unwrap();

		let batch = ChangeBatch::new(
			uri(),
			vec![
				EChange::RemoveElement {
					parent: None,
					slot: ROOTS_SLOT.to_string(),
					element: root.id(),
				},
				EChange::UnsetFeature {
					element: root.id(),
					slot: "name".to_string(),
				},
			],
		)
		.unwrap();

		let mut application = ChangeApplication::new(batch);
		assert!(matches!(
			application.resolve(&resource),
			Err(ChangeError::Unresolved { change: 1, element }) if element == root.id()
		));
		assert_eq!(application.state(), ApplicationState::Failed);
	}

	#[test]
	fn stale_attribute_values_fail_partway_without_rollback() {
		let mut resource = ModelResource::new(uri());
		let root = Element::new("Root").with_attribute("name", "a");
		resource
			.insert(None, ROOTS_SLOT, None, root.clone())
			.unwrap();

		let batch = ChangeBatch::new(
			uri(),
			vec![
				EChange::ReplaceAttribute {
					element: root.id(),
					slot: "name".to_string(),
					old: Some(json!("a")),
					new: json!("b"),
				},
				EChange::ReplaceAttribute {
					element: root.id(),
					slot: "name".to_string(),
					old: Some(json!("a")),
					new: json!("c"),
				},
			],
		)
		.unwrap();

		let mut application = ChangeApplication::new(batch);
		let result = application.run(&mut resource, &());

		assert!(matches!(result, Err(ChangeError::InvalidTarget { change: 1, .. })));
		assert_eq!(application.applied(), 1);
		assert_eq!(application.state(), ApplicationState::Failed);
		assert_eq!(
			resource.find(root.id()).unwrap().attribute("name"),
			Some(&json!("b"))
		);
	}

	#[test]
	fn moving_into_own_subtree_is_rejected() {
		let mut resource = ModelResource::new(uri());
		let child = Element::new("Child");
		let root = Element::new("Root").with_child("children", child.clone());
		resource
			.insert(None, ROOTS_SLOT, None, root.clone())
			.unwrap();

		let mut application = ChangeApplication::new(ChangeBatch::single(
			uri(),
			EChange::MoveElement {
				element: root.id(),
				new_parent: Some(child.id()),
				slot: "children".to_string(),
				index: None,
			},
		));

		assert!(matches!(
			application.run(&mut resource, &()),
			Err(ChangeError::InvalidTarget { change: 0, .. })
		));
		assert_eq!(resource.placement(child.id()).unwrap().parent, Some(root.id()));
	}

	#[test]
	fn duplicate_keys_are_rejected_before_mutating() {
		let mut resource = ModelResource::new(uri());
		let first = Element::new("Root").with_attribute("name", "a");
		let second = Element::new("Root").with_attribute("name", "b");
		resource.insert(None, ROOTS_SLOT, None, first).unwrap();
		resource.insert(None, ROOTS_SLOT, None, second.clone()).unwrap();

		let mut application = ChangeApplication::new(ChangeBatch::single(
			uri(),
			EChange::CreateAndInsertRoot {
				element: Element::new("Root").with_attribute("name", "a"),
				index: None,
			},
		));
		assert!(matches!(
			application.run(&mut resource, &NameKeys),
			Err(ChangeError::Model {
				change: 0,
				source: ModelError::DuplicateKey { .. },
			})
		));
		assert_eq!(resource.root_elements().len(), 2);

		let mut application = ChangeApplication::new(ChangeBatch::single(
			uri(),
			EChange::ReplaceAttribute {
				element: second.id(),
				slot: "name".to_string(),
				old: Some(json!("b")),
				new: json!("a"),
			},
		));
		assert!(matches!(
			application.run(&mut resource, &NameKeys),
			Err(ChangeError::Model {
				source: ModelError::DuplicateKey { .. },
				..
			})
		));
		assert_eq!(
			resource.find(second.id()).unwrap().attribute("name"),
			Some(&json!("b"))
		);
	}

	#[test]
	fn identity_changes_are_reported_after_a_failure() {
		let mut resource = ModelResource::new(uri());
		let (r0, r1) = (Element::new("Root"), Element::new("Root"));
		resource.insert(None, ROOTS_SLOT, None, r0.clone()).unwrap();
		resource.insert(None, ROOTS_SLOT, None, r1.clone()).unwrap();

		let batch = ChangeBatch::new(
			uri(),
			vec![
				EChange::CreateAndInsertRoot {
					element: Element::new("Root"),
					index: Some(0),
				},
				EChange::InsertElement {
					parent: r0.id(),
					slot: "items".to_string(),
					index: Some(5),
					element: Element::new("Child"),
				},
			],
		)
		.unwrap();

		let mut application = ChangeApplication::new(batch);
		assert!(application.run(&mut resource, &()).is_err());
		assert_eq!(application.applied(), 1);

		let changes = application.identity_changes(&resource, &());
		assert_eq!(changes.len(), 2);
		assert_eq!(changes[0].old.id, r0.id());
		assert_eq!(changes[0].new.path_string(), "roots.Root[@1]");
		assert_eq!(changes[1].old.id, r1.id());
		assert_eq!(changes[1].new.path_string(), "roots.Root[@2]");
	}
}
