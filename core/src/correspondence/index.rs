//! The four correspondence indices and the link arena they point into.
//!
//! Every mutation goes through [`CorrespondenceIndex::add_link`],
//! [`CorrespondenceIndex::remove_element`] or [`CorrespondenceIndex::rewrite_identities`], which
//! keep the indices consistent with the stored links:
//!
//! 1. sid -> links touching that sid
//! 2. sid -> elements on the other side of its same identity links
//! 3. feature instance -> set of corresponding feature instances
//! 4. sid -> feature sets mentioning a feature instance of that sid

use std::collections::{hash_map::Entry, BTreeSet, HashMap};

use tracing::trace;
use vsum_model::ElementRef;

use crate::Sid;

use super::{
	arena::{Arena, FeatureSetId, LinkId},
	CorrespondenceError, FeatureInstance, Link, LinkKind, Result,
};

static NO_LINKS: BTreeSet<LinkId> = BTreeSet::new();
static NO_ELEMENTS: BTreeSet<ElementRef> = BTreeSet::new();
static NO_FEATURES: BTreeSet<FeatureInstance> = BTreeSet::new();
static NO_FEATURE_SETS: BTreeSet<FeatureSetId> = BTreeSet::new();

#[derive(Debug, Default)]
pub(crate) struct CorrespondenceIndex {
	links: Arena<LinkId, Link>,
	links_by_sid: HashMap<Sid, BTreeSet<LinkId>>,
	corresponding: HashMap<Sid, BTreeSet<ElementRef>>,
	feature_sets: Arena<FeatureSetId, BTreeSet<FeatureInstance>>,
	feature_set_of: HashMap<FeatureInstance, FeatureSetId>,
	feature_sets_by_sid: HashMap<Sid, BTreeSet<FeatureSetId>>,
}

fn same_endpoints(existing: &Link, link: &Link) -> bool {
	let key = |l: &Link| {
		(
			l.a.sid.clone(),
			l.a.feature.clone(),
			l.b.sid.clone(),
			l.b.feature.clone(),
		)
	};
	let (a_sid, a_feature, b_sid, b_feature) = key(link);

	existing.kind == link.kind
		&& (key(existing) == (a_sid.clone(), a_feature.clone(), b_sid.clone(), b_feature.clone())
			|| key(existing) == (b_sid, b_feature, a_sid, a_feature))
}

/// Removes `value` from the set stored under `key`, dropping the entry once it is empty
fn remove_from<K, V>(map: &mut HashMap<K, BTreeSet<V>>, key: &K, value: &V) -> bool
where
	K: Eq + std::hash::Hash + Clone,
	V: Ord,
{
	match map.entry(key.clone()) {
		Entry::Occupied(mut entry) => {
			let removed = entry.get_mut().remove(value);
			if entry.get().is_empty() {
				entry.remove();
			}
			removed
		}
		Entry::Vacant(_) => false,
	}
}

impl CorrespondenceIndex {
	pub fn link(&self, id: LinkId) -> Option<&Link> {
		self.links.get(id)
	}

	pub fn links(&self) -> impl Iterator<Item = (LinkId, &Link)> {
		self.links.iter()
	}

	pub const fn link_count(&self) -> usize {
		self.links.len()
	}

	pub fn links_for(&self, sid: &Sid) -> &BTreeSet<LinkId> {
		self.links_by_sid.get(sid).unwrap_or(&NO_LINKS)
	}

	/// Returns the link set of `sid`, allocating an empty one first if there was none
	pub fn claim_links_for(&mut self, sid: &Sid) -> &BTreeSet<LinkId> {
		self.links_by_sid.entry(sid.clone()).or_default()
	}

	pub fn corresponding(&self, sid: &Sid) -> &BTreeSet<ElementRef> {
		self.corresponding.get(sid).unwrap_or(&NO_ELEMENTS)
	}

	/// Returns the corresponding elements of `sid`, allocating an empty set first if needed
	pub fn claim_corresponding(&mut self, sid: &Sid) -> &BTreeSet<ElementRef> {
		self.corresponding.entry(sid.clone()).or_default()
	}

	pub fn corresponding_features(&self, instance: &FeatureInstance) -> &BTreeSet<FeatureInstance> {
		self.feature_set_of
			.get(instance)
			.and_then(|set| self.feature_sets.get(*set))
			.unwrap_or(&NO_FEATURES)
	}

	pub fn feature_sets_mentioning(&self, sid: &Sid) -> &BTreeSet<FeatureSetId> {
		self.feature_sets_by_sid.get(sid).unwrap_or(&NO_FEATURE_SETS)
	}

	/// Stores a link and indexes both of its endpoints. Adding a link equal to a stored one
	/// returns the stored link's id.
	pub fn add_link(&mut self, link: Link) -> LinkId {
		if let Some(existing) = self
			.links_for(&link.a.sid)
			.iter()
			.copied()
			.find(|id| {
				self.links
					.get(*id)
					.is_some_and(|stored| same_endpoints(stored, &link))
			}) {
			return existing;
		}

		let id = self.links.insert(link.clone());
		self.index_link(id, &link);

		trace!(%id, %link, "Indexed link");

		id
	}

	/// Files an already stored link under both endpoints in all four indices
	fn index_link(&mut self, id: LinkId, link: &Link) {
		for endpoint in link.endpoints() {
			self.links_by_sid
				.entry(endpoint.sid.clone())
				.or_default()
				.insert(id);
		}

		match link.kind {
			LinkKind::SameIdentity => {
				self.corresponding
					.entry(link.a.sid.clone())
					.or_default()
					.insert(link.b.element.clone());
				self.corresponding
					.entry(link.b.sid.clone())
					.or_default()
					.insert(link.a.element.clone());
			}
			LinkKind::Feature => {
				if let (Some(a), Some(b)) = (link.a.feature_instance(), link.b.feature_instance()) {
					self.link_features(&a, b.clone());
					self.link_features(&b, a);
				}
			}
		}
	}

	/// Inverse of [`CorrespondenceIndex::index_link`], the link itself stays stored
	fn unindex_link(&mut self, id: LinkId, link: &Link) {
		for endpoint in link.endpoints() {
			remove_from(&mut self.links_by_sid, &endpoint.sid, &id);
		}

		match link.kind {
			LinkKind::SameIdentity => {
				remove_from(&mut self.corresponding, &link.a.sid, &link.b.element);
				remove_from(&mut self.corresponding, &link.b.sid, &link.a.element);
			}
			LinkKind::Feature => {
				if let (Some(a), Some(b)) = (link.a.feature_instance(), link.b.feature_instance()) {
					self.unlink_features(&a, &b);
					self.unlink_features(&b, &a);
				}
			}
		}
	}

	/// Adds `to` to the feature set of `from` and records that set under the sid of `to`
	fn link_features(&mut self, from: &FeatureInstance, to: FeatureInstance) {
		let set = match self.feature_set_of.get(from) {
			Some(set) => *set,
			None => {
				let set = self.feature_sets.insert(BTreeSet::new());
				self.feature_set_of.insert(from.clone(), set);
				set
			}
		};

		self.feature_sets_by_sid
			.entry(to.sid.clone())
			.or_default()
			.insert(set);

		if let Some(members) = self.feature_sets.get_mut(set) {
			members.insert(to);
		}
	}

	fn unlink_features(&mut self, from: &FeatureInstance, to: &FeatureInstance) {
		let Some(set) = self.feature_set_of.get(from).copied() else {
			return;
		};
		let Some(members) = self.feature_sets.get_mut(set) else {
			return;
		};

		members.remove(to);
		let still_mentions_sid = members.iter().any(|member| member.sid == to.sid);
		let now_empty = members.is_empty();

		if !still_mentions_sid {
			remove_from(&mut self.feature_sets_by_sid, &to.sid, &set);
		}

		if now_empty {
			self.feature_sets.remove(set);
			self.feature_set_of.remove(from);
		}
	}

	/// Drops every link touching `sid` and prunes all four indices accordingly
	pub fn remove_element(&mut self, sid: &Sid) -> Vec<(LinkId, Link)> {
		let ids = self.links_for(sid).clone();
		let mut removed = Vec::with_capacity(ids.len());

		for id in ids {
			let Some(link) = self.links.remove(id) else {
				continue;
			};
			self.unindex_link(id, &link);
			removed.push((id, link));
		}

		self.links_by_sid.remove(sid);
		self.corresponding.remove(sid);
		self.feature_sets_by_sid.remove(sid);

		removed
	}

	/// Moves every entry filed under an old sid over to its new sid and element reference.
	///
	/// All affected links are taken out of the indices before any of them is filed again, so a
	/// new sid may equal another element's old sid (siblings shifting positions in one batch).
	/// Old sids must be distinct. Fails with [`CorrespondenceError::Consistency`] before
	/// touching anything when a link filed under an old sid has no endpoint with that sid.
	pub fn rewrite_identities(&mut self, changes: &[(Sid, Sid, ElementRef)]) -> Result<usize> {
		let targets = changes
			.iter()
			.map(|(old_sid, new_sid, new)| (old_sid, (new_sid, new)))
			.collect::<HashMap<_, _>>();

		let mut ids = BTreeSet::new();
		for (old_sid, _, _) in changes {
			for id in self.links_for(old_sid) {
				let link = self
					.links
					.get(*id)
					.ok_or(CorrespondenceError::UnknownLink(*id))?;

				if !link.touches(old_sid) {
					return Err(CorrespondenceError::Consistency {
						link: *id,
						sid: old_sid.clone(),
					});
				}
				ids.insert(*id);
			}
		}

		let mut taken = Vec::with_capacity(ids.len());
		for id in ids {
			if let Some(link) = self.links.get(id).cloned() {
				self.unindex_link(id, &link);
				taken.push((id, link));
			}
		}

		let rewritten = taken.len();
		for (id, mut link) in taken {
			for endpoint in [&mut link.a, &mut link.b] {
				if let Some((new_sid, new)) = targets.get(&endpoint.sid) {
					endpoint.sid = (*new_sid).clone();
					endpoint.element = (*new).clone();
				}
			}

			self.index_link(id, &link);
			if let Some(stored) = self.links.get_mut(id) {
				*stored = link;
			}
		}

		Ok(rewritten)
	}
}

#[cfg(test)]
impl CorrespondenceIndex {
	/// Indices rendered independently of handle values, with empty entries left out
	pub fn normalized(&self) -> String {
		use std::collections::BTreeMap;

		let links_by_sid = self
			.links_by_sid
			.iter()
			.filter(|(_, ids)| !ids.is_empty())
			.map(|(sid, ids)| {
				let mut links = ids
					.iter()
					.filter_map(|id| self.links.get(*id))
					.map(ToString::to_string)
					.collect::<Vec<_>>();
				links.sort();
				(sid.clone(), links)
			})
			.collect::<BTreeMap<_, _>>();

		let corresponding = self
			.corresponding
			.iter()
			.filter(|(_, elements)| !elements.is_empty())
			.collect::<BTreeMap<_, _>>();

		let features = self
			.feature_set_of
			.iter()
			.filter_map(|(instance, set)| Some((instance, self.feature_sets.get(*set)?)))
			.filter(|(_, members)| !members.is_empty())
			.collect::<BTreeMap<_, _>>();

		let mentions = self
			.feature_sets_by_sid
			.iter()
			.filter(|(_, sets)| !sets.is_empty())
			.map(|(sid, sets)| {
				let mut resolved = sets
					.iter()
					.filter_map(|set| self.feature_sets.get(*set))
					.map(|members| format!("{members:?}"))
					.collect::<Vec<_>>();
				resolved.sort();
				(sid, resolved)
			})
			.collect::<BTreeMap<_, _>>();

		format!("{links_by_sid:#?}\n{corresponding:#?}\n{features:#?}\n{mentions:#?}")
	}

	/// Fresh index holding the same links, for consistency checks
	pub fn rebuilt(&self) -> Self {
		let mut index = Self::default();
		for (_, link) in self.links() {
			index.add_link(link.clone());
		}
		index
	}
}

#[cfg(test)]
mod tests {
	use vsum_model::{Element, ModelResource, VirtualUri, ROOTS_SLOT};

	use super::*;
	use crate::correspondence::Endpoint;

	fn endpoint(uri: &str, class: &str) -> Endpoint {
		let mut resource = ModelResource::new(VirtualUri::parse(uri).unwrap());
		let element = Element::new(class);
		resource
			.insert(None, ROOTS_SLOT, None, element.clone())
			.unwrap();
		let element = resource.locate(element.id(), &()).unwrap();

		Endpoint {
			sid: Sid::derive("t", &element),
			element,
			feature: None,
		}
	}

	#[test]
	fn rewriting_a_link_filed_under_a_foreign_sid_is_a_consistency_fault() {
		let mut index = CorrespondenceIndex::default();
		let a = endpoint("a.x", "A");
		let b = endpoint("b.y", "B");
		let stray = endpoint("c.z", "C");

		let id = index.add_link(Link {
			kind: LinkKind::SameIdentity,
			a,
			b,
		});
		index
			.links_by_sid
			.entry(stray.sid.clone())
			.or_default()
			.insert(id);

		assert!(matches!(
			index.rewrite_identities(&[(stray.sid.clone(), stray.sid, stray.element)]),
			Err(CorrespondenceError::Consistency { link, .. }) if link == id
		));
	}

	#[test]
	fn unknown_identifiers_rewrite_nothing() {
		let mut index = CorrespondenceIndex::default();
		let a = endpoint("a.x", "A");

		let change = (a.sid.clone(), a.sid.clone(), a.element.clone());
		assert_eq!(index.rewrite_identities(&[change]).unwrap(), 0);
		assert!(index.links_for(&a.sid).is_empty());
	}

	#[test]
	fn feature_sets_are_shared_per_feature_instance() {
		let mut index = CorrespondenceIndex::default();
		let feature = |mut endpoint: Endpoint, name: &str| {
			endpoint.feature = Some(name.to_string());
			endpoint
		};
		let a = feature(endpoint("a.x", "A"), "name");
		let b = feature(endpoint("b.y", "B"), "label");
		let c = feature(endpoint("c.y", "C"), "title");

		index.add_link(Link {
			kind: LinkKind::Feature,
			a: a.clone(),
			b: b.clone(),
		});
		index.add_link(Link {
			kind: LinkKind::Feature,
			a: a.clone(),
			b: c.clone(),
		});

		let a_instance = a.feature_instance().unwrap();
		assert_eq!(index.corresponding_features(&a_instance).len(), 2);
		assert_eq!(index.feature_sets_mentioning(&b.sid).len(), 1);
		assert_eq!(index.feature_sets_mentioning(&c.sid).len(), 1);
		assert_eq!(index.feature_sets_mentioning(&a.sid).len(), 2);
		assert!(index.corresponding(&a.sid).is_empty());

		index.remove_element(&b.sid);
		assert_eq!(index.corresponding_features(&a_instance).len(), 1);
		assert!(index.feature_sets_mentioning(&b.sid).is_empty());
		assert_eq!(index.normalized(), index.rebuilt().normalized());
	}
}
