use std::{collections::BTreeSet, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use vsum_model::{ElementId, ElementRef};

use crate::{Sid, TypeSystem};

use super::{
	index::CorrespondenceIndex, CorrespondenceError, Endpoint, FeatureInstance, Link, LinkId,
	LinkKind, NewLink, Result, TypePair,
};

pub const CORRESPONDENCE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct CorrespondenceDocument {
	pub version: u32,
	pub pair: (String, String),
	#[serde(default)]
	pub links: Vec<Link>,
}

/// All links between the elements of two type systems, with their indices
#[derive(Debug)]
pub struct CorrespondenceModel {
	pair: TypePair,
	systems: [Arc<TypeSystem>; 2],
	index: CorrespondenceIndex,
	changed: bool,
}

impl CorrespondenceModel {
	#[must_use]
	pub fn new(a: Arc<TypeSystem>, b: Arc<TypeSystem>) -> Self {
		let pair = TypePair::new(a.id(), b.id());
		let systems = if a.id() == pair.first() { [a, b] } else { [b, a] };

		Self {
			pair,
			systems,
			index: CorrespondenceIndex::default(),
			changed: false,
		}
	}

	/// Rebuilds a model and its indices from persisted links
	pub fn from_document(
		document: CorrespondenceDocument,
		a: Arc<TypeSystem>,
		b: Arc<TypeSystem>,
	) -> Result<Self> {
		let mut model = Self::new(a, b);

		if document.version > CORRESPONDENCE_FORMAT_VERSION {
			return Err(CorrespondenceError::UnsupportedVersion(document.version));
		}

		let found = TypePair::new(document.pair.0, document.pair.1);
		if found != model.pair {
			return Err(CorrespondenceError::PairMismatch {
				expected: model.pair.to_tuple(),
				found: found.to_tuple(),
			});
		}

		for link in document.links {
			model.index.add_link(link);
		}

		debug!(pair = %model.pair, links = model.link_count(), "Loaded correspondences");

		Ok(model)
	}

	#[must_use]
	pub fn to_document(&self) -> CorrespondenceDocument {
		CorrespondenceDocument {
			version: CORRESPONDENCE_FORMAT_VERSION,
			pair: self.pair.to_tuple(),
			links: self.index.links().map(|(_, link)| link.clone()).collect(),
		}
	}

	pub fn decode(bytes: &[u8], a: Arc<TypeSystem>, b: Arc<TypeSystem>) -> Result<Self> {
		Self::from_document(serde_json::from_slice(bytes)?, a, b)
	}

	pub fn encode(&self, pretty: bool) -> Result<Vec<u8>> {
		let document = self.to_document();
		Ok(if pretty {
			serde_json::to_vec_pretty(&document)?
		} else {
			serde_json::to_vec(&document)?
		})
	}

	#[must_use]
	pub const fn pair(&self) -> &TypePair {
		&self.pair
	}

	#[must_use]
	pub const fn type_systems(&self) -> &[Arc<TypeSystem>; 2] {
		&self.systems
	}

	#[must_use]
	pub const fn has_changed_since_save(&self) -> bool {
		self.changed
	}

	pub fn mark_saved(&mut self) {
		self.changed = false;
	}

	/// Stable identifier of `element` under whichever side owns it
	pub fn sid_of(&self, element: &ElementRef) -> Result<Sid> {
		self.systems
			.iter()
			.find(|system| system.owns(element))
			.map(|system| system.sid_of(element))
			.ok_or_else(|| CorrespondenceError::ForeignElement {
				uri: element.uri.clone(),
				pair: self.pair.to_tuple(),
			})
	}

	fn endpoint(&self, element: ElementRef, feature: Option<String>) -> Result<Endpoint> {
		Ok(Endpoint {
			sid: self.sid_of(&element)?,
			element,
			feature,
		})
	}

	/// Computes the identifiers of both endpoints and indexes the link
	pub fn add_link(&mut self, link: NewLink) -> Result<LinkId> {
		let link = match link {
			NewLink::SameIdentity { a, b } => Link {
				kind: LinkKind::SameIdentity,
				a: self.endpoint(a, None)?,
				b: self.endpoint(b, None)?,
			},
			NewLink::Feature {
				a,
				a_feature,
				b,
				b_feature,
			} => Link {
				kind: LinkKind::Feature,
				a: self.endpoint(a, Some(a_feature))?,
				b: self.endpoint(b, Some(b_feature))?,
			},
		};

		let before = self.index.link_count();
		let id = self.index.add_link(link);
		if self.index.link_count() != before {
			self.changed = true;
		}

		Ok(id)
	}

	pub fn add_same_identity_link(&mut self, a: &ElementRef, b: &ElementRef) -> Result<LinkId> {
		self.add_link(NewLink::SameIdentity {
			a: a.clone(),
			b: b.clone(),
		})
	}

	pub fn add_feature_link(
		&mut self,
		a: &ElementRef,
		a_feature: &str,
		b: &ElementRef,
		b_feature: &str,
	) -> Result<LinkId> {
		self.add_link(NewLink::Feature {
			a: a.clone(),
			a_feature: a_feature.to_string(),
			b: b.clone(),
			b_feature: b_feature.to_string(),
		})
	}

	#[must_use]
	pub fn link(&self, id: LinkId) -> Option<&Link> {
		self.index.link(id)
	}

	pub fn links(&self) -> impl Iterator<Item = (LinkId, &Link)> {
		self.index.links()
	}

	#[must_use]
	pub const fn link_count(&self) -> usize {
		self.index.link_count()
	}

	#[must_use]
	pub fn links_for(&self, sid: &Sid) -> &BTreeSet<LinkId> {
		self.index.links_for(sid)
	}

	/// Link set of `sid`, allocating an empty entry on first use.
	///
	/// The set is borrowed shared. Links are only added or dropped through
	/// [`Self::add_same_identity_link`], [`Self::add_feature_link`],
	/// [`Self::remove_all_correspondences`] and [`Self::update`], which keep every index in step.
	pub fn claim_links_for(&mut self, sid: &Sid) -> &BTreeSet<LinkId> {
		self.index.claim_links_for(sid)
	}

	pub fn claim_all_links(&mut self, element: &ElementRef) -> Result<&BTreeSet<LinkId>> {
		let sid = self.sid_of(element)?;
		Ok(self.index.claim_links_for(&sid))
	}

	#[must_use]
	pub fn has_correspondences(&self, element: &ElementRef) -> bool {
		self.sid_of(element)
			.is_ok_and(|sid| !self.index.links_for(&sid).is_empty())
	}

	#[must_use]
	pub fn has_corresponding_elements(&self, element: &ElementRef) -> bool {
		self.sid_of(element)
			.is_ok_and(|sid| !self.index.corresponding(&sid).is_empty())
	}

	/// Live set of elements corresponding to `element`. Allocates an empty entry on first use.
	pub fn claim_corresponding_elements(
		&mut self,
		element: &ElementRef,
	) -> Result<&BTreeSet<ElementRef>> {
		let sid = self.sid_of(element)?;
		Ok(self.index.claim_corresponding(&sid))
	}

	pub fn claim_corresponding_elements_of_class(
		&mut self,
		element: &ElementRef,
		class: &str,
	) -> Result<Vec<ElementRef>> {
		Ok(self
			.claim_corresponding_elements(element)?
			.iter()
			.filter(|candidate| candidate.class() == class)
			.cloned()
			.collect())
	}

	#[must_use]
	pub fn is_unique_correspondence(&self, element: &ElementRef) -> bool {
		self.sid_of(element)
			.is_ok_and(|sid| self.index.corresponding(&sid).len() == 1)
	}

	/// The only element corresponding to `element`, failing when there are none or several
	pub fn claim_unique_corresponding_element(
		&mut self,
		element: &ElementRef,
	) -> Result<ElementRef> {
		let sid = self.sid_of(element)?;
		unique(sid, self.claim_corresponding_elements(element)?.iter().cloned().collect())
	}

	pub fn claim_unique_corresponding_element_of_class(
		&mut self,
		element: &ElementRef,
		class: &str,
	) -> Result<ElementRef> {
		let sid = self.sid_of(element)?;
		unique(sid, self.claim_corresponding_elements_of_class(element, class)?)
	}

	/// The only link of `element`, `None` without links, an error with several
	pub fn unique_link_for(&self, element: &ElementRef) -> Result<Option<&Link>> {
		let sid = self.sid_of(element)?;
		let links = self.index.links_for(&sid);

		match links.len() {
			0 => Ok(None),
			1 => Ok(links.first().and_then(|id| self.index.link(*id))),
			found => Err(CorrespondenceError::Cardinality { sid, found }),
		}
	}

	pub fn corresponding_feature_instances(
		&self,
		element: &ElementRef,
		feature: &str,
	) -> Result<&BTreeSet<FeatureInstance>> {
		let instance = FeatureInstance {
			sid: self.sid_of(element)?,
			element: element.clone(),
			feature: feature.to_string(),
		};

		Ok(self.index.corresponding_features(&instance))
	}

	/// Removes every link of `element` from the model and from all indices
	pub fn remove_all_correspondences(&mut self, element: &ElementRef) -> Result<Vec<Link>> {
		let sid = self.sid_of(element)?;
		let removed = self.index.remove_element(&sid);

		if !removed.is_empty() {
			self.changed = true;
			debug!(%sid, removed = removed.len(), "Removed correspondences");
		}

		Ok(removed.into_iter().map(|(_, link)| link).collect())
	}

	/// Moves every index entry of `old` over to `new` after an identity change
	pub fn update(&mut self, old: &ElementRef, new: &ElementRef) -> Result<()> {
		self.update_all(&[(old.clone(), new.clone())])
	}

	/// Applies the identity changes of one batch together.
	///
	/// Changes of elements without links are skipped. The rest are rewritten in a single pass, so
	/// one element's new sid may be another's old sid.
	pub fn update_all(&mut self, changes: &[(ElementRef, ElementRef)]) -> Result<()> {
		let mut rewrites = Vec::with_capacity(changes.len());
		for (old, new) in changes {
			if !self.has_correspondences(old) {
				continue;
			}
			rewrites.push((self.sid_of(old)?, self.sid_of(new)?, new.clone()));
		}

		if rewrites.is_empty() {
			return Ok(());
		}

		let rewritten = self.index.rewrite_identities(&rewrites)?;
		if rewritten > 0 {
			self.changed = true;
			trace!(
				identities = rewrites.len(),
				links = rewritten,
				"Updated correspondences"
			);
		}

		Ok(())
	}

	/// Element references currently stored for the element with object identity `id`
	#[must_use]
	pub fn references_to(&self, id: ElementId) -> Vec<ElementRef> {
		self.index
			.links()
			.flat_map(|(_, link)| link.endpoints())
			.filter(|endpoint| endpoint.element.id == id)
			.map(|endpoint| endpoint.element.clone())
			.collect::<BTreeSet<_>>()
			.into_iter()
			.collect()
	}

	#[cfg(test)]
	pub(crate) const fn index(&self) -> &CorrespondenceIndex {
		&self.index
	}
}

fn unique(sid: Sid, mut candidates: Vec<ElementRef>) -> Result<ElementRef> {
	if candidates.len() == 1 {
		if let Some(only) = candidates.pop() {
			return Ok(only);
		}
	}

	Err(CorrespondenceError::Cardinality {
		sid,
		found: candidates.len(),
	})
}
