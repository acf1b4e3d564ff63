use std::fmt;

use serde::{Deserialize, Serialize};
use vsum_model::ElementRef;

use crate::Sid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
	/// The two elements are equivalent under the mapping
	SameIdentity,
	/// One structural slot of each element correspond to each other
	Feature,
}

/// One side of a link
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
	pub element: ElementRef,
	pub sid: Sid,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub feature: Option<String>,
}

impl Endpoint {
	/// Feature instance this endpoint designates, for feature links
	#[must_use]
	pub fn feature_instance(&self) -> Option<FeatureInstance> {
		self.feature.as_ref().map(|feature| FeatureInstance {
			sid: self.sid.clone(),
			element: self.element.clone(),
			feature: feature.clone(),
		})
	}
}

/// A stored correspondence between an element of each side of a mapping.
///
/// Both endpoints carry their [`Sid`] next to the element reference, so a link can be found
/// and rewritten from the identifier alone when the reference went stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
	pub kind: LinkKind,
	pub a: Endpoint,
	pub b: Endpoint,
}

impl Link {
	#[must_use]
	pub fn touches(&self, sid: &Sid) -> bool {
		&self.a.sid == sid || &self.b.sid == sid
	}

	#[must_use]
	pub fn endpoints(&self) -> [&Endpoint; 2] {
		[&self.a, &self.b]
	}
}

impl fmt::Display for Link {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let render = |endpoint: &Endpoint| match &endpoint.feature {
			Some(feature) => format!("{}.{feature}", endpoint.sid),
			None => endpoint.sid.to_string(),
		};

		write!(f, "{} <-> {}", render(&self.a), render(&self.b))
	}
}

/// A structural slot of a concrete element
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureInstance {
	pub sid: Sid,
	pub element: ElementRef,
	pub feature: String,
}

/// Link to be added, before its identifiers are computed
#[derive(Debug, Clone)]
pub enum NewLink {
	SameIdentity {
		a: ElementRef,
		b: ElementRef,
	},
	Feature {
		a: ElementRef,
		a_feature: String,
		b: ElementRef,
		b_feature: String,
	},
}
