use std::fmt;

use serde::{Deserialize, Serialize};

/// Unordered pair of type system ids, stored sorted
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypePair(String, String);

impl TypePair {
	pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
		let (a, b) = (a.into(), b.into());
		if a <= b {
			Self(a, b)
		} else {
			Self(b, a)
		}
	}

	#[must_use]
	pub fn first(&self) -> &str {
		&self.0
	}

	#[must_use]
	pub fn second(&self) -> &str {
		&self.1
	}

	#[must_use]
	pub fn involves(&self, type_system: &str) -> bool {
		self.0 == type_system || self.1 == type_system
	}

	/// Name of the backing file, without directory
	#[must_use]
	pub fn file_name(&self) -> String {
		format!("{}__{}.correspondence", self.0, self.1)
	}

	#[must_use]
	pub fn to_tuple(&self) -> (String, String) {
		(self.0.clone(), self.1.clone())
	}
}

impl fmt::Display for TypePair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "({}, {})", self.0, self.1)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pairs_are_unordered() {
		assert_eq!(TypePair::new("y", "x"), TypePair::new("x", "y"));
		assert_eq!(TypePair::new("y", "x").file_name(), "x__y.correspondence");
		assert!(TypePair::new("x", "y").involves("y"));
		assert!(!TypePair::new("x", "y").involves("z"));
	}
}
