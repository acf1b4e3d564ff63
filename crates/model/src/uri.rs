use std::{
	fmt,
	path::{Path, PathBuf},
	str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Storage independent identifier of a model resource.
///
/// A `VirtualUri` is a normalized, relative, `/`-separated path. Two spellings of the same
/// location (`./a/b.x`, `a//b.x`, `a\b.x`, `a/c/../b.x`) normalize to the same value, so it can
/// be used as a map key. The file extension selects the type system governing the resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VirtualUri(String);

impl VirtualUri {
	pub fn parse(raw: impl AsRef<str>) -> Result<Self, ModelError> {
		let raw = raw.as_ref().trim();
		let invalid = |reason: &str| ModelError::InvalidUri {
			uri: raw.to_string(),
			reason: reason.to_string(),
		};

		let unified = raw.replace('\\', "/");
		if unified.starts_with('/') || unified.chars().nth(1) == Some(':') {
			return Err(invalid("absolute locations are not virtual"));
		}

		let mut segments: Vec<&str> = Vec::new();
		for segment in unified.split('/') {
			match segment {
				"" | "." => {}
				".." => {
					if segments.pop().is_none() {
						return Err(invalid("escapes the storage root"));
					}
				}
				segment => segments.push(segment),
			}
		}

		if segments.is_empty() {
			return Err(invalid("empty location"));
		}

		Ok(Self(segments.join("/")))
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Last path segment
	#[must_use]
	pub fn file_name(&self) -> &str {
		self.0.rsplit('/').next().unwrap_or(&self.0)
	}

	/// Extension of the last path segment, used as the type system discriminator
	#[must_use]
	pub fn extension(&self) -> Option<&str> {
		let file_name = self.file_name();
		match file_name.rfind('.') {
			Some(0) | None => None,
			Some(dot) => Some(&file_name[dot + 1..]).filter(|ext| !ext.is_empty()),
		}
	}

	/// Physical location of this resource below `root`
	#[must_use]
	pub fn to_path(&self, root: impl AsRef<Path>) -> PathBuf {
		self.0
			.split('/')
			.fold(root.as_ref().to_path_buf(), |path, segment| path.join(segment))
	}
}

impl fmt::Display for VirtualUri {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for VirtualUri {
	type Err = ModelError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl TryFrom<String> for VirtualUri {
	type Error = ModelError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(value)
	}
}

impl TryFrom<&str> for VirtualUri {
	type Error = ModelError;

	fn try_from(value: &str) -> Result<Self, Self::Error> {
		Self::parse(value)
	}
}

impl From<VirtualUri> for String {
	fn from(uri: VirtualUri) -> Self {
		uri.0
	}
}
