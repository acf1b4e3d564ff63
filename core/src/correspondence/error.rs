use vsum_model::VirtualUri;

use crate::Sid;

use super::LinkId;

#[derive(Debug, thiserror::Error)]
pub enum CorrespondenceError {
	#[error("<uri='{uri}'> is governed by neither '{}' nor '{}'", pair.0, pair.1)]
	ForeignElement {
		uri: VirtualUri,
		pair: (String, String),
	},
	#[error("expected exactly one corresponding element for '{sid}', found {found}")]
	Cardinality { sid: Sid, found: usize },
	#[error("index corrupted: {link} has no endpoint identified by '{sid}'")]
	Consistency { link: LinkId, sid: Sid },
	#[error("unknown link: {0}")]
	UnknownLink(LinkId),
	#[error("correspondence file maps {found:?}, expected {expected:?}")]
	PairMismatch {
		expected: (String, String),
		found: (String, String),
	},
	#[error("unsupported correspondence format version: {0}")]
	UnsupportedVersion(u32),
	#[error("error serializing or deserializing correspondences: {0}")]
	Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CorrespondenceError>;
