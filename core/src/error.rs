use vsum_change::ChangeError;
use vsum_model::{ModelError, VirtualUri};
use vsum_utils::error::FileIOError;

use crate::{
	config::MigratorError, correspondence::CorrespondenceError, propagation::PropagationError,
};

/// Invalid setup: unknown extensions, unknown type systems, mismatched propagation rules
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
	#[error("no type system registered for <uri='{uri}'>")]
	UnknownExtension { uri: VirtualUri },
	#[error("unknown type system: {0}")]
	UnknownTypeSystem(String),
	#[error("type system '{0}' is already registered")]
	DuplicateTypeSystem(String),
	#[error("extension '{extension}' of type system '{new}' is already claimed by '{existing}'")]
	DuplicateExtension {
		extension: String,
		existing: String,
		new: String,
	},
	#[error(
		"propagation '{name}' maps '{source_system}' to '{target_system}' but {missing} is unknown"
	)]
	UnconfiguredPropagation {
		name: String,
		source_system: String,
		target_system: String,
		missing: String,
	},
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Configuration(#[from] ConfigurationError),
	#[error(transparent)]
	Correspondence(#[from] CorrespondenceError),
	#[error("applied {applied} of {total} changes to <uri='{uri}'> before failing: {source}")]
	Apply {
		uri: VirtualUri,
		applied: usize,
		total: usize,
		#[source]
		source: ChangeError,
	},
	#[error("propagation specification '{name}' failed: {source}")]
	Propagation {
		name: String,
		#[source]
		source: PropagationError,
	},
	#[error(transparent)]
	Model(#[from] ModelError),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to load the repository configuration: {0}")]
	Config(#[from] MigratorError),
	#[error("error serializing or deserializing json: {0}")]
	Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
