use std::{collections::BTreeMap, fmt, sync::Arc};

use tracing::debug;
use vsum_change::{AppliedChange, ChangeBatch};

use crate::{
	correspondence::{CorrespondenceError, CorrespondenceModel},
	error::ConfigurationError,
	TypeSystemRegistry,
};

#[derive(Debug, thiserror::Error)]
pub enum PropagationError {
	#[error("{0}")]
	Rule(String),
	#[error(transparent)]
	Correspondence(#[from] CorrespondenceError),
}

/// Reacts to changes applied to models of one type system by producing changes for models of
/// another, keeping their correspondences up to date on the way.
pub trait ChangePropagationSpecification: Send + Sync {
	fn name(&self) -> &str;

	/// Type system id whose changes trigger this specification
	fn source(&self) -> &str;

	/// Type system id of the models this specification writes to
	fn target(&self) -> &str;

	fn propagate(
		&self,
		change: &AppliedChange,
		correspondences: &mut CorrespondenceModel,
	) -> Result<Vec<ChangeBatch>, PropagationError>;
}

/// Specifications keyed by their source type system, checked against a registry
#[derive(Default)]
pub struct PropagationSpecificationRepository {
	by_source: BTreeMap<String, Vec<Arc<dyn ChangePropagationSpecification>>>,
}

impl fmt::Debug for PropagationSpecificationRepository {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_map()
			.entries(self.by_source.iter().map(|(source, specs)| {
				(source, specs.iter().map(|spec| spec.name()).collect::<Vec<_>>())
			}))
			.finish()
	}
}

impl PropagationSpecificationRepository {
	/// Fails on the first specification declaring a type system `registry` doesn't know
	pub fn new(
		specs: impl IntoIterator<Item = Arc<dyn ChangePropagationSpecification>>,
		registry: &TypeSystemRegistry,
	) -> Result<Self, ConfigurationError> {
		let mut by_source = BTreeMap::<_, Vec<_>>::new();

		for spec in specs {
			if let Some(missing) = [spec.source(), spec.target()]
				.into_iter()
				.find(|id| registry.by_id(id).is_none())
			{
				return Err(ConfigurationError::UnconfiguredPropagation {
					name: spec.name().to_string(),
					source_system: spec.source().to_string(),
					target_system: spec.target().to_string(),
					missing: missing.to_string(),
				});
			}

			debug!(
				name = spec.name(),
				source = spec.source(),
				target = spec.target(),
				"Registered propagation specification",
			);
			by_source
				.entry(spec.source().to_string())
				.or_default()
				.push(spec);
		}

		Ok(Self { by_source })
	}

	#[must_use]
	pub fn for_source(&self, type_system: &str) -> &[Arc<dyn ChangePropagationSpecification>] {
		self.by_source
			.get(type_system)
			.map(Vec::as_slice)
			.unwrap_or_default()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.by_source.values().map(Vec::len).sum()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.by_source.is_empty()
	}
}
