use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, instrument};
use vsum_change::{AppliedChange, ChangeBatch};

use crate::{
	propagation::PropagationSpecificationRepository,
	repository::{ModelRepository, SaveReport},
	Error, Result,
};

/// Everything one [`VirtualModel::propagate_change`] call did
#[derive(Debug)]
pub struct PropagationOutcome {
	/// The triggering batch first, then every batch produced by propagation, in order
	pub applied: Vec<AppliedChange>,
	pub save: SaveReport,
}

/// Entry point for editors: applies changes, lets propagation specifications react to them and
/// keeps the history of applied batches.
#[derive(Debug)]
pub struct VirtualModel {
	repository: Arc<ModelRepository>,
	specifications: PropagationSpecificationRepository,
	deltas: Mutex<Vec<ChangeBatch>>,
}

impl VirtualModel {
	pub fn new(
		repository: Arc<ModelRepository>,
		specifications: PropagationSpecificationRepository,
	) -> Self {
		Self {
			repository,
			specifications,
			deltas: Mutex::default(),
		}
	}

	#[must_use]
	pub fn repository(&self) -> &Arc<ModelRepository> {
		&self.repository
	}

	#[must_use]
	pub const fn specifications(&self) -> &PropagationSpecificationRepository {
		&self.specifications
	}

	/// Applies `batch`, runs every specification sourced at its type system and applies what
	/// they produce, then saves.
	///
	/// Batches produced by specifications don't trigger further propagation. On error, the
	/// batches applied so far stay applied and recorded, and nothing is saved.
	#[instrument(skip_all, fields(uri = %batch.uri()), err)]
	pub async fn propagate_change(&self, batch: ChangeBatch) -> Result<PropagationOutcome> {
		let type_system = self.repository.registry().resolve_uri(batch.uri())?;

		let mut applied = vec![self.apply(batch).await?];

		for spec in self.specifications.for_source(type_system.id()) {
			let correspondences = self
				.repository
				.correspondence_model_between(spec.source(), spec.target())
				.await?;

			let produced = {
				let mut correspondences = correspondences.write().await;
				spec.propagate(&applied[0], &mut correspondences)
					.map_err(|source| Error::Propagation {
						name: spec.name().to_string(),
						source,
					})?
			};

			debug!(
				name = spec.name(),
				batches = produced.len(),
				"Propagation specification produced changes",
			);

			for batch in produced {
				applied.push(self.apply(batch).await?);
			}
		}

		let save = self.repository.save_all().await;

		Ok(PropagationOutcome { applied, save })
	}

	/// Batches applied since the last [`VirtualModel::clear_deltas`], oldest first
	pub async fn get_deltas(&self) -> Vec<ChangeBatch> {
		self.deltas.lock().await.clone()
	}

	pub async fn clear_deltas(&self) {
		self.deltas.lock().await.clear();
	}

	async fn apply(&self, batch: ChangeBatch) -> Result<AppliedChange> {
		let applied = self.repository.apply_change_forward(batch).await?;
		self.deltas.lock().await.push(applied.batch.clone());
		Ok(applied)
	}
}
