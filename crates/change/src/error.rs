use vsum_model::{ElementId, ModelError, VirtualUri};

use crate::ApplicationState;

#[derive(Debug, thiserror::Error)]
pub enum ChangeError {
	#[error("change batch for <uri='{0}'> contains no changes")]
	EmptyBatch(VirtualUri),
	#[error("change #{change} references element {element} which is not live")]
	Unresolved { change: usize, element: ElementId },
	#[error("change #{change} ({kind}) cannot be applied: {reason}")]
	InvalidTarget {
		change: usize,
		kind: &'static str,
		reason: String,
	},
	#[error("change #{change} failed")]
	Model {
		change: usize,
		#[source]
		source: ModelError,
	},
	#[error("change application is {found}, expected {expected}")]
	InvalidState {
		found: ApplicationState,
		expected: ApplicationState,
	},
}
