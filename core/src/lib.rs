#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Model repository, correspondence index and change propagation over a set of models stored
//! below one root directory.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub mod config;
pub mod correspondence;
pub mod error;
pub mod layout;
pub mod propagation;
pub mod repository;
pub mod transaction;

mod sid;
mod type_system;
mod virtual_model;

pub use error::{ConfigurationError, Error, Result};
pub use propagation::{
	ChangePropagationSpecification, PropagationError, PropagationSpecificationRepository,
};
pub use repository::{CorrespondenceHandle, ModelRepository, ResourceHandle, SaveReport};
pub use sid::Sid;
pub use transaction::{Transaction, TransactionStats, TransactionalContext};
pub use type_system::{ClassSpec, TypeSystem, TypeSystemRegistry};
pub use virtual_model::{PropagationOutcome, VirtualModel};

pub use vsum_change as change;
pub use vsum_model as model;

/// Installs a console subscriber filtered by `RUST_LOG`, `info` when unset.
///
/// Does nothing when a global subscriber is already installed.
pub fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	if tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer())
		.try_init()
		.is_err()
	{
		tracing::debug!("Tracing subscriber already installed");
	}
}
