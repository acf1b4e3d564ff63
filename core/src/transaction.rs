use std::{
	sync::atomic::{AtomicU64, Ordering},
	time::Instant,
};

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

/// Counters of finished transactions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransactionStats {
	pub committed: u64,
	pub aborted: u64,
}

/// Serializes every mutation of one repository.
///
/// At most one [`Transaction`] is alive at any time; acquiring one is the only blocking point
/// for writers. The context never rolls back: a transaction dropped without being committed
/// is recorded as aborted and whatever it already mutated stays mutated.
#[derive(Debug, Default)]
pub struct TransactionalContext {
	gate: Mutex<()>,
	committed: AtomicU64,
	aborted: AtomicU64,
}

impl TransactionalContext {
	pub(crate) fn new() -> Self {
		debug!("Created transactional context");
		Self::default()
	}

	/// Waits for the running transaction, if any, to finish
	pub async fn begin(&self, label: &'static str) -> Transaction<'_> {
		let guard = self.gate.lock().await;
		trace!(label, "Transaction started");

		Transaction {
			_guard: guard,
			context: self,
			label,
			started_at: Instant::now(),
			committed: false,
		}
	}

	#[must_use]
	pub fn stats(&self) -> TransactionStats {
		TransactionStats {
			committed: self.committed.load(Ordering::Relaxed),
			aborted: self.aborted.load(Ordering::Relaxed),
		}
	}
}

#[must_use = "dropping a transaction without committing records it as aborted"]
pub struct Transaction<'ctx> {
	_guard: MutexGuard<'ctx, ()>,
	context: &'ctx TransactionalContext,
	label: &'static str,
	started_at: Instant,
	committed: bool,
}

impl Transaction<'_> {
	pub fn commit(mut self) {
		self.committed = true;
		self.context.committed.fetch_add(1, Ordering::Relaxed);
		debug!(
			label = self.label,
			elapsed = ?self.started_at.elapsed(),
			"Transaction committed",
		);
	}
}

impl Drop for Transaction<'_> {
	fn drop(&mut self) {
		if !self.committed {
			self.context.aborted.fetch_add(1, Ordering::Relaxed);
			warn!(
				label = self.label,
				"Transaction aborted, changes applied so far are kept",
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use std::{sync::Arc, time::Duration};

	use super::*;

	#[tokio::test]
	async fn commits_and_aborts_are_counted() {
		let context = TransactionalContext::new();

		context.begin("first").await.commit();
		drop(context.begin("second").await);

		assert_eq!(
			context.stats(),
			TransactionStats {
				committed: 1,
				aborted: 1,
			}
		);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn transactions_do_not_overlap() {
		let context = Arc::new(TransactionalContext::new());
		let in_flight = Arc::new(AtomicU64::new(0));

		let tasks = (0..8)
			.map(|_| {
				let context = Arc::clone(&context);
				let in_flight = Arc::clone(&in_flight);
				tokio::spawn(async move {
					let tx = context.begin("concurrent").await;
					assert_eq!(in_flight.fetch_add(1, Ordering::SeqCst), 0);
					tokio::time::sleep(Duration::from_millis(2)).await;
					in_flight.fetch_sub(1, Ordering::SeqCst);
					tx.commit();
				})
			})
			.collect::<Vec<_>>();

		for task in tasks {
			task.await.unwrap();
		}

		assert_eq!(context.stats().committed, 8);
	}
}
