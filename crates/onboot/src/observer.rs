use crate::error::ChildError;
use crate::types::{ChildStatus, ExitReason};

/// Receives every status transition the supervisor makes.
///
/// Calls come from the coordinator one at a time, in the order the
/// transitions happened. Implementations should return quickly; a slow
/// observer delays every other child's bookkeeping.
pub trait Observer: Send + Sync + 'static {
	fn on_transition(&self, child_id: &str, old: &ChildStatus, new: &ChildStatus);

	/// Called once for a failure that will not be retried.
	fn on_failure(&self, child_id: &str, error: &ChildError) {
		let _ = (child_id, error);
	}
}

impl<F> Observer for F
where
	F: Fn(&str, &ChildStatus, &ChildStatus) + Send + Sync + 'static,
{
	fn on_transition(&self, child_id: &str, old: &ChildStatus, new: &ChildStatus) {
		self(child_id, old, new)
	}
}

pub struct NoopObserver;

impl Observer for NoopObserver {
	fn on_transition(&self, _: &str, _: &ChildStatus, _: &ChildStatus) {}
}

/// Forwards transitions to `tracing`.
pub struct LogObserver;

impl Observer for LogObserver {
	fn on_transition(&self, child_id: &str, old: &ChildStatus, new: &ChildStatus) {
		match new {
			ChildStatus::Exited(ExitReason::Abnormal(_)) => {
				tracing::warn!("{}: {} -> {}", child_id, old, new)
			}
			ChildStatus::Failed(_) => tracing::error!("{}: {} -> {}", child_id, old, new),
			ChildStatus::Starting if ChildStatus::is_restart(old, new) => {
				tracing::info!("{}: restarting", child_id)
			}
			_ => tracing::info!("{}: {} -> {}", child_id, old, new),
		}
	}

	fn on_failure(&self, child_id: &str, error: &ChildError) {
		tracing::error!("{}: {}", child_id, error);
	}
}
