use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::types::RestartPolicy;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Outcome of one run of a child's work. `Err` is an abnormal exit.
pub type WorkResult = Result<(), BoxError>;

/// Begins one run of a child. An `Err` here means the child could not start at all.
pub type StartFn = Arc<dyn Fn() -> Result<BoxFuture<WorkResult>, BoxError> + Send + Sync>;

/// Static description of a supervised child.
#[derive(Clone)]
pub struct ChildSpec {
	pub id: String,
	pub policy: RestartPolicy,
	/// Boot fails if this child cannot start.
	pub critical: bool,
	/// A run taking longer than this is aborted and counted as abnormal.
	pub timeout: Option<Duration>,
	/// Overrides `SupervisorConfig::retry_budget` for this child.
	pub retry_budget: Option<u32>,
	start: StartFn,
}

impl ChildSpec {
	/// A child whose start cannot fail; every run just awaits `work()`.
	pub fn new<F, Fut>(id: impl Into<String>, policy: RestartPolicy, work: F) -> Self
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = WorkResult> + Send + 'static,
	{
		Self::with_start(id, policy, move || Ok(Box::pin(work()) as BoxFuture<WorkResult>))
	}

	/// A child with a fallible start step, e.g. spawning an OS process.
	pub fn with_start<F>(id: impl Into<String>, policy: RestartPolicy, start: F) -> Self
	where
		F: Fn() -> Result<BoxFuture<WorkResult>, BoxError> + Send + Sync + 'static,
	{
		Self {
			id: id.into(),
			policy,
			critical: false,
			timeout: None,
			retry_budget: None,
			start: Arc::new(start),
		}
	}

	pub fn critical(mut self) -> Self {
		self.critical = true;
		self
	}

	pub fn timeout(mut self, limit: Duration) -> Self {
		self.timeout = Some(limit);
		self
	}

	pub fn retry_budget(mut self, budget: u32) -> Self {
		self.retry_budget = Some(budget);
		self
	}

	/// Invoke the start function. A panic inside it is reported as a start error.
	pub(crate) fn launch(&self) -> Result<BoxFuture<WorkResult>, String> {
		let start = Arc::clone(&self.start);
		match std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || start())) {
			Ok(Ok(work)) => Ok(work),
			Ok(Err(e)) => Err(e.to_string()),
			Err(payload) => Err(format!("start panicked: {}", panic_message(payload.as_ref()))),
		}
	}
}

impl fmt::Debug for ChildSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ChildSpec")
			.field("id", &self.id)
			.field("policy", &self.policy)
			.field("critical", &self.critical)
			.field("timeout", &self.timeout)
			.field("retry_budget", &self.retry_budget)
			.finish_non_exhaustive()
	}
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		s.to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic".to_string()
	}
}
