use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a child stopped being useful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildError {
	/// The start function returned an error (or panicked) before any work ran.
	StartFailure(String),
	/// The work exited abnormally and will not be retried.
	WorkFailure(String),
	/// Abnormal exits kept coming after the retry budget was spent.
	RestartBudgetExhausted { restarts: u32, cause: String },
}

impl fmt::Display for ChildError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ChildError::StartFailure(e) => write!(f, "start failed: {}", e),
			ChildError::WorkFailure(e) => write!(f, "work failed: {}", e),
			ChildError::RestartBudgetExhausted { restarts, cause } => {
				write!(f, "gave up after {} restarts: {}", restarts, cause)
			}
		}
	}
}

impl std::error::Error for ChildError {}

/// Errors returned by `Supervisor::start`.
#[derive(Debug)]
pub enum StartupError {
	/// Two specs share an id. Nothing was started.
	DuplicateChild(String),
	/// A critical child could not start. Children started before it were stopped.
	CriticalChild { id: String, error: ChildError },
}

impl fmt::Display for StartupError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StartupError::DuplicateChild(id) => write!(f, "duplicate child id: {}", id),
			StartupError::CriticalChild { id, error } => write!(f, "critical child {}: {}", id, error),
		}
	}
}

impl std::error::Error for StartupError {}

/// Errors surfaced once the supervisor is running.
#[derive(Debug)]
pub enum SupervisorError {
	/// A child failed and escalation is set to stop the whole supervisor.
	Escalated { id: String, error: ChildError },
	/// The coordinator task itself died.
	Coordinator(String),
}

impl fmt::Display for SupervisorError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SupervisorError::Escalated { id, error } => write!(f, "{} escalated: {}", id, error),
			SupervisorError::Coordinator(e) => write!(f, "coordinator error: {}", e),
		}
	}
}

impl std::error::Error for SupervisorError {}
