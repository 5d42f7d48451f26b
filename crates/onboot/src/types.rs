use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ChildError;

/// Whether a child is relaunched after it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
	/// Run once. Abnormal exits are reported but never retried.
	#[default]
	#[serde(alias = "temporary")]
	Never,
	/// Restart only after an abnormal exit, within the retry budget.
	#[serde(alias = "transient")]
	OnAbnormalExit,
	/// Restart after every exit. Normal exits do not consume the retry budget.
	#[serde(alias = "permanent")]
	Always,
}

impl fmt::Display for RestartPolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RestartPolicy::Never => write!(f, "never"),
			RestartPolicy::OnAbnormalExit => write!(f, "on_abnormal_exit"),
			RestartPolicy::Always => write!(f, "always"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
	Normal,
	Abnormal(String),
}

impl ExitReason {
	pub fn is_normal(&self) -> bool {
		matches!(self, ExitReason::Normal)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildStatus {
	Starting,
	Running,
	Exited(ExitReason),
	Failed(ChildError),
}

impl ChildStatus {
	pub fn is_running(&self) -> bool {
		matches!(self, ChildStatus::Running)
	}

	pub fn is_failed(&self) -> bool {
		matches!(self, ChildStatus::Failed(_))
	}

	/// A transition out of an exit back into `Starting` is a restart.
	pub fn is_restart(old: &ChildStatus, new: &ChildStatus) -> bool {
		matches!(old, ChildStatus::Exited(_)) && matches!(new, ChildStatus::Starting)
	}
}

impl fmt::Display for ChildStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ChildStatus::Starting => write!(f, "starting"),
			ChildStatus::Running => write!(f, "running"),
			ChildStatus::Exited(ExitReason::Normal) => write!(f, "exited"),
			ChildStatus::Exited(ExitReason::Abnormal(cause)) => write!(f, "exited abnormally ({})", cause),
			ChildStatus::Failed(err) => write!(f, "failed: {}", err),
		}
	}
}

/// Snapshot of one child as seen through `SupervisorHandle::observe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildState {
	pub id: String,
	pub status: ChildStatus,
	pub policy: RestartPolicy,
	pub restarts: u32,
	/// No further transition will happen for this child.
	pub settled: bool,
}

impl ChildState {
	pub(crate) fn new(id: &str, policy: RestartPolicy) -> Self {
		Self {
			id: id.to_string(),
			status: ChildStatus::Starting,
			policy,
			restarts: 0,
			settled: false,
		}
	}

	pub fn is_running(&self) -> bool {
		self.status.is_running()
	}

	/// Ended badly: `Failed`, or an abnormal exit that will not be retried.
	pub fn is_unhealthy(&self) -> bool {
		match &self.status {
			ChildStatus::Failed(_) => true,
			ChildStatus::Exited(ExitReason::Abnormal(_)) => self.settled,
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn restart_detection() {
		let exited = ChildStatus::Exited(ExitReason::Abnormal("boom".into()));
		assert!(ChildStatus::is_restart(&exited, &ChildStatus::Starting));
		assert!(!ChildStatus::is_restart(&ChildStatus::Starting, &ChildStatus::Running));
		assert!(!ChildStatus::is_restart(&exited, &ChildStatus::Failed(ChildError::WorkFailure("boom".into()))));
	}

	#[test]
	fn status_display() {
		assert_eq!(ChildStatus::Running.to_string(), "running");
		assert_eq!(ChildStatus::Exited(ExitReason::Normal).to_string(), "exited");
		assert_eq!(
			ChildStatus::Exited(ExitReason::Abnormal("exit code 2".into())).to_string(),
			"exited abnormally (exit code 2)"
		);
		assert_eq!(
			ChildStatus::Failed(ChildError::StartFailure("no such file".into())).to_string(),
			"failed: start failed: no such file"
		);
	}

	#[test]
	fn unhealthy_only_when_settled() {
		let mut state = ChildState::new("web", RestartPolicy::OnAbnormalExit);
		state.status = ChildStatus::Exited(ExitReason::Abnormal("crash".into()));
		assert!(!state.is_unhealthy());
		state.settled = true;
		assert!(state.is_unhealthy());
		state.status = ChildStatus::Exited(ExitReason::Normal);
		assert!(!state.is_unhealthy());
	}

	#[test]
	fn policy_aliases() {
		#[derive(Deserialize)]
		struct Wrap {
			restart: RestartPolicy,
		}
		let parse = |s: &str| toml::from_str::<Wrap>(&format!("restart = \"{}\"", s)).map(|w| w.restart);
		assert_eq!(parse("temporary").ok(), Some(RestartPolicy::Never));
		assert_eq!(parse("transient").ok(), Some(RestartPolicy::OnAbnormalExit));
		assert_eq!(parse("permanent").ok(), Some(RestartPolicy::Always));
		assert_eq!(parse("on_abnormal_exit").ok(), Some(RestartPolicy::OnAbnormalExit));
		assert!(parse("sometimes").is_err());
	}
}
