use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens when a child ends `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
	/// The failure stays with the child; siblings keep running.
	#[default]
	ChildOnly,
	/// Stop every child and end the supervisor with an error.
	Supervisor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
	/// Restarts allowed after abnormal exits before a child is marked failed.
	#[serde(default = "default_retry_budget")]
	pub retry_budget: u32,
	#[serde(default = "default_restart_delay_ms")]
	pub restart_delay_ms: u64,
	#[serde(default)]
	pub escalation: Escalation,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			retry_budget: default_retry_budget(),
			restart_delay_ms: default_restart_delay_ms(),
			escalation: Escalation::default(),
		}
	}
}

impl SupervisorConfig {
	pub fn restart_delay(&self) -> Duration {
		Duration::from_millis(self.restart_delay_ms)
	}
}

fn default_retry_budget() -> u32 {
	3
}
fn default_restart_delay_ms() -> u64 {
	1000
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_table_uses_defaults() {
		let config: SupervisorConfig = toml::from_str("").unwrap();
		assert_eq!(config.retry_budget, 3);
		assert_eq!(config.restart_delay(), Duration::from_secs(1));
		assert_eq!(config.escalation, Escalation::ChildOnly);
	}

	#[test]
	fn partial_override() {
		let config: SupervisorConfig =
			toml::from_str("retry_budget = 5\nescalation = \"supervisor\"").unwrap();
		assert_eq!(config.retry_budget, 5);
		assert_eq!(config.restart_delay_ms, 1000);
		assert_eq!(config.escalation, Escalation::Supervisor);
	}
}
