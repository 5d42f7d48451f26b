use onboot::{ChildState, ChildStatus, ExitReason};
use owo_colors::OwoColorize;

pub fn render_summary(states: &[ChildState]) {
	if states.is_empty() {
		eprintln!("{}", "no children".dimmed());
		return;
	}
	let width = states.iter().map(|s| s.id.len()).max().unwrap_or(0);
	for state in states {
		let (dot, label) = status_cells(&state.status);
		let restarts = if state.restarts > 0 {
			format!("  restarts {}", state.restarts).dimmed().to_string()
		} else {
			String::new()
		};
		eprintln!(
			"{} {:<width$}  {:<18} {}{}",
			dot,
			state.id.bold(),
			state.policy.to_string().dimmed(),
			label,
			restarts,
			width = width
		);
	}
}

fn status_cells(status: &ChildStatus) -> (String, String) {
	match status {
		ChildStatus::Starting => ("○".dimmed().to_string(), "starting".dimmed().to_string()),
		ChildStatus::Running => ("●".green().to_string(), "running".green().to_string()),
		ChildStatus::Exited(ExitReason::Normal) => ("●".green().to_string(), "done".green().to_string()),
		ChildStatus::Exited(ExitReason::Abnormal(cause)) => (
			"●".yellow().to_string(),
			format!("{} ({})", "exited".yellow(), cause),
		),
		ChildStatus::Failed(err) => ("●".red().to_string(), format!("{} {}", "failed".red(), err)),
	}
}

pub fn render_json(states: &[ChildState]) -> Result<String, String> {
	serde_json::to_string_pretty(states).map_err(|e| e.to_string())
}

/// Whether a finished run should make the process exit non-zero.
pub fn any_unhealthy(states: &[ChildState]) -> bool {
	states.iter().any(|s| s.is_unhealthy())
}
