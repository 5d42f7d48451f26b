use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::{Child, Command};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

use onboot::{BoxFuture, ChildSpec, RestartPolicy, WorkResult};

/// A child that runs `sh -c <command>` in its own process group.
///
/// Spawning happens in the start step, so a missing directory or shell
/// shows up as a start failure rather than a work failure. Groups that are
/// terminated on cancel are tracked in `groups`.
pub fn command_child(
	id: &str,
	policy: RestartPolicy,
	command: &str,
	dir: PathBuf,
	env: HashMap<String, String>,
	groups: &ProcessGroups,
) -> ChildSpec {
	let command = command.to_string();
	let groups = groups.clone();
	ChildSpec::with_start(id, policy, move || {
		let child = spawn_command(&command, &dir, &env)?;
		Ok(Box::pin(wait_command(child, groups.clone())) as BoxFuture<WorkResult>)
	})
}

fn spawn_command(command: &str, dir: &Path, env: &HashMap<String, String>) -> Result<Child, String> {
	let mut cmd = Command::new("sh");
	cmd.args(["-c", command])
		.current_dir(dir)
		.stdin(Stdio::null())
		.stdout(Stdio::inherit())
		.stderr(Stdio::inherit())
		.process_group(0);

	for (key, val) in env {
		cmd.env(key, val);
	}

	cmd.spawn().map_err(|e| format!("spawn failed: {}", e))
}

/// Kills the process group if the run is dropped before the shell exits.
struct GroupGuard {
	pid: Option<u32>,
	groups: ProcessGroups,
}

impl Drop for GroupGuard {
	fn drop(&mut self) {
		if let Some(pid) = self.pid.take() {
			self.groups.terminate(pid);
		}
	}
}

async fn wait_command(mut child: Child, groups: ProcessGroups) -> WorkResult {
	let mut guard = GroupGuard { pid: child.id(), groups };
	let status = child.wait().await?;
	guard.pid = None;

	if status.success() {
		return Ok(());
	}
	match (status.code(), status.signal()) {
		(Some(code), _) => Err(format!("exit code {}", code).into()),
		(None, Some(signal)) => Err(format!("killed by signal {}", signal).into()),
		(None, None) => Err("exited abnormally".into()),
	}
}

/// How long a terminated process group gets before it is killed outright.
pub const KILL_GRACE: Duration = Duration::from_secs(3);

/// Process groups that were sent SIGTERM and have not been seen to exit.
///
/// Cloning shares the same set. Whoever owns the command children should
/// call [`ProcessGroups::reap`] before exiting, so the SIGKILL is not lost
/// with the process.
#[derive(Clone, Default)]
pub struct ProcessGroups {
	terminating: Arc<Mutex<Vec<i32>>>,
}

impl ProcessGroups {
	fn lock(&self) -> MutexGuard<'_, Vec<i32>> {
		self.terminating.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// SIGTERM the group now, SIGKILL it after [`KILL_GRACE`] if it is still there.
	pub fn terminate(&self, pid: u32) {
		let pgid = pid as i32;
		if killpg(Pid::from_raw(pgid), Signal::SIGTERM).is_err() {
			return;
		}
		self.lock().push(pgid);

		if let Ok(rt) = tokio::runtime::Handle::try_current() {
			let groups = self.clone();
			rt.spawn(async move {
				tokio::time::sleep(KILL_GRACE).await;
				groups.force_kill(pgid);
			});
		}
	}

	fn force_kill(&self, pgid: i32) {
		let mut groups = self.lock();
		if let Some(pos) = groups.iter().position(|&g| g == pgid) {
			groups.swap_remove(pos);
			let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
		}
	}

	/// Groups still alive after SIGTERM.
	pub fn pending(&self) -> usize {
		let mut groups = self.lock();
		groups.retain(|&pgid| killpg(Pid::from_raw(pgid), None::<Signal>).is_ok());
		groups.len()
	}

	/// Wait up to `grace` for every terminated group to exit, then SIGKILL the rest.
	pub async fn reap(&self, grace: Duration) {
		let deadline = tokio::time::Instant::now() + grace;
		while self.pending() > 0 && tokio::time::Instant::now() < deadline {
			tokio::time::sleep(Duration::from_millis(50)).await;
		}

		let leftover: Vec<i32> = self.lock().drain(..).collect();
		for pgid in leftover {
			tracing::warn!("process group {} outlived SIGTERM, killing", pgid);
			let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
		}
	}
}
