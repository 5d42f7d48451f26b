use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use onboot::*;
use onboot_cli::boot;
use onboot_cli::command::{command_child, ProcessGroups};
use onboot_cli::report;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_dir(name: &str) -> PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!("onboot-test-{}-{}-{}", std::process::id(), n, name));
	let _ = std::fs::create_dir_all(&dir);
	dir
}

fn fast_config() -> SupervisorConfig {
	SupervisorConfig {
		retry_budget: 2,
		restart_delay_ms: 0,
		escalation: Escalation::ChildOnly,
	}
}

fn sh(id: &str, policy: RestartPolicy, command: &str, dir: &Path) -> ChildSpec {
	sh_in(id, policy, command, dir, &ProcessGroups::default())
}

fn sh_in(id: &str, policy: RestartPolicy, command: &str, dir: &Path, groups: &ProcessGroups) -> ChildSpec {
	command_child(id, policy, command, dir.to_path_buf(), HashMap::new(), groups)
}

async fn run_to_settled(specs: Vec<ChildSpec>) -> Vec<ChildState> {
	let handle = Supervisor::new(fast_config()).start(specs).await.unwrap();
	let states = tokio::time::timeout(Duration::from_secs(10), handle.settled())
		.await
		.expect("children did not settle");
	handle.shutdown().await.unwrap();
	states
}

// --- Command children ---

#[tokio::test]
async fn clean_exit_is_normal() {
	let dir = temp_dir("clean");
	let states = run_to_settled(vec![sh("ok", RestartPolicy::Never, "true", &dir)]).await;
	assert_eq!(states[0].status, ChildStatus::Exited(ExitReason::Normal));
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn nonzero_exit_is_abnormal() {
	let dir = temp_dir("nonzero");
	let states = run_to_settled(vec![sh("bad", RestartPolicy::Never, "exit 3", &dir)]).await;
	assert_eq!(
		states[0].status,
		ChildStatus::Exited(ExitReason::Abnormal("exit code 3".into()))
	);
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn missing_dir_is_start_failure() {
	let dir = temp_dir("missing").join("does-not-exist");
	let states = run_to_settled(vec![sh("lost", RestartPolicy::OnAbnormalExit, "true", &dir)]).await;
	match &states[0].status {
		ChildStatus::Failed(ChildError::StartFailure(cause)) => {
			assert!(cause.contains("spawn failed"), "cause: {}", cause)
		}
		other => panic!("unexpected status: {:?}", other),
	}
}

#[tokio::test]
async fn transient_command_retries_until_budget() {
	let dir = temp_dir("retry");
	let states = run_to_settled(vec![sh(
		"flaky",
		RestartPolicy::OnAbnormalExit,
		"echo x >> attempts; exit 1",
		&dir,
	)])
	.await;
	assert!(states[0].status.is_failed());
	assert_eq!(states[0].restarts, 2);
	let attempts = std::fs::read_to_string(dir.join("attempts")).unwrap();
	assert_eq!(attempts.lines().count(), 3);
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn passes_env_and_dir() {
	let dir = temp_dir("env");
	std::fs::write(dir.join("here.txt"), "1").unwrap();
	let mut env = HashMap::new();
	env.insert("ONBOOT_TEST_VAR".to_string(), "hello123".to_string());
	let spec = command_child(
		"env",
		RestartPolicy::Never,
		"test \"$ONBOOT_TEST_VAR\" = hello123 && test -f here.txt",
		dir.clone(),
		env,
		&ProcessGroups::default(),
	);
	let states = run_to_settled(vec![spec]).await;
	assert_eq!(states[0].status, ChildStatus::Exited(ExitReason::Normal));
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn timeout_kills_process_group() {
	let dir = temp_dir("timeout");
	let spec = sh("slow", RestartPolicy::Never, "sleep 1 && touch finished", &dir)
		.timeout(Duration::from_millis(100));
	let states = run_to_settled(vec![spec]).await;
	match &states[0].status {
		ChildStatus::Exited(ExitReason::Abnormal(cause)) => assert!(cause.contains("timed out")),
		other => panic!("unexpected status: {:?}", other),
	}

	tokio::time::sleep(Duration::from_millis(1500)).await;
	assert!(!dir.join("finished").exists());
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_kills_group_that_ignores_sigterm() {
	let dir = temp_dir("stubborn");
	let groups = ProcessGroups::default();
	let spec = sh_in(
		"stubborn",
		RestartPolicy::Always,
		"trap '' TERM; sleep 1; touch survived",
		&dir,
		&groups,
	);
	let handle = Supervisor::new(fast_config()).start(vec![spec]).await.unwrap();
	// let the shell install its trap
	tokio::time::sleep(Duration::from_millis(200)).await;

	handle.stop().await;
	assert_eq!(groups.pending(), 1);
	groups.reap(Duration::from_millis(300)).await;
	assert_eq!(groups.pending(), 0);
	let states = handle.status().await;
	handle.wait().await.unwrap();
	assert_eq!(
		states[0].status,
		ChildStatus::Exited(ExitReason::Abnormal("shutdown".into()))
	);

	tokio::time::sleep(Duration::from_millis(1500)).await;
	assert!(!dir.join("survived").exists());
	let _ = std::fs::remove_dir_all(&dir);
}

// --- Boot file ---

#[tokio::test]
async fn boot_file_end_to_end() {
	let dir = temp_dir("bootfile");
	std::fs::create_dir_all(dir.join("work")).unwrap();
	let boot_path = dir.join("boot.toml");
	std::fs::write(
		&boot_path,
		r#"
[supervisor]
retry_budget = 1
restart_delay_ms = 0

[[child]]
id = "warm"
command = "touch warmed"
dir = "work"

[[child]]
id = "broken"
command = "exit 7"
restart = "temporary"
"#,
	)
	.unwrap();

	let boot = boot::load_boot_file(&boot_path).unwrap();
	let handle = Supervisor::new(boot.supervisor.clone())
		.start(boot.child_specs(&dir, &ProcessGroups::default()))
		.await
		.unwrap();
	let states = tokio::time::timeout(Duration::from_secs(10), handle.settled())
		.await
		.unwrap();
	handle.shutdown().await.unwrap();

	assert_eq!(states[0].id, "warm");
	assert_eq!(states[0].status, ChildStatus::Exited(ExitReason::Normal));
	assert!(dir.join("work").join("warmed").exists());
	assert_eq!(
		states[1].status,
		ChildStatus::Exited(ExitReason::Abnormal("exit code 7".into()))
	);
	assert!(report::any_unhealthy(&states));

	let json = report::render_json(&states).unwrap();
	let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
	assert_eq!(parsed[1]["id"], "broken");
	assert_eq!(parsed[1]["settled"], true);

	let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn load_missing_boot_file() {
	let err = boot::load_boot_file(&temp_dir("nofile").join("boot.toml")).unwrap_err();
	assert!(err.contains("failed to read"), "{}", err);
}

#[test]
fn healthy_states_pass() {
	let states = vec![ChildState {
		id: "warm".into(),
		status: ChildStatus::Exited(ExitReason::Normal),
		policy: RestartPolicy::Never,
		restarts: 0,
		settled: true,
	}];
	assert!(!report::any_unhealthy(&states));
}
