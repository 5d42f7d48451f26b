use onboot::{ChildSpec, RestartPolicy, SupervisorConfig};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::{self, ProcessGroups};

/// A boot file: supervisor settings plus the ordered `[[child]]` list.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BootFile {
	#[serde(default)]
	pub supervisor: SupervisorConfig,
	#[serde(default, rename = "child")]
	pub children: Vec<ChildDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChildDef {
	pub id: String,
	pub command: String,
	#[serde(default)]
	pub restart: RestartPolicy,
	#[serde(default)]
	pub critical: bool,
	pub retry_budget: Option<u32>,
	pub timeout_secs: Option<u64>,
	pub dir: Option<PathBuf>,
	#[serde(default)]
	pub env: HashMap<String, String>,
}

impl BootFile {
	/// Reject what the supervisor would refuse, plus children that could never run.
	pub fn validate(&self) -> Result<(), String> {
		let mut seen = HashSet::new();
		for child in &self.children {
			if child.id.trim().is_empty() {
				return Err("child with empty id".to_string());
			}
			if !seen.insert(child.id.as_str()) {
				return Err(format!("duplicate child id: {}", child.id));
			}
			if child.command.trim().is_empty() {
				return Err(format!("{}: empty command", child.id));
			}
			if child.timeout_secs == Some(0) {
				return Err(format!("{}: timeout_secs must be positive", child.id));
			}
		}
		Ok(())
	}

	/// Build specs in file order. Relative `dir` values resolve against `base_dir`.
	pub fn child_specs(&self, base_dir: &Path, groups: &ProcessGroups) -> Vec<ChildSpec> {
		self.children
			.iter()
			.map(|def| {
				let dir = match &def.dir {
					Some(d) if d.is_absolute() => d.clone(),
					Some(d) => base_dir.join(d),
					None => base_dir.to_path_buf(),
				};
				let mut spec = command::command_child(
					&def.id,
					def.restart,
					&def.command,
					dir,
					def.env.clone(),
					groups,
				);
				if def.critical {
					spec = spec.critical();
				}
				if let Some(budget) = def.retry_budget {
					spec = spec.retry_budget(budget);
				}
				if let Some(secs) = def.timeout_secs {
					spec = spec.timeout(Duration::from_secs(secs));
				}
				spec
			})
			.collect()
	}
}

pub fn parse_boot_file(content: &str) -> Result<BootFile, String> {
	let boot: BootFile = toml::from_str(content).map_err(|e| e.to_string())?;
	boot.validate()?;
	Ok(boot)
}

pub fn load_boot_file(path: &Path) -> Result<BootFile, String> {
	let content = std::fs::read_to_string(path)
		.map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
	parse_boot_file(&content).map_err(|e| format!("{}: {}", path.display(), e))
}

pub fn default_boot_path() -> PathBuf {
	config_dir().join("boot.toml")
}

pub fn config_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
		PathBuf::from(dir).join("onboot")
	} else if let Some(home) = home_dir() {
		home.join(".config").join("onboot")
	} else {
		PathBuf::from("/tmp/onboot/config")
	}
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}
