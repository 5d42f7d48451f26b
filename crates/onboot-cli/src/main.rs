use std::path::{Path, PathBuf};

use onboot::{LogObserver, Supervisor};
use onboot_cli::boot::{self, BootFile};
use onboot_cli::command::{ProcessGroups, KILL_GRACE};
use onboot_cli::report;
use owo_colors::OwoColorize;

#[tokio::main]
async fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();

	let verbose = args.iter().any(|a| a == "-v" || a == "--verbose");
	let json = args.iter().any(|a| a == "--json");
	let positional: Vec<&str> = args
		.iter()
		.filter(|a| !a.starts_with('-'))
		.map(|a| a.as_str())
		.collect();

	if args.iter().any(|a| a == "-h" || a == "--help") {
		print_usage();
		return;
	}
	if args.iter().any(|a| a == "-V" || a == "--version") {
		println!("onboot {}", env!("CARGO_PKG_VERSION"));
		return;
	}

	init_logging(verbose);

	match positional.first().copied() {
		None | Some("help") => print_usage(),
		Some("version") => println!("onboot {}", env!("CARGO_PKG_VERSION")),
		Some("check") => cmd_check(positional.get(1).copied()),
		Some("run") => cmd_run(positional.get(1).copied(), json).await,
		Some(other) => {
			eprintln!("{} unknown command: {}", "error:".red().bold(), other);
			print_usage();
			std::process::exit(1);
		}
	}
}

fn print_usage() {
	eprintln!("{} {} — startup task supervisor", "onboot".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} [command] [boot file] [options]", "onboot".bold());
	eprintln!();
	eprintln!("{}", "commands".cyan().bold());
	eprintln!("  {} [file]     Start every child and wait until they settle", "run".bold());
	eprintln!("  {} [file]   Validate a boot file and list its children", "check".bold());
	eprintln!("  {}            Show version", "version".bold());
	eprintln!();
	eprintln!("{}", "options".cyan().bold());
	eprintln!("  {}          Print final states as JSON", "--json".bold());
	eprintln!("  {}    Debug logging", "-v, --verbose".bold());
	eprintln!();
	eprintln!("default boot file: {}", boot::default_boot_path().display().dimmed());
}

fn init_logging(verbose: bool) {
	let level = if verbose {
		tracing::Level::DEBUG
	} else {
		tracing::Level::INFO
	};
	tracing_subscriber::fmt()
		.with_max_level(level)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();
}

fn resolve_path(arg: Option<&str>) -> PathBuf {
	arg.map(PathBuf::from).unwrap_or_else(boot::default_boot_path)
}

fn load_or_exit(path: &Path) -> BootFile {
	match boot::load_boot_file(path) {
		Ok(b) => b,
		Err(e) => {
			eprintln!("{} {}", "error:".red().bold(), e);
			std::process::exit(1);
		}
	}
}

fn cmd_check(arg: Option<&str>) {
	let path = resolve_path(arg);
	let boot = load_or_exit(&path);

	eprintln!("{} {}", "ok".green().bold(), path.display());
	eprintln!(
		"supervisor: retry_budget={} restart_delay_ms={} escalation={:?}",
		boot.supervisor.retry_budget, boot.supervisor.restart_delay_ms, boot.supervisor.escalation
	);
	for child in &boot.children {
		let critical = if child.critical {
			"critical".yellow().to_string()
		} else {
			String::new()
		};
		eprintln!(
			"  {}  {}  {}  {}",
			child.id.bold(),
			child.restart.to_string().dimmed(),
			child.command,
			critical
		);
	}
}

async fn cmd_run(arg: Option<&str>, json: bool) {
	let path = resolve_path(arg);
	let boot = load_or_exit(&path);
	let base_dir = path
		.parent()
		.filter(|p| !p.as_os_str().is_empty())
		.map(Path::to_path_buf)
		.unwrap_or_else(|| PathBuf::from("."));

	let groups = ProcessGroups::default();
	let specs = boot.child_specs(&base_dir, &groups);
	tracing::info!("booting {} children from {}", specs.len(), path.display());

	let handle = match Supervisor::new(boot.supervisor.clone())
		.with_observer(LogObserver)
		.start(specs)
		.await
	{
		Ok(h) => h,
		Err(e) => {
			groups.reap(KILL_GRACE).await;
			eprintln!("{} {}", "error:".red().bold(), e);
			std::process::exit(1);
		}
	};

	tokio::select! {
		_ = handle.settled() => {
			tracing::debug!("all children settled");
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("shutting down");
		}
	}

	handle.stop().await;
	groups.reap(KILL_GRACE).await;
	let states = handle.status().await;
	let result = handle.wait().await;

	if json {
		match report::render_json(&states) {
			Ok(out) => println!("{}", out),
			Err(e) => eprintln!("{} {}", "error:".red().bold(), e),
		}
	} else {
		report::render_summary(&states);
	}

	let mut failed = report::any_unhealthy(&states);
	if let Err(e) = result {
		eprintln!("{} {}", "error:".red().bold(), e);
		failed = true;
	}
	if failed {
		std::process::exit(1);
	}
}
