use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;

use crate::child::{panic_message, BoxFuture, ChildSpec, WorkResult};
use crate::config::{Escalation, SupervisorConfig};
use crate::error::{ChildError, StartupError, SupervisorError};
use crate::observer::{NoopObserver, Observer};
use crate::types::*;

const SHUTDOWN_CAUSE: &str = "shutdown";

pub struct Supervisor {
	config: SupervisorConfig,
	observer: Arc<dyn Observer>,
}

impl Supervisor {
	pub fn new(config: SupervisorConfig) -> Self {
		Self {
			config,
			observer: Arc::new(NoopObserver),
		}
	}

	pub fn with_observer(mut self, observer: impl Observer) -> Self {
		self.observer = Arc::new(observer);
		self
	}

	/// Start every child in order and hand back a handle to the running supervisor.
	///
	/// Fails only for duplicate ids or when a `critical` child cannot start.
	/// Any other child failure, at boot or later, stays with that child.
	pub async fn start(self, specs: Vec<ChildSpec>) -> Result<SupervisorHandle, StartupError> {
		let mut seen = HashSet::new();
		for spec in &specs {
			if !seen.insert(spec.id.as_str()) {
				return Err(StartupError::DuplicateChild(spec.id.clone()));
			}
		}

		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let (version_tx, version_rx) = watch::channel(0u64);
		let table = Arc::new(RwLock::new(ChildTable::default()));

		let mut coordinator = Coordinator {
			config: self.config,
			observer: self.observer,
			table: Arc::clone(&table),
			slots: HashMap::new(),
			events: events_tx.clone(),
			version: version_tx,
			stopping: false,
		};
		coordinator.boot(specs).await?;

		let task = tokio::spawn(coordinator.run(events_rx));

		Ok(SupervisorHandle {
			table,
			events: events_tx,
			version: version_rx,
			coordinator: task,
		})
	}
}

/// Read side of a running supervisor.
///
/// Dropping the handle detaches it; children keep running. Use
/// [`SupervisorHandle::shutdown`] to stop them.
pub struct SupervisorHandle {
	table: Arc<RwLock<ChildTable>>,
	events: mpsc::UnboundedSender<Event>,
	version: watch::Receiver<u64>,
	coordinator: JoinHandle<Result<(), SupervisorError>>,
}

impl SupervisorHandle {
	pub async fn observe(&self, id: &str) -> Option<ChildState> {
		self.table.read().await.children.get(id).cloned()
	}

	/// All children in the order they were specified.
	pub async fn status(&self) -> Vec<ChildState> {
		self.table.read().await.ordered()
	}

	/// Wait until `id` is settled. `None` if there is no such child.
	pub async fn wait_for(&self, id: &str) -> Option<ChildState> {
		let mut version = self.version.clone();
		loop {
			let state = self.observe(id).await?;
			if state.settled {
				return Some(state);
			}
			if version.changed().await.is_err() {
				return self.observe(id).await;
			}
		}
	}

	/// Wait until every child is settled. Never resolves while an `Always` child is healthy.
	pub async fn settled(&self) -> Vec<ChildState> {
		let mut version = self.version.clone();
		loop {
			let states = self.status().await;
			if states.iter().all(|s| s.settled) {
				return states;
			}
			if version.changed().await.is_err() {
				return self.status().await;
			}
		}
	}

	/// Drop children that finished normally and will never run again.
	pub async fn reap(&self) -> Vec<ChildState> {
		let (reply, rx) = oneshot::channel();
		if self.events.send(Event::Reap { reply }).is_err() {
			return Vec::new();
		}
		rx.await.unwrap_or_default()
	}

	pub fn is_finished(&self) -> bool {
		self.coordinator.is_finished()
	}

	/// Stop every running child and wait until their work has been dropped.
	///
	/// The handle stays readable, so final states can be taken afterwards.
	pub async fn stop(&self) {
		let (reply, rx) = oneshot::channel();
		if self.events.send(Event::Shutdown { reply }).is_ok() {
			let _ = rx.await;
		}
	}

	/// Stop every running child, then the coordinator.
	pub async fn shutdown(self) -> Result<(), SupervisorError> {
		self.stop().await;
		self.wait().await
	}

	/// Resolve once the coordinator stops, either through `shutdown` or escalation.
	pub async fn wait(self) -> Result<(), SupervisorError> {
		match self.coordinator.await {
			Ok(result) => result,
			Err(e) => Err(SupervisorError::Coordinator(e.to_string())),
		}
	}
}

#[derive(Default)]
struct ChildTable {
	order: Vec<String>,
	children: HashMap<String, ChildState>,
}

impl ChildTable {
	fn ordered(&self) -> Vec<ChildState> {
		self.order
			.iter()
			.filter_map(|id| self.children.get(id).cloned())
			.collect()
	}
}

enum Event {
	Exited { id: String, run: u32, reason: ExitReason },
	Restart { id: String, run: u32 },
	Reap { reply: oneshot::Sender<Vec<ChildState>> },
	Shutdown { reply: oneshot::Sender<()> },
}

struct Slot {
	spec: ChildSpec,
	/// Bumped on every restart; exits from older runs are ignored.
	run: u32,
	restarts: u32,
	abnormal_exits: u32,
	runner: Option<Runner>,
}

/// Sole writer of the child table. Boot runs here, then `run` handles one event at a time.
struct Coordinator {
	config: SupervisorConfig,
	observer: Arc<dyn Observer>,
	table: Arc<RwLock<ChildTable>>,
	slots: HashMap<String, Slot>,
	events: mpsc::UnboundedSender<Event>,
	version: watch::Sender<u64>,
	stopping: bool,
}

impl Coordinator {
	async fn boot(&mut self, specs: Vec<ChildSpec>) -> Result<(), StartupError> {
		for spec in specs {
			let id = spec.id.clone();
			let critical = spec.critical;
			{
				let mut table = self.table.write().await;
				table.order.push(id.clone());
				table.children.insert(id.clone(), ChildState::new(&id, spec.policy));
			}
			self.slots.insert(
				id.clone(),
				Slot {
					spec,
					run: 0,
					restarts: 0,
					abnormal_exits: 0,
					runner: None,
				},
			);

			if let Err(cause) = self.launch(&id).await {
				let error = ChildError::StartFailure(cause);
				self.fail(&id, error.clone()).await;
				if critical {
					self.stop_all().await;
					return Err(StartupError::CriticalChild { id, error });
				}
			}
		}
		Ok(())
	}

	async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) -> Result<(), SupervisorError> {
		while let Some(event) = events.recv().await {
			match event {
				Event::Exited { id, run, reason } => {
					if let Some(err) = self.on_exit(id, run, reason).await {
						return Err(err);
					}
				}
				Event::Restart { id, run } => self.on_restart(id, run).await,
				Event::Reap { reply } => {
					let _ = reply.send(self.reap().await);
				}
				Event::Shutdown { reply } => {
					self.stop_all().await;
					let _ = reply.send(());
					return Ok(());
				}
			}
		}
		Ok(())
	}

	async fn launch(&mut self, id: &str) -> Result<(), String> {
		let Some(slot) = self.slots.get_mut(id) else {
			return Ok(());
		};
		let work = slot.spec.launch()?;
		slot.runner = Some(spawn_runner(
			id.to_string(),
			slot.run,
			work,
			slot.spec.timeout,
			self.events.clone(),
		));
		self.transition(id, ChildStatus::Running, false).await;
		Ok(())
	}

	async fn on_exit(&mut self, id: String, run: u32, reason: ExitReason) -> Option<SupervisorError> {
		if self.stopping {
			return None;
		}
		let default_budget = self.config.retry_budget;
		let slot = self.slots.get_mut(&id)?;
		if slot.run != run {
			return None;
		}
		slot.runner = None;
		let policy = slot.spec.policy;
		let budget = slot.spec.retry_budget.unwrap_or(default_budget);
		let exhausted = if reason.is_normal() {
			false
		} else {
			slot.abnormal_exits += 1;
			slot.abnormal_exits > budget
		};
		let restarts = slot.restarts;

		match (reason, policy) {
			(ExitReason::Normal, RestartPolicy::Always) => {
				self.transition(&id, ChildStatus::Exited(ExitReason::Normal), false).await;
				self.schedule_restart(id, run);
			}
			(ExitReason::Normal, _) => {
				self.transition(&id, ChildStatus::Exited(ExitReason::Normal), true).await;
			}
			(ExitReason::Abnormal(cause), RestartPolicy::Never) => {
				let status = ChildStatus::Exited(ExitReason::Abnormal(cause.clone()));
				self.transition(&id, status, true).await;
				self.observer.on_failure(&id, &ChildError::WorkFailure(cause));
			}
			(ExitReason::Abnormal(cause), _) if exhausted => {
				let error = ChildError::RestartBudgetExhausted { restarts, cause };
				self.fail(&id, error.clone()).await;
				if self.config.escalation == Escalation::Supervisor {
					self.stop_all().await;
					return Some(SupervisorError::Escalated { id, error });
				}
			}
			(reason, _) => {
				self.transition(&id, ChildStatus::Exited(reason), false).await;
				self.schedule_restart(id, run);
			}
		}
		None
	}

	async fn on_restart(&mut self, id: String, run: u32) {
		if self.stopping {
			return;
		}
		let Some(slot) = self.slots.get_mut(&id) else {
			return;
		};
		if slot.run != run {
			return;
		}
		slot.run += 1;
		slot.restarts += 1;
		let run = slot.run;

		self.transition(&id, ChildStatus::Starting, false).await;
		if let Err(cause) = self.launch(&id).await {
			// Counts against the retry budget like any other abnormal exit.
			let reason = ExitReason::Abnormal(format!("start failed: {}", cause));
			let _ = self.events.send(Event::Exited { id, run, reason });
		}
	}

	fn schedule_restart(&self, id: String, run: u32) {
		let delay = self.config.restart_delay();
		let events = self.events.clone();
		if delay.is_zero() {
			let _ = events.send(Event::Restart { id, run });
			return;
		}
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			let _ = events.send(Event::Restart { id, run });
		});
	}

	async fn reap(&mut self) -> Vec<ChildState> {
		let mut reaped = Vec::new();
		{
			let mut guard = self.table.write().await;
			let table = &mut *guard;
			table.order.retain(|id| {
				let done = table.children.get(id).is_some_and(|s| {
					s.settled
						&& s.policy != RestartPolicy::Always
						&& s.status == ChildStatus::Exited(ExitReason::Normal)
				});
				if done {
					if let Some(state) = table.children.remove(id) {
						reaped.push(state);
					}
				}
				!done
			});
		}
		for state in &reaped {
			self.slots.remove(&state.id);
		}
		if !reaped.is_empty() {
			self.bump();
		}
		reaped
	}

	/// Stop children in reverse start order and settle everything.
	async fn stop_all(&mut self) {
		self.stopping = true;
		let order = self.table.read().await.order.clone();
		for id in order.iter().rev() {
			let runner = self.slots.get_mut(id).and_then(|slot| slot.runner.take());
			match runner {
				Some(runner) => {
					runner.stop().await;
					let status = ChildStatus::Exited(ExitReason::Abnormal(SHUTDOWN_CAUSE.to_string()));
					self.transition(id, status, true).await;
				}
				None => self.mark_settled(id).await,
			}
		}
	}

	async fn fail(&self, id: &str, error: ChildError) {
		self.transition(id, ChildStatus::Failed(error.clone()), true).await;
		self.observer.on_failure(id, &error);
	}

	async fn transition(&self, id: &str, new: ChildStatus, settled: bool) {
		let restarts = self.slots.get(id).map(|s| s.restarts).unwrap_or(0);
		let old = {
			let mut table = self.table.write().await;
			let Some(state) = table.children.get_mut(id) else {
				return;
			};
			state.restarts = restarts;
			state.settled = settled;
			std::mem::replace(&mut state.status, new.clone())
		};
		self.observer.on_transition(id, &old, &new);
		self.bump();
	}

	async fn mark_settled(&self, id: &str) {
		{
			let mut table = self.table.write().await;
			match table.children.get_mut(id) {
				Some(state) if !state.settled => state.settled = true,
				_ => return,
			}
		}
		self.bump();
	}

	fn bump(&self) {
		self.version.send_modify(|v| *v += 1);
	}
}

struct AbortOnDrop(JoinHandle<WorkResult>);

impl Drop for AbortOnDrop {
	fn drop(&mut self) {
		self.0.abort();
	}
}

/// One run of a child: the task waiting on its work, plus a stop signal.
struct Runner {
	stop: oneshot::Sender<()>,
	task: JoinHandle<()>,
}

impl Runner {
	/// Cancel the run and wait until its work future has been dropped.
	async fn stop(self) {
		let _ = self.stop.send(());
		let _ = self.task.await;
	}
}

fn spawn_runner(
	id: String,
	run: u32,
	work: BoxFuture<WorkResult>,
	timeout: Option<Duration>,
	events: mpsc::UnboundedSender<Event>,
) -> Runner {
	let (stop, stopped) = oneshot::channel();
	let task = tokio::spawn(async move {
		if let Some(reason) = run_work(work, timeout, stopped).await {
			let _ = events.send(Event::Exited { id, run, reason });
		}
	});
	Runner { stop, task }
}

/// Run the work on its own task so panics and aborts surface as exit reasons.
///
/// Returns `None` when the run was stopped from outside.
async fn run_work(
	work: BoxFuture<WorkResult>,
	timeout: Option<Duration>,
	stopped: oneshot::Receiver<()>,
) -> Option<ExitReason> {
	let mut task = AbortOnDrop(tokio::spawn(work));
	let deadline = async {
		match timeout {
			Some(limit) => tokio::time::sleep(limit).await,
			None => std::future::pending::<()>().await,
		}
	};

	let joined = tokio::select! {
		joined = &mut task.0 => joined,
		_ = deadline => {
			cancel(&mut task).await;
			let limit = timeout.unwrap_or_default();
			return Some(ExitReason::Abnormal(format!("timed out after {:?}", limit)));
		}
		_ = stopped => {
			cancel(&mut task).await;
			return None;
		}
	};

	let reason = match joined {
		Ok(Ok(())) => ExitReason::Normal,
		Ok(Err(e)) => ExitReason::Abnormal(e.to_string()),
		Err(e) if e.is_panic() => {
			let payload = e.into_panic();
			ExitReason::Abnormal(format!("panicked: {}", panic_message(payload.as_ref())))
		}
		Err(e) => ExitReason::Abnormal(e.to_string()),
	};
	Some(reason)
}

/// Abort the work and wait for the abort to land, so its drop guards have run.
async fn cancel(task: &mut AbortOnDrop) {
	task.0.abort();
	let _ = (&mut task.0).await;
}
