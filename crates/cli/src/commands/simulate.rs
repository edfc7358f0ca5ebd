//! `rsm simulate`: drive a scenario against the in-memory provider.
//!
//! Every step is submitted to the service before it is awaited, so the
//! children of a `parallel` step are queued in file order and then run
//! concurrently, exactly as overlapping requests from a UI would.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use rsm_protocol::{RuntimeExitReason, SessionMode};
use rsm_runtime::fake::{FakeSession, FakeSessionManager};
use rsm_runtime::{Error as SessionError, RuntimeSessionService, StartSessionRequest, Subscription, TargetKey};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::SimulateArgs;
use crate::commands::config::resolve_config;
use crate::error::{Result, session_error_code};
use crate::output::{
	CommandError, CommandInputs, DiagnosticLevel, ErrorCode, EventRecord, OutputFormat, ResultBuilder, SessionSnapshot, SimulationReport, StepReport,
	print_result,
};
use crate::scenario::{Scenario, Step, TargetRef};

/// Yields handed to session watchers after each step so exits land before the next one.
const SETTLE_YIELDS: usize = 16;

#[derive(Default)]
struct StepOutcome {
	session_id: Option<String>,
	sessions: Option<Vec<SessionSnapshot>>,
}

type StepResult = std::result::Result<StepOutcome, CommandError>;

pub(crate) async fn run(args: SimulateArgs, config_path: Option<PathBuf>, format: OutputFormat) -> Result<bool> {
	let scenario = Scenario::load(&args.scenario)?;
	let mut effective = resolve_config(config_path.as_deref())?;
	if let Some(config) = scenario.config.clone() {
		effective.service = config;
		effective.source = Some(args.scenario.clone());
	}

	let simulation = Simulation::new(&scenario, &effective.service)?;
	let (events_tx, mut events_rx) = mpsc::unbounded_channel();
	let _subscriptions = record_events(&simulation.service, &events_tx);

	info!(target = "rsm", scenario = %args.scenario.display(), steps = scenario.steps.len(), "running scenario");

	let mut builder = ResultBuilder::new("simulate")
		.inputs(CommandInputs {
			scenario: Some(args.scenario.clone()),
			config_path,
		})
		.config(effective);

	let mut reports = Vec::with_capacity(scenario.steps.len());
	let mut first_failure: Option<CommandError> = None;
	for (index, step) in scenario.steps.iter().enumerate() {
		let report = simulation.run_step(index, step).await;
		settle().await;

		for (source, error) in failures(&report) {
			warn!(target = "rsm", step = %source, code = %error.code, error = %error.message, "step failed");
			builder = builder.diagnostic_with_source(DiagnosticLevel::Warning, error.message.clone(), source);
			if first_failure.is_none() {
				first_failure = Some(error);
			}
		}

		let failed = !report.ok;
		reports.push(report);
		if failed && args.fail_fast {
			debug!(target = "rsm", index, "stopping at first failure");
			break;
		}
	}

	let report = SimulationReport {
		steps: reports,
		sessions: snapshot(&simulation.service),
		foreground: simulation.service.foreground_session().map(|session| session.session_id().to_string()),
		calls: simulation.provider.calls(),
		events: std::iter::from_fn(|| events_rx.try_recv().ok()).collect(),
	};

	builder = builder.data(report);
	if args.fail_fast {
		if let Some(error) = first_failure {
			builder = builder.failure(error);
		}
	}

	let result = builder.build();
	print_result(&result, format);
	Ok(result.ok)
}

struct Simulation {
	service: RuntimeSessionService,
	provider: Arc<FakeSessionManager>,
}

impl Simulation {
	fn new(scenario: &Scenario, config: &rsm_runtime::SessionServiceConfig) -> Result<Self> {
		let service = RuntimeSessionService::new(config.clone());
		let provider = Arc::new(FakeSessionManager::new("scenario"));
		service.managers().register_manager(provider.clone());

		for spec in &scenario.runtimes {
			let runtime_id = spec.metadata.runtime_id.clone();
			if let Some(behavior) = &spec.behavior {
				provider.set_behavior(runtime_id.clone(), behavior.clone());
			}
			service.runtimes().register_runtime(spec.metadata.clone())?;
			if spec.preferred {
				service.runtimes().set_preferred_runtime(&runtime_id)?;
			}
		}

		Ok(Self { service, provider })
	}

	async fn run_step(&self, index: usize, step: &Step) -> StepReport {
		let started = Instant::now();
		let report = match step {
			Step::Parallel { steps } => {
				let pending: Vec<_> = steps.iter().map(|child| timed(self.begin(child))).collect();
				let outcomes = future::join_all(pending).await;
				let children: Vec<StepReport> = steps
					.iter()
					.zip(outcomes)
					.enumerate()
					.map(|(child_index, (child, (result, elapsed_ms)))| step_report(child_index, child.op(), result, elapsed_ms))
					.collect();
				StepReport {
					index,
					op: step.op().to_string(),
					ok: children.iter().all(|child| child.ok),
					session_id: None,
					error: None,
					elapsed_ms: elapsed_ms(started),
					sessions: None,
					steps: children,
				}
			}
			_ => {
				let result = self.begin(step).await;
				step_report(index, step.op(), result, elapsed_ms(started))
			}
		};
		debug!(target = "rsm", index, op = step.op(), ok = report.ok, elapsed_ms = report.elapsed_ms, "step finished");
		report
	}

	/// Submits `step` to the service now; the returned future completes it.
	fn begin(&self, step: &Step) -> BoxFuture<'static, StepResult> {
		let service = &self.service;
		match step {
			Step::Start {
				runtime_id,
				mode,
				notebook_uri,
				session_name,
				reason,
			} => {
				let mode = mode.unwrap_or(if notebook_uri.is_some() {
					SessionMode::Notebook
				} else {
					SessionMode::Console
				});
				let request = StartSessionRequest {
					runtime_id: runtime_id.clone(),
					session_name: session_name.clone().unwrap_or_default(),
					mode,
					notebook_uri: notebook_uri.clone(),
					start_reason: reason.clone(),
				};
				started(service.start_new_runtime_session(request))
			}
			Step::StartPreferred { language_id, reason } => started(service.start_preferred_console(language_id, reason.clone())),
			Step::Select { runtime_id, reason } => started(service.select_runtime(runtime_id, reason.clone())),
			Step::Restart { target, reason } => match self.session_id(target) {
				Ok(session_id) => completed(service.restart_session(&session_id, reason.clone()), Some(session_id)),
				Err(err) => failed(err),
			},
			Step::Shutdown { target, reason } => match self.target_key(target) {
				Ok(TargetKey::Console(language_id)) => completed(service.shutdown_console_session(&language_id, *reason), None),
				Ok(TargetKey::Notebook(uri)) => completed(service.shutdown_notebook_session(&uri, *reason), None),
				Err(err) => failed(err),
			},
			Step::ForceQuit { target } => match self.session_id(target) {
				Ok(session_id) => completed(service.force_quit_session(&session_id), Some(session_id)),
				Err(err) => failed(err),
			},
			Step::Interrupt { target } => match self.session_id(target) {
				Ok(session_id) => {
					let service = service.clone();
					async move {
						service.interrupt_session(&session_id).await.map_err(step_error)?;
						Ok(StepOutcome {
							session_id: Some(session_id),
							sessions: None,
						})
					}
					.boxed()
				}
				Err(err) => failed(err),
			},
			Step::Crash { target, exit_code } => match self.session_id(target) {
				Ok(session_id) => crash(service.clone(), session_id, *exit_code),
				Err(err) => failed(err),
			},
			Step::RenameNotebook { from, to } => {
				let result = service
					.update_notebook_session_uri(from, to)
					.map(|session_id| StepOutcome { session_id, sessions: None })
					.map_err(step_error);
				future::ready(result).boxed()
			}
			Step::Foreground { target } => {
				let result = match target {
					Some(target) => self
						.session_id(target)
						.and_then(|session_id| service.set_foreground_session(Some(&session_id)).map(|()| Some(session_id)).map_err(step_error)),
					None => service.set_foreground_session(None).map(|()| None).map_err(step_error),
				};
				future::ready(result.map(|session_id| StepOutcome { session_id, sessions: None })).boxed()
			}
			Step::Sleep { ms } => {
				let duration = Duration::from_millis(*ms);
				async move {
					tokio::time::sleep(duration).await;
					Ok(StepOutcome::default())
				}
				.boxed()
			}
			Step::Status => {
				let service = service.clone();
				async move {
					Ok(StepOutcome {
						session_id: None,
						sessions: Some(snapshot(&service)),
					})
				}
				.boxed()
			}
			Step::Parallel { .. } => failed(CommandError {
				code: ErrorCode::InvalidInput,
				message: "parallel steps cannot be nested".to_string(),
				details: None,
			}),
		}
	}

	fn session_id(&self, target: &TargetRef) -> std::result::Result<String, CommandError> {
		let session = match target {
			TargetRef::Session(session_id) => return Ok(session_id.clone()),
			TargetRef::Console(language_id) => self.service.get_console_session_for_language(language_id),
			TargetRef::Notebook(uri) => self.service.get_notebook_session_for_notebook_uri(uri),
		};
		session
			.map(|session| session.session_id().to_string())
			.ok_or_else(|| step_error(SessionError::UnknownSession(target.to_string())))
	}

	fn target_key(&self, target: &TargetRef) -> std::result::Result<TargetKey, CommandError> {
		match target {
			TargetRef::Console(language_id) => Ok(TargetKey::Console(language_id.clone())),
			TargetRef::Notebook(uri) => Ok(TargetKey::Notebook(uri.clone())),
			TargetRef::Session(session_id) => self
				.service
				.session_target(session_id)
				.ok_or_else(|| step_error(SessionError::UnknownSession(session_id.clone()))),
		}
	}
}

fn crash(service: RuntimeSessionService, session_id: String, exit_code: Option<i32>) -> BoxFuture<'static, StepResult> {
	async move {
		let session = service
			.get_session(&session_id)
			.ok_or_else(|| step_error(SessionError::UnknownSession(session_id.clone())))?;
		let fake = session.downcast_arc::<FakeSession>().map_err(|_| CommandError {
			code: ErrorCode::InternalError,
			message: format!("session {session_id} is not a simulated session"),
			details: None,
		})?;
		fake.emit_exit(RuntimeExitReason::Error, exit_code);
		Ok(StepOutcome {
			session_id: Some(session_id),
			sessions: None,
		})
	}
	.boxed()
}

fn started(operation: BoxFuture<'static, rsm_runtime::Result<String>>) -> BoxFuture<'static, StepResult> {
	operation
		.map(|result| {
			result
				.map(|session_id| StepOutcome {
					session_id: Some(session_id),
					sessions: None,
				})
				.map_err(step_error)
		})
		.boxed()
}

fn completed(operation: BoxFuture<'static, rsm_runtime::Result<()>>, session_id: Option<String>) -> BoxFuture<'static, StepResult> {
	operation
		.map(move |result| result.map(|()| StepOutcome { session_id, sessions: None }).map_err(step_error))
		.boxed()
}

fn failed(error: CommandError) -> BoxFuture<'static, StepResult> {
	future::ready(Err(error)).boxed()
}

fn step_error(err: SessionError) -> CommandError {
	CommandError {
		code: session_error_code(&err),
		message: err.to_string(),
		details: None,
	}
}

async fn timed(operation: BoxFuture<'static, StepResult>) -> (StepResult, u64) {
	let started = Instant::now();
	let result = operation.await;
	(result, elapsed_ms(started))
}

fn elapsed_ms(started: Instant) -> u64 {
	u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn step_report(index: usize, op: &str, result: StepResult, elapsed_ms: u64) -> StepReport {
	let (ok, outcome, error) = match result {
		Ok(outcome) => (true, outcome, None),
		Err(error) => (false, StepOutcome::default(), Some(error)),
	};
	StepReport {
		index,
		op: op.to_string(),
		ok,
		session_id: outcome.session_id,
		error,
		elapsed_ms,
		sessions: outcome.sessions,
		steps: Vec::new(),
	}
}

/// Failed steps of `report`, labelled `step N` or `step N.M` for parallel children.
fn failures(report: &StepReport) -> Vec<(String, CommandError)> {
	let mut failures = Vec::new();
	if let Some(error) = &report.error {
		failures.push((format!("step {}", report.index), error.clone()));
	}
	for child in &report.steps {
		if let Some(error) = &child.error {
			failures.push((format!("step {}.{}", report.index, child.index), error.clone()));
		}
	}
	failures
}

async fn settle() {
	for _ in 0..SETTLE_YIELDS {
		tokio::task::yield_now().await;
	}
}

fn snapshot(service: &RuntimeSessionService) -> Vec<SessionSnapshot> {
	let foreground = service.foreground_session().map(|session| session.session_id().to_string());
	service
		.active_sessions()
		.iter()
		.map(|session| {
			let metadata = session.metadata();
			let runtime = session.runtime_metadata();
			let notebook_uri = match service.session_target(&metadata.session_id) {
				Some(TargetKey::Notebook(uri)) => Some(uri),
				_ => metadata.notebook_uri.clone(),
			};
			SessionSnapshot {
				session_id: metadata.session_id.clone(),
				runtime_id: runtime.runtime_id.clone(),
				language_id: runtime.language_id.clone(),
				mode: metadata.session_mode,
				state: session.state(),
				notebook_uri,
				foreground: foreground.as_deref() == Some(metadata.session_id.as_str()),
			}
		})
		.collect()
}

fn record(event: &str, session_id: Option<&str>, detail: Option<String>) -> EventRecord {
	EventRecord {
		event: event.to_string(),
		session_id: session_id.map(str::to_string),
		detail,
	}
}

fn exit_reason_name(reason: RuntimeExitReason) -> Option<String> {
	serde_json::to_value(reason).ok().and_then(|value| value.as_str().map(str::to_string))
}

/// Forwards every service event into `sink` for the final report.
fn record_events(service: &RuntimeSessionService, sink: &mpsc::UnboundedSender<EventRecord>) -> Vec<Subscription> {
	let mut subscriptions = Vec::new();

	let tx = sink.clone();
	subscriptions.push(service.on_will_start_session().subscribe(move |event| {
		let detail = if event.is_new { "new" } else { "adopted" };
		let _ = tx.send(record("willStartSession", Some(event.session.session_id()), Some(detail.to_string())));
	}));

	let tx = sink.clone();
	subscriptions.push(service.on_did_start_runtime().subscribe(move |session| {
		let _ = tx.send(record("didStartRuntime", Some(session.session_id()), None));
	}));

	let tx = sink.clone();
	subscriptions.push(service.on_did_fail_start_runtime().subscribe(move |session| {
		let _ = tx.send(record("didFailStartRuntime", Some(session.session_id()), None));
	}));

	let tx = sink.clone();
	subscriptions.push(service.on_did_change_foreground_session().subscribe(move |session| {
		let _ = tx.send(record("didChangeForegroundSession", session.as_ref().map(|session| session.session_id()), None));
	}));

	let tx = sink.clone();
	subscriptions.push(service.on_did_change_runtime_state().subscribe(move |change| {
		let detail = format!("{} -> {}", change.old_state, change.new_state);
		let _ = tx.send(record("didChangeRuntimeState", Some(&change.session_id), Some(detail)));
	}));

	let tx = sink.clone();
	subscriptions.push(service.on_did_end_session().subscribe(move |ended| {
		let _ = tx.send(record("didEndSession", Some(&ended.session_id), exit_reason_name(ended.exit.reason)));
	}));

	subscriptions
}
