//! Session lifecycle orchestration.
//!
//! [`RuntimeSessionService`] is the entry point used by the UI layer. Every
//! operation that changes which session occupies a target (console language or
//! notebook document) runs through the per-target [`RequestQueue`], so start,
//! restart and shutdown requests for one target never interleave. Lookups read
//! the [`SessionDirectory`] synchronously.
//!
//! Lifecycle futures are resolved and queued at call time and run when polled.
//! A session's own exit, reported through its exit stream, is what frees its
//! target; timeouts and provider failures leave the directory untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture, WeakShared};
use parking_lot::Mutex;
use rsm_protocol::{RuntimeExit, RuntimeExitReason, RuntimeMetadata, RuntimeState, SessionMetadata, SessionMode};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SessionServiceConfig;
use crate::directory::{SessionDirectory, TargetKey};
use crate::error::{Error, Result};
use crate::event::Emitter;
use crate::managers::ManagerRegistry;
use crate::queue::RequestQueue;
use crate::registry::RuntimeRegistry;
use crate::session::{RuntimeSession, SessionHandle};
use crate::wait::{WaitError, wait_for_exit, wait_for_state_change};

/// Parameters of a session launch.
#[derive(Debug, Clone)]
pub struct StartSessionRequest {
	pub runtime_id: String,
	/// Display name; the runtime name is used when empty.
	pub session_name: String,
	pub mode: SessionMode,
	pub notebook_uri: Option<Url>,
	pub start_reason: String,
}

impl StartSessionRequest {
	pub fn console(runtime_id: impl Into<String>, start_reason: impl Into<String>) -> Self {
		Self {
			runtime_id: runtime_id.into(),
			session_name: String::new(),
			mode: SessionMode::Console,
			notebook_uri: None,
			start_reason: start_reason.into(),
		}
	}

	pub fn notebook(runtime_id: impl Into<String>, notebook_uri: Url, start_reason: impl Into<String>) -> Self {
		Self {
			runtime_id: runtime_id.into(),
			session_name: String::new(),
			mode: SessionMode::Notebook,
			notebook_uri: Some(notebook_uri),
			start_reason: start_reason.into(),
		}
	}

	pub fn with_session_name(mut self, session_name: impl Into<String>) -> Self {
		self.session_name = session_name.into();
		self
	}
}

/// Payload of [`RuntimeSessionService::on_will_start_session`].
#[derive(Clone)]
pub struct WillStartSession {
	pub session: SessionHandle,
	/// `false` when an already running session was adopted from its provider.
	pub is_new: bool,
}

/// Payload of [`RuntimeSessionService::on_did_change_runtime_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStateChange {
	pub session_id: String,
	pub old_state: RuntimeState,
	pub new_state: RuntimeState,
}

/// Payload of [`RuntimeSessionService::on_did_end_session`].
#[derive(Debug, Clone)]
pub struct SessionEnded {
	pub session_id: String,
	pub exit: RuntimeExit,
}

/// Held weakly so that a restart every caller has dropped is cancelled and releases its queue slot.
type PendingRestart = WeakShared<BoxFuture<'static, Result<()>>>;

struct ServiceInner {
	config: SessionServiceConfig,
	runtimes: RuntimeRegistry,
	managers: ManagerRegistry,
	directory: SessionDirectory,
	queue: RequestQueue<TargetKey>,
	/// In-flight restart per session id, tagged with a generation.
	restarts: Mutex<HashMap<String, (u64, PendingRestart)>>,
	next_restart: AtomicU64,
	next_session: AtomicU64,

	will_start_session: Emitter<WillStartSession>,
	did_start_runtime: Emitter<SessionHandle>,
	did_fail_start_runtime: Emitter<SessionHandle>,
	did_change_foreground: Emitter<Option<SessionHandle>>,
	did_change_runtime_state: Emitter<RuntimeStateChange>,
	did_end_session: Emitter<SessionEnded>,
}

/// Manages runtime sessions: at most one active session per target.
///
/// Cloning is cheap; clones share the same registries and directory.
#[derive(Clone)]
pub struct RuntimeSessionService {
	inner: Arc<ServiceInner>,
}

impl Default for RuntimeSessionService {
	fn default() -> Self {
		Self::new(SessionServiceConfig::default())
	}
}

impl RuntimeSessionService {
	pub fn new(config: SessionServiceConfig) -> Self {
		Self {
			inner: Arc::new(ServiceInner {
				config,
				runtimes: RuntimeRegistry::new(),
				managers: ManagerRegistry::new(),
				directory: SessionDirectory::new(),
				queue: RequestQueue::new(),
				restarts: Mutex::new(HashMap::new()),
				next_restart: AtomicU64::new(0),
				next_session: AtomicU64::new(0),
				will_start_session: Emitter::new(),
				did_start_runtime: Emitter::new(),
				did_fail_start_runtime: Emitter::new(),
				did_change_foreground: Emitter::new(),
				did_change_runtime_state: Emitter::new(),
				did_end_session: Emitter::new(),
			}),
		}
	}

	pub fn config(&self) -> &SessionServiceConfig {
		&self.inner.config
	}

	pub fn runtimes(&self) -> &RuntimeRegistry {
		&self.inner.runtimes
	}

	pub fn managers(&self) -> &ManagerRegistry {
		&self.inner.managers
	}

	/// Starts a session for `request`, or returns the session already serving
	/// its target when it runs the same runtime.
	///
	/// Resolves with the session id once the session has started.
	pub fn start_new_runtime_session(&self, request: StartSessionRequest) -> BoxFuture<'static, Result<String>> {
		let (runtime, key) = match self.inner.resolve_start(&request) {
			Ok(resolved) => resolved,
			Err(err) => return future::ready(Err(err)).boxed(),
		};
		let inner = Arc::clone(&self.inner);
		self.inner.queue.enqueue(key.clone(), inner.start_in_queue(key, runtime, request))
	}

	/// Starts a console for the language's preferred runtime.
	pub fn start_preferred_console(&self, language_id: &str, start_reason: impl Into<String>) -> BoxFuture<'static, Result<String>> {
		match self.inner.runtimes.preferred_runtime(language_id) {
			Some(runtime) => self.start_new_runtime_session(StartSessionRequest::console(runtime.runtime_id, start_reason)),
			None => future::ready(Err(Error::NoRuntimeForLanguage(language_id.to_string()))).boxed(),
		}
	}

	/// Makes `runtime_id` the console for its language.
	///
	/// A console running a different runtime is shut down first, within the
	/// same queued operation. The resulting console becomes foreground.
	pub fn select_runtime(&self, runtime_id: &str, start_reason: impl Into<String>) -> BoxFuture<'static, Result<String>> {
		let request = StartSessionRequest::console(runtime_id, start_reason);
		let (runtime, key) = match self.inner.resolve_start(&request) {
			Ok(resolved) => resolved,
			Err(err) => return future::ready(Err(err)).boxed(),
		};
		let inner = Arc::clone(&self.inner);
		self.inner.queue.enqueue(key.clone(), inner.select_in_queue(key, runtime, request))
	}

	/// Restarts a session.
	///
	/// An exited session is relaunched with its original metadata. Requests
	/// made while a restart of the same session is pending share its outcome.
	pub fn restart_session(&self, session_id: &str, reason: impl Into<String>) -> BoxFuture<'static, Result<()>> {
		let Some(key) = self.inner.directory.target_of(session_id) else {
			return future::ready(Err(Error::UnknownSession(session_id.to_string()))).boxed();
		};

		let mut restarts = self.inner.restarts.lock();
		if let Some(pending) = restarts.get(session_id).and_then(|(_, pending)| pending.upgrade()) {
			debug!(target = "rsm.session", %session_id, "restart coalesced with pending request");
			return pending.boxed();
		}
		restarts.retain(|_, (_, pending)| pending.upgrade().is_some());

		let generation = self.inner.next_restart.fetch_add(1, Ordering::Relaxed);
		let inner = Arc::clone(&self.inner);
		let operation = inner.restart_in_queue(session_id.to_string(), reason.into(), generation);
		let pending = self.inner.queue.enqueue(key, operation).shared();
		if let Some(weak) = pending.downgrade() {
			restarts.insert(session_id.to_string(), (generation, weak));
		}
		pending.boxed()
	}

	/// Shuts down the console for `language_id`. Succeeds if there is none.
	pub fn shutdown_console_session(&self, language_id: &str, reason: RuntimeExitReason) -> BoxFuture<'static, Result<()>> {
		self.shutdown_target(TargetKey::Console(language_id.to_string()), reason)
	}

	/// Shuts down the session for `notebook_uri`. Succeeds if there is none.
	pub fn shutdown_notebook_session(&self, notebook_uri: &Url, reason: RuntimeExitReason) -> BoxFuture<'static, Result<()>> {
		self.shutdown_target(TargetKey::Notebook(notebook_uri.clone()), reason)
	}

	fn shutdown_target(&self, key: TargetKey, reason: RuntimeExitReason) -> BoxFuture<'static, Result<()>> {
		let inner = Arc::clone(&self.inner);
		self.inner.queue.enqueue(key.clone(), inner.shutdown_in_queue(key, reason))
	}

	/// Terminates a session and frees its target whatever the provider reports.
	pub fn force_quit_session(&self, session_id: &str) -> BoxFuture<'static, Result<()>> {
		let Some(key) = self.inner.directory.target_of(session_id) else {
			return future::ready(Err(Error::UnknownSession(session_id.to_string()))).boxed();
		};
		let inner = Arc::clone(&self.inner);
		self.inner.queue.enqueue(key, inner.force_quit_in_queue(session_id.to_string()))
	}

	/// Interrupts the session's current work. Not serialized with lifecycle operations.
	pub async fn interrupt_session(&self, session_id: &str) -> Result<()> {
		let session = self
			.inner
			.directory
			.get(session_id)
			.ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
		debug!(target = "rsm.session", %session_id, "interrupting session");
		session.interrupt().await.map_err(Error::provider)
	}

	/// Moves a notebook session to a new document URI, e.g. after "save as".
	///
	/// Returns the rebound session id, or `None` if no session was bound to `old_uri`.
	pub fn update_notebook_session_uri(&self, old_uri: &Url, new_uri: &Url) -> Result<Option<String>> {
		let rebound = self.inner.directory.rebind_notebook(old_uri, new_uri)?;
		if let Some(session_id) = &rebound {
			info!(target = "rsm.session", %session_id, from = %old_uri, to = %new_uri, "notebook session moved");
		}
		Ok(rebound)
	}

	/// Sets or clears the foreground console.
	pub fn set_foreground_session(&self, session_id: Option<&str>) -> Result<()> {
		let session = match session_id {
			Some(id) => {
				let session = self.inner.directory.get(id).ok_or_else(|| Error::UnknownSession(id.to_string()))?;
				if !session.metadata().is_console() {
					return Err(Error::InvalidForeground(id.to_string()));
				}
				Some(session)
			}
			None => None,
		};
		self.inner.change_foreground(session);
		Ok(())
	}

	pub fn get_session(&self, session_id: &str) -> Option<SessionHandle> {
		self.inner.directory.get(session_id)
	}

	/// Target the session currently occupies; follows notebook rebinding.
	pub fn session_target(&self, session_id: &str) -> Option<TargetKey> {
		self.inner.directory.target_of(session_id)
	}

	pub fn get_console_session_for_language(&self, language_id: &str) -> Option<SessionHandle> {
		self.inner.directory.console_for_language(language_id)
	}

	pub fn get_console_session_for_runtime(&self, runtime_id: &str) -> Option<SessionHandle> {
		self.inner.directory.console_for_runtime(runtime_id)
	}

	pub fn get_notebook_session_for_notebook_uri(&self, notebook_uri: &Url) -> Option<SessionHandle> {
		self.inner.directory.notebook_for_uri(notebook_uri)
	}

	/// Whether the language's console is starting, running or restarting.
	pub fn has_starting_or_running_console(&self, language_id: &str) -> bool {
		self.get_console_session_for_language(language_id).is_some_and(|session| {
			let state = session.state();
			state.is_starting() || state.is_running() || state == RuntimeState::Restarting
		})
	}

	/// Sessions that have not exited, in launch order.
	pub fn active_sessions(&self) -> Vec<SessionHandle> {
		self.inner
			.directory
			.sessions()
			.into_iter()
			.filter(|session| !session.state().is_exited())
			.collect()
	}

	pub fn foreground_session(&self) -> Option<SessionHandle> {
		self.inner.directory.foreground()
	}

	/// Fired once per launch, after the session is registered and before it starts.
	pub fn on_will_start_session(&self) -> &Emitter<WillStartSession> {
		&self.inner.will_start_session
	}

	pub fn on_did_start_runtime(&self) -> &Emitter<SessionHandle> {
		&self.inner.did_start_runtime
	}

	pub fn on_did_fail_start_runtime(&self) -> &Emitter<SessionHandle> {
		&self.inner.did_fail_start_runtime
	}

	pub fn on_did_change_foreground_session(&self) -> &Emitter<Option<SessionHandle>> {
		&self.inner.did_change_foreground
	}

	pub fn on_did_change_runtime_state(&self) -> &Emitter<RuntimeStateChange> {
		&self.inner.did_change_runtime_state
	}

	pub fn on_did_end_session(&self) -> &Emitter<SessionEnded> {
		&self.inner.did_end_session
	}
}

impl ServiceInner {
	fn resolve_start(&self, request: &StartSessionRequest) -> Result<(RuntimeMetadata, TargetKey)> {
		let runtime = self
			.runtimes
			.get_runtime(&request.runtime_id)
			.ok_or_else(|| Error::UnknownRuntime(request.runtime_id.clone()))?;
		let key = match request.mode {
			SessionMode::Console => TargetKey::Console(runtime.language_id.clone()),
			SessionMode::Notebook => {
				let uri = request.notebook_uri.clone().ok_or_else(|| Error::MissingNotebookUri {
					runtime_name: runtime.runtime_name.clone(),
				})?;
				TargetKey::Notebook(uri)
			}
		};
		Ok((runtime, key))
	}

	/// The live session bound to `key`; an exited occupant counts as vacant.
	fn occupant(&self, key: &TargetKey) -> Option<SessionHandle> {
		self.directory.session_for_target(key).filter(|session| !session.state().is_exited())
	}

	fn is_current(&self, session: &SessionHandle) -> bool {
		self.directory
			.get(session.session_id())
			.is_some_and(|current| Arc::ptr_eq(&current, session))
	}

	async fn start_in_queue(self: Arc<Self>, key: TargetKey, runtime: RuntimeMetadata, request: StartSessionRequest) -> Result<String> {
		if let Some(existing) = self.occupant(&key) {
			if existing.state() == RuntimeState::Exiting {
				return Err(still_exiting(&key, &existing));
			}
			if existing.runtime_metadata().runtime_id == runtime.runtime_id {
				debug!(
					target = "rsm.session",
					session_id = %existing.session_id(),
					%key,
					"reusing session already serving target"
				);
				return Ok(existing.session_id().to_string());
			}
			return Err(conflict(&key, &existing, &runtime, &request.start_reason));
		}

		let manager = self.managers.resolve_manager_for(&runtime)?;
		let adopted = manager.existing_session(&runtime, &key).await.map_err(Error::provider)?;
		let (session, is_new) = match adopted {
			Some(session) => {
				info!(target = "rsm.session", session_id = %session.session_id(), manager = manager.name(), "adopting running session");
				(session, false)
			}
			None => {
				let metadata = self.new_session_metadata(&runtime, &request);
				(manager.create_session(&runtime, metadata).await.map_err(Error::provider)?, true)
			}
		};

		self.launch(key, session, is_new).await
	}

	async fn select_in_queue(self: Arc<Self>, key: TargetKey, runtime: RuntimeMetadata, request: StartSessionRequest) -> Result<String> {
		if let Some(current) = self.occupant(&key) {
			if current.runtime_metadata().runtime_id == runtime.runtime_id {
				if current.state() == RuntimeState::Exiting {
					return Err(still_exiting(&key, &current));
				}
				self.change_foreground(Some(Arc::clone(&current)));
				return Ok(current.session_id().to_string());
			}
			info!(
				target = "rsm.session",
				from = %current.runtime_metadata().runtime_name,
				to = %runtime.runtime_name,
				"switching console runtime"
			);
			self.shutdown_session(&current, RuntimeExitReason::SwitchRuntime).await?;
		}

		let session_id = Arc::clone(&self).start_in_queue(key, runtime, request).await?;
		if let Some(session) = self.directory.get(&session_id) {
			self.change_foreground(Some(session));
		}
		Ok(session_id)
	}

	/// Registers `session` under `key`, starts it unless already running, and
	/// reports the outcome.
	async fn launch(self: &Arc<Self>, key: TargetKey, session: SessionHandle, is_new: bool) -> Result<String> {
		let session_id = session.session_id().to_string();
		self.directory.insert(&key, Arc::clone(&session));
		self.spawn_watcher(&session);
		self.will_start_session.fire(&WillStartSession {
			session: Arc::clone(&session),
			is_new,
		});

		if !session.state().is_running() {
			debug!(target = "rsm.session", %session_id, %key, runtime = %session.runtime_metadata().runtime_name, "starting session");
			let outcome = match self.config.start_timeout() {
				Some(limit) => match tokio::time::timeout(limit, session.start()).await {
					Ok(result) => result.map_err(Error::provider),
					Err(_) => Err(Error::StartTimeout {
						session_id: session_id.clone(),
						timeout_ms: millis(limit),
					}),
				},
				None => session.start().await.map_err(Error::provider),
			};

			if let Err(err) = outcome {
				warn!(target = "rsm.session", %session_id, %key, error = %err, "session failed to start");
				self.directory.remove(&session);
				self.did_fail_start_runtime.fire(&session);
				return Err(err);
			}
		}

		info!(target = "rsm.session", %session_id, %key, state = %session.state(), "session started");
		self.did_start_runtime.fire(&session);

		if session.metadata().is_console() && self.is_current(&session) {
			let vacant = self.directory.foreground().is_none_or(|current| current.state().is_exited());
			if vacant {
				self.change_foreground(Some(Arc::clone(&session)));
			}
		}
		Ok(session_id)
	}

	async fn restart_in_queue(self: Arc<Self>, session_id: String, reason: String, generation: u64) -> Result<()> {
		let result = self.restart_now(&session_id, &reason).await;
		let mut restarts = self.restarts.lock();
		if restarts.get(&session_id).is_some_and(|(pending, _)| *pending == generation) {
			restarts.remove(&session_id);
		}
		result
	}

	async fn restart_now(self: &Arc<Self>, session_id: &str, reason: &str) -> Result<()> {
		let session = self
			.directory
			.get(session_id)
			.ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;

		if session.state().is_exited() {
			info!(target = "rsm.session", %session_id, %reason, "relaunching exited session");
			return self.relaunch(&session).await;
		}

		info!(target = "rsm.session", %session_id, %reason, "restarting session");
		let mut states = session.watch_state();
		if let Err(err) = session.restart().await {
			warn!(target = "rsm.session", %session_id, error = %err, "restart failed");
			return Err(Error::provider(err));
		}

		let limit = self.config.restart_timeout();
		let accept = |state: RuntimeState| state.is_running() || state == RuntimeState::Starting;
		match wait_for_state_change(&mut states, accept, limit).await {
			Ok(state) => {
				info!(target = "rsm.session", %session_id, %state, "session restarted");
				Ok(())
			}
			Err(WaitError::Timeout) => {
				warn!(target = "rsm.session", %session_id, timeout_ms = millis(limit), "restart timed out");
				Err(Error::RestartTimeout {
					session_id: session_id.to_string(),
					timeout_ms: millis(limit),
				})
			}
			Err(WaitError::Closed) => Err(Error::provider(anyhow::anyhow!(
				"session {session_id} stopped reporting state while restarting"
			))),
		}
	}

	/// Launches a fresh session with the metadata of an exited one.
	async fn relaunch(self: &Arc<Self>, exited: &SessionHandle) -> Result<()> {
		let runtime = exited.runtime_metadata().clone();
		let key = self
			.directory
			.target_of(exited.session_id())
			.ok_or_else(|| Error::UnknownSession(exited.session_id().to_string()))?;

		if let Some(occupant) = self.occupant(&key) {
			if occupant.session_id() != exited.session_id() {
				return Err(conflict(&key, &occupant, &runtime, &exited.metadata().start_reason));
			}
		}

		let manager = self.managers.resolve_manager_for(&runtime)?;
		let session = manager
			.create_session(&runtime, exited.metadata().clone())
			.await
			.map_err(Error::provider)?;
		self.launch(key, session, true).await.map(|_| ())
	}

	async fn shutdown_in_queue(self: Arc<Self>, key: TargetKey, reason: RuntimeExitReason) -> Result<()> {
		let Some(session) = self.occupant(&key) else {
			debug!(target = "rsm.session", %key, "no session to shut down");
			return Ok(());
		};
		self.shutdown_session(&session, reason).await
	}

	/// Asks `session` to shut down and waits for its end-of-session event.
	async fn shutdown_session(&self, session: &SessionHandle, reason: RuntimeExitReason) -> Result<()> {
		let session_id = session.session_id();
		let mut exits = session.subscribe_exit();
		info!(target = "rsm.session", %session_id, ?reason, "shutting down session");
		if let Err(err) = session.shutdown(reason).await {
			warn!(target = "rsm.session", %session_id, error = %err, "shutdown failed");
			return Err(Error::provider(err));
		}

		let limit = self.config.shutdown_timeout();
		match wait_for_exit(&mut exits, limit).await {
			Ok(_) => {
				self.retire(session);
				Ok(())
			}
			Err(_) => {
				warn!(target = "rsm.session", %session_id, timeout_ms = millis(limit), "shutdown timed out");
				Err(Error::ShutdownTimeout {
					session_id: session_id.to_string(),
					timeout_ms: millis(limit),
				})
			}
		}
	}

	async fn force_quit_in_queue(self: Arc<Self>, session_id: String) -> Result<()> {
		let session = self.directory.get(&session_id).ok_or(Error::UnknownSession(session_id))?;
		warn!(target = "rsm.session", session_id = %session.session_id(), "force quitting session");
		let result = session.force_quit().await.map_err(Error::provider);
		self.retire(&session);
		result
	}

	/// Frees the target held by `session` and drops it from the foreground.
	///
	/// No-op for a session that has been superseded in the directory.
	fn retire(&self, session: &SessionHandle) {
		if !self.is_current(session) {
			return;
		}
		let session_id = session.session_id();
		if let Some(key) = self.directory.bound_target(session) {
			self.directory.unbind(&key, session_id);
		}
		if self.directory.clear_foreground_if(session_id) {
			info!(target = "rsm.session", %session_id, "foreground session cleared");
			self.did_change_foreground.fire(&None);
		}
	}

	fn change_foreground(&self, session: Option<SessionHandle>) {
		if self.directory.set_foreground(session.as_ref().map(|session| session.session_id())) {
			info!(
				target = "rsm.session",
				session_id = session.as_ref().map(|session| session.session_id()).unwrap_or("none"),
				"foreground session changed"
			);
			self.did_change_foreground.fire(&session);
		}
	}

	fn handle_exit(&self, session: &SessionHandle, exit: RuntimeExit) {
		let session_id = session.session_id().to_string();
		info!(
			target = "rsm.session",
			%session_id,
			reason = ?exit.reason,
			exit_code = ?exit.exit_code,
			"session ended"
		);
		let restarting = exit.reason == RuntimeExitReason::Restart;
		self.did_end_session.fire(&SessionEnded { session_id, exit });
		if !restarting {
			self.retire(session);
		}
	}

	/// Forwards state changes and the end-of-session event of `session` until
	/// it is removed from the directory.
	fn spawn_watcher(self: &Arc<Self>, session: &SessionHandle) {
		let service = Arc::downgrade(self);
		let watched: Weak<dyn RuntimeSession> = Arc::downgrade(session);
		let session_id = session.session_id().to_string();
		let mut states = session.watch_state();
		let mut exits = session.subscribe_exit();
		let mut last = *states.borrow_and_update();

		let task = tokio::spawn(async move {
			loop {
				tokio::select! {
					changed = states.changed() => {
						if changed.is_err() {
							break;
						}
						let next = *states.borrow_and_update();
						if next == last {
							continue;
						}
						let Some(service) = service.upgrade() else { break };
						service.did_change_runtime_state.fire(&RuntimeStateChange {
							session_id: session_id.clone(),
							old_state: last,
							new_state: next,
						});
						last = next;
					}
					exit = exits.recv() => match exit {
						Ok(exit) => {
							let (Some(service), Some(session)) = (service.upgrade(), watched.upgrade()) else { break };
							service.handle_exit(&session, exit);
						}
						Err(RecvError::Lagged(skipped)) => {
							debug!(target = "rsm.session", %session_id, skipped, "exit events lagged");
						}
						Err(RecvError::Closed) => break,
					},
				}
			}
		});
		self.directory.set_watcher(session, task.abort_handle());
	}

	fn new_session_metadata(&self, runtime: &RuntimeMetadata, request: &StartSessionRequest) -> SessionMetadata {
		let counter = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
		let session_name = if request.session_name.is_empty() {
			runtime.runtime_name.clone()
		} else {
			request.session_name.clone()
		};
		SessionMetadata {
			session_id: format!("{}-{counter:08x}", runtime.language_id),
			session_mode: request.mode,
			session_name,
			start_reason: request.start_reason.clone(),
			notebook_uri: request.notebook_uri.clone(),
			created_at: now_ts(),
		}
	}
}

fn conflict(key: &TargetKey, existing: &SessionHandle, requested: &RuntimeMetadata, start_reason: &str) -> Error {
	Error::ConflictingRuntime {
		target: key.to_string(),
		existing_runtime: existing.runtime_metadata().runtime_name.clone(),
		existing_state: existing.state().to_string(),
		requested_runtime: requested.runtime_name.clone(),
		start_reason: start_reason.to_string(),
	}
}

fn still_exiting(key: &TargetKey, session: &SessionHandle) -> Error {
	Error::SessionExiting {
		session_id: session.session_id().to_string(),
		target: key.to_string(),
	}
}

/// Whole milliseconds in `limit`, saturating.
fn millis(limit: Duration) -> u64 {
	u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)
}

fn now_ts() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_secs())
		.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fake::{FakeCall, FakeSessionManager};

	fn service_with_fake() -> (RuntimeSessionService, Arc<FakeSessionManager>) {
		let service = RuntimeSessionService::default();
		let manager = Arc::new(FakeSessionManager::new("fake"));
		service.managers().register_manager(manager.clone());
		service
			.runtimes()
			.register_runtime(RuntimeMetadata::new("r1", "test", "1.0", "Runtime One"))
			.unwrap();
		(service, manager)
	}

	#[tokio::test]
	async fn unknown_runtime_fails_without_provider_calls() {
		let (service, manager) = service_with_fake();
		let err = service
			.start_new_runtime_session(StartSessionRequest::console("nope", "test"))
			.await
			.unwrap_err();
		assert!(matches!(err, Error::UnknownRuntime(id) if id == "nope"));
		assert!(manager.calls().is_empty());
	}

	#[tokio::test]
	async fn notebook_without_uri_is_rejected() {
		let (service, _) = service_with_fake();
		let mut request = StartSessionRequest::console("r1", "test");
		request.mode = SessionMode::Notebook;
		let err = service.start_new_runtime_session(request).await.unwrap_err();
		assert!(matches!(err, Error::MissingNotebookUri { .. }));
	}

	#[tokio::test]
	async fn session_ids_are_prefixed_with_language() {
		let (service, manager) = service_with_fake();
		let id = service
			.start_new_runtime_session(StartSessionRequest::console("r1", "test").with_session_name("Console"))
			.await
			.unwrap();
		assert!(id.starts_with("test-"));
		let session = service.get_session(&id).unwrap();
		assert_eq!(session.metadata().session_name, "Console");
		assert_eq!(manager.calls()[0], FakeCall::Create { session_id: id });
	}

	#[tokio::test]
	async fn foreground_must_be_a_known_console() {
		let (service, _) = service_with_fake();
		let notebook = Url::parse("file:///nb.ipynb").unwrap();
		let id = service
			.start_new_runtime_session(StartSessionRequest::notebook("r1", notebook, "test"))
			.await
			.unwrap();

		assert!(matches!(service.set_foreground_session(Some("missing")), Err(Error::UnknownSession(_))));
		assert!(matches!(service.set_foreground_session(Some(&id)), Err(Error::InvalidForeground(_))));
		assert!(service.foreground_session().is_none());
	}

	#[test]
	fn timeouts_report_saturating_millis() {
		assert_eq!(millis(Duration::from_millis(1500)), 1500);
		assert_eq!(millis(Duration::MAX), u64::MAX);
	}

	#[tokio::test]
	async fn preferred_console_requires_a_runtime() {
		let (service, _) = service_with_fake();
		let err = service.start_preferred_console("julia", "test").await.unwrap_err();
		assert!(matches!(err, Error::NoRuntimeForLanguage(language) if language == "julia"));

		let id = service.start_preferred_console("test", "test").await.unwrap();
		assert_eq!(service.get_console_session_for_runtime("r1").unwrap().session_id(), id);
	}
}
