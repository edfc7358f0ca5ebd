//! In-memory session provider for tests and simulations.
//!
//! [`FakeSessionManager`] creates [`FakeSession`]s whose reactions to
//! `start`/`restart`/`shutdown` are scripted per runtime through
//! [`FakeBehavior`]. Every provider call is appended to a shared [`CallLog`],
//! which lets tests assert the exact order in which the lifecycle core drove
//! the provider.
//!
//! # Example
//!
//! ```ignore
//! let manager = Arc::new(FakeSessionManager::new("fake"));
//! manager.set_behavior("r1", FakeBehavior { shutdown: ShutdownBehavior::NeverExit, ..Default::default() });
//! service.managers().register_manager(manager.clone());
//!
//! service.start_new_runtime_session(request).await?;
//! assert_eq!(manager.calls()[0], FakeCall::Create { session_id: id });
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rsm_protocol::{RuntimeExit, RuntimeExitReason, RuntimeMetadata, RuntimeState, SessionMetadata, SessionMode};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use url::Url;

use crate::directory::TargetKey;
use crate::session::{RuntimeSession, SessionHandle, SessionManager};

/// How a fake session reacts to `start`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "message")]
pub enum StartBehavior {
	/// Reach `Ready` and succeed.
	#[default]
	Ready,
	/// Exit with `StartupFailed` and return the message as an error.
	Fail(String),
	/// Stay in `Starting` forever.
	Hang,
}

/// How a fake session reacts to `restart`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "message")]
pub enum RestartBehavior {
	/// Go through `Restarting` and come back `Ready`.
	#[default]
	Cycle,
	/// Enter `Restarting` and never come back.
	Stall,
	Fail(String),
}

/// How a fake session reacts to `shutdown`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "message")]
pub enum ShutdownBehavior {
	/// Exit and publish the end-of-session event.
	#[default]
	Exit,
	/// Enter `Exiting` and never publish the end-of-session event.
	NeverExit,
	Fail(String),
}

/// Scripted reactions of a fake session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FakeBehavior {
	pub start: StartBehavior,
	pub restart: RestartBehavior,
	pub shutdown: ShutdownBehavior,
	/// Time spent in `Starting` before the start outcome.
	pub start_delay_ms: u64,
	/// Time spent in `Exiting` before the exit is published.
	pub shutdown_delay_ms: u64,
}

/// A provider call recorded by the fake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "call")]
pub enum FakeCall {
	Create { session_id: String },
	Adopt { session_id: String },
	Start { session_id: String },
	Interrupt { session_id: String },
	Restart { session_id: String },
	Shutdown { session_id: String, reason: RuntimeExitReason },
	ForceQuit { session_id: String },
}

/// Shared, ordered log of provider calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<FakeCall>>>);

impl CallLog {
	fn push(&self, call: FakeCall) {
		self.0.lock().push(call);
	}

	pub fn calls(&self) -> Vec<FakeCall> {
		self.0.lock().clone()
	}
}

/// Session whose transitions follow a [`FakeBehavior`].
pub struct FakeSession {
	metadata: SessionMetadata,
	runtime: RuntimeMetadata,
	state_tx: watch::Sender<RuntimeState>,
	exit_tx: broadcast::Sender<RuntimeExit>,
	behavior: Mutex<FakeBehavior>,
	log: CallLog,
}

impl FakeSession {
	pub fn new(runtime: RuntimeMetadata, metadata: SessionMetadata, behavior: FakeBehavior, log: CallLog) -> Arc<Self> {
		let (state_tx, _) = watch::channel(RuntimeState::Uninitialized);
		let (exit_tx, _) = broadcast::channel(16);
		Arc::new(Self {
			metadata,
			runtime,
			state_tx,
			exit_tx,
			behavior: Mutex::new(behavior),
			log,
		})
	}

	/// A default-behaved session not attached to any manager.
	pub fn detached(runtime: RuntimeMetadata, session_id: &str, mode: SessionMode, notebook_uri: Option<Url>) -> SessionHandle {
		let metadata = SessionMetadata {
			session_id: session_id.to_string(),
			session_mode: mode,
			session_name: runtime.runtime_name.clone(),
			start_reason: "test".to_string(),
			notebook_uri,
			created_at: 0,
		};
		Self::new(runtime, metadata, FakeBehavior::default(), CallLog::default())
	}

	pub fn set_behavior(&self, behavior: FakeBehavior) {
		*self.behavior.lock() = behavior;
	}

	/// Publishes `state` as if the runtime had transitioned on its own.
	pub fn set_state(&self, state: RuntimeState) {
		self.state_tx.send_replace(state);
	}

	/// Simulates the runtime ending on its own, e.g. a crash.
	pub fn emit_exit(&self, reason: RuntimeExitReason, exit_code: Option<i32>) {
		self.set_state(RuntimeState::Exited);
		let _ = self.exit_tx.send(RuntimeExit {
			runtime_name: self.runtime.runtime_name.clone(),
			exit_code,
			reason,
			message: String::new(),
		});
	}

	fn behavior(&self) -> FakeBehavior {
		self.behavior.lock().clone()
	}

	fn session_id_owned(&self) -> String {
		self.metadata.session_id.clone()
	}
}

#[async_trait]
impl RuntimeSession for FakeSession {
	fn metadata(&self) -> &SessionMetadata {
		&self.metadata
	}

	fn runtime_metadata(&self) -> &RuntimeMetadata {
		&self.runtime
	}

	fn state(&self) -> RuntimeState {
		*self.state_tx.borrow()
	}

	fn watch_state(&self) -> watch::Receiver<RuntimeState> {
		self.state_tx.subscribe()
	}

	fn subscribe_exit(&self) -> broadcast::Receiver<RuntimeExit> {
		self.exit_tx.subscribe()
	}

	async fn start(&self) -> anyhow::Result<()> {
		self.log.push(FakeCall::Start {
			session_id: self.session_id_owned(),
		});
		let behavior = self.behavior();
		self.set_state(RuntimeState::Starting);
		if behavior.start_delay_ms > 0 {
			tokio::time::sleep(Duration::from_millis(behavior.start_delay_ms)).await;
		}

		match behavior.start {
			StartBehavior::Ready => {
				self.set_state(RuntimeState::Ready);
				Ok(())
			}
			StartBehavior::Fail(message) => {
				self.emit_exit(RuntimeExitReason::StartupFailed, Some(1));
				Err(anyhow::anyhow!(message))
			}
			StartBehavior::Hang => std::future::pending().await,
		}
	}

	async fn interrupt(&self) -> anyhow::Result<()> {
		self.log.push(FakeCall::Interrupt {
			session_id: self.session_id_owned(),
		});
		if self.state() == RuntimeState::Busy {
			self.set_state(RuntimeState::Interrupting);
			self.set_state(RuntimeState::Idle);
		}
		Ok(())
	}

	async fn restart(&self) -> anyhow::Result<()> {
		self.log.push(FakeCall::Restart {
			session_id: self.session_id_owned(),
		});
		match self.behavior().restart {
			RestartBehavior::Cycle => {
				self.set_state(RuntimeState::Restarting);
				self.emit_exit(RuntimeExitReason::Restart, Some(0));
				self.set_state(RuntimeState::Starting);
				self.set_state(RuntimeState::Ready);
				Ok(())
			}
			RestartBehavior::Stall => {
				self.set_state(RuntimeState::Restarting);
				Ok(())
			}
			RestartBehavior::Fail(message) => Err(anyhow::anyhow!(message)),
		}
	}

	async fn shutdown(&self, reason: RuntimeExitReason) -> anyhow::Result<()> {
		self.log.push(FakeCall::Shutdown {
			session_id: self.session_id_owned(),
			reason,
		});
		let behavior = self.behavior();
		match behavior.shutdown {
			ShutdownBehavior::Exit => {
				self.set_state(RuntimeState::Exiting);
				if behavior.shutdown_delay_ms > 0 {
					tokio::time::sleep(Duration::from_millis(behavior.shutdown_delay_ms)).await;
				}
				self.emit_exit(reason, Some(0));
				Ok(())
			}
			ShutdownBehavior::NeverExit => {
				self.set_state(RuntimeState::Exiting);
				Ok(())
			}
			ShutdownBehavior::Fail(message) => Err(anyhow::anyhow!(message)),
		}
	}

	async fn force_quit(&self) -> anyhow::Result<()> {
		self.log.push(FakeCall::ForceQuit {
			session_id: self.session_id_owned(),
		});
		self.emit_exit(RuntimeExitReason::ForcedQuit, None);
		Ok(())
	}
}

/// Session manager producing [`FakeSession`]s.
pub struct FakeSessionManager {
	name: String,
	/// Runtime ids this manager claims; all runtimes when `None`.
	runtimes: Option<HashSet<String>>,
	default_behavior: Mutex<FakeBehavior>,
	behaviors: Mutex<HashMap<String, FakeBehavior>>,
	seeded: Mutex<Vec<Arc<FakeSession>>>,
	created: Mutex<Vec<Arc<FakeSession>>>,
	log: CallLog,
}

impl FakeSessionManager {
	/// A manager that claims every runtime.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			runtimes: None,
			default_behavior: Mutex::new(FakeBehavior::default()),
			behaviors: Mutex::new(HashMap::new()),
			seeded: Mutex::new(Vec::new()),
			created: Mutex::new(Vec::new()),
			log: CallLog::default(),
		}
	}

	/// A manager that claims only the listed runtime ids.
	pub fn for_runtimes<I, S>(name: impl Into<String>, runtime_ids: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			runtimes: Some(runtime_ids.into_iter().map(Into::into).collect()),
			..Self::new(name)
		}
	}

	/// Behavior for runtimes without a specific script.
	pub fn with_default_behavior(self, behavior: FakeBehavior) -> Self {
		*self.default_behavior.lock() = behavior;
		self
	}

	/// Scripts sessions created from now on for `runtime_id`.
	pub fn set_behavior(&self, runtime_id: impl Into<String>, behavior: FakeBehavior) {
		self.behaviors.lock().insert(runtime_id.into(), behavior);
	}

	/// Registers a session that is already running outside the manager's
	/// control; the next start for its target adopts it.
	pub fn seed_existing(&self, runtime: RuntimeMetadata, metadata: SessionMetadata, state: RuntimeState) -> Arc<FakeSession> {
		let behavior = self.behavior_for(&runtime.runtime_id);
		let session = FakeSession::new(runtime, metadata, behavior, self.log.clone());
		session.set_state(state);
		self.seeded.lock().push(Arc::clone(&session));
		session
	}

	/// Every provider call so far, across all sessions of this manager.
	pub fn calls(&self) -> Vec<FakeCall> {
		self.log.calls()
	}

	pub fn call_log(&self) -> CallLog {
		self.log.clone()
	}

	/// Sessions created through `create_session`, in creation order.
	pub fn created_sessions(&self) -> Vec<Arc<FakeSession>> {
		self.created.lock().clone()
	}

	pub fn create_count(&self) -> usize {
		self.created.lock().len()
	}

	fn behavior_for(&self, runtime_id: &str) -> FakeBehavior {
		self.behaviors
			.lock()
			.get(runtime_id)
			.cloned()
			.unwrap_or_else(|| self.default_behavior.lock().clone())
	}
}

#[async_trait]
impl SessionManager for FakeSessionManager {
	fn name(&self) -> &str {
		&self.name
	}

	fn manages_runtime(&self, runtime: &RuntimeMetadata) -> bool {
		self.runtimes.as_ref().is_none_or(|ids| ids.contains(&runtime.runtime_id))
	}

	async fn create_session(&self, runtime: &RuntimeMetadata, metadata: SessionMetadata) -> anyhow::Result<SessionHandle> {
		self.log.push(FakeCall::Create {
			session_id: metadata.session_id.clone(),
		});
		let session = FakeSession::new(runtime.clone(), metadata, self.behavior_for(&runtime.runtime_id), self.log.clone());
		self.created.lock().push(Arc::clone(&session));
		Ok(session)
	}

	async fn existing_session(&self, runtime: &RuntimeMetadata, target: &TargetKey) -> anyhow::Result<Option<SessionHandle>> {
		let mut seeded = self.seeded.lock();
		let position = seeded.iter().position(|session| {
			session.runtime.runtime_id == runtime.runtime_id && TargetKey::for_session(&session.runtime, &session.metadata).as_ref() == Some(target)
		});
		let Some(position) = position else {
			return Ok(None);
		};
		let session = seeded.remove(position);
		self.log.push(FakeCall::Adopt {
			session_id: session.session_id_owned(),
		});
		Ok(Some(session))
	}
}
