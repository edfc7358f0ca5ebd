//! Contract implemented by session providers.
//!
//! A provider contributes a [`SessionManager`] that claims some set of runtimes
//! and creates [`RuntimeSession`] objects for them. The lifecycle core drives
//! sessions only through this contract; state transitions are reported by the
//! session itself through its state and exit streams.

use std::sync::Arc;

use async_trait::async_trait;
use downcast_rs::{DowncastSync, impl_downcast};
use rsm_protocol::{RuntimeExit, RuntimeExitReason, RuntimeMetadata, RuntimeState, SessionMetadata};
use tokio::sync::{broadcast, watch};

use crate::directory::TargetKey;

/// Shared handle to a live session.
pub type SessionHandle = Arc<dyn RuntimeSession>;

/// One running instance of a language runtime.
///
/// Implementations own their state machine: `start`, `restart` and `shutdown`
/// ask for a transition and the session publishes the resulting states on
/// [`watch_state`](RuntimeSession::watch_state) and its end on
/// [`subscribe_exit`](RuntimeSession::subscribe_exit).
#[async_trait]
pub trait RuntimeSession: DowncastSync {
	fn metadata(&self) -> &SessionMetadata;

	fn runtime_metadata(&self) -> &RuntimeMetadata;

	fn session_id(&self) -> &str {
		&self.metadata().session_id
	}

	/// Current state.
	fn state(&self) -> RuntimeState;

	/// Receiver for state changes. The value current at subscription counts as seen.
	fn watch_state(&self) -> watch::Receiver<RuntimeState>;

	/// Receiver for the end-of-session event.
	fn subscribe_exit(&self) -> broadcast::Receiver<RuntimeExit>;

	async fn start(&self) -> anyhow::Result<()>;

	async fn interrupt(&self) -> anyhow::Result<()>;

	async fn restart(&self) -> anyhow::Result<()>;

	async fn shutdown(&self, reason: RuntimeExitReason) -> anyhow::Result<()>;

	/// Terminates the session without waiting for it to wind down.
	async fn force_quit(&self) -> anyhow::Result<()>;
}

impl_downcast!(sync RuntimeSession);

/// Provider that can create sessions for the runtimes it manages.
#[async_trait]
pub trait SessionManager: Send + Sync {
	/// Name used in logs.
	fn name(&self) -> &str;

	/// Returns `true` when this manager owns `runtime`.
	fn manages_runtime(&self, runtime: &RuntimeMetadata) -> bool;

	/// Creates a new, not yet started session.
	async fn create_session(&self, runtime: &RuntimeMetadata, metadata: SessionMetadata) -> anyhow::Result<SessionHandle>;

	/// Returns a session already running for `target` outside the manager's
	/// control, if the provider knows of one. Such sessions are adopted
	/// instead of creating a new one.
	async fn existing_session(&self, _runtime: &RuntimeMetadata, _target: &TargetKey) -> anyhow::Result<Option<SessionHandle>> {
		Ok(None)
	}
}
