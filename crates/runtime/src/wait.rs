//! Bounded waits over a session's state and exit streams.

use std::time::Duration;

use rsm_protocol::{RuntimeExit, RuntimeState};
use tokio::sync::{broadcast, watch};

/// Why a bounded wait gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
	#[error("timed out")]
	Timeout,
	#[error("state stream closed")]
	Closed,
}

/// Waits until the session reports a state accepted by `accept`.
///
/// The receiver's current value counts, so this returns immediately when the
/// session is already in an accepted state.
pub async fn wait_for_state<F>(rx: &mut watch::Receiver<RuntimeState>, accept: F, timeout: Duration) -> Result<RuntimeState, WaitError>
where
	F: Fn(RuntimeState) -> bool,
{
	match tokio::time::timeout(timeout, rx.wait_for(|state| accept(*state))).await {
		Ok(Ok(state)) => Ok(*state),
		Ok(Err(_)) => Err(WaitError::Closed),
		Err(_) => Err(WaitError::Timeout),
	}
}

/// Waits for a state accepted by `accept` among values published after the
/// receiver last observed the channel.
///
/// Take the receiver before triggering the transition: a receiver obtained
/// from `watch_state()` has already seen the value current at that moment.
pub async fn wait_for_state_change<F>(rx: &mut watch::Receiver<RuntimeState>, accept: F, timeout: Duration) -> Result<RuntimeState, WaitError>
where
	F: Fn(RuntimeState) -> bool,
{
	let changes = async {
		loop {
			if rx.changed().await.is_err() {
				return Err(WaitError::Closed);
			}
			let state = *rx.borrow_and_update();
			if accept(state) {
				return Ok(state);
			}
		}
	};
	tokio::time::timeout(timeout, changes).await.unwrap_or(Err(WaitError::Timeout))
}

/// Waits for the end-of-session event.
///
/// A closed exit stream means the session is gone, which confirms the exit
/// just as well; it yields `None` instead of the event payload.
pub async fn wait_for_exit(rx: &mut broadcast::Receiver<RuntimeExit>, timeout: Duration) -> Result<Option<RuntimeExit>, WaitError> {
	let exit = async {
		loop {
			match rx.recv().await {
				Ok(exit) => return Some(exit),
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					tracing::debug!(target = "rsm.session", skipped, "exit stream lagged; still waiting");
				}
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	};
	tokio::time::timeout(timeout, exit).await.map_err(|_| WaitError::Timeout)
}

#[cfg(test)]
mod tests {
	use rsm_protocol::RuntimeExitReason;

	use super::*;

	#[tokio::test]
	async fn wait_for_state_accepts_current_value() {
		let (_tx, mut rx) = watch::channel(RuntimeState::Ready);
		let state = wait_for_state(&mut rx, RuntimeState::is_running, Duration::from_millis(10)).await;
		assert_eq!(state, Ok(RuntimeState::Ready));
	}

	#[tokio::test(start_paused = true)]
	async fn wait_for_state_change_ignores_current_value() {
		let (_tx, mut rx) = watch::channel(RuntimeState::Ready);
		let state = wait_for_state_change(&mut rx, RuntimeState::is_running, Duration::from_millis(5000)).await;
		assert_eq!(state, Err(WaitError::Timeout));
	}

	#[tokio::test]
	async fn wait_for_state_change_sees_values_published_before_the_call() {
		let (tx, mut rx) = watch::channel(RuntimeState::Ready);
		tx.send(RuntimeState::Restarting).unwrap();
		tx.send(RuntimeState::Ready).unwrap();

		let state = wait_for_state_change(&mut rx, RuntimeState::is_running, Duration::from_millis(10)).await;
		assert_eq!(state, Ok(RuntimeState::Ready));
	}

	#[tokio::test]
	async fn wait_for_state_reports_closed_stream() {
		let (tx, mut rx) = watch::channel(RuntimeState::Starting);
		drop(tx);
		let state = wait_for_state(&mut rx, RuntimeState::is_running, Duration::from_millis(10)).await;
		assert_eq!(state, Err(WaitError::Closed));
	}

	#[tokio::test]
	async fn wait_for_exit_returns_event() {
		let (tx, mut rx) = broadcast::channel(4);
		tx.send(RuntimeExit {
			runtime_name: "R".to_string(),
			exit_code: Some(0),
			reason: RuntimeExitReason::Shutdown,
			message: String::new(),
		})
		.unwrap();

		let exit = wait_for_exit(&mut rx, Duration::from_millis(10)).await.unwrap();
		assert_eq!(exit.map(|e| e.reason), Some(RuntimeExitReason::Shutdown));
	}

	#[tokio::test]
	async fn wait_for_exit_treats_closed_stream_as_exit() {
		let (tx, mut rx) = broadcast::channel::<RuntimeExit>(4);
		drop(tx);
		assert_eq!(wait_for_exit(&mut rx, Duration::from_millis(10)).await, Ok(None));
	}

	#[tokio::test(start_paused = true)]
	async fn wait_for_exit_times_out() {
		let (_tx, mut rx) = broadcast::channel::<RuntimeExit>(4);
		assert_eq!(wait_for_exit(&mut rx, Duration::from_millis(5000)).await, Err(WaitError::Timeout));
	}
}
