// Integration tests for per-target serialization of lifecycle requests
//
// Tests cover:
// - Provider call order for start, restart and shutdown on one target
// - Independent targets proceeding concurrently

use std::sync::Arc;
use std::time::Duration;

use rsm_protocol::{RuntimeExitReason, RuntimeMetadata, RuntimeState};
use rsm_runtime::fake::{FakeBehavior, FakeCall, FakeSessionManager};
use rsm_runtime::{RuntimeSessionService, StartSessionRequest};
use url::Url;

fn setup(behavior: FakeBehavior) -> (RuntimeSessionService, Arc<FakeSessionManager>) {
	let service = RuntimeSessionService::default();
	let manager = Arc::new(FakeSessionManager::new("fake").with_default_behavior(behavior));
	service.managers().register_manager(manager.clone());
	service
		.runtimes()
		.register_runtime(RuntimeMetadata::new("r1", "test", "1.0", "Runtime One"))
		.expect("Failed to register runtime");
	(service, manager)
}

#[tokio::test(start_paused = true)]
async fn test_start_restart_shutdown_reach_provider_in_order() {
	let (service, manager) = setup(FakeBehavior {
		start_delay_ms: 100,
		..Default::default()
	});

	let start = tokio::spawn(service.start_new_runtime_session(StartSessionRequest::console("r1", "test")));

	// Let the start reach the provider; it stays in `Starting` for the delay.
	let session = loop {
		if let Some(session) = service.get_console_session_for_language("test") {
			break session;
		}
		tokio::task::yield_now().await;
	};
	assert_eq!(session.state(), RuntimeState::Starting);
	let id = session.session_id().to_string();

	// Queue both without awaiting in between.
	let restart = service.restart_session(&id, "test");
	let shutdown = service.shutdown_console_session("test", RuntimeExitReason::Shutdown);
	let (restart, shutdown) = tokio::join!(restart, shutdown);

	restart.expect("restart should succeed");
	shutdown.expect("shutdown should succeed");
	assert_eq!(start.await.expect("start task").expect("start should succeed"), id);

	assert_eq!(
		manager.calls(),
		vec![
			FakeCall::Create { session_id: id.clone() },
			FakeCall::Start { session_id: id.clone() },
			FakeCall::Restart { session_id: id.clone() },
			FakeCall::Shutdown {
				session_id: id,
				reason: RuntimeExitReason::Shutdown,
			},
		]
	);
	assert!(service.get_console_session_for_language("test").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_independent_targets_do_not_wait_for_each_other() {
	let (service, manager) = setup(FakeBehavior {
		start_delay_ms: 10_000,
		..Default::default()
	});
	let notebook = Url::parse("file:///nb.ipynb").expect("valid url");

	let begun = tokio::time::Instant::now();
	let (console, notebook) = tokio::join!(
		service.start_new_runtime_session(StartSessionRequest::console("r1", "test")),
		service.start_new_runtime_session(StartSessionRequest::notebook("r1", notebook, "open")),
	);

	console.expect("console should start");
	notebook.expect("notebook should start");
	assert!(begun.elapsed() < Duration::from_millis(20_000), "starts were serialized: {:?}", begun.elapsed());
	assert_eq!(manager.create_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_queued_behind_slow_start_sees_started_session() {
	let (service, manager) = setup(FakeBehavior {
		start_delay_ms: 500,
		..Default::default()
	});

	let start = service.start_new_runtime_session(StartSessionRequest::console("r1", "test"));
	let shutdown = service.shutdown_console_session("test", RuntimeExitReason::Shutdown);
	let (start, shutdown) = tokio::join!(start, shutdown);

	let id = start.expect("start should succeed");
	shutdown.expect("shutdown should succeed");
	assert!(manager.calls().contains(&FakeCall::Shutdown {
		session_id: id.clone(),
		reason: RuntimeExitReason::Shutdown,
	}));
	assert_eq!(service.get_session(&id).map(|s| s.state()), Some(RuntimeState::Exited));
}
