//! Ordered table of session managers.

use std::sync::Arc;

use parking_lot::RwLock;
use rsm_protocol::RuntimeMetadata;
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::SessionManager;

/// Resolves which provider owns a runtime.
///
/// Managers are consulted in registration order and the first one whose
/// [`manages_runtime`](SessionManager::manages_runtime) accepts the runtime
/// wins, so an override manager must be registered before the one it shadows.
#[derive(Default)]
pub struct ManagerRegistry {
	managers: RwLock<Vec<Arc<dyn SessionManager>>>,
}

impl ManagerRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register_manager(&self, manager: Arc<dyn SessionManager>) {
		debug!(target = "rsm.registry", manager = manager.name(), "session manager registered");
		self.managers.write().push(manager);
	}

	pub fn resolve_manager_for(&self, runtime: &RuntimeMetadata) -> Result<Arc<dyn SessionManager>> {
		self.managers
			.read()
			.iter()
			.find(|manager| manager.manages_runtime(runtime))
			.cloned()
			.ok_or_else(|| Error::NoManagerFound {
				runtime_id: runtime.runtime_id.clone(),
				runtime_name: runtime.runtime_name.clone(),
			})
	}

	pub fn len(&self) -> usize {
		self.managers.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
