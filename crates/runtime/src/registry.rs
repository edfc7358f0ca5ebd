//! Registry of discovered language runtimes.

use std::collections::HashMap;

use parking_lot::RwLock;
use rsm_protocol::RuntimeMetadata;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::event::Emitter;

#[derive(Default)]
struct RegistryState {
	runtimes: HashMap<String, RuntimeMetadata>,
	/// Runtime ids in registration order.
	order: Vec<String>,
	/// Explicit per-language preference.
	preferred: HashMap<String, String>,
}

/// Holds runtime descriptors keyed by runtime id and language id.
///
/// Descriptors are immutable; the registry only stores and retrieves them.
/// Which runtime is preferred for a language is decided by the caller through
/// [`set_preferred_runtime`](RuntimeRegistry::set_preferred_runtime); absent an
/// explicit choice the most recently registered runtime wins.
#[derive(Default)]
pub struct RuntimeRegistry {
	state: RwLock<RegistryState>,
	on_did_register: Emitter<RuntimeMetadata>,
}

impl RuntimeRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a runtime. Fails if its id is already registered.
	pub fn register_runtime(&self, runtime: RuntimeMetadata) -> Result<()> {
		{
			let mut state = self.state.write();
			if state.runtimes.contains_key(&runtime.runtime_id) {
				return Err(Error::DuplicateRuntime(runtime.runtime_id));
			}
			state.order.push(runtime.runtime_id.clone());
			state.runtimes.insert(runtime.runtime_id.clone(), runtime.clone());
		}

		info!(
			target = "rsm.registry",
			runtime_id = %runtime.runtime_id,
			language_id = %runtime.language_id,
			name = %runtime.runtime_name,
			"runtime registered"
		);
		self.on_did_register.fire(&runtime);
		Ok(())
	}

	/// Removes a runtime and any preference pointing at it.
	pub fn unregister_runtime(&self, runtime_id: &str) -> Option<RuntimeMetadata> {
		let mut state = self.state.write();
		let removed = state.runtimes.remove(runtime_id)?;
		state.order.retain(|id| id != runtime_id);
		state.preferred.retain(|_, id| id != runtime_id);
		debug!(target = "rsm.registry", %runtime_id, "runtime unregistered");
		Some(removed)
	}

	pub fn get_runtime(&self, runtime_id: &str) -> Option<RuntimeMetadata> {
		self.state.read().runtimes.get(runtime_id).cloned()
	}

	/// All runtimes in registration order.
	pub fn registered_runtimes(&self) -> Vec<RuntimeMetadata> {
		let state = self.state.read();
		state.order.iter().filter_map(|id| state.runtimes.get(id).cloned()).collect()
	}

	/// Runtimes for `language_id` in registration order.
	pub fn runtimes_for_language(&self, language_id: &str) -> Vec<RuntimeMetadata> {
		self.registered_runtimes()
			.into_iter()
			.filter(|runtime| runtime.language_id == language_id)
			.collect()
	}

	/// Marks `runtime_id` as the preferred runtime for its language.
	pub fn set_preferred_runtime(&self, runtime_id: &str) -> Result<()> {
		let mut state = self.state.write();
		let language_id = state
			.runtimes
			.get(runtime_id)
			.map(|runtime| runtime.language_id.clone())
			.ok_or_else(|| Error::UnknownRuntime(runtime_id.to_string()))?;
		debug!(target = "rsm.registry", %runtime_id, %language_id, "preferred runtime set");
		state.preferred.insert(language_id, runtime_id.to_string());
		Ok(())
	}

	/// The explicitly preferred runtime for the language, else the most recently registered one.
	pub fn preferred_runtime(&self, language_id: &str) -> Option<RuntimeMetadata> {
		let state = self.state.read();
		if let Some(runtime) = state.preferred.get(language_id).and_then(|id| state.runtimes.get(id)) {
			return Some(runtime.clone());
		}
		state
			.order
			.iter()
			.rev()
			.filter_map(|id| state.runtimes.get(id))
			.find(|runtime| runtime.language_id == language_id)
			.cloned()
	}

	/// Fired after each successful registration.
	pub fn on_did_register_runtime(&self) -> &Emitter<RuntimeMetadata> {
		&self.on_did_register
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use parking_lot::Mutex;

	use super::*;

	fn runtime(id: &str, language: &str) -> RuntimeMetadata {
		RuntimeMetadata::new(id, language, "1.0", format!("Runtime {id}"))
	}

	#[test]
	fn duplicate_registration_is_rejected() {
		let registry = RuntimeRegistry::new();
		registry.register_runtime(runtime("r1", "test")).unwrap();

		let err = registry.register_runtime(runtime("r1", "other")).unwrap_err();
		assert!(matches!(err, Error::DuplicateRuntime(id) if id == "r1"));
		assert_eq!(registry.get_runtime("r1").unwrap().language_id, "test");
	}

	#[test]
	fn preferred_defaults_to_most_recent_registration() {
		let registry = RuntimeRegistry::new();
		registry.register_runtime(runtime("py-311", "python")).unwrap();
		registry.register_runtime(runtime("r-44", "r")).unwrap();
		registry.register_runtime(runtime("py-312", "python")).unwrap();

		assert_eq!(registry.preferred_runtime("python").unwrap().runtime_id, "py-312");
		assert_eq!(registry.preferred_runtime("r").unwrap().runtime_id, "r-44");
		assert!(registry.preferred_runtime("julia").is_none());
	}

	#[test]
	fn explicit_preference_wins_until_unregistered() {
		let registry = RuntimeRegistry::new();
		registry.register_runtime(runtime("py-311", "python")).unwrap();
		registry.register_runtime(runtime("py-312", "python")).unwrap();

		registry.set_preferred_runtime("py-311").unwrap();
		assert_eq!(registry.preferred_runtime("python").unwrap().runtime_id, "py-311");

		registry.unregister_runtime("py-311");
		assert_eq!(registry.preferred_runtime("python").unwrap().runtime_id, "py-312");
		assert!(matches!(registry.set_preferred_runtime("py-311"), Err(Error::UnknownRuntime(_))));
	}

	#[test]
	fn runtimes_for_language_keeps_registration_order() {
		let registry = RuntimeRegistry::new();
		registry.register_runtime(runtime("b", "python")).unwrap();
		registry.register_runtime(runtime("x", "r")).unwrap();
		registry.register_runtime(runtime("a", "python")).unwrap();

		let ids: Vec<_> = registry.runtimes_for_language("python").into_iter().map(|r| r.runtime_id).collect();
		assert_eq!(ids, vec!["b", "a"]);
		assert_eq!(registry.registered_runtimes().len(), 3);
	}

	#[test]
	fn registration_fires_event() {
		let registry = RuntimeRegistry::new();
		let seen = Arc::new(Mutex::new(Vec::new()));
		let _subscription = {
			let seen = Arc::clone(&seen);
			registry.on_did_register_runtime().subscribe(move |runtime| seen.lock().push(runtime.runtime_id.clone()))
		};

		registry.register_runtime(runtime("r1", "test")).unwrap();
		let _ = registry.register_runtime(runtime("r1", "test"));

		assert_eq!(*seen.lock(), vec!["r1".to_string()]);
	}
}
