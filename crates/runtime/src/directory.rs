//! Authoritative map of live sessions and their per-target indices.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rsm_protocol::{RuntimeMetadata, SessionMetadata, SessionMode};
use tokio::task::AbortHandle;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::session::SessionHandle;

/// Uniqueness domain for "one active session at a time".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetKey {
	/// Consoles are unique per language.
	Console(String),
	/// Notebook sessions are unique per document.
	Notebook(Url),
}

impl TargetKey {
	/// Derives the key a session with `metadata` occupies.
	///
	/// Returns `None` for a notebook session without a document URI.
	pub fn for_session(runtime: &RuntimeMetadata, metadata: &SessionMetadata) -> Option<Self> {
		match metadata.session_mode {
			SessionMode::Console => Some(TargetKey::Console(runtime.language_id.clone())),
			SessionMode::Notebook => metadata.notebook_uri.clone().map(TargetKey::Notebook),
		}
	}

	pub fn of(session: &SessionHandle) -> Option<Self> {
		Self::for_session(session.runtime_metadata(), session.metadata())
	}
}

impl std::fmt::Display for TargetKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			TargetKey::Console(language_id) => write!(f, "console for '{language_id}'"),
			TargetKey::Notebook(uri) => write!(f, "notebook {uri}"),
		}
	}
}

struct Entry {
	session: SessionHandle,
	/// Target the session occupies; follows notebook rebinding.
	target: TargetKey,
	/// Insertion sequence, for stable enumeration.
	seq: u64,
	watcher: Option<AbortHandle>,
}

#[derive(Default)]
struct DirectoryState {
	sessions: HashMap<String, Entry>,
	consoles: HashMap<String, String>,
	notebooks: HashMap<Url, String>,
	foreground: Option<String>,
	next_seq: u64,
}

impl DirectoryState {
	fn index(&self, key: &TargetKey) -> Option<&String> {
		match key {
			TargetKey::Console(language_id) => self.consoles.get(language_id),
			TargetKey::Notebook(uri) => self.notebooks.get(uri),
		}
	}

	fn evict_exited(&mut self, key: &TargetKey, keep: &str) {
		let stale: Vec<String> = self
			.sessions
			.iter()
			.filter(|(id, entry)| id.as_str() != keep && entry.target == *key && entry.session.state().is_exited())
			.map(|(id, _)| id.clone())
			.collect();
		for session_id in stale {
			if let Some(watcher) = self.sessions.remove(&session_id).and_then(|entry| entry.watcher) {
				watcher.abort();
			}
			if self.foreground.as_deref() == Some(session_id.as_str()) {
				self.foreground = None;
			}
			debug!(target = "rsm.directory", %session_id, target = %key, "exited session evicted");
		}
	}

	fn index_mut(&mut self, key: &TargetKey) -> IndexSlot<'_> {
		match key {
			TargetKey::Console(language_id) => IndexSlot::Console(&mut self.consoles, language_id.clone()),
			TargetKey::Notebook(uri) => IndexSlot::Notebook(&mut self.notebooks, uri.clone()),
		}
	}
}

enum IndexSlot<'a> {
	Console(&'a mut HashMap<String, String>, String),
	Notebook(&'a mut HashMap<Url, String>, Url),
}

impl IndexSlot<'_> {
	fn bind(self, session_id: String) {
		match self {
			IndexSlot::Console(map, key) => {
				map.insert(key, session_id);
			}
			IndexSlot::Notebook(map, key) => {
				map.insert(key, session_id);
			}
		}
	}

	fn unbind_if(self, session_id: &str) -> bool {
		match self {
			IndexSlot::Console(map, key) => remove_if_bound(map, &key, session_id),
			IndexSlot::Notebook(map, key) => remove_if_bound(map, &key, session_id),
		}
	}
}

fn remove_if_bound<K: Eq + std::hash::Hash>(map: &mut HashMap<K, String>, key: &K, session_id: &str) -> bool {
	if map.get(key).is_some_and(|bound| bound == session_id) {
		map.remove(key);
		true
	} else {
		false
	}
}

/// Session id → session, plus "current session for target" indices.
///
/// Reads are synchronous. Writes that depend on lifecycle outcomes are guarded
/// by identity (`Arc::ptr_eq` or the bound session id) so that a late result
/// from a superseded operation cannot clobber a newer entry.
#[derive(Default)]
pub struct SessionDirectory {
	state: RwLock<DirectoryState>,
}

impl SessionDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `session` and binds it as the current session for `key`.
	///
	/// An existing entry under the same id is replaced and its watcher aborted.
	/// Exited sessions recorded under `key` are evicted.
	pub fn insert(&self, key: &TargetKey, session: SessionHandle) {
		let session_id = session.session_id().to_string();
		let mut state = self.state.write();
		state.evict_exited(key, &session_id);
		let seq = state.next_seq;
		state.next_seq += 1;
		let replaced = state.sessions.insert(
			session_id.clone(),
			Entry {
				session,
				target: key.clone(),
				seq,
				watcher: None,
			},
		);
		if let Some(previous) = replaced.and_then(|entry| entry.watcher) {
			previous.abort();
		}
		state.index_mut(key).bind(session_id.clone());
		debug!(target = "rsm.directory", %session_id, target = %key, "session registered");
	}

	/// Attaches the task observing `session_id`, if the entry is still `session`.
	pub fn set_watcher(&self, session: &SessionHandle, watcher: AbortHandle) {
		let mut state = self.state.write();
		match state.sessions.get_mut(session.session_id()) {
			Some(entry) if Arc::ptr_eq(&entry.session, session) => {
				if let Some(previous) = entry.watcher.replace(watcher) {
					previous.abort();
				}
			}
			_ => watcher.abort(),
		}
	}

	/// Removes the entry for `session` entirely, if it is still the registered one.
	pub fn remove(&self, session: &SessionHandle) -> bool {
		let session_id = session.session_id();
		let mut state = self.state.write();
		let is_current = state.sessions.get(session_id).is_some_and(|entry| Arc::ptr_eq(&entry.session, session));
		if !is_current {
			return false;
		}
		if let Some(entry) = state.sessions.remove(session_id) {
			if let Some(watcher) = entry.watcher {
				watcher.abort();
			}
			state.index_mut(&entry.target).unbind_if(session_id);
		}
		if state.foreground.as_deref() == Some(session_id) {
			state.foreground = None;
		}
		debug!(target = "rsm.directory", %session_id, "session removed");
		true
	}

	/// Clears `key`'s index if it still points at `session_id`.
	///
	/// The session itself stays retrievable by id.
	pub fn unbind(&self, key: &TargetKey, session_id: &str) -> bool {
		let unbound = self.state.write().index_mut(key).unbind_if(session_id);
		if unbound {
			debug!(target = "rsm.directory", %session_id, target = %key, "session unbound from target");
		}
		unbound
	}

	/// Moves a notebook binding to a new document URI.
	///
	/// Returns the rebound session id, or `None` if nothing was bound to `from`.
	pub fn rebind_notebook(&self, from: &Url, to: &Url) -> Result<Option<String>> {
		let mut state = self.state.write();
		if from == to {
			return Ok(state.notebooks.get(from).cloned());
		}
		if state.notebooks.contains_key(to) {
			return Err(Error::NotebookUriInUse(to.clone()));
		}
		let Some(session_id) = state.notebooks.remove(from) else {
			return Ok(None);
		};
		state.notebooks.insert(to.clone(), session_id.clone());
		if let Some(entry) = state.sessions.get_mut(&session_id) {
			entry.target = TargetKey::Notebook(to.clone());
		}
		debug!(target = "rsm.directory", %session_id, %from, %to, "notebook session rebound");
		Ok(Some(session_id))
	}

	pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
		self.state.read().sessions.get(session_id).map(|entry| Arc::clone(&entry.session))
	}

	/// The session currently bound to `key`, whatever its state.
	pub fn session_for_target(&self, key: &TargetKey) -> Option<SessionHandle> {
		let state = self.state.read();
		state
			.index(key)
			.and_then(|id| state.sessions.get(id))
			.map(|entry| Arc::clone(&entry.session))
	}

	/// The target recorded for `session_id`, whether or not it is still bound there.
	pub fn target_of(&self, session_id: &str) -> Option<TargetKey> {
		self.state.read().sessions.get(session_id).map(|entry| entry.target.clone())
	}

	/// The target `session` is bound to, if its index still points at it.
	pub fn bound_target(&self, session: &SessionHandle) -> Option<TargetKey> {
		let state = self.state.read();
		let entry = state.sessions.get(session.session_id()).filter(|entry| Arc::ptr_eq(&entry.session, session))?;
		(state.index(&entry.target).map(String::as_str) == Some(session.session_id())).then(|| entry.target.clone())
	}

	pub fn console_for_language(&self, language_id: &str) -> Option<SessionHandle> {
		self.session_for_target(&TargetKey::Console(language_id.to_string()))
	}

	pub fn console_for_runtime(&self, runtime_id: &str) -> Option<SessionHandle> {
		let state = self.state.read();
		state
			.consoles
			.values()
			.filter_map(|id| state.sessions.get(id))
			.map(|entry| &entry.session)
			.find(|session| session.runtime_metadata().runtime_id == runtime_id)
			.cloned()
	}

	pub fn notebook_for_uri(&self, uri: &Url) -> Option<SessionHandle> {
		self.session_for_target(&TargetKey::Notebook(uri.clone()))
	}

	/// Every registered session in registration order, including exited ones
	/// whose target has not been taken over.
	pub fn sessions(&self) -> Vec<SessionHandle> {
		let state = self.state.read();
		let mut entries: Vec<&Entry> = state.sessions.values().collect();
		entries.sort_by_key(|entry| entry.seq);
		entries.into_iter().map(|entry| Arc::clone(&entry.session)).collect()
	}

	pub fn foreground(&self) -> Option<SessionHandle> {
		let state = self.state.read();
		state
			.foreground
			.as_ref()
			.and_then(|id| state.sessions.get(id))
			.map(|entry| Arc::clone(&entry.session))
	}

	/// Sets the foreground session id; returns `true` if it changed.
	pub fn set_foreground(&self, session_id: Option<&str>) -> bool {
		let mut state = self.state.write();
		if state.foreground.as_deref() == session_id {
			return false;
		}
		state.foreground = session_id.map(str::to_string);
		true
	}

	/// Clears the foreground if it is `session_id`; returns `true` if it was.
	pub fn clear_foreground_if(&self, session_id: &str) -> bool {
		let mut state = self.state.write();
		if state.foreground.as_deref() == Some(session_id) {
			state.foreground = None;
			true
		} else {
			false
		}
	}

	pub fn len(&self) -> usize {
		self.state.read().sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
