//! Publish/subscribe primitive used for lifecycle notifications.
//!
//! An [`Emitter`] is an ordered list of listeners. Firing an event calls every
//! listener synchronously on the firing task, in subscription order. Each
//! `subscribe` returns a [`Subscription`]; dropping it (or calling
//! [`Subscription::dispose`]) removes the listener.
//!
//! Listeners run outside the emitter's lock, so a listener may subscribe or
//! dispose re-entrantly. A listener disposed during a dispatch still receives
//! the event being dispatched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;
type ListenerList<T> = Mutex<Vec<(u64, Listener<T>)>>;

/// Ordered observer list for events of type `T`.
pub struct Emitter<T> {
	listeners: Arc<ListenerList<T>>,
	next_id: AtomicU64,
}

impl<T: 'static> Emitter<T> {
	pub fn new() -> Self {
		Self {
			listeners: Arc::new(Mutex::new(Vec::new())),
			next_id: AtomicU64::new(0),
		}
	}

	/// Registers `listener`; it stays registered while the returned subscription lives.
	#[must_use = "dropping the subscription unsubscribes the listener"]
	pub fn subscribe<F>(&self, listener: F) -> Subscription
	where
		F: Fn(&T) + Send + Sync + 'static,
	{
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		self.listeners.lock().push((id, Arc::new(listener)));

		let weak: Weak<ListenerList<T>> = Arc::downgrade(&self.listeners);
		Subscription {
			unsubscribe: Some(Box::new(move || {
				if let Some(listeners) = weak.upgrade() {
					listeners.lock().retain(|(listener_id, _)| *listener_id != id);
				}
			})),
		}
	}

	/// Forwards every event into an unbounded channel.
	///
	/// The channel closes once the subscription is dropped.
	pub fn subscribe_channel(&self) -> (mpsc::UnboundedReceiver<T>, Subscription)
	where
		T: Clone + Send,
	{
		let (tx, rx) = mpsc::unbounded_channel();
		let subscription = self.subscribe(move |event: &T| {
			let _ = tx.send(event.clone());
		});
		(rx, subscription)
	}

	/// Delivers `event` to every current listener, in subscription order.
	pub fn fire(&self, event: &T) {
		let snapshot: Vec<Listener<T>> = self.listeners.lock().iter().map(|(_, listener)| Arc::clone(listener)).collect();
		for listener in snapshot {
			listener(event);
		}
	}

	pub fn listener_count(&self) -> usize {
		self.listeners.lock().len()
	}
}

impl<T: 'static> Default for Emitter<T> {
	fn default() -> Self {
		Self::new()
	}
}

/// Handle that keeps a listener registered.
pub struct Subscription {
	unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
	/// Removes the listener now.
	pub fn dispose(mut self) {
		self.run_unsubscribe();
	}

	fn run_unsubscribe(&mut self) {
		if let Some(unsubscribe) = self.unsubscribe.take() {
			unsubscribe();
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.run_unsubscribe();
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription").field("active", &self.unsubscribe.is_some()).finish()
	}
}
