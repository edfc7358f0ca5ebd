//! Per-target serialization of lifecycle operations.
//!
//! Each target key has a chain of pending operations. [`RequestQueue::enqueue`]
//! links a new operation onto the chain synchronously, so submission order is
//! the order of `enqueue` calls even if the caller does not await in between.
//! The returned future waits for the previous operation on the same key to
//! settle, successfully or not, then runs its own operation.
//!
//! Keys never block each other. A key with nothing pending runs its operation
//! as soon as the returned future is polled.
//!
//! The futures are lazy: an operation only runs while its future is polled.
//! Dropping a queued future releases its slot, and the next operation on the
//! key proceeds once everything queued before the dropped one has settled.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

/// Resolves once an operation and all operations queued before it have settled.
type Settled = Shared<BoxFuture<'static, ()>>;

struct Tail {
	ticket: u64,
	settled: Settled,
}

/// Serializes operations per key.
pub struct RequestQueue<K> {
	tails: Arc<Mutex<HashMap<K, Tail>>>,
	next_ticket: AtomicU64,
}

impl<K> RequestQueue<K>
where
	K: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
	pub fn new() -> Self {
		Self {
			tails: Arc::new(Mutex::new(HashMap::new())),
			next_ticket: AtomicU64::new(0),
		}
	}

	/// Queues `operation` behind everything already queued for `key`.
	///
	/// The returned future resolves with the operation's own output.
	pub fn enqueue<F, T>(&self, key: K, operation: F) -> BoxFuture<'static, T>
	where
		F: Future<Output = T> + Send + 'static,
		T: Send + 'static,
	{
		let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
		let (done_tx, done_rx) = oneshot::channel();

		let previous = {
			let mut tails = self.tails.lock();
			let previous = tails.get(&key).map(|tail| tail.settled.clone());
			let settled = {
				let previous = previous.clone();
				async move {
					if let Some(previous) = previous {
						previous.await;
					}
					// An Err means the operation was dropped, which settles it too.
					let _ = done_rx.await;
				}
				.boxed()
				.shared()
			};
			tails.insert(key.clone(), Tail { ticket, settled });
			previous
		};

		trace!(target = "rsm.queue", %key, ticket, waiting = previous.is_some(), "operation queued");

		let slot = Slot {
			tails: Arc::clone(&self.tails),
			key,
			ticket,
			done: Some(done_tx),
		};

		async move {
			let slot = slot;
			if let Some(previous) = previous {
				previous.await;
			}
			trace!(target = "rsm.queue", key = %slot.key, ticket = slot.ticket, "operation admitted");
			let output = operation.await;
			drop(slot);
			output
		}
		.boxed()
	}

	/// Number of keys with an operation queued or running.
	pub fn busy_keys(&self) -> usize {
		self.tails.lock().len()
	}

	pub fn is_busy(&self, key: &K) -> bool {
		self.tails.lock().contains_key(key)
	}
}

impl<K> Default for RequestQueue<K>
where
	K: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}

/// Releases a queue position when the operation settles or is dropped.
struct Slot<K: Eq + Hash> {
	tails: Arc<Mutex<HashMap<K, Tail>>>,
	key: K,
	ticket: u64,
	done: Option<oneshot::Sender<()>>,
}

impl<K: Eq + Hash> Drop for Slot<K> {
	fn drop(&mut self) {
		if let Some(done) = self.done.take() {
			let _ = done.send(());
		}
		let mut tails = self.tails.lock();
		if tails.get(&self.key).is_some_and(|tail| tail.ticket == self.ticket) {
			tails.remove(&self.key);
		}
	}
}
