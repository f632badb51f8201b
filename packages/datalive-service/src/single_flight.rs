//! Collapses concurrent computations for the same key into one.
//!
//! The first caller for a key becomes the leader and runs the computation; callers arriving
//! while it is in flight wait on a watch channel and receive a clone of the leader's value. If
//! the leader is dropped before finishing, waiters race to become the next leader.

use std::{
	collections::HashMap,
	future::Future,
	sync::{
		Mutex,
		atomic::{AtomicU64, Ordering},
	},
};

use tokio::sync::watch;

pub struct SingleFlight<T> {
	inflight: Mutex<HashMap<String, Flight<T>>>,
	next_generation: AtomicU64,
}

struct Flight<T> {
	generation: u64,
	rx: watch::Receiver<Option<T>>,
}

enum Role<T> {
	Leader { tx: watch::Sender<Option<T>>, generation: u64 },
	Follower(watch::Receiver<Option<T>>),
}

/// Whether the value was computed by this caller or shared from another caller's computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Share {
	Led,
	Joined,
}

impl<T> SingleFlight<T>
where
	T: Clone + Send + Sync,
{
	pub fn new() -> Self {
		Self { inflight: Mutex::new(HashMap::new()), next_generation: AtomicU64::new(0) }
	}

	/// Number of keys currently being computed.
	pub fn in_flight(&self) -> usize {
		self.lock().len()
	}

	pub async fn run<F, Fut>(&self, key: &str, compute: F) -> (T, Share)
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = T>,
	{
		let (tx, generation) = loop {
			match self.join_or_lead(key) {
				Role::Leader { tx, generation } => break (tx, generation),
				Role::Follower(mut rx) => {
					let shared = match rx.wait_for(Option::is_some).await {
						Ok(value) => value.as_ref().cloned(),
						Err(_) => None,
					};

					if let Some(value) = shared {
						return (value, Share::Joined);
					}
					// The leader went away without a value; try again.
				},
			}
		};
		let guard = LeaderGuard { flight: self, key, generation };
		let value = compute().await;

		tx.send_replace(Some(value.clone()));
		drop(guard);

		(value, Share::Led)
	}

	fn join_or_lead(&self, key: &str) -> Role<T> {
		let mut inflight = self.lock();

		if let Some(flight) = inflight.get(key) {
			return Role::Follower(flight.rx.clone());
		}

		let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = watch::channel(None);

		inflight.insert(key.to_string(), Flight { generation, rx });

		Role::Leader { tx, generation }
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Flight<T>>> {
		self.inflight.lock().unwrap_or_else(|err| err.into_inner())
	}
}
impl<T> Default for SingleFlight<T>
where
	T: Clone + Send + Sync,
{
	fn default() -> Self {
		Self::new()
	}
}

/// Removes the leader's entry on completion or cancellation, but never a newer flight's entry.
struct LeaderGuard<'a, T>
where
	T: Clone + Send + Sync,
{
	flight: &'a SingleFlight<T>,
	key: &'a str,
	generation: u64,
}
impl<T> Drop for LeaderGuard<'_, T>
where
	T: Clone + Send + Sync,
{
	fn drop(&mut self) {
		let mut inflight = self.flight.lock();

		if inflight.get(self.key).is_some_and(|flight| flight.generation == self.generation) {
			inflight.remove(self.key);
		}
	}
}
