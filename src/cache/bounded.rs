//! Sharded, size-bounded map whose entries carry an explicit wall-clock deadline.

// std
use std::{
	collections::VecDeque,
	hash::Hash,
	sync::{
		Mutex, PoisonError,
		atomic::{AtomicU64, Ordering},
	},
};
// crates.io
use dashmap::DashMap;
// self
use crate::{_prelude::*, clock::SharedClock};

#[derive(Clone, Debug)]
struct Slot<V> {
	value: V,
	expires_at: DateTime<Utc>,
	sequence: u64,
}

/// Concurrent TTL map evicting the oldest insertion once `capacity` is exceeded.
///
/// Reads and writes go through `DashMap` shards; only the insertion-order queue used for
/// eviction sits behind a single mutex, and it is touched once per insert.
#[derive(Debug)]
pub struct BoundedTtlCache<K, V>
where
	K: Eq + Hash,
{
	entries: DashMap<K, Slot<V>>,
	order: Mutex<VecDeque<(K, u64)>>,
	sequence: AtomicU64,
	capacity: usize,
	clock: SharedClock,
}
impl<K, V> BoundedTtlCache<K, V>
where
	K: Clone + Eq + Hash,
	V: Clone,
{
	/// Create an empty cache holding at most `capacity` entries.
	pub fn new(capacity: usize, clock: SharedClock) -> Self {
		let capacity = capacity.max(1);

		Self {
			entries: DashMap::with_capacity(capacity.min(4_096)),
			order: Mutex::new(VecDeque::new()),
			sequence: AtomicU64::new(0),
			capacity,
			clock,
		}
	}

	/// Maximum number of live entries.
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Number of stored entries, including ones that expired but were not yet purged.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether no entries are stored.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Clock used for deadline checks.
	pub fn clock(&self) -> &SharedClock {
		&self.clock
	}

	/// Return a live value, dropping it first if its deadline has passed.
	pub fn get(&self, key: &K) -> Option<V> {
		let now = self.clock.now();
		let expired = match self.entries.get(key) {
			Some(slot) if slot.expires_at > now => return Some(slot.value.clone()),
			Some(_) => true,
			None => false,
		};

		if expired {
			self.entries.remove_if(key, |_, slot| slot.expires_at <= now);
		}

		None
	}

	/// Whether a live entry exists for `key`.
	pub fn contains(&self, key: &K) -> bool {
		self.get(key).is_some()
	}

	/// Store `value` for `ttl`. A zero TTL removes any existing entry instead.
	pub fn insert(&self, key: K, value: V, ttl: Duration) {
		if ttl.is_zero() {
			self.remove(&key);

			return;
		}

		let now = self.clock.now();
		let expires_at = TimeDelta::from_std(ttl)
			.ok()
			.and_then(|delta| now.checked_add_signed(delta))
			.unwrap_or(DateTime::<Utc>::MAX_UTC);
		let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

		self.entries.insert(key.clone(), Slot { value, expires_at, sequence });
		self.order.lock().unwrap_or_else(PoisonError::into_inner).push_back((key, sequence));
		self.evict_overflow();
	}

	/// Remove an entry, returning its value if it was still live.
	pub fn remove(&self, key: &K) -> Option<V> {
		let now = self.clock.now();

		self.entries
			.remove(key)
			.and_then(|(_, slot)| (slot.expires_at > now).then_some(slot.value))
	}

	/// Drop every expired entry.
	pub fn purge_expired(&self) -> usize {
		let now = self.clock.now();
		let before = self.entries.len();

		self.entries.retain(|_, slot| slot.expires_at > now);

		let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);

		order.retain(|(key, sequence)| {
			self.entries.get(key).is_some_and(|slot| slot.sequence == *sequence)
		});

		before.saturating_sub(self.entries.len())
	}

	fn evict_overflow(&self) {
		let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);

		while self.entries.len() > self.capacity {
			let Some((key, sequence)) = order.pop_front() else {
				break;
			};

			// Re-inserted keys leave stale queue records; only the matching sequence evicts.
			self.entries.remove_if(&key, |_, slot| slot.sequence == sequence);
		}

		if order.len() > self.capacity.saturating_mul(2) {
			order.retain(|(key, sequence)| {
				self.entries.get(key).is_some_and(|slot| slot.sequence == *sequence)
			});
		}
	}
}
