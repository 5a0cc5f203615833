//! Per-subject sharded maps so unrelated subjects never contend on one lock.

// std
use std::borrow::Borrow;
// self
use crate::_prelude::*;

pub(crate) const DEFAULT_SHARDS: usize = 16;

/// Fixed set of mutex-guarded maps selected by key hash.
///
/// Critical sections must stay synchronous; no guard may be held across an `.await`.
pub(crate) struct Sharded<K, V> {
	shards: Box<[Mutex<HashMap<K, V>>]>,
}
impl<K, V> Sharded<K, V>
where
	K: Eq + Hash,
{
	pub(crate) fn new(count: usize) -> Self {
		Self { shards: (0..count.max(1)).map(|_| Mutex::new(HashMap::new())).collect() }
	}

	pub(crate) fn shard<Q>(&self, key: &Q) -> &Mutex<HashMap<K, V>>
	where
		K: Borrow<Q>,
		Q: ?Sized + Hash,
	{
		let mut hasher = DefaultHasher::new();

		key.hash(&mut hasher);

		&self.shards[(hasher.finish() % self.shards.len() as u64) as usize]
	}

	pub(crate) fn iter(&self) -> impl Iterator<Item = &Mutex<HashMap<K, V>>> {
		self.shards.iter()
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.shards.iter().map(|shard| shard.lock().len()).sum()
	}
}
impl<K, V> Default for Sharded<K, V>
where
	K: Eq + Hash,
{
	fn default() -> Self {
		Self::new(DEFAULT_SHARDS)
	}
}
impl<K, V> Debug for Sharded<K, V> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Sharded").field("shards", &self.shards.len()).finish()
	}
}
