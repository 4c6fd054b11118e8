use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::try_result::TryResult;
use dashmap::DashMap;

use super::{IndexError, IndexResult, SetIndex};
use crate::config::IndexConfig;

const MAX_BACKOFF: Duration = Duration::from_millis(2);

/// In-process set index.
///
/// Sets live in a sharded map, so operations on unrelated keys do not wait
/// on each other. Waiting for a busy shard is bounded by the configured
/// timeouts: reads use the short query timeout, writes the longer write
/// timeout. The index can be taken offline to exercise the degraded read
/// path.
pub struct InMemorySetIndex {
    sets: DashMap<String, BTreeSet<i64>>,
    online: AtomicBool,
    query_timeout: Duration,
    write_timeout: Duration,
}

impl InMemorySetIndex {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            sets: DashMap::new(),
            online: AtomicBool::new(true),
            query_timeout: config.query_timeout,
            write_timeout: config.write_timeout,
        }
    }

    /// Mark the backend reachable or unreachable.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    fn ensure_online(&self) -> IndexResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IndexError::Unavailable)
        }
    }

    /// Retry `attempt` until it gets its shard or `limit` runs out. `None`
    /// means the shard was locked.
    fn wait_for<T>(
        &self,
        key: &str,
        limit: Duration,
        mut attempt: impl FnMut() -> Option<T>,
    ) -> IndexResult<T> {
        self.ensure_online()?;
        let deadline = Instant::now() + limit;
        let mut backoff = Duration::from_micros(20);
        loop {
            if let Some(value) = attempt() {
                return Ok(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(IndexError::Timeout {
                    key: key.to_string(),
                    waited_ms: limit.as_millis() as u64,
                });
            }
            std::thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    fn read<T>(
        &self,
        key: &str,
        mut present: impl FnMut(&BTreeSet<i64>) -> T,
        absent: impl Fn() -> T,
    ) -> IndexResult<T> {
        self.wait_for(key, self.query_timeout, || match self.sets.try_get(key) {
            TryResult::Present(set) => Some(present(set.value())),
            TryResult::Absent => Some(absent()),
            TryResult::Locked => None,
        })
    }
}

impl Default for InMemorySetIndex {
    fn default() -> Self {
        Self::new(&IndexConfig::default())
    }
}

impl SetIndex for InMemorySetIndex {
    fn add(&self, key: &str, member: i64) -> IndexResult<bool> {
        self.wait_for(key, self.write_timeout, || {
            self.sets
                .try_entry(key.to_string())
                .map(|entry| entry.or_default().insert(member))
        })
    }

    fn remove(&self, key: &str, member: i64) -> IndexResult<bool> {
        let removed = self.wait_for(key, self.write_timeout, || {
            match self.sets.try_get_mut(key) {
                TryResult::Present(mut set) => Some(set.value_mut().remove(&member)),
                TryResult::Absent => Some(false),
                TryResult::Locked => None,
            }
        })?;
        if removed {
            self.sets.remove_if(key, |_, set| set.is_empty());
        }
        Ok(removed)
    }

    fn contains(&self, key: &str, member: i64) -> IndexResult<bool> {
        self.read(key, |set| set.contains(&member), || false)
    }

    fn members(&self, key: &str) -> IndexResult<BTreeSet<i64>> {
        self.read(key, BTreeSet::clone, BTreeSet::new)
    }

    fn intersect(&self, left: &str, right: &str) -> IndexResult<BTreeSet<i64>> {
        // Never hold two shard guards at once.
        let left = self.members(left)?;
        if left.is_empty() {
            return Ok(left);
        }
        self.read(
            right,
            |right| left.intersection(right).copied().collect(),
            BTreeSet::new,
        )
    }

    fn keys_with_prefix(&self, prefix: &str) -> IndexResult<Vec<String>> {
        self.ensure_online()?;
        let mut keys: Vec<String> = self
            .sets
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn clear(&self) -> IndexResult<()> {
        self.ensure_online()?;
        self.sets.clear();
        Ok(())
    }

    fn snapshot(&self) -> IndexResult<BTreeMap<String, BTreeSet<i64>>> {
        self.ensure_online()?;
        Ok(self
            .sets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }
}

impl std::fmt::Debug for InMemorySetIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySetIndex")
            .field("key_count", &self.len())
            .field("online", &self.online.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn short_timeouts() -> InMemorySetIndex {
        InMemorySetIndex::new(&IndexConfig {
            query_timeout: Duration::from_millis(5),
            write_timeout: Duration::from_millis(5),
        })
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let index = InMemorySetIndex::default();
        assert!(index.add("S:1:abc", 7).unwrap());
        assert!(!index.add("S:1:abc", 7).unwrap());
        assert_eq!(index.members("S:1:abc").unwrap().len(), 1);

        assert!(index.remove("S:1:abc", 7).unwrap());
        assert!(!index.remove("S:1:abc", 7).unwrap());
        assert!(index.is_empty(), "empty sets drop their key");
    }

    #[test]
    fn intersect_treats_missing_keys_as_empty() {
        let index = InMemorySetIndex::default();
        index.add("C:1:abc", 2).unwrap();
        index.add("C:1:abc", 3).unwrap();
        index.add("F:9:F", 3).unwrap();
        index.add("F:9:F", 4).unwrap();

        let both = index.intersect("C:1:abc", "F:9:F").unwrap();
        assert_eq!(both.into_iter().collect::<Vec<_>>(), vec![3]);
        assert!(index.intersect("C:1:abc", "F:10:F").unwrap().is_empty());
    }

    #[test]
    fn prefix_scan_is_sorted() {
        let index = InMemorySetIndex::default();
        index.add("F:2:F", 1).unwrap();
        index.add("S:1:x", 1).unwrap();
        index.add("F:1:f", 2).unwrap();
        assert_eq!(
            index.keys_with_prefix("F:").unwrap(),
            vec!["F:1:f".to_string(), "F:2:F".to_string()]
        );
    }

    #[test]
    fn offline_index_reports_unavailable() {
        let index = InMemorySetIndex::default();
        index.set_online(false);
        assert!(matches!(
            index.members("F:1:F"),
            Err(IndexError::Unavailable)
        ));
        assert!(matches!(index.add("F:1:F", 2), Err(IndexError::Unavailable)));
        index.set_online(true);
        assert!(index.add("F:1:F", 2).unwrap());
    }

    #[test]
    fn reads_time_out_while_a_writer_holds_the_key() {
        let index = short_timeouts();
        index.add("F:1:F", 2).unwrap();
        let guard = index.sets.get_mut("F:1:F").unwrap();
        let result = index.members("F:1:F");
        drop(guard);
        assert!(matches!(result, Err(IndexError::Timeout { .. })));
        assert!(index.contains("F:1:F", 2).unwrap());
    }

    #[test]
    fn a_held_key_does_not_block_other_shards() {
        let index = short_timeouts();
        index.add("F:1:F", 2).unwrap();
        let guard = index.sets.get_mut("F:1:F").unwrap();
        let other = (2..1000)
            .map(|user| format!("F:{user}:F"))
            .find(|key| !matches!(index.sets.try_get(key), TryResult::Locked))
            .unwrap();
        assert!(index.add(&other, 3).unwrap());
        assert!(index.contains(&other, 3).unwrap());
        drop(guard);
    }

    #[test]
    fn concurrent_writers_on_distinct_keys_all_land() {
        let index = Arc::new(InMemorySetIndex::default());
        std::thread::scope(|scope| {
            for writer in 0..8_i64 {
                let index = index.clone();
                scope.spawn(move || {
                    for member in 0..200 {
                        index.add(&format!("S:{writer}:x"), member).unwrap();
                        index.members(&format!("S:{}:x", (writer + 1) % 8)).unwrap();
                    }
                });
            }
        });
        assert_eq!(index.len(), 8);
        for writer in 0..8 {
            assert_eq!(index.members(&format!("S:{writer}:x")).unwrap().len(), 200);
        }
    }
}
