use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::config::HttpConfig;
use crate::error::HttpError;

/// Outbound connections for one address.
///
/// The `reqwest::Client` owns the keep-alive connections; the semaphore (when
/// configured) bounds how many requests may use them at once.
struct PoolEntry {
    client: reqwest::Client,
    permits: Option<Arc<Semaphore>>,
    in_flight: AtomicUsize,
    last_used: AtomicU64,
}

/// Keyed pool of per-address HTTP clients with LRU eviction of idle entries.
///
/// The entry map is only locked to look up or insert an entry, never across
/// network I/O, so requests to different addresses never wait on each other.
pub struct ConnectionPool {
    entries: Mutex<HashMap<String, Arc<PoolEntry>>>,
    max_connections_per_target: Option<usize>,
    max_idle_targets: usize,
    connect_timeout: Duration,
    clock: AtomicU64,
    evictions: AtomicU64,
}

/// Exclusive use of a pooled client for one request (and its response body).
pub struct PoolLease {
    entry: Arc<PoolEntry>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PoolLease {
    pub fn client(&self) -> &reqwest::Client {
        &self.entry.client
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.entry.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConnectionPool {
    pub fn new(config: &HttpConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_connections_per_target: config.max_connections_per_target,
            max_idle_targets: config.max_idle_targets,
            connect_timeout: config.connect_timeout(),
            clock: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Lease the client for `key` (`scheme://host:port`), opening an entry if
    /// none is pooled. Waits only on other requests to the same key.
    pub async fn acquire(&self, key: &str) -> Result<PoolLease, HttpError> {
        let entry = {
            let mut entries = self.entries.lock().await;
            let entry = match entries.get(key) {
                Some(entry) => Arc::clone(entry),
                None => {
                    let entry = Arc::new(self.open_entry(key)?);
                    entries.insert(key.to_string(), Arc::clone(&entry));
                    tracing::debug!(target_key = key, pooled = entries.len(), "Opened pool entry");
                    entry
                }
            };
            entry.in_flight.fetch_add(1, Ordering::AcqRel);
            let tick = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
            entry.last_used.store(tick, Ordering::Relaxed);

            if entries.len() > self.max_idle_targets {
                self.evict_idle(&mut entries);
            }
            entry
        };

        // Counted as in flight from here, so a dropped wait still releases.
        let mut lease = PoolLease {
            entry,
            _permit: None,
        };
        if let Some(permits) = lease.entry.permits.clone() {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| HttpError::Transport {
                    address: key.to_string(),
                    detail: "connection pool closed".into(),
                })?;
            lease._permit = Some(permit);
        }
        Ok(lease)
    }

    fn open_entry(&self, key: &str) -> Result<PoolEntry, HttpError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(self.max_connections_per_target.unwrap_or(usize::MAX))
            .build()
            .map_err(|e| HttpError::TlsFailure {
                address: key.to_string(),
                detail: format!("failed to initialise client: {e}"),
            })?;

        Ok(PoolEntry {
            client,
            permits: self
                .max_connections_per_target
                .map(|max| Arc::new(Semaphore::new(max.max(1)))),
            in_flight: AtomicUsize::new(0),
            last_used: AtomicU64::new(0),
        })
    }

    /// Drop idle entries, least recently used first, until back under the cap.
    fn evict_idle(&self, entries: &mut HashMap<String, Arc<PoolEntry>>) {
        let mut idle: Vec<(u64, String)> = entries
            .iter()
            .filter(|(_, entry)| entry.in_flight.load(Ordering::Acquire) == 0)
            .map(|(key, entry)| (entry.last_used.load(Ordering::Relaxed), key.clone()))
            .collect();
        idle.sort_unstable();

        let excess = entries.len().saturating_sub(self.max_idle_targets);
        for (_, key) in idle.into_iter().take(excess) {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(target_key = %key, "Evicted idle pool entry");
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(max_per_target: Option<usize>, max_idle_targets: usize) -> ConnectionPool {
        ConnectionPool::new(&HttpConfig {
            max_connections_per_target: max_per_target,
            max_idle_targets,
            ..HttpConfig::default()
        })
    }

    #[tokio::test]
    async fn reuses_entry_for_same_address() {
        let pool = pool(None, 8);
        drop(pool.acquire("http://a:1").await.unwrap());
        drop(pool.acquire("http://a:1").await.unwrap());
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn evicts_least_recently_used_idle_entry() {
        let pool = pool(None, 2);
        drop(pool.acquire("http://a:1").await.unwrap());
        drop(pool.acquire("http://b:1").await.unwrap());
        drop(pool.acquire("http://a:1").await.unwrap());
        drop(pool.acquire("http://c:1").await.unwrap());

        assert_eq!(pool.len().await, 2);
        assert!(pool.contains("http://a:1").await);
        assert!(!pool.contains("http://b:1").await);
        assert_eq!(pool.evictions(), 1);
    }

    #[tokio::test]
    async fn never_evicts_entries_in_use() {
        let pool = pool(None, 1);
        let held = pool.acquire("http://a:1").await.unwrap();
        let other = pool.acquire("http://b:1").await.unwrap();

        // Both busy: the soft cap is exceeded rather than dropping live work.
        assert_eq!(pool.len().await, 2);
        drop(held);
        drop(other);

        drop(pool.acquire("http://c:1").await.unwrap());
        assert_eq!(pool.len().await, 1);
        assert!(pool.contains("http://c:1").await);
    }

    #[tokio::test]
    async fn per_target_cap_only_blocks_same_address() {
        let pool = Arc::new(pool(Some(1), 8));
        let held = pool.acquire("http://a:1").await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire("http://a:1")).await;
        assert!(blocked.is_err(), "second lease on a capped address should wait");

        let other = tokio::time::timeout(Duration::from_millis(50), pool.acquire("http://b:1")).await;
        assert!(other.is_ok(), "a different address must not wait");

        drop(held);
        let freed = tokio::time::timeout(Duration::from_millis(50), pool.acquire("http://a:1")).await;
        assert!(freed.is_ok());
    }
}
