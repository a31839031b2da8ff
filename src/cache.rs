//! Read-through cache with TTL and generation checks
//!
//! Each topic has its own slot guarded by an async mutex, so distinct topics
//! never block each other. Readers that queue behind an outstanding fetch
//! receive that fetch's result instead of starting another one. The slot table
//! lock is only held to look up or insert slots, never across a network read.
//!
//! An entry is valid while it is younger than the TTL, was fetched during the
//! current connection generation, and its slot has not been invalidated since
//! the fetch started.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::Result;
use crate::connection::{ConnectionManager, TopicChange, TopicEvent};
use crate::types::TimestampedValue;

/// Value returned by [`ReadCache::read`].
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRead {
    pub value: TimestampedValue,
    /// Served from a valid entry without a network read
    pub from_cache: bool,
}

#[derive(Debug)]
struct CacheEntry {
    value: TimestampedValue,
    fetched_at: Instant,
    generation: u64,
    epoch: u64,
}

#[derive(Debug)]
struct FetchOutcome {
    generation: u64,
    epoch: u64,
    result: Result<TimestampedValue>,
}

#[derive(Debug, Default)]
struct SlotState {
    entry: Option<CacheEntry>,
    last_fetch: Option<FetchOutcome>,
}

#[derive(Debug, Default)]
struct Slot {
    /// Bumped on every invalidation
    epoch: AtomicU64,
    /// Number of completed fetches
    completed: AtomicU64,
    state: tokio::sync::Mutex<SlotState>,
}

/// TTL-bounded read-through cache in front of the connection manager
#[derive(Debug)]
pub struct ReadCache {
    manager: Arc<ConnectionManager>,
    ttl_us: AtomicU64,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl ReadCache {
    pub fn new(manager: Arc<ConnectionManager>, ttl: Duration) -> Self {
        Self {
            manager,
            ttl_us: AtomicU64::new(ttl.as_micros() as u64),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Create the cache and spawn the task invalidating it on connection events
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(manager: Arc<ConnectionManager>, ttl: Duration) -> Arc<Self> {
        let events = manager.subscribe_events();
        let cache = Arc::new(Self::new(manager, ttl));
        let weak = Arc::downgrade(&cache);
        tokio::spawn(async move { Self::consume(weak, events).await });
        cache
    }

    async fn consume(cache: Weak<Self>, mut events: broadcast::Receiver<Arc<TopicEvent>>) {
        loop {
            let event = events.recv().await;
            let Some(cache) = cache.upgrade() else { break };
            match event {
                Ok(event) => match &event.change {
                    TopicChange::Unannounced { name } => cache.invalidate(name),
                    TopicChange::Connected { .. }
                    | TopicChange::ConnectionLost { .. }
                    | TopicChange::Closed => cache.invalidate_all(),
                    _ => {}
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cache invalidation lagged, dropping all entries");
                    cache.invalidate_all();
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, topic: &str) -> Arc<Slot> {
        let mut slots = self.slots();
        match slots.get(topic) {
            Some(slot) => Arc::clone(slot),
            None => {
                let slot = Arc::new(Slot::default());
                slots.insert(topic.to_string(), Arc::clone(&slot));
                slot
            }
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_micros(self.ttl_us.load(Ordering::Acquire))
    }

    /// Change the TTL; applies to existing entries on their next read
    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_us.store(ttl.as_micros() as u64, Ordering::Release);
        debug!(?ttl, "Cache TTL updated");
    }

    /// Read a topic, from a valid entry unless `bypass` is set
    pub async fn read(&self, topic: &str, bypass: bool) -> Result<CachedRead> {
        self.manager.ensure_connected()?;

        let slot = self.slot(topic);
        let ticket = slot.completed.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;
        self.manager.ensure_connected()?;

        let generation = self.manager.generation();
        let epoch = slot.epoch.load(Ordering::Acquire);

        // A fetch finished while we were queued behind it: share its result
        if slot.completed.load(Ordering::Acquire) > ticket {
            if let Some(outcome) = &state.last_fetch {
                if outcome.generation == generation && outcome.epoch == epoch {
                    trace!(topic, "Sharing result of concurrent fetch");
                    return outcome.result.clone().map(|value| CachedRead { value, from_cache: false });
                }
            }
        }

        if !bypass {
            if let Some(entry) = &state.entry {
                let fresh = entry.fetched_at.elapsed() < self.ttl();
                if fresh && entry.generation == generation && entry.epoch == epoch {
                    trace!(topic, "Cache hit");
                    return Ok(CachedRead { value: entry.value.clone(), from_cache: true });
                }
            }
        }

        trace!(topic, bypass, "Cache miss, reading from network");
        let result = self.manager.read(topic).await;
        if let Ok(value) = &result {
            state.entry = Some(CacheEntry {
                value: value.clone(),
                fetched_at: Instant::now(),
                generation,
                epoch,
            });
        }
        state.last_fetch = Some(FetchOutcome { generation, epoch, result: result.clone() });
        slot.completed.fetch_add(1, Ordering::AcqRel);
        drop(state);

        result.map(|value| CachedRead { value, from_cache: false })
    }

    /// Invalidate one topic's entry
    pub fn invalidate(&self, topic: &str) {
        if let Some(slot) = self.slots().get(topic) {
            slot.epoch.fetch_add(1, Ordering::AcqRel);
            trace!(topic, "Cache entry invalidated");
        }
    }

    /// Invalidate every entry
    pub fn invalidate_all(&self) {
        let mut slots = self.slots();
        for slot in slots.values() {
            slot.epoch.fetch_add(1, Ordering::AcqRel);
        }
        debug!(entries = slots.len(), "Cache cleared");
        slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::LoopbackServer;
    use crate::config::{BridgeConfig, ReconnectConfig};
    use crate::connection::ConnectRequest;
    use crate::types::Value;
    use crate::BridgeError;

    const VOLTAGE: &str = "/SmartDashboard/Battery Voltage";

    async fn setup(ttl: Duration) -> (Arc<LoopbackServer>, Arc<ConnectionManager>, Arc<ReadCache>) {
        let server = LoopbackServer::new();
        server.publish(VOLTAGE, Value::Double(12.4)).unwrap();
        let config = BridgeConfig {
            reconnect: ReconnectConfig { initial_delay: Duration::from_millis(10), ..ReconnectConfig::default() },
            ..BridgeConfig::default()
        };
        let manager = ConnectionManager::new(Arc::new(server.client()), Arc::new(config));
        let cache = ReadCache::spawn(Arc::clone(&manager), ttl);
        manager.connect(ConnectRequest::address("127.0.0.1", 5810)).await.unwrap();
        (server, manager, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn second_read_within_ttl_is_cached() {
        let (server, _manager, cache) = setup(Duration::from_millis(100)).await;

        let first = cache.read(VOLTAGE, false).await.unwrap();
        let second = cache.read(VOLTAGE, false).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.value, second.value);
        assert_eq!(server.read_count(VOLTAGE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_refetched() {
        let (server, _manager, cache) = setup(Duration::from_millis(100)).await;

        cache.read(VOLTAGE, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let again = cache.read(VOLTAGE, false).await.unwrap();

        assert!(!again.from_cache);
        assert_eq!(server.read_count(VOLTAGE), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_reads_share_one_fetch() {
        let (server, _manager, cache) = setup(Duration::from_millis(100)).await;
        server.set_read_latency(Duration::from_millis(40));

        let reads = futures::future::join_all((0..5).map(|_| cache.read(VOLTAGE, false))).await;

        assert_eq!(server.read_count(VOLTAGE), 1);
        for read in reads {
            assert_eq!(read.unwrap().value.value, Value::Double(12.4));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_failures_are_shared() {
        let (server, _manager, cache) = setup(Duration::from_millis(100)).await;
        server.set_read_latency(Duration::from_millis(40));

        let (a, b) = tokio::join!(cache.read("/missing", false), cache.read("/missing", false));

        assert!(matches!(a, Err(BridgeError::UnknownTopic { .. })));
        assert!(matches!(b, Err(BridgeError::UnknownTopic { .. })));
        assert_eq!(server.read_count("/missing"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_invalidates_by_generation() {
        let (server, manager, cache) = setup(Duration::from_secs(60)).await;
        cache.read(VOLTAGE, false).await.unwrap();

        server.drop_connection("field reset");
        let mut status = manager.subscribe_status();
        status.wait_for(|s| s.state.is_connected() && s.generation == 2).await.unwrap();

        let after = cache.read(VOLTAGE, false).await.unwrap();
        assert!(!after.from_cache);
        assert_eq!(server.read_count(VOLTAGE), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_and_bypass_force_network_reads() {
        let (server, _manager, cache) = setup(Duration::from_secs(60)).await;
        cache.read(VOLTAGE, false).await.unwrap();

        cache.invalidate(VOLTAGE);
        assert!(!cache.read(VOLTAGE, false).await.unwrap().from_cache);

        assert!(!cache.read(VOLTAGE, true).await.unwrap().from_cache);
        assert!(cache.read(VOLTAGE, false).await.unwrap().from_cache);
        assert_eq!(server.read_count(VOLTAGE), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_never_hits() {
        let (server, _manager, cache) = setup(Duration::ZERO).await;

        for _ in 0..3 {
            assert!(!cache.read(VOLTAGE, false).await.unwrap().from_cache);
        }
        assert_eq!(server.read_count(VOLTAGE), 3);

        cache.set_ttl(Duration::from_millis(200));
        assert_eq!(cache.ttl(), Duration::from_millis(200));
        cache.read(VOLTAGE, false).await.unwrap();
        assert!(cache.read(VOLTAGE, false).await.unwrap().from_cache);
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_invalidation_drops_every_entry() {
        let server = LoopbackServer::new();
        server.publish(VOLTAGE, Value::Double(12.4)).unwrap();
        let config = BridgeConfig { event_capacity: 4, ..BridgeConfig::default() };
        let manager = ConnectionManager::new(Arc::new(server.client()), Arc::new(config));
        let cache = ReadCache::spawn(Arc::clone(&manager), Duration::from_secs(60));
        manager.connect(ConnectRequest::address("127.0.0.1", 5810)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        cache.read(VOLTAGE, false).await.unwrap();
        assert!(cache.read(VOLTAGE, false).await.unwrap().from_cache);

        // Value changes alone never invalidate, so only the lag can explain a miss
        for i in 0..20 {
            server.publish("/Burst/Counter", Value::Integer(i)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(!cache.read(VOLTAGE, false).await.unwrap().from_cache);
        assert_eq!(server.read_count(VOLTAGE), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_reads_fail_fast() {
        let (server, manager, cache) = setup(Duration::from_secs(60)).await;
        cache.read(VOLTAGE, false).await.unwrap();
        manager.disconnect().await;

        let err = cache.read(VOLTAGE, false).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected { .. }));
        assert_eq!(server.read_count(VOLTAGE), 1);
    }
}
