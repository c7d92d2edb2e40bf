use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::trace;
use uuid::Uuid;

use tally_types::stats::PollStats;

/// Short-lived cache of computed poll stats, keyed by poll id.
///
/// Injected into the API and the workers so that every write path can drop
/// the entry it made stale. Each poll also carries a generation that
/// `invalidate` bumps: a reader takes the generation before it reads the
/// store and hands it back to `set`, which refuses the write if an
/// invalidation happened in between.
pub trait StatsCache: Send + Sync {
    fn get(&self, poll_id: Uuid) -> Option<PollStats>;

    /// Current generation for `poll_id`. Take it before reading the store.
    fn generation(&self, poll_id: Uuid) -> u64;

    /// Store `stats` computed under `generation`. Returns false, storing
    /// nothing, when the poll was invalidated since.
    fn set(&self, poll_id: Uuid, stats: PollStats, generation: u64) -> bool;

    fn invalidate(&self, poll_id: Uuid);

    /// Drop expired entries, returning how many were removed.
    fn purge_expired(&self) -> usize {
        0
    }
}

pub struct MemoryStatsCache {
    ttl: Duration,
    inner: RwLock<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<Uuid, (Instant, PollStats)>,
    generations: HashMap<Uuid, u64>,
}

impl CacheInner {
    fn generation(&self, poll_id: Uuid) -> u64 {
        self.generations.get(&poll_id).copied().unwrap_or(0)
    }
}

impl MemoryStatsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(CacheInner::default()),
        }
    }
}

impl StatsCache for MemoryStatsCache {
    fn get(&self, poll_id: Uuid) -> Option<PollStats> {
        let inner = self.inner.read().ok()?;
        let (stored_at, stats) = inner.entries.get(&poll_id)?;
        if stored_at.elapsed() >= self.ttl {
            return None;
        }
        trace!("Stats cache hit for poll {}", poll_id);
        Some(stats.clone())
    }

    fn generation(&self, poll_id: Uuid) -> u64 {
        self.inner
            .read()
            .map(|inner| inner.generation(poll_id))
            .unwrap_or(u64::MAX)
    }

    fn set(&self, poll_id: Uuid, stats: PollStats, generation: u64) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        if inner.generation(poll_id) != generation {
            trace!("Discarding stale stats for poll {}", poll_id);
            return false;
        }
        inner.entries.insert(poll_id, (Instant::now(), stats));
        true
    }

    fn invalidate(&self, poll_id: Uuid) {
        if let Ok(mut inner) = self.inner.write() {
            *inner.generations.entry(poll_id).or_insert(0) += 1;
            if inner.entries.remove(&poll_id).is_some() {
                trace!("Stats cache invalidated for poll {}", poll_id);
            }
        }
    }

    fn purge_expired(&self) -> usize {
        let Ok(mut inner) = self.inner.write() else {
            return 0;
        };
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner.entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        before - inner.entries.len()
    }
}
