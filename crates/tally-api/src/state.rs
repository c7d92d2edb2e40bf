use std::sync::Arc;

use tally_db::Database;
use tally_worker::{StatsCache, VoteQueue};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub queue: VoteQueue,
    pub cache: Arc<dyn StatsCache>,
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    test_state_with_cache(test_cache())
}

#[cfg(test)]
pub(crate) fn test_state_with_cache(cache: Arc<dyn StatsCache>) -> AppState {
    test_parts(cache).0
}

#[cfg(test)]
pub(crate) fn test_cache() -> Arc<dyn StatsCache> {
    Arc::new(tally_worker::MemoryStatsCache::new(std::time::Duration::from_secs(30)))
}

/// State plus the queue's receiving end, for tests that submit jobs
/// without running workers.
#[cfg(test)]
pub(crate) fn test_parts(
    cache: Arc<dyn StatsCache>,
) -> (AppState, tokio::sync::mpsc::Receiver<tally_types::jobs::VoteJob>) {
    let db = Database::open_in_memory().expect("in-memory db");
    let (queue, rx) = VoteQueue::new(16);
    let state = Arc::new(AppStateInner {
        db: Arc::new(db),
        jwt_secret: "test-secret".to_string(),
        token_ttl: chrono::Duration::days(1),
        queue,
        cache,
    });
    (state, rx)
}
