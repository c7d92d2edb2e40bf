use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tally_db::{Database, now_timestamp};

use crate::cache::StatsCache;
use crate::queue::VoteQueue;

/// How long finished job statuses stay queryable.
pub const JOB_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Background task that closes polls past their end date and drops stale
/// cache entries and job records.
pub async fn run_maintenance_loop(
    db: Arc<Database>,
    cache: Arc<dyn StatsCache>,
    queue: VoteQueue,
    interval_secs: u64,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        match close_expired_polls(&db, cache.as_ref()).await {
            Ok(count) => {
                if count > 0 {
                    info!("Maintenance: closed {} expired polls", count);
                }
            }
            Err(e) => {
                warn!("Maintenance error: {}", e);
            }
        }

        let purged = cache.purge_expired();
        let pruned = queue.prune_finished(JOB_RETENTION);
        if purged > 0 || pruned > 0 {
            debug!("Maintenance: purged {} cache entries, {} job records", purged, pruned);
        }
    }

    debug!("Maintenance loop stopped");
}

pub async fn close_expired_polls(db: &Arc<Database>, cache: &dyn StatsCache) -> anyhow::Result<usize> {
    let db = db.clone();
    let closed = tokio::task::spawn_blocking(move || db.deactivate_expired_polls(&now_timestamp()))
        .await??;

    for id in &closed {
        match id.parse::<Uuid>() {
            Ok(poll_id) => cache.invalidate(poll_id),
            Err(e) => warn!("Corrupt poll id '{}': {}", id, e),
        }
    }
    Ok(closed.len())
}
