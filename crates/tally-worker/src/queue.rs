use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tally_db::{Database, StoreError};
use tally_types::jobs::{JobStatus, VoteJob};

use crate::cache::StatsCache;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("vote queue is full")]
    Full,
    #[error("vote queue is closed")]
    Closed,
}

/// Bookkeeping for one submitted job.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub owner: Uuid,
    pub poll_id: Uuid,
    pub status: JobStatus,
    finished_at: Option<Instant>,
}

/// Sending half of the vote pipeline plus the job status registry.
#[derive(Clone)]
pub struct VoteQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    tx: mpsc::Sender<VoteJob>,
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
}

impl VoteQueue {
    /// Create a queue holding at most `capacity` unprocessed jobs. The
    /// receiver goes to [`WorkerPool::spawn`].
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<VoteJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            inner: Arc::new(QueueInner {
                tx,
                jobs: RwLock::new(HashMap::new()),
            }),
        };
        (queue, rx)
    }

    /// Enqueue a vote and return its job id without waiting for it to run.
    pub fn submit(
        &self,
        poll_id: Uuid,
        question_id: Uuid,
        choice_id: Uuid,
        user_id: Uuid,
    ) -> Result<Uuid, QueueError> {
        let job = VoteJob {
            job_id: Uuid::new_v4(),
            poll_id,
            question_id,
            choice_id,
            user_id,
            submitted_at: chrono::Utc::now(),
        };
        let job_id = job.job_id;

        // Registered before sending so a fast worker always finds the record
        self.set_record(
            job_id,
            JobRecord {
                owner: user_id,
                poll_id,
                status: JobStatus::Pending,
                finished_at: None,
            },
        );

        if let Err(e) = self.inner.tx.try_send(job) {
            self.remove_record(job_id);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => QueueError::Full,
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            });
        }

        debug!("Vote job {} queued for poll {}", job_id, poll_id);
        Ok(job_id)
    }

    pub fn status(&self, job_id: Uuid) -> Option<JobRecord> {
        self.inner.jobs.read().ok()?.get(&job_id).cloned()
    }

    /// Forget finished jobs older than `retention`. Returns how many were dropped.
    pub fn prune_finished(&self, retention: Duration) -> usize {
        let Ok(mut jobs) = self.inner.jobs.write() else {
            return 0;
        };
        let before = jobs.len();
        jobs.retain(|_, record| match record.finished_at {
            Some(at) => at.elapsed() < retention,
            None => true,
        });
        before - jobs.len()
    }

    fn complete(&self, job_id: Uuid, status: JobStatus) {
        if let Ok(mut jobs) = self.inner.jobs.write() {
            if let Some(record) = jobs.get_mut(&job_id) {
                record.status = status;
                record.finished_at = Some(Instant::now());
            }
        }
    }

    fn set_record(&self, job_id: Uuid, record: JobRecord) {
        if let Ok(mut jobs) = self.inner.jobs.write() {
            jobs.insert(job_id, record);
        }
    }

    fn remove_record(&self, job_id: Uuid) {
        if let Ok(mut jobs) = self.inner.jobs.write() {
            jobs.remove(&job_id);
        }
    }
}

/// A fixed set of tasks draining the vote queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` tasks sharing `rx`. Each worker keeps a `queue` handle
    /// for the job registry, so the channel stays open and the pool runs
    /// until `shutdown` is cancelled.
    pub fn spawn(
        workers: usize,
        rx: mpsc::Receiver<VoteJob>,
        queue: VoteQueue,
        db: Arc<Database>,
        cache: Arc<dyn StatsCache>,
        shutdown: CancellationToken,
    ) -> Self {
        let rx = Arc::new(Mutex::new(rx));
        let handles = (0..workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    rx.clone(),
                    queue.clone(),
                    db.clone(),
                    cache.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!("Started {} vote workers", workers.max(1));
        Self { handles }
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Vote worker panicked: {}", e);
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<VoteJob>>>,
    queue: VoteQueue,
    db: Arc<Database>,
    cache: Arc<dyn StatsCache>,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = async { rx.lock().await.recv().await } => job,
        };
        let Some(job) = next else {
            break;
        };

        let status = process_job(&job, &db).await;
        if matches!(status, JobStatus::Recorded { .. }) {
            cache.invalidate(job.poll_id);
        }
        queue.complete(job.job_id, status);
    }

    debug!("Vote worker {} stopped", worker_id);
}

async fn process_job(job: &VoteJob, db: &Arc<Database>) -> JobStatus {
    let db = db.clone();
    let question_id = job.question_id.to_string();
    let choice_id = job.choice_id.to_string();
    let user_id = job.user_id.to_string();

    let result =
        tokio::task::spawn_blocking(move || db.record_vote(&question_id, &choice_id, &user_id))
            .await;

    match result {
        Ok(Ok(receipt)) => {
            info!(
                "Vote job {} recorded vote {} on poll {}",
                job.job_id, receipt.vote_id, receipt.poll_id
            );
            match receipt.vote_id.parse() {
                Ok(vote_id) => JobStatus::Recorded { vote_id },
                Err(e) => {
                    warn!("Corrupt vote id '{}': {}", receipt.vote_id, e);
                    JobStatus::Recorded {
                        vote_id: Uuid::default(),
                    }
                }
            }
        }
        Ok(Err(StoreError::ConstraintViolation(reason))) => {
            warn!(
                "Vote job {} rejected: user {} already voted on question {}",
                job.job_id, job.user_id, job.question_id
            );
            JobStatus::Failed { reason }
        }
        Ok(Err(e @ (StoreError::NotFound(_) | StoreError::Validation(_)))) => {
            warn!("Vote job {} rejected: {}", job.job_id, e);
            JobStatus::Failed {
                reason: e.to_string(),
            }
        }
        Ok(Err(e)) => {
            error!("Vote job {} failed: {}", job.job_id, e);
            JobStatus::Failed {
                reason: "internal error while recording vote".to_string(),
            }
        }
        Err(e) => {
            error!("spawn_blocking join error on vote job {}: {}", job.job_id, e);
            JobStatus::Failed {
                reason: "internal error while recording vote".to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStatsCache;
    use tally_db::models::{NewPoll, NewQuestion, PollTree};
    use tally_types::stats::PollStats;

    struct Harness {
        db: Arc<Database>,
        queue: VoteQueue,
        cache: Arc<MemoryStatsCache>,
        shutdown: CancellationToken,
        pool: WorkerPool,
        poll: PollTree,
        users: Vec<Uuid>,
    }

    fn harness(workers: usize, users: usize) -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let owner = Uuid::new_v4();
        db.create_user(&owner.to_string(), "owner", "hash").unwrap();

        let users: Vec<Uuid> = (0..users)
            .map(|i| {
                let id = Uuid::new_v4();
                db.create_user(&id.to_string(), &format!("voter{i}"), "hash").unwrap();
                id
            })
            .collect();

        let poll = db
            .create_poll(&NewPoll {
                title: "P".into(),
                description: None,
                end_date: None,
                created_by: owner.to_string(),
                questions: vec![NewQuestion {
                    text: "Q1".into(),
                    choices: vec!["A".into(), "B".into(), "C".into()],
                }],
            })
            .unwrap();

        let (queue, rx) = VoteQueue::new(256);
        let cache = Arc::new(MemoryStatsCache::new(Duration::from_secs(60)));
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::spawn(
            workers,
            rx,
            queue.clone(),
            db.clone(),
            cache.clone(),
            shutdown.clone(),
        );

        Harness {
            db,
            queue,
            cache,
            shutdown,
            pool,
            poll,
            users,
        }
    }

    fn ids(h: &Harness, choice: usize) -> (Uuid, Uuid, Uuid) {
        let q = &h.poll.questions[0];
        (
            h.poll.poll.id.parse().unwrap(),
            q.question.id.parse().unwrap(),
            q.choices[choice].id.parse().unwrap(),
        )
    }

    async fn wait_finished(queue: &VoteQueue, job_id: Uuid) -> JobStatus {
        for _ in 0..500 {
            if let Some(record) = queue.status(job_id) {
                if record.status.is_finished() {
                    return record.status;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never finished");
    }

    fn counts(h: &Harness) -> Vec<i64> {
        let tree = h.db.get_poll(&h.poll.poll.id).unwrap().unwrap();
        tree.questions[0].choices.iter().map(|c| c.vote_count).collect()
    }

    #[tokio::test]
    async fn recorded_vote_invalidates_cached_stats() {
        let h = harness(1, 1);
        let (poll_id, question_id, choice_id) = ids(&h, 0);
        h.cache.set(
            poll_id,
            PollStats {
                poll_id,
                title: "stale".into(),
                total_votes: 0,
                questions: vec![],
            },
            0,
        );

        let job_id = h.queue.submit(poll_id, question_id, choice_id, h.users[0]).unwrap();
        let status = wait_finished(&h.queue, job_id).await;

        assert!(matches!(status, JobStatus::Recorded { .. }));
        assert!(h.cache.get(poll_id).is_none());
        assert_eq!(counts(&h), vec![1, 0, 0]);
    }

    #[tokio::test]
    async fn duplicate_vote_job_fails_without_counting() {
        let h = harness(2, 1);
        let (poll_id, question_id, choice_a) = ids(&h, 0);
        let (_, _, choice_b) = ids(&h, 1);

        let first = h.queue.submit(poll_id, question_id, choice_a, h.users[0]).unwrap();
        wait_finished(&h.queue, first).await;
        let second = h.queue.submit(poll_id, question_id, choice_b, h.users[0]).unwrap();
        let status = wait_finished(&h.queue, second).await;

        assert!(matches!(status, JobStatus::Failed { .. }));
        assert_eq!(counts(&h), vec![1, 0, 0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_votes_are_all_counted() {
        let h = harness(4, 30);

        let mut jobs = Vec::new();
        for (i, user) in h.users.iter().enumerate() {
            let (poll_id, question_id, choice_id) = ids(&h, i % 3);
            jobs.push(h.queue.submit(poll_id, question_id, choice_id, *user).unwrap());
        }
        for job_id in jobs {
            let status = wait_finished(&h.queue, job_id).await;
            assert!(matches!(status, JobStatus::Recorded { .. }));
        }

        assert_eq!(counts(&h), vec![10, 10, 10]);
        assert_eq!(h.db.count_poll_votes(&h.poll.poll.id).unwrap(), 30);
    }

    #[tokio::test]
    async fn same_user_racing_on_one_question_gets_one_vote() {
        let h = harness(4, 1);
        let jobs: Vec<Uuid> = (0..3)
            .map(|choice| {
                let (poll_id, question_id, choice_id) = ids(&h, choice);
                h.queue.submit(poll_id, question_id, choice_id, h.users[0]).unwrap()
            })
            .collect();

        let mut recorded = 0;
        for job_id in jobs {
            if matches!(wait_finished(&h.queue, job_id).await, JobStatus::Recorded { .. }) {
                recorded += 1;
            }
        }

        assert_eq!(recorded, 1);
        assert_eq!(counts(&h).iter().sum::<i64>(), 1);
    }

    #[tokio::test]
    async fn workers_stop_on_shutdown() {
        let h = harness(3, 0);
        h.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), h.pool.join())
            .await
            .expect("workers did not stop");
    }

    #[tokio::test]
    async fn dropping_the_queue_does_not_stop_workers() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache: Arc<dyn StatsCache> = Arc::new(MemoryStatsCache::new(Duration::from_secs(60)));
        let (queue, rx) = VoteQueue::new(4);
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::spawn(2, rx, queue.clone(), db, cache, shutdown.clone());
        drop(queue);

        let mut join = Box::pin(pool.join());
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut join)
                .await
                .is_err()
        );

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), join)
            .await
            .expect("workers did not stop");
    }

    #[tokio::test]
    async fn full_queue_rejects_submission() {
        let (queue, _rx) = VoteQueue::new(1);
        let ids = || (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let (p, q, c, u) = ids();
        let job_id = queue.submit(p, q, c, u).unwrap();
        assert_eq!(queue.status(job_id).unwrap().status, JobStatus::Pending);

        let (p, q, c, u) = ids();
        assert!(matches!(queue.submit(p, q, c, u), Err(QueueError::Full)));
    }

    #[tokio::test]
    async fn finished_jobs_are_pruned() {
        let h = harness(1, 1);
        let (poll_id, question_id, choice_id) = ids(&h, 0);
        let job_id = h.queue.submit(poll_id, question_id, choice_id, h.users[0]).unwrap();
        wait_finished(&h.queue, job_id).await;

        assert_eq!(h.queue.prune_finished(Duration::ZERO), 1);
        assert!(h.queue.status(job_id).is_none());
    }
}
