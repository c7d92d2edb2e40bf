//! Background side of the vote pipeline: the job queue and its worker pool,
//! the stats cache, and the periodic maintenance loop.

pub mod cache;
pub mod maintenance;
pub mod queue;

pub use cache::{MemoryStatsCache, StatsCache};
pub use queue::{QueueError, VoteQueue, WorkerPool};
