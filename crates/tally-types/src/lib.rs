pub mod api;
pub mod jobs;
pub mod stats;
pub mod validate;
