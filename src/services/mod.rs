pub mod aggregator;
pub mod enrollment;
pub mod face_api;
pub mod jobs;
pub mod ledger;
pub mod matcher;
pub mod notify;
pub mod pipeline;
pub mod reconciler;
pub mod roster;
pub mod sampler;
pub mod video;
pub mod worker_pool;
