pub mod attendance;
pub mod health;
pub mod metrics;
pub mod students;
pub mod videos;
