pub mod api;
pub mod attendance;
pub mod job;
pub mod student;
