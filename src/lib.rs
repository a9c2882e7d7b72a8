//! Classroom attendance from recorded lecture video
//!
//! This library provides the core of the clara-attendance service: uploaded
//! class videos become jobs, a bounded set of frames is sampled from each,
//! faces are matched against enrolled students, and the result is merged
//! into a per-group attendance ledger before absentees are notified.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
