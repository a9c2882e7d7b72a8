use serde::Deserialize;

use crate::services::sampler::SamplingConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Directory uploaded videos and enrollment images are written to
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Base URL of the face recognition service
    pub face_api_url: String,

    /// Detection model requested from the face service ("hog" or "cnn")
    #[serde(default = "default_face_model")]
    pub face_model: String,

    /// Maximum encoding distance counted as a match (lower is stricter)
    #[serde(default = "default_tolerance")]
    pub match_tolerance: f64,

    /// Sampled frames per second of source video
    #[serde(default = "default_target_rate")]
    pub sample_rate: u32,

    /// Lower bound applied to the source fps before computing the sample count
    #[serde(default = "default_floor_fps")]
    pub sample_floor_fps: f64,

    /// Minimum number of frames sampled from any video
    #[serde(default = "default_minimum_samples")]
    pub sample_minimum: u32,

    /// Timeout for opening a video or decoding a single frame, in seconds
    #[serde(default = "default_decode_timeout_secs")]
    pub decode_timeout_secs: u64,

    /// Number of concurrent job workers in the worker binary
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Capacity of the bounded job queue feeding the workers
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Interval between pending-job claims, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Largest accepted upload body, in megabytes
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,

    /// Webhook receiving absentee notifications. Notifications are only logged when unset.
    pub notify_webhook_url: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_upload_dir() -> String {
    "uploads".to_string()
}

fn default_face_model() -> String {
    "hog".to_string()
}

fn default_tolerance() -> f64 {
    crate::services::matcher::DEFAULT_TOLERANCE
}

fn default_target_rate() -> u32 {
    10
}

fn default_floor_fps() -> f64 {
    30.0
}

fn default_minimum_samples() -> u32 {
    30
}

fn default_decode_timeout_secs() -> u64 {
    30
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    16
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_upload_mb() -> usize {
    512
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            target_rate: self.sample_rate,
            floor_fps: self.sample_floor_fps,
            minimum_samples: self.sample_minimum,
        }
    }

    pub fn decode_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.decode_timeout_secs)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}
