//! In-memory collaborators for driving the attendance pipeline in tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use image::{Rgb, RgbImage};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clara_attendance::models::student::EncodingVector;
use clara_attendance::services::face_api::{FaceApiError, FaceEncoder};
use clara_attendance::services::jobs::{JobController, MemoryJobStore};
use clara_attendance::services::ledger::InMemoryLedger;
use clara_attendance::services::notify::{Notifier, NotifySummary};
use clara_attendance::services::pipeline::AttendancePipeline;
use clara_attendance::services::reconciler::LedgerReconciler;
use clara_attendance::services::roster::{StaticRoster, StudentRecord};
use clara_attendance::services::video::{FrameReader, VideoError, VideoMetadata, VideoSource};

pub const GROUP: &str = "10A";

/// Unit-ish 4-d encodings far enough apart that only exact neighbours match.
pub fn face(axis: usize, jitter: f64) -> EncodingVector {
    let mut v = vec![0.0; 4];
    v[axis] = 1.0 - jitter;
    v
}

pub fn student(id: &str, axis: usize, vectors: usize) -> StudentRecord {
    StudentRecord {
        student_id: id.to_string(),
        group_id: GROUP.to_string(),
        name: id.to_uppercase(),
        email: format!("{id}@school.test"),
        encodings: (0..vectors).map(|i| face(axis, i as f64 * 0.05)).collect(),
    }
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 7).unwrap()
}

/// What the fake video contains: its metadata and the faces in each frame.
#[derive(Debug, Clone)]
pub struct Scene {
    pub total_frames: u64,
    pub fps: f64,
    /// Faces shown in every frame without an entry in `frames`.
    pub default_faces: Vec<EncodingVector>,
    pub frames: HashMap<u64, Vec<EncodingVector>>,
    pub open_fails: bool,
    pub decode_fails_at: Option<u64>,
    /// Frames at or past this index are reported as missing.
    pub ends_at: Option<u64>,
    pub encoder_fails_at: HashSet<u64>,
    /// Time spent decoding each requested frame.
    pub frame_delay: Option<Duration>,
}

impl Scene {
    pub fn new(total_frames: u64, fps: f64) -> Self {
        Self {
            total_frames,
            fps,
            default_faces: Vec::new(),
            frames: HashMap::new(),
            open_fails: false,
            decode_fails_at: None,
            ends_at: None,
            encoder_fails_at: HashSet::new(),
            frame_delay: None,
        }
    }

    pub fn with_faces(mut self, faces: Vec<EncodingVector>) -> Self {
        self.default_faces = faces;
        self
    }

    fn faces_at(&self, index: u64) -> Vec<EncodingVector> {
        self.frames
            .get(&index)
            .cloned()
            .unwrap_or_else(|| self.default_faces.clone())
    }
}

/// Frames carry their index in the first pixel so the encoder can look the scene up.
fn frame_for(index: u64) -> RgbImage {
    let bytes = (index as u32).to_le_bytes();
    RgbImage::from_pixel(2, 2, Rgb([bytes[0], bytes[1], bytes[2]]))
}

fn index_of(frame: &RgbImage) -> u64 {
    let p = frame.get_pixel(0, 0);
    u32::from_le_bytes([p[0], p[1], p[2], 0]) as u64
}

pub struct ScriptedVideo {
    scene: Arc<Scene>,
    visited: Arc<Mutex<Vec<u64>>>,
}

impl ScriptedVideo {
    pub fn new(scene: Arc<Scene>) -> Self {
        Self {
            scene,
            visited: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn visited(&self) -> Vec<u64> {
        self.visited.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoSource for ScriptedVideo {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameReader>, VideoError> {
        if self.scene.open_fails {
            return Err(VideoError::NotFound(path.display().to_string()));
        }
        Ok(Box::new(ScriptedReader {
            scene: Arc::clone(&self.scene),
            visited: Arc::clone(&self.visited),
            metadata: VideoMetadata {
                width: 960,
                height: 540,
                fps: self.scene.fps,
                total_frames: self.scene.total_frames,
            },
            next_index: 0,
        }))
    }
}

struct ScriptedReader {
    scene: Arc<Scene>,
    visited: Arc<Mutex<Vec<u64>>>,
    metadata: VideoMetadata,
    next_index: u64,
}

#[async_trait]
impl FrameReader for ScriptedReader {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    async fn frame_at(&mut self, index: u64) -> Result<Option<RgbImage>, VideoError> {
        if index < self.next_index {
            return Err(VideoError::Rewind {
                requested: index,
                next: self.next_index,
            });
        }
        self.next_index = index + 1;

        if let Some(delay) = self.scene.frame_delay {
            tokio::time::sleep(delay).await;
        }
        if self.scene.decode_fails_at == Some(index) {
            return Err(VideoError::ShortFrame(0));
        }
        if self.scene.ends_at.is_some_and(|end| index >= end) {
            return Ok(None);
        }
        self.visited.lock().unwrap().push(index);
        Ok(Some(frame_for(index)))
    }
}

pub struct ScriptedEncoder {
    scene: Arc<Scene>,
}

#[async_trait]
impl FaceEncoder for ScriptedEncoder {
    async fn encode_faces(&self, frame: RgbImage) -> Result<Vec<EncodingVector>, FaceApiError> {
        let index = index_of(&frame);
        if self.scene.encoder_fails_at.contains(&index) {
            return Err(FaceApiError::Status(503));
        }
        Ok(self.scene.faces_at(index))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub calls: Mutex<Vec<(NaiveDate, Vec<String>)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_absent(&self, date: NaiveDate, addresses: &[String]) -> NotifySummary {
        self.calls.lock().unwrap().push((date, addresses.to_vec()));
        NotifySummary {
            sent: addresses.len(),
            failed: 0,
        }
    }
}

/// Pipeline and controller wired to in-memory stores.
pub struct Harness {
    pub video: Arc<ScriptedVideo>,
    pub ledger: Arc<InMemoryLedger>,
    pub roster: Arc<StaticRoster>,
    pub notifier: Arc<RecordingNotifier>,
    pub jobs: Arc<MemoryJobStore>,
    pub pipeline: Arc<AttendancePipeline>,
    pub controller: Arc<JobController>,
    pub media_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(students: Vec<StudentRecord>, scene: Scene) -> Self {
        let scene = Arc::new(scene);
        let video = Arc::new(ScriptedVideo::new(Arc::clone(&scene)));
        let ledger = Arc::new(InMemoryLedger::new());
        let roster = Arc::new(StaticRoster::new(students));
        let notifier = Arc::new(RecordingNotifier::default());
        let jobs = Arc::new(MemoryJobStore::new());

        let pipeline = Arc::new(AttendancePipeline::new(
            roster.clone(),
            video.clone(),
            Arc::new(ScriptedEncoder { scene }),
            Arc::new(LedgerReconciler::new(ledger.clone())),
            notifier.clone(),
        ));
        let controller = Arc::new(JobController::new(jobs.clone(), Arc::clone(&pipeline)));

        Self {
            video,
            ledger,
            roster,
            notifier,
            jobs,
            pipeline,
            controller,
            media_dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Writes a placeholder video file to disk, as an upload would.
    pub fn media_file(&self, name: &str) -> PathBuf {
        let path = self.media_dir.path().join(name);
        std::fs::write(&path, b"not really a video").unwrap();
        path
    }

    /// Uploads a placeholder file and enqueues it for the test group.
    pub async fn enqueue(&self, name: &str) -> (uuid::Uuid, PathBuf) {
        let path = self.media_file(name);
        let id = self
            .controller
            .enqueue(GROUP, GROUP, path.to_str().unwrap())
            .await
            .unwrap();
        (id, path)
    }
}
