use async_trait::async_trait;
use ffmpeg_next::format::{context::Input, Pixel};
use ffmpeg_next::software::scaling;
use ffmpeg_next::util::frame::video::Video as VideoFrame;
use ffmpeg_next::Rational;
use image::RgbImage;
use std::path::Path;

/// Working resolution every decoded frame is scaled to before face detection.
pub const FRAME_WIDTH: u32 = 960;
pub const FRAME_HEIGHT: u32 = 540;

#[derive(Clone, Debug, PartialEq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    /// Zero when the container does not report a usable frame rate.
    pub fps: f64,
    pub total_frames: u64,
}

/// Opens videos for a single forward pass.
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameReader>, VideoError>;
}

/// One open video, read front to back.
///
/// Frames come back as RGB at the working resolution. Requested indices must
/// be strictly increasing. `frame_at` returns `Ok(None)` once the index lies
/// past the last decodable frame.
#[async_trait]
pub trait FrameReader: Send {
    fn metadata(&self) -> &VideoMetadata;

    async fn frame_at(&mut self, index: u64) -> Result<Option<RgbImage>, VideoError>;
}

/// Decodes with libavformat/libavcodec through ffmpeg-next.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegSource;

impl FfmpegSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VideoSource for FfmpegSource {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameReader>, VideoError> {
        if !path.exists() {
            return Err(VideoError::NotFound(path.display().to_string()));
        }

        let path = path.to_path_buf();
        let decoding = tokio::task::spawn_blocking(move || Decoding::open(&path)).await??;

        Ok(Box::new(FfmpegFrameReader {
            metadata: decoding.metadata.clone(),
            decoding: Some(decoding),
        }))
    }
}

/// Reader over one input. Decoding runs on the blocking pool, one frame request at a time.
pub struct FfmpegFrameReader {
    metadata: VideoMetadata,
    /// Taken while a blocking decode holds it. Stays empty if that decode was abandoned.
    decoding: Option<Decoding>,
}

#[async_trait]
impl FrameReader for FfmpegFrameReader {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    async fn frame_at(&mut self, index: u64) -> Result<Option<RgbImage>, VideoError> {
        let mut decoding = self.decoding.take().ok_or(VideoError::Interrupted)?;
        let (decoding, frame) = tokio::task::spawn_blocking(move || {
            let frame = decoding.frame_at(index);
            (decoding, frame)
        })
        .await?;
        self.decoding = Some(decoding);
        frame
    }
}

struct Decoding {
    input: Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: scaling::Context,
    stream_index: usize,
    metadata: VideoMetadata,
    /// Index of the next frame the decoder hands back.
    next_index: u64,
    flushing: bool,
}

// Safety: a Decoding is owned by exactly one reader and only one blocking task
// touches it at a time. The ffmpeg contexts inside are never shared.
unsafe impl Send for Decoding {}

impl Decoding {
    fn open(path: &Path) -> Result<Self, VideoError> {
        ffmpeg_next::init()?;

        let input = ffmpeg_next::format::input(path)?;
        let duration = seconds(input.duration());

        let (stream_index, decoder, fps, frames) = {
            let stream = input
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or(VideoError::NoVideoStream)?;
            let context =
                ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
            let decoder = context.decoder().video()?;
            let fps = frame_rate(stream.avg_frame_rate())
                .or_else(|| frame_rate(stream.rate()))
                .unwrap_or(0.0);
            (stream.index(), decoder, fps, stream.frames())
        };

        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            FRAME_WIDTH,
            FRAME_HEIGHT,
            scaling::Flags::BILINEAR,
        )?;

        let metadata = VideoMetadata {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            total_frames: frame_count(frames, duration, fps),
        };

        Ok(Self {
            input,
            decoder,
            scaler,
            stream_index,
            metadata,
            next_index: 0,
            flushing: false,
        })
    }

    /// Decodes forward to `index`, scaling only the frame asked for.
    fn frame_at(&mut self, index: u64) -> Result<Option<RgbImage>, VideoError> {
        if index < self.next_index {
            return Err(VideoError::Rewind {
                requested: index,
                next: self.next_index,
            });
        }

        while let Some(decoded) = self.next_decoded()? {
            let current = self.next_index;
            self.next_index += 1;
            if current == index {
                return self.to_rgb(&decoded).map(Some);
            }
        }
        Ok(None)
    }

    fn next_decoded(&mut self) -> Result<Option<VideoFrame>, VideoError> {
        loop {
            let mut decoded = VideoFrame::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Ok(Some(decoded));
            }
            if self.flushing {
                return Ok(None);
            }

            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() == self.stream_index {
                        self.decoder.send_packet(&packet)?;
                    }
                }
                None => {
                    self.decoder.send_eof()?;
                    self.flushing = true;
                }
            }
        }
    }

    fn to_rgb(&mut self, decoded: &VideoFrame) -> Result<RgbImage, VideoError> {
        let mut rgb = VideoFrame::empty();
        self.scaler.run(decoded, &mut rgb)?;
        let pixels = packed_rows(rgb.data(0), rgb.stride(0), FRAME_WIDTH, FRAME_HEIGHT);
        let len = pixels.len();
        RgbImage::from_raw(FRAME_WIDTH, FRAME_HEIGHT, pixels).ok_or(VideoError::ShortFrame(len))
    }
}

/// Container duration in seconds; zero when unknown.
fn seconds(duration: i64) -> f64 {
    if duration > 0 {
        duration as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE)
    } else {
        0.0
    }
}

fn frame_rate(rate: Rational) -> Option<f64> {
    if rate.denominator() == 0 {
        return None;
    }
    let fps = f64::from(rate.numerator()) / f64::from(rate.denominator());
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Frame count from the stream header, else estimated from duration and rate.
fn frame_count(reported: i64, duration: f64, fps: f64) -> u64 {
    if reported > 0 {
        return reported as u64;
    }
    if fps > 0.0 && duration > 0.0 {
        (duration * fps).floor() as u64
    } else {
        0
    }
}

/// Copies an RGB24 plane into a tight buffer, dropping any row padding.
fn packed_rows(data: &[u8], stride: usize, width: u32, height: u32) -> Vec<u8> {
    let row_bytes = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        match data.get(start..start + row_bytes) {
            Some(bytes) => pixels.extend_from_slice(bytes),
            None => break,
        }
    }
    pixels
}

#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("Video file not found: {0}")]
    NotFound(String),

    #[error("Decoder error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),

    #[error("No video stream in file")]
    NoVideoStream,

    #[error("Frame {requested} requested after frame {next} was already passed")]
    Rewind { requested: u64, next: u64 },

    #[error("Reader lost its decoder after an abandoned read")]
    Interrupted,

    #[error("Decode task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Decoded frame has {0} bytes, expected a 960x540 RGB frame")]
    ShortFrame(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate() {
        assert_eq!(frame_rate(Rational::new(30, 1)), Some(30.0));
        assert!((frame_rate(Rational::new(30000, 1001)).unwrap() - 29.97).abs() < 0.01);
        assert_eq!(frame_rate(Rational::new(0, 0)), None);
        assert_eq!(frame_rate(Rational::new(0, 1)), None);
    }

    #[test]
    fn test_frame_count_prefers_header() {
        assert_eq!(frame_count(900, 30.0, 30.0), 900);
    }

    #[test]
    fn test_frame_count_falls_back_to_duration() {
        assert_eq!(frame_count(0, 12.5, 25.0), 312);
    }

    #[test]
    fn test_frame_count_without_rate_is_zero() {
        assert_eq!(frame_count(0, 12.5, 0.0), 0);
        assert_eq!(frame_count(-1, 0.0, 30.0), 0);
    }

    #[test]
    fn test_seconds_from_container_duration() {
        assert_eq!(seconds(2_500_000), 2.5);
        assert_eq!(seconds(ffmpeg_next::ffi::AV_NOPTS_VALUE), 0.0);
    }

    #[test]
    fn test_packed_rows_strips_padding() {
        // 2x2 RGB with two padding bytes per row.
        let data = [1, 1, 1, 2, 2, 2, 0, 0, 3, 3, 3, 4, 4, 4, 0, 0];
        let pixels = packed_rows(&data, 8, 2, 2);
        assert_eq!(pixels, vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]);
    }

    #[test]
    fn test_packed_rows_short_plane() {
        let pixels = packed_rows(&[9; 6], 6, 2, 2);
        assert_eq!(pixels.len(), 6);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let err = FfmpegSource::new()
            .open(Path::new("/nonexistent/clip.mp4"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VideoError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_open_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("class.mp4");
        std::fs::write(&path, b"definitely not an mp4").unwrap();

        let err = FfmpegSource::new().open(&path).await.err().unwrap();
        assert!(matches!(err, VideoError::Ffmpeg(_) | VideoError::NoVideoStream));
    }
}
