//! Bounded frame sampling.
//!
//! Decoding every frame of a lecture recording is far too slow, so each job
//! visits a bounded number of frames spread evenly across the whole video.
//! The count scales with the video's duration (`target_rate` frames per
//! second of source time) but never drops below `minimum_samples` and never
//! exceeds the number of frames available.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SamplingConfig {
    /// Sampled frames per second of source time.
    pub target_rate: u32,
    /// The source fps is raised to at least this value before dividing.
    pub floor_fps: f64,
    /// Minimum number of samples for any video long enough to provide them.
    pub minimum_samples: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            target_rate: 10,
            floor_fps: 30.0,
            minimum_samples: 30,
        }
    }
}

/// Evenly spaced frame indices over `[0, total_frames)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSampler {
    total_frames: u64,
    sample_count: u64,
}

impl FrameSampler {
    /// `fps` values that are zero, negative or NaN are treated as missing.
    pub fn new(total_frames: u64, fps: f64, config: &SamplingConfig) -> Self {
        let sample_count = sample_count(total_frames, fps, config);
        Self {
            total_frames,
            sample_count,
        }
    }

    pub fn len(&self) -> u64 {
        self.sample_count
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Frame index of the `i`-th sample, or `None` past the last sample.
    pub fn index(&self, i: u64) -> Option<u64> {
        if i >= self.sample_count {
            return None;
        }
        Some(((self.total_frames as u128 * i as u128) / self.sample_count as u128) as u64)
    }

    /// Starts a fresh pass over the sampled indices.
    pub fn iter(&self) -> SampleIter {
        SampleIter {
            sampler: *self,
            next: 0,
        }
    }
}

impl IntoIterator for &FrameSampler {
    type Item = u64;
    type IntoIter = SampleIter;

    fn into_iter(self) -> SampleIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct SampleIter {
    sampler: FrameSampler,
    next: u64,
}

impl Iterator for SampleIter {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let index = self.sampler.index(self.next)?;
        self.next += 1;
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.sampler.sample_count - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SampleIter {}

fn sample_count(total_frames: u64, fps: f64, config: &SamplingConfig) -> u64 {
    if total_frames == 0 {
        return 0;
    }

    let fps = if fps.is_finite() && fps > 0.0 { fps } else { 0.0 };
    let divisor = fps.max(config.floor_fps).max(1.0);
    let seconds = (total_frames as f64 / divisor).floor() as u64;

    let scaled = seconds.saturating_mul(config.target_rate as u64);
    scaled
        .max(config.minimum_samples as u64)
        .min(total_frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler(total: u64, fps: f64) -> FrameSampler {
        FrameSampler::new(total, fps, &SamplingConfig::default())
    }

    #[test]
    fn test_ten_second_clip_at_30fps() {
        let s = sampler(300, 30.0);
        assert_eq!(s.len(), 100);

        let indices: Vec<u64> = s.iter().collect();
        assert_eq!(indices.len(), 100);
        assert_eq!(indices[0], 0);
        assert_eq!(indices[1], 3);
        assert_eq!(indices[50], 150);
        assert_eq!(indices[99], 297);
    }

    #[test]
    fn test_low_fps_is_raised_to_floor() {
        // 24 fps counts as 30: 600 / 30 = 20 seconds -> 200 samples.
        assert_eq!(sampler(600, 24.0).len(), 200);
        // 60 fps is above the floor: 600 / 60 = 10 seconds -> 100 samples.
        assert_eq!(sampler(600, 60.0).len(), 100);
    }

    #[test]
    fn test_missing_fps_does_not_panic() {
        assert_eq!(sampler(300, 0.0).len(), 100);
        assert_eq!(sampler(300, -5.0).len(), 100);
        assert_eq!(sampler(300, f64::NAN).len(), 100);
        assert_eq!(sampler(300, f64::INFINITY).len(), 100);
    }

    #[test]
    fn test_short_clip_uses_minimum_floor() {
        // 45 frames is under two seconds, so the minimum of 30 applies.
        let s = sampler(45, 30.0);
        assert_eq!(s.len(), 30);
    }

    #[test]
    fn test_tiny_clip_is_capped_at_total_frames() {
        let s = sampler(12, 30.0);
        assert_eq!(s.len(), 12);
        assert_eq!(s.iter().collect::<Vec<_>>(), (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_frames_is_empty() {
        let s = sampler(0, 30.0);
        assert!(s.is_empty());
        assert_eq!(s.iter().next(), None);
        assert_eq!(s.index(0), None);
    }

    #[test]
    fn test_index_past_last_sample() {
        let s = sampler(300, 30.0);
        assert_eq!(s.index(0), Some(0));
        assert_eq!(s.index(99), Some(297));
        assert_eq!(s.index(100), None);
    }

    #[test]
    fn test_iteration_is_restartable() {
        let s = sampler(900, 25.0);
        let first: Vec<u64> = s.iter().collect();
        let second: Vec<u64> = (&s).into_iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_bounds_hold_across_inputs() {
        let config = SamplingConfig::default();
        for total in [1u64, 2, 29, 30, 31, 100, 299, 300, 1_001, 54_000, 216_000] {
            for fps in [0.0, 1.0, 15.0, 29.97, 30.0, 59.94, 120.0] {
                let s = FrameSampler::new(total, fps, &config);
                let indices: Vec<u64> = s.iter().collect();

                assert_eq!(indices.len() as u64, s.len());
                assert!(s.len() <= total, "total={total} fps={fps}");
                if total >= config.minimum_samples as u64 {
                    assert!(s.len() >= config.minimum_samples as u64);
                }
                assert!(indices.windows(2).all(|w| w[0] < w[1]));
                assert!(indices.iter().all(|&i| i < total));
            }
        }
    }

    #[test]
    fn test_hour_long_video_stays_bounded() {
        // One hour at 30 fps: 3600 seconds * 10 samples per second.
        let s = sampler(108_000, 30.0);
        assert_eq!(s.len(), 36_000);
        assert_eq!(s.iter().last(), Some(107_997));
    }
}
