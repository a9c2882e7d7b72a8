use crate::models::student::{EncodingVector, ReferenceSet};
use crate::services::aggregator::DetectionAggregator;

/// Default maximum distance between two encodings counted as the same face.
pub const DEFAULT_TOLERANCE: f64 = 0.5;

/// Euclidean distance between two encodings, or `None` when their lengths differ.
pub fn face_distance(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    Some(sum.sqrt())
}

/// What one frame contributed to the job's detections.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrameMatches {
    /// Faces compared against the reference set before matching stopped.
    pub faces_checked: usize,
    /// Students seen for the first time in this job.
    pub newly_detected: Vec<String>,
    /// The aggregator already held every enrolled student.
    pub saturated: bool,
}

/// Resolves face encodings to enrolled students.
///
/// Resolution is first-match: references are scanned in enrollment order and
/// the first one within tolerance wins, even if a later reference is closer.
#[derive(Debug, Clone, Copy)]
pub struct FaceMatcher {
    tolerance: f64,
}

impl Default for FaceMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl FaceMatcher {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Student credited for `encoding`, if any reference is within tolerance.
    pub fn resolve<'a>(&self, encoding: &[f64], references: &'a ReferenceSet) -> Option<&'a str> {
        references
            .entries()
            .iter()
            .find(|(_, reference)| {
                face_distance(encoding, reference).is_some_and(|d| d <= self.tolerance)
            })
            .map(|(student_id, _)| student_id.as_str())
    }

    /// Matches every face found in one frame and feeds the aggregator.
    ///
    /// Stops early once the aggregator holds every student in the group.
    pub fn match_frame(
        &self,
        encodings: &[EncodingVector],
        references: &ReferenceSet,
        aggregator: &mut DetectionAggregator,
    ) -> FrameMatches {
        let universe = references.universe_size();
        let mut matches = FrameMatches::default();

        for encoding in encodings {
            if aggregator.is_saturated(universe) {
                matches.saturated = true;
                break;
            }
            matches.faces_checked += 1;

            if let Some(student_id) = self.resolve(encoding, references) {
                if aggregator.add(student_id) {
                    matches.newly_detected.push(student_id.to_string());
                }
            }
        }

        if aggregator.is_saturated(universe) {
            matches.saturated = true;
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::student::StudentEncoding;

    fn student(id: &str, encodings: Vec<Vec<f64>>) -> StudentEncoding {
        StudentEncoding {
            student_id: id.to_string(),
            group_id: "10A".to_string(),
            encodings,
        }
    }

    fn three_students() -> ReferenceSet {
        ReferenceSet::from_students(&[
            student("a", vec![vec![0.0, 0.0, 0.0], vec![0.1, 0.0, 0.0]]),
            student("b", vec![vec![1.0, 1.0, 1.0], vec![1.0, 1.1, 1.0]]),
            student("c", vec![vec![5.0, 5.0, 5.0], vec![5.0, 5.0, 5.1]]),
        ])
    }

    #[test]
    fn test_face_distance() {
        assert_eq!(face_distance(&[0.0, 0.0], &[3.0, 4.0]), Some(5.0));
        assert_eq!(face_distance(&[1.0], &[1.0, 2.0]), None);
    }

    #[test]
    fn test_resolve_within_tolerance() {
        let refs = three_students();
        let matcher = FaceMatcher::default();

        assert_eq!(matcher.resolve(&[0.05, 0.0, 0.0], &refs), Some("a"));
        assert_eq!(matcher.resolve(&[1.0, 1.05, 1.0], &refs), Some("b"));
        assert_eq!(matcher.resolve(&[9.0, 9.0, 9.0], &refs), None);
    }

    #[test]
    fn test_tolerance_boundary_is_inclusive() {
        let refs = ReferenceSet::from_students(&[student("a", vec![vec![0.0, 0.0]])]);
        let matcher = FaceMatcher::new(0.5);
        assert_eq!(matcher.resolve(&[0.5, 0.0], &refs), Some("a"));
        assert_eq!(matcher.resolve(&[0.5, 0.01], &refs), None);
    }

    #[test]
    fn test_first_match_wins_over_nearest() {
        // The face is 0.4 from "far" and 0.1 from "near"; "far" is enrolled first.
        let refs = ReferenceSet::from_students(&[
            student("far", vec![vec![0.0]]),
            student("near", vec![vec![0.3]]),
        ]);
        let matcher = FaceMatcher::new(0.5);
        assert_eq!(matcher.resolve(&[0.4], &refs), Some("far"));
    }

    #[test]
    fn test_mismatched_dimensions_never_match() {
        let refs = ReferenceSet::from_students(&[student("a", vec![vec![0.0, 0.0, 0.0]])]);
        assert_eq!(FaceMatcher::default().resolve(&[0.0, 0.0], &refs), None);
    }

    #[test]
    fn test_match_frame_collects_unique_students() {
        let refs = three_students();
        let matcher = FaceMatcher::default();
        let mut agg = DetectionAggregator::new();

        let faces = vec![
            vec![0.0, 0.0, 0.0],
            vec![1.0, 1.0, 1.0],
            vec![0.1, 0.0, 0.0],
            vec![20.0, 20.0, 20.0],
        ];
        let result = matcher.match_frame(&faces, &refs, &mut agg);

        assert_eq!(result.faces_checked, 4);
        assert_eq!(result.newly_detected, vec!["a".to_string(), "b".to_string()]);
        assert!(!result.saturated);
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn test_match_frame_stops_once_saturated() {
        let refs = ReferenceSet::from_students(&[student("a", vec![vec![0.0]])]);
        let matcher = FaceMatcher::default();
        let mut agg = DetectionAggregator::new();

        let faces = vec![vec![0.0], vec![0.1], vec![0.2]];
        let result = matcher.match_frame(&faces, &refs, &mut agg);

        assert_eq!(result.faces_checked, 1);
        assert!(result.saturated);

        let again = matcher.match_frame(&faces, &refs, &mut agg);
        assert_eq!(again.faces_checked, 0);
        assert!(again.saturated);
    }
}
