use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Fixed-length face descriptor produced by the face recognition service.
pub type EncodingVector = Vec<f64>;

/// Reference encodings for one enrolled student.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudentEncoding {
    pub student_id: String,
    pub group_id: String,
    pub encodings: Vec<EncodingVector>,
}

/// Enrollment metadata submitted alongside the student's photos.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EnrollmentRequest {
    #[garde(length(min = 1, max = 64))]
    pub student_id: String,

    #[garde(length(min = 1, max = 64))]
    pub group_id: String,

    #[garde(length(min = 1, max = 200))]
    pub name: String,

    #[garde(email)]
    pub email: String,
}

/// Flattened reference set for one group, in enrollment order.
///
/// Matching walks `entries` front to back, so the order here decides which
/// student is credited when two references are both within tolerance.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    entries: Vec<(String, EncodingVector)>,
    distinct: usize,
}

impl ReferenceSet {
    pub fn from_students(students: &[StudentEncoding]) -> Self {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        for student in students {
            for encoding in &student.encodings {
                entries.push((student.student_id.clone(), encoding.clone()));
                seen.insert(student.student_id.as_str());
            }
        }
        let distinct = seen.len();
        Self { entries, distinct }
    }

    pub fn entries(&self) -> &[(String, EncodingVector)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct students with at least one usable encoding.
    pub fn universe_size(&self) -> usize {
        self.distinct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: &str, vectors: usize) -> StudentEncoding {
        StudentEncoding {
            student_id: id.to_string(),
            group_id: "10A".to_string(),
            encodings: (0..vectors).map(|i| vec![i as f64; 4]).collect(),
        }
    }

    #[test]
    fn test_universe_counts_students_not_rows() {
        let refs = ReferenceSet::from_students(&[student("a", 2), student("b", 3)]);
        assert_eq!(refs.entries().len(), 5);
        assert_eq!(refs.universe_size(), 2);
    }

    #[test]
    fn test_students_without_encodings_are_outside_universe() {
        let refs = ReferenceSet::from_students(&[student("a", 1), student("b", 0)]);
        assert_eq!(refs.universe_size(), 1);
        assert!(!refs.is_empty());

        let empty = ReferenceSet::from_students(&[student("c", 0)]);
        assert!(empty.is_empty());
        assert_eq!(empty.universe_size(), 0);
    }

    #[test]
    fn test_enrollment_request_validation() {
        let ok = EnrollmentRequest {
            student_id: "91E01".to_string(),
            group_id: "9E1".to_string(),
            name: "Asha".to_string(),
            email: "asha@example.edu".to_string(),
        };
        assert!(ok.validate().is_ok());

        let bad = EnrollmentRequest {
            email: "not-an-email".to_string(),
            ..ok
        };
        assert!(bad.validate().is_err());
    }
}
