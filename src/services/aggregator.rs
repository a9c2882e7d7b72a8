use std::collections::BTreeSet;

/// Unique set of students identified during one job run.
#[derive(Debug, Default, Clone)]
pub struct DetectionAggregator {
    detected: BTreeSet<String>,
}

impl DetectionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a detection. Returns `true` the first time a student is seen.
    pub fn add(&mut self, student_id: &str) -> bool {
        if self.detected.contains(student_id) {
            return false;
        }
        self.detected.insert(student_id.to_string())
    }

    /// True once every identity in a universe of `universe_size` has been seen.
    pub fn is_saturated(&self, universe_size: usize) -> bool {
        self.detected.len() >= universe_size
    }

    pub fn len(&self) -> usize {
        self.detected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detected.is_empty()
    }

    pub fn result(&self) -> &BTreeSet<String> {
        &self.detected
    }

    pub fn into_result(self) -> BTreeSet<String> {
        self.detected
    }
}
