use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Ledger cell value for one student on one date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

/// Label used for a date column in the ledger.
pub fn date_label(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// One date column after reconciliation, in roster order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttendanceReport {
    pub group_id: String,
    pub date: NaiveDate,
    pub entries: Vec<(String, AttendanceStatus)>,
}

impl AttendanceReport {
    pub fn absentees(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, status)| *status == AttendanceStatus::Absent)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn present_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, status)| *status == AttendanceStatus::Present)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_label_format() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(date_label(date), "2025-03-07");
    }

    #[test]
    fn test_absentees_preserve_roster_order() {
        let report = AttendanceReport {
            group_id: "10A".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, 7).unwrap(),
            entries: vec![
                ("c".to_string(), AttendanceStatus::Absent),
                ("a".to_string(), AttendanceStatus::Present),
                ("b".to_string(), AttendanceStatus::Absent),
            ],
        };
        assert_eq!(report.absentees(), vec!["c", "b"]);
        assert_eq!(report.present_count(), 1);
    }
}
