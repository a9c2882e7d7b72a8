use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::attendance::date_label;

/// Delivery counts for one absence notification round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifySummary {
    pub sent: usize,
    pub failed: usize,
}

/// Tells absent students they were marked absent.
///
/// Delivery is best effort: a failure for one recipient is logged and the
/// rest are still attempted.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_absent(&self, date: NaiveDate, addresses: &[String]) -> NotifySummary;
}

/// Notification message for one recipient.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AbsenceNotice {
    pub to: String,
    pub date: String,
    pub subject: String,
    pub body: String,
}

impl AbsenceNotice {
    pub fn new(to: &str, date: NaiveDate) -> Self {
        let date = date_label(date);
        Self {
            to: to.to_string(),
            subject: "Attendance Notification".to_string(),
            body: format!(
                "Dear Student,\n\nYou were marked absent on {date}. \
                 Please contact your teacher if this is incorrect."
            ),
            date,
        }
    }
}

/// Posts one JSON notice per recipient to a webhook (mail relay, chat bridge, ...).
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(NotifyError::Http)?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    async fn send(&self, notice: &AbsenceNotice) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(NotifyError::Http)?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_absent(&self, date: NaiveDate, addresses: &[String]) -> NotifySummary {
        let mut summary = NotifySummary::default();
        for address in addresses {
            let notice = AbsenceNotice::new(address, date);
            match self.send(&notice).await {
                Ok(()) => summary.sent += 1,
                Err(e) => {
                    warn!(recipient = %address, error = %e, "Failed to deliver absence notice");
                    summary.failed += 1;
                }
            }
        }
        info!(
            date = %date_label(date),
            sent = summary.sent,
            failed = summary.failed,
            "Absence notifications delivered"
        );
        summary
    }
}

/// Only logs who would have been notified.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_absent(&self, date: NaiveDate, addresses: &[String]) -> NotifySummary {
        for address in addresses {
            info!(recipient = %address, date = %date_label(date), "Absence notice (not delivered)");
        }
        NotifySummary {
            sent: addresses.len(),
            failed: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification endpoint rejected the notice with status {0}")]
    Rejected(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absence_notice_text() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let notice = AbsenceNotice::new("asha@example.edu", date);
        assert_eq!(notice.to, "asha@example.edu");
        assert_eq!(notice.date, "2025-03-07");
        assert!(notice.body.contains("marked absent on 2025-03-07"));
    }

    #[tokio::test]
    async fn test_log_notifier_counts_everyone() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let summary = LogNotifier
            .notify_absent(date, &["a@x.test".to_string(), "b@x.test".to_string()])
            .await;
        assert_eq!(summary, NotifySummary { sent: 2, failed: 0 });
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_swallowed_per_recipient() {
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/absent").unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let summary = notifier
            .notify_absent(date, &["a@x.test".to_string(), "b@x.test".to_string()])
            .await;
        assert_eq!(summary.sent, 0);
        assert_eq!(summary.failed, 2);
    }
}
