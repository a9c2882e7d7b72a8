use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::models::attendance::{date_label, AttendanceReport, AttendanceStatus};
use crate::services::ledger::{LedgerError, LedgerStore};

type ColumnKey = (String, NaiveDate);

/// Merges one day's detections into a group's attendance ledger.
///
/// Each call rewrites the whole date column from the roster and the present
/// set, so repeating a call with the same inputs leaves the ledger unchanged.
/// Calls for the same (group, date) are serialised through the store's column
/// lock, so reconcilers in different processes never interleave. Same-process
/// callers queue on a local lock first and hold at most one store lock per column.
pub struct LedgerReconciler {
    store: Arc<dyn LedgerStore>,
    locks: Mutex<HashMap<ColumnKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl LedgerReconciler {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn reconcile(
        &self,
        group_id: &str,
        date: NaiveDate,
        present: &BTreeSet<String>,
    ) -> Result<AttendanceReport, LedgerError> {
        let key = (group_id.to_string(), date);
        let lock = self.column_lock(&key)?;

        let result = {
            let _guard = lock.lock().await;
            self.reconcile_exclusive(group_id, date, present).await
        };

        self.release_lock(&key, lock);
        result
    }

    async fn reconcile_exclusive(
        &self,
        group_id: &str,
        date: NaiveDate,
        present: &BTreeSet<String>,
    ) -> Result<AttendanceReport, LedgerError> {
        let label = date_label(date);
        let column_lock = self.store.lock_column(group_id, &label).await?;
        let result = self.reconcile_locked(group_id, date, &label, present).await;
        if let Err(e) = column_lock.release().await {
            warn!(group_id, date = %label, error = %e, "Failed to release ledger column lock");
        }
        result
    }

    async fn reconcile_locked(
        &self,
        group_id: &str,
        date: NaiveDate,
        label: &str,
        present: &BTreeSet<String>,
    ) -> Result<AttendanceReport, LedgerError> {
        let sheet = self.store.get_or_create_sheet(group_id).await?;
        let column = self.store.get_or_create_column(sheet, label).await?;

        let mut roster = self.store.roster(sheet).await?;
        let newcomers: Vec<String> = present
            .iter()
            .filter(|id| !roster.contains(id))
            .cloned()
            .collect();
        if !newcomers.is_empty() {
            debug!(group_id, count = newcomers.len(), "Adding students to ledger roster");
            self.store.append_rows(sheet, &newcomers).await?;
            roster.extend(newcomers);
        }

        let entries: Vec<(String, AttendanceStatus)> = roster
            .into_iter()
            .map(|id| {
                let status = if present.contains(&id) {
                    AttendanceStatus::Present
                } else {
                    AttendanceStatus::Absent
                };
                (id, status)
            })
            .collect();

        self.store.write_column(sheet, column, &entries).await?;

        let report = AttendanceReport {
            group_id: group_id.to_string(),
            date,
            entries,
        };

        info!(
            group_id,
            date = %label,
            present = report.present_count(),
            absent = report.entries.len() - report.present_count(),
            "Attendance column reconciled"
        );

        Ok(report)
    }

    /// Reads back a reconciled date column, if the group and date exist.
    pub async fn read(
        &self,
        group_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Vec<(String, Option<AttendanceStatus>)>>, LedgerError> {
        let Some(sheet) = self.store.find_sheet(group_id).await? else {
            return Ok(None);
        };
        let Some(column) = self.store.find_column(sheet, &date_label(date)).await? else {
            return Ok(None);
        };
        Ok(Some(self.store.read_column(sheet, column).await?))
    }

    fn column_lock(&self, key: &ColumnKey) -> Result<Arc<tokio::sync::Mutex<()>>, LedgerError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| LedgerError::Unavailable(format!("lock table poisoned: {e}")))?;
        Ok(Arc::clone(locks.entry(key.clone()).or_default()))
    }

    fn release_lock(&self, key: &ColumnKey, lock: Arc<tokio::sync::Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        drop(lock);
        // Clones are only handed out under the table lock, so a count of one
        // means nobody is waiting on this column.
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }
}
