use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

use super::{ColumnId, ColumnLock, LedgerError, LedgerStore, SheetId};
use crate::models::attendance::AttendanceStatus;

#[derive(Debug, Default)]
struct Sheet {
    group_id: String,
    columns: Vec<String>,
    rows: Vec<String>,
    /// (row position, column position) -> status
    cells: HashMap<(usize, usize), AttendanceStatus>,
}

/// Process-local ledger. Sheet and column ids are their positions.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    sheets: Mutex<Vec<Sheet>>,
    column_locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `LedgerError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of mutating calls (sheet/column/row creation and cell writes) that changed state.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("in-memory ledger switched off".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Sheet>>, LedgerError> {
        self.available()?;
        self.sheets
            .lock()
            .map_err(|e| LedgerError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn touched(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

fn sheet_mut(sheets: &mut [Sheet], id: SheetId) -> Result<&mut Sheet, LedgerError> {
    usize::try_from(id)
        .ok()
        .and_then(|i| sheets.get_mut(i))
        .ok_or_else(|| LedgerError::Malformed(format!("unknown sheet {id}")))
}

fn column_index(sheet: &Sheet, column: ColumnId) -> Result<usize, LedgerError> {
    usize::try_from(column)
        .ok()
        .filter(|&c| c < sheet.columns.len())
        .ok_or_else(|| LedgerError::Malformed(format!("unknown column {column}")))
}

struct MemoryColumnLock(OwnedMutexGuard<()>);

#[async_trait]
impl ColumnLock for MemoryColumnLock {
    async fn release(self: Box<Self>) -> Result<(), LedgerError> {
        let MemoryColumnLock(guard) = *self;
        drop(guard);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn lock_column(
        &self,
        group_id: &str,
        label: &str,
    ) -> Result<Box<dyn ColumnLock>, LedgerError> {
        self.available()?;
        let lock = {
            let mut locks = self
                .column_locks
                .lock()
                .map_err(|e| LedgerError::Unavailable(format!("lock table poisoned: {e}")))?;
            Arc::clone(
                locks
                    .entry((group_id.to_string(), label.to_string()))
                    .or_default(),
            )
        };
        Ok(Box::new(MemoryColumnLock(lock.lock_owned().await)))
    }

    async fn get_or_create_sheet(&self, group_id: &str) -> Result<SheetId, LedgerError> {
        let mut sheets = self.lock()?;
        if let Some(pos) = sheets.iter().position(|s| s.group_id == group_id) {
            return Ok(pos as SheetId);
        }
        sheets.push(Sheet {
            group_id: group_id.to_string(),
            ..Sheet::default()
        });
        self.touched();
        Ok((sheets.len() - 1) as SheetId)
    }

    async fn find_sheet(&self, group_id: &str) -> Result<Option<SheetId>, LedgerError> {
        let sheets = self.lock()?;
        Ok(sheets
            .iter()
            .position(|s| s.group_id == group_id)
            .map(|p| p as SheetId))
    }

    async fn get_or_create_column(
        &self,
        sheet: SheetId,
        label: &str,
    ) -> Result<ColumnId, LedgerError> {
        let mut sheets = self.lock()?;
        let sheet = sheet_mut(&mut sheets, sheet)?;
        if let Some(pos) = sheet.columns.iter().position(|c| c == label) {
            return Ok(pos as ColumnId);
        }
        sheet.columns.push(label.to_string());
        self.touched();
        Ok((sheet.columns.len() - 1) as ColumnId)
    }

    async fn find_column(
        &self,
        sheet: SheetId,
        label: &str,
    ) -> Result<Option<ColumnId>, LedgerError> {
        let mut sheets = self.lock()?;
        let sheet = sheet_mut(&mut sheets, sheet)?;
        Ok(sheet
            .columns
            .iter()
            .position(|c| c == label)
            .map(|p| p as ColumnId))
    }

    async fn columns(&self, sheet: SheetId) -> Result<Vec<String>, LedgerError> {
        let mut sheets = self.lock()?;
        Ok(sheet_mut(&mut sheets, sheet)?.columns.clone())
    }

    async fn roster(&self, sheet: SheetId) -> Result<Vec<String>, LedgerError> {
        let mut sheets = self.lock()?;
        Ok(sheet_mut(&mut sheets, sheet)?.rows.clone())
    }

    async fn append_rows(&self, sheet: SheetId, student_ids: &[String]) -> Result<(), LedgerError> {
        let mut sheets = self.lock()?;
        let sheet = sheet_mut(&mut sheets, sheet)?;
        let mut appended = false;
        for id in student_ids {
            if !sheet.rows.contains(id) {
                sheet.rows.push(id.clone());
                appended = true;
            }
        }
        if appended {
            self.touched();
        }
        Ok(())
    }

    async fn read_column(
        &self,
        sheet: SheetId,
        column: ColumnId,
    ) -> Result<Vec<(String, Option<AttendanceStatus>)>, LedgerError> {
        let mut sheets = self.lock()?;
        let sheet = sheet_mut(&mut sheets, sheet)?;
        let col = column_index(sheet, column)?;
        Ok(sheet
            .rows
            .iter()
            .enumerate()
            .map(|(row, id)| (id.clone(), sheet.cells.get(&(row, col)).copied()))
            .collect())
    }

    async fn write_column(
        &self,
        sheet: SheetId,
        column: ColumnId,
        cells: &[(String, AttendanceStatus)],
    ) -> Result<(), LedgerError> {
        let mut sheets = self.lock()?;
        let sheet = sheet_mut(&mut sheets, sheet)?;
        let col = column_index(sheet, column)?;
        for (student_id, status) in cells {
            let row = sheet
                .rows
                .iter()
                .position(|r| r == student_id)
                .ok_or_else(|| LedgerError::Malformed(format!("{student_id} is not on the roster")))?;
            sheet.cells.insert((row, col), *status);
        }
        self.touched();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sheet_and_column_are_reused() {
        let ledger = InMemoryLedger::new();
        let a = ledger.get_or_create_sheet("10A").await.unwrap();
        let again = ledger.get_or_create_sheet("10A").await.unwrap();
        let b = ledger.get_or_create_sheet("10B").await.unwrap();
        assert_eq!(a, again);
        assert_ne!(a, b);

        let c1 = ledger.get_or_create_column(a, "2025-03-07").await.unwrap();
        let c2 = ledger.get_or_create_column(a, "2025-03-08").await.unwrap();
        let c1_again = ledger.get_or_create_column(a, "2025-03-07").await.unwrap();
        assert_eq!(c1, c1_again);
        assert_ne!(c1, c2);
        assert_eq!(ledger.columns(a).await.unwrap(), vec!["2025-03-07", "2025-03-08"]);
    }

    #[tokio::test]
    async fn test_rows_append_without_duplicates() {
        let ledger = InMemoryLedger::new();
        let sheet = ledger.get_or_create_sheet("10A").await.unwrap();
        ledger
            .append_rows(sheet, &["b".to_string(), "a".to_string()])
            .await
            .unwrap();
        ledger
            .append_rows(sheet, &["a".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(ledger.roster(sheet).await.unwrap(), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_write_to_unknown_row_is_rejected() {
        let ledger = InMemoryLedger::new();
        let sheet = ledger.get_or_create_sheet("10A").await.unwrap();
        let col = ledger.get_or_create_column(sheet, "2025-03-07").await.unwrap();
        let err = ledger
            .write_column(sheet, col, &[("ghost".to_string(), AttendanceStatus::Present)])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_column_lock_excludes_same_column_only() {
        let ledger = InMemoryLedger::new();
        let held = ledger.lock_column("10A", "2025-03-07").await.unwrap();

        let other_date = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            ledger.lock_column("10A", "2025-03-08"),
        )
        .await;
        assert!(other_date.is_ok());

        let same = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            ledger.lock_column("10A", "2025-03-07"),
        )
        .await;
        assert!(same.is_err());

        held.release().await.unwrap();
        assert!(ledger.lock_column("10A", "2025-03-07").await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_ledger_fails_every_call() {
        let ledger = InMemoryLedger::new();
        ledger.set_unavailable(true);
        assert!(matches!(
            ledger.get_or_create_sheet("10A").await,
            Err(LedgerError::Unavailable(_))
        ));
        assert!(matches!(
            ledger.lock_column("10A", "2025-03-07").await,
            Err(LedgerError::Unavailable(_))
        ));
        assert_eq!(ledger.write_count(), 0);
    }
}
