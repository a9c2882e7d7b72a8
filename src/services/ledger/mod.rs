//! Attendance ledger storage.
//!
//! A ledger is one sheet per group: a roster of student rows, one column per
//! date label, and a Present/Absent cell where the two meet. Rows and columns
//! are only ever appended.

use async_trait::async_trait;

use crate::models::attendance::AttendanceStatus;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryLedger;
pub use postgres::PgLedger;

pub type SheetId = i64;
pub type ColumnId = i64;

/// Exclusive hold on one group's date column.
///
/// Dropping it without `release` also lets the next writer in.
#[async_trait]
pub trait ColumnLock: Send {
    async fn release(self: Box<Self>) -> Result<(), LedgerError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Waits until no other holder of the same (group, label) remains, across
    /// every process sharing this store.
    async fn lock_column(&self, group_id: &str, label: &str)
        -> Result<Box<dyn ColumnLock>, LedgerError>;

    async fn get_or_create_sheet(&self, group_id: &str) -> Result<SheetId, LedgerError>;

    async fn find_sheet(&self, group_id: &str) -> Result<Option<SheetId>, LedgerError>;

    /// Returns the column labelled `label`, appending it after the last column if absent.
    async fn get_or_create_column(&self, sheet: SheetId, label: &str)
        -> Result<ColumnId, LedgerError>;

    async fn find_column(&self, sheet: SheetId, label: &str)
        -> Result<Option<ColumnId>, LedgerError>;

    /// Column labels in sheet order.
    async fn columns(&self, sheet: SheetId) -> Result<Vec<String>, LedgerError>;

    /// Student ids in row order.
    async fn roster(&self, sheet: SheetId) -> Result<Vec<String>, LedgerError>;

    /// Appends rows for students not already on the roster.
    async fn append_rows(&self, sheet: SheetId, student_ids: &[String]) -> Result<(), LedgerError>;

    /// Roster in row order with each student's cell in `column`, if written.
    async fn read_column(
        &self,
        sheet: SheetId,
        column: ColumnId,
    ) -> Result<Vec<(String, Option<AttendanceStatus>)>, LedgerError>;

    async fn write_column(
        &self,
        sheet: SheetId,
        column: ColumnId,
        cells: &[(String, AttendanceStatus)],
    ) -> Result<(), LedgerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed ledger: {0}")]
    Malformed(String),
}
