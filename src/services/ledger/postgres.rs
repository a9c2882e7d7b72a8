use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::str::FromStr;

use super::{ColumnId, ColumnLock, LedgerError, LedgerStore, SheetId};
use crate::models::attendance::AttendanceStatus;

/// Ledger kept in PostgreSQL.
///
/// Unique constraints on (sheet, label) and (sheet, student) make sheet,
/// column and row creation safe to race from several processes.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Transaction holding a (group, label) advisory lock. Commit or rollback releases it.
struct PgColumnLock(Transaction<'static, Postgres>);

#[async_trait]
impl ColumnLock for PgColumnLock {
    async fn release(self: Box<Self>) -> Result<(), LedgerError> {
        let PgColumnLock(tx) = *self;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn lock_column(
        &self,
        group_id: &str,
        label: &str,
    ) -> Result<Box<dyn ColumnLock>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))")
            .bind(group_id)
            .bind(label)
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgColumnLock(tx)))
    }

    async fn get_or_create_sheet(&self, group_id: &str) -> Result<SheetId, LedgerError> {
        let row = sqlx::query(
            r#"
            INSERT INTO ledger_sheets (group_id)
            VALUES ($1)
            ON CONFLICT (group_id) DO UPDATE SET group_id = EXCLUDED.group_id
            RETURNING id
            "#,
        )
        .bind(group_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn find_sheet(&self, group_id: &str) -> Result<Option<SheetId>, LedgerError> {
        let row = sqlx::query("SELECT id FROM ledger_sheets WHERE group_id = $1")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(r) => Some(r.try_get("id")?),
            None => None,
        })
    }

    async fn get_or_create_column(
        &self,
        sheet: SheetId,
        label: &str,
    ) -> Result<ColumnId, LedgerError> {
        let row = sqlx::query(
            r#"
            INSERT INTO ledger_columns (sheet_id, position, label)
            SELECT $1, COALESCE(MAX(position), 0) + 1, $2
            FROM ledger_columns
            WHERE sheet_id = $1
            ON CONFLICT (sheet_id, label) DO UPDATE SET label = EXCLUDED.label
            RETURNING id
            "#,
        )
        .bind(sheet)
        .bind(label)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn find_column(
        &self,
        sheet: SheetId,
        label: &str,
    ) -> Result<Option<ColumnId>, LedgerError> {
        let row = sqlx::query("SELECT id FROM ledger_columns WHERE sheet_id = $1 AND label = $2")
            .bind(sheet)
            .bind(label)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(r) => Some(r.try_get("id")?),
            None => None,
        })
    }

    async fn columns(&self, sheet: SheetId) -> Result<Vec<String>, LedgerError> {
        let rows = sqlx::query(
            "SELECT label FROM ledger_columns WHERE sheet_id = $1 ORDER BY position ASC",
        )
        .bind(sheet)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| r.try_get("label").map_err(LedgerError::from))
            .collect()
    }

    async fn roster(&self, sheet: SheetId) -> Result<Vec<String>, LedgerError> {
        let rows = sqlx::query(
            "SELECT student_id FROM ledger_rows WHERE sheet_id = $1 ORDER BY position ASC",
        )
        .bind(sheet)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| r.try_get("student_id").map_err(LedgerError::from))
            .collect()
    }

    async fn append_rows(&self, sheet: SheetId, student_ids: &[String]) -> Result<(), LedgerError> {
        if student_ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for student_id in student_ids {
            sqlx::query(
                r#"
                INSERT INTO ledger_rows (sheet_id, position, student_id)
                SELECT $1, COALESCE(MAX(position), 0) + 1, $2
                FROM ledger_rows
                WHERE sheet_id = $1
                ON CONFLICT (sheet_id, student_id) DO NOTHING
                "#,
            )
            .bind(sheet)
            .bind(student_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn read_column(
        &self,
        sheet: SheetId,
        column: ColumnId,
    ) -> Result<Vec<(String, Option<AttendanceStatus>)>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT r.student_id, c.status
            FROM ledger_rows r
            LEFT JOIN ledger_cells c ON c.row_id = r.id AND c.column_id = $2
            WHERE r.sheet_id = $1
            ORDER BY r.position ASC
            "#,
        )
        .bind(sheet)
        .bind(column)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| -> Result<(String, Option<AttendanceStatus>), LedgerError> {
                let student_id: String = r.try_get("student_id")?;
                let status: Option<String> = r.try_get("status")?;
                let status = match status {
                    Some(s) => Some(AttendanceStatus::from_str(&s).map_err(|_| {
                        LedgerError::Malformed(format!("unexpected cell value {s:?}"))
                    })?),
                    None => None,
                };
                Ok((student_id, status))
            })
            .collect()
    }

    async fn write_column(
        &self,
        sheet: SheetId,
        column: ColumnId,
        cells: &[(String, AttendanceStatus)],
    ) -> Result<(), LedgerError> {
        let (student_ids, statuses): (Vec<String>, Vec<String>) = cells
            .iter()
            .map(|(id, status)| (id.clone(), status.to_string()))
            .unzip();

        let result = sqlx::query(
            r#"
            INSERT INTO ledger_cells (row_id, column_id, status)
            SELECT r.id, $2, cell.status
            FROM UNNEST($3::text[], $4::text[]) AS cell(student_id, status)
            JOIN ledger_rows r ON r.sheet_id = $1 AND r.student_id = cell.student_id
            ON CONFLICT (row_id, column_id) DO UPDATE SET status = EXCLUDED.status,
                                                          updated_at = NOW()
            "#,
        )
        .bind(sheet)
        .bind(column)
        .bind(&student_ids)
        .bind(&statuses)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != cells.len() as u64 {
            return Err(LedgerError::Malformed(format!(
                "wrote {} of {} cells in column {column}",
                result.rows_affected(),
                cells.len()
            )));
        }

        Ok(())
    }
}
