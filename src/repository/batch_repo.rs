// ==========================================
// 生产执行控制引擎 - 生产批次数据仓储
// ==========================================

use crate::domain::batch::Batch;
use crate::repository::db_utils::{decimal_to_db, get_decimal};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT batch_id, batch_number, material_id, quantity, unit,
           parent_batch_id, source_operation_id, created_at
    FROM batch
"#;

// ==========================================
// BatchRepository - 生产批次仓储
// ==========================================
pub struct BatchRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BatchRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_by_id(&self, batch_id: i64) -> RepositoryResult<Option<Batch>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, batch_id)
    }

    pub fn find_by_number(&self, batch_number: &str) -> RepositoryResult<Option<Batch>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE batch_number = ?1", SELECT_COLUMNS);
        let batch = conn
            .query_row(&sql, params![batch_number], Self::map_row)
            .optional()?;
        Ok(batch)
    }

    /// 拆分产生的子批次
    pub fn find_children(&self, parent_batch_id: i64) -> RepositoryResult<Vec<Batch>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE parent_batch_id = ?1 ORDER BY batch_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let batches = stmt
            .query_map(params![parent_batch_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(batches)
    }

    /// 插入批次（锁内）
    pub fn insert(&self, batch: &Batch) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, batch)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn find_by_id_tx(conn: &Connection, batch_id: i64) -> RepositoryResult<Option<Batch>> {
        let sql = format!("{} WHERE batch_id = ?1", SELECT_COLUMNS);
        let batch = conn
            .query_row(&sql, params![batch_id], Self::map_row)
            .optional()?;
        Ok(batch)
    }

    /// 已拆分子批次数量 (用于 -SNN 后缀续号)
    pub fn count_children_tx(conn: &Connection, parent_batch_id: i64) -> RepositoryResult<i64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM batch WHERE parent_batch_id = ?1",
            params![parent_batch_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn insert_tx(conn: &Connection, batch: &Batch) -> RepositoryResult<i64> {
        conn.execute(
            r#"
            INSERT INTO batch (
                batch_number, material_id, quantity, unit,
                parent_batch_id, source_operation_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                batch.batch_number,
                batch.material_id,
                decimal_to_db(&batch.quantity),
                batch.unit,
                batch.parent_batch_id,
                batch.source_operation_id,
                batch.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_quantity_tx(
        conn: &Connection,
        batch_id: i64,
        quantity: Decimal,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE batch SET quantity = ?1 WHERE batch_id = ?2",
            params![decimal_to_db(&quantity), batch_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Batch".to_string(),
                id: batch_id.to_string(),
            });
        }
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<Batch> {
        Ok(Batch {
            batch_id: row.get(0)?,
            batch_number: row.get(1)?,
            material_id: row.get(2)?,
            quantity: get_decimal(row, 3)?,
            unit: row.get(4)?,
            parent_batch_id: row.get(5)?,
            source_operation_id: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}
