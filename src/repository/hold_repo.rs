// ==========================================
// 生产执行控制引擎 - 保留锁数据仓储
// ==========================================
// 红线: 保留锁只释放不删除
// 说明: 部分唯一索引 idx_hold_active_entity 兜底 "同一实体最多一个 ACTIVE"
// ==========================================

use crate::domain::hold::HoldRecord;
use crate::domain::types::{HoldEntityType, HoldStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT hold_id, entity_type, entity_id, reason, applied_by, applied_on, status,
           released_by, released_on, release_comments, previous_status
    FROM hold_record
"#;

// ==========================================
// HoldRepository - 保留锁仓储
// ==========================================
pub struct HoldRepository {
    conn: Arc<Mutex<Connection>>,
}

impl HoldRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_by_id(&self, hold_id: i64) -> RepositoryResult<Option<HoldRecord>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, hold_id)
    }

    /// 实体是否存在 ACTIVE 保留锁
    pub fn exists_active(&self, entity_type: HoldEntityType, entity_id: i64) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        Self::exists_active_tx(&conn, entity_type, entity_id)
    }

    /// 列出 ACTIVE 保留锁（可按实体类型过滤）
    pub fn list_active(&self, entity_type: Option<HoldEntityType>) -> RepositoryResult<Vec<HoldRecord>> {
        let conn = self.get_conn()?;
        let holds = match entity_type {
            Some(t) => {
                let sql = format!(
                    "{} WHERE status = 'ACTIVE' AND entity_type = ?1 ORDER BY applied_on DESC, hold_id DESC",
                    SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![t], Self::map_row)?
                    .collect::<SqliteResult<Vec<_>>>()?;
                rows
            }
            None => {
                let sql = format!(
                    "{} WHERE status = 'ACTIVE' ORDER BY applied_on DESC, hold_id DESC",
                    SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], Self::map_row)?
                    .collect::<SqliteResult<Vec<_>>>()?;
                rows
            }
        };
        Ok(holds)
    }

    /// 某实体的全部保留锁历史（新的在前）
    pub fn find_by_entity(
        &self,
        entity_type: HoldEntityType,
        entity_id: i64,
    ) -> RepositoryResult<Vec<HoldRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY hold_id DESC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let holds = stmt
            .query_map(params![entity_type, entity_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(holds)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn find_by_id_tx(conn: &Connection, hold_id: i64) -> RepositoryResult<Option<HoldRecord>> {
        let sql = format!("{} WHERE hold_id = ?1", SELECT_COLUMNS);
        let hold = conn
            .query_row(&sql, params![hold_id], Self::map_row)
            .optional()?;
        Ok(hold)
    }

    pub fn exists_active_tx(
        conn: &Connection,
        entity_type: HoldEntityType,
        entity_id: i64,
    ) -> RepositoryResult<bool> {
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM hold_record
            WHERE entity_type = ?1 AND entity_id = ?2 AND status = 'ACTIVE'
            "#,
            params![entity_type, entity_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 插入保留锁，返回新ID
    pub fn insert_tx(conn: &Connection, hold: &HoldRecord) -> RepositoryResult<i64> {
        conn.execute(
            r#"
            INSERT INTO hold_record (
                entity_type, entity_id, reason, applied_by, applied_on, status,
                released_by, released_on, release_comments, previous_status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                hold.entity_type,
                hold.entity_id,
                hold.reason,
                hold.applied_by,
                hold.applied_on,
                hold.status,
                hold.released_by,
                hold.released_on,
                hold.release_comments,
                hold.previous_status,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 标记为 RELEASED（仅当仍为 ACTIVE）
    pub fn mark_released_tx(
        conn: &Connection,
        hold_id: i64,
        released_by: &str,
        released_on: NaiveDateTime,
        comments: Option<&str>,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE hold_record
            SET status = ?1, released_by = ?2, released_on = ?3, release_comments = ?4
            WHERE hold_id = ?5 AND status = ?6
            "#,
            params![
                HoldStatus::Released,
                released_by,
                released_on,
                comments,
                hold_id,
                HoldStatus::Active,
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::stale("Hold", hold_id, HoldStatus::Active));
        }
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<HoldRecord> {
        Ok(HoldRecord {
            hold_id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            reason: row.get(3)?,
            applied_by: row.get(4)?,
            applied_on: row.get(5)?,
            status: row.get(6)?,
            released_by: row.get(7)?,
            released_on: row.get(8)?,
            release_comments: row.get(9)?,
            previous_status: row.get(10)?,
        })
    }
}
