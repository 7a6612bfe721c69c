// ==========================================
// 生产执行控制引擎 - 审计日志数据仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
// 对齐: audit_log 表
// ==========================================


use crate::domain::audit::AuditRecord;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str =
    "SELECT audit_id, entity_type, entity_id, action, actor, detail, action_ts FROM audit_log";

// ==========================================
// AuditLogRepository - 审计日志仓储
// ==========================================
pub struct AuditLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AuditLogRepository {
    /// 创建新的审计日志仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入审计记录
    ///
    /// # 返回
    /// - `Ok(audit_id)`: 成功插入
    /// - `Err(...)`: 数据库错误
    pub fn insert(&self, record: &AuditRecord) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, record)?;
        Ok(record.audit_id.clone())
    }

    /// 在调用方事务中插入审计记录
    pub fn insert_tx(conn: &Connection, record: &AuditRecord) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO audit_log (
                audit_id, entity_type, entity_id, action, actor, detail, action_ts
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.audit_id,
                record.entity_type,
                record.entity_id,
                record.action,
                record.actor,
                record.detail,
                record.action_ts,
            ],
        )?;
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 按 audit_id 查询
    pub fn find_by_id(&self, audit_id: &str) -> RepositoryResult<Option<AuditRecord>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE audit_id = ?1", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        match stmt.query_row(params![audit_id], Self::map_row) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询某实体的审计记录（时间倒序）
    pub fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> RepositoryResult<Vec<AuditRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY action_ts DESC, rowid DESC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;

        let records = stmt
            .query_map(params![entity_type, entity_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }

    /// 查询某操作人的审计记录
    pub fn find_by_actor(&self, actor: &str, limit: i32) -> RepositoryResult<Vec<AuditRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE actor = ?1 ORDER BY action_ts DESC, rowid DESC LIMIT ?2",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;

        let records = stmt
            .query_map(params![actor, limit], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }

    /// 最近的审计记录
    pub fn find_recent(&self, limit: i32) -> RepositoryResult<Vec<AuditRecord>> {
        let conn = self.get_conn()?;
        let sql = format!("{} ORDER BY action_ts DESC, rowid DESC LIMIT ?1", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        let records = stmt
            .query_map(params![limit], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<AuditRecord> {
        Ok(AuditRecord {
            audit_id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            action: row.get(3)?,
            actor: row.get(4)?,
            detail: row.get(5)?,
            action_ts: row.get(6)?,
        })
    }
}
