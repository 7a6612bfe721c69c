// ==========================================
// 生产执行控制引擎 - 序号计数器仓储
// ==========================================
// 红线: 同一 scope_key 的并发请求不得拿到相同序号
// 实现: 单条 INSERT .. ON CONFLICT DO UPDATE .. RETURNING 原子自增
//       (SQLite 写锁 + 连接互斥锁双重保证)
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

// ==========================================
// SequenceCounterRepository
// ==========================================
pub struct SequenceCounterRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SequenceCounterRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 取下一个序号（不存在则从 1 开始）
    pub fn next_value(&self, scope_key: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::next_value_tx(&conn, scope_key)
    }

    /// 在调用方事务中取下一个序号
    pub fn next_value_tx(conn: &Connection, scope_key: &str) -> RepositoryResult<i64> {
        let value: i64 = conn.query_row(
            r#"
            INSERT INTO sequence_counter (scope_key, current_value, last_reset_at)
            VALUES (?1, 1, ?2)
            ON CONFLICT(scope_key) DO UPDATE SET current_value = current_value + 1
            RETURNING current_value
            "#,
            params![scope_key, chrono::Local::now().naive_local()],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    /// 当前值（未使用过的 scope_key 返回 None）
    pub fn current_value(&self, scope_key: &str) -> RepositoryResult<Option<i64>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT current_value FROM sequence_counter WHERE scope_key = ?1",
                params![scope_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 设定计数器当前值（数据迁移/初始化用）
    pub fn seed(&self, scope_key: &str, value: i64) -> RepositoryResult<()> {
        if value < 0 {
            return Err(RepositoryError::FieldValueError {
                field: "current_value".to_string(),
                message: format!("counter value {} must not be negative", value),
            });
        }

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO sequence_counter (scope_key, current_value, last_reset_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(scope_key) DO UPDATE SET current_value = excluded.current_value
            "#,
            params![scope_key, value, chrono::Local::now().naive_local()],
        )?;
        Ok(())
    }
}
