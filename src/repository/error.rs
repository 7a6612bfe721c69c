// ==========================================
// 生产执行控制引擎 - 仓储层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 约束: SQLite 约束失败按扩展错误码分类，不做消息匹配
// ==========================================

use rusqlite::ffi;
use rusqlite::ErrorCode;
use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    // ===== 记录 / 并发 =====
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    /// 带状态守卫的更新命中 0 行（读取后被其它写入改过）
    #[error("{entity} {id}: 状态已被并发修改 (期望 {expected})")]
    StaleWrite {
        entity: &'static str,
        id: i64,
        expected: String,
    },

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("数据库查询失败: {0}")]
    DatabaseQueryError(String),

    // ===== 约束 =====
    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    #[error("外键约束违反: {0}")]
    ForeignKeyViolation(String),

    #[error("检查约束违反: {0}")]
    CheckConstraintViolation(String),

    // ===== 数据质量错误 =====
    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("字段值错误 (field={field}): {message}")]
    FieldValueError { field: String, message: String },

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepositoryError {
    pub fn stale(entity: &'static str, id: i64, expected: impl ToString) -> Self {
        RepositoryError::StaleWrite {
            entity,
            id,
            expected: expected.to_string(),
        }
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, msg) => {
                let msg = msg.unwrap_or_else(|| code.to_string());
                match (code.code, code.extended_code) {
                    (ErrorCode::ConstraintViolation, ffi::SQLITE_CONSTRAINT_UNIQUE)
                    | (ErrorCode::ConstraintViolation, ffi::SQLITE_CONSTRAINT_PRIMARYKEY) => {
                        RepositoryError::UniqueConstraintViolation(msg)
                    }
                    (ErrorCode::ConstraintViolation, ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => {
                        RepositoryError::ForeignKeyViolation(msg)
                    }
                    (ErrorCode::ConstraintViolation, ffi::SQLITE_CONSTRAINT_CHECK) => {
                        RepositoryError::CheckConstraintViolation(msg)
                    }
                    (ErrorCode::DatabaseBusy, _) | (ErrorCode::DatabaseLocked, _) => {
                        RepositoryError::LockError(msg)
                    }
                    _ => RepositoryError::DatabaseQueryError(msg),
                }
            }
            rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound {
                entity: "row".to_string(),
                id: "<query>".to_string(),
            },
            other => RepositoryError::DatabaseQueryError(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE parent (id INTEGER PRIMARY KEY, code TEXT UNIQUE, qty INTEGER CHECK (qty >= 0));
            CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL REFERENCES parent(id));
            INSERT INTO parent (id, code, qty) VALUES (1, 'A', 1);
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_constraint_failures_are_classified() {
        let conn = conn();

        let err: RepositoryError = conn
            .execute("INSERT INTO parent (id, code, qty) VALUES (2, 'A', 1)", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));

        let err: RepositoryError = conn
            .execute("INSERT INTO child (id, parent_id) VALUES (1, 99)", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, RepositoryError::ForeignKeyViolation(_)));

        let err: RepositoryError = conn
            .execute("INSERT INTO parent (id, code, qty) VALUES (3, 'C', -1)", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, RepositoryError::CheckConstraintViolation(_)));
    }

    #[test]
    fn test_stale_write_message() {
        let err = RepositoryError::stale("Inventory", 5, "AVAILABLE");
        assert_eq!(err.to_string(), "Inventory 5: 状态已被并发修改 (期望 AVAILABLE)");
    }
}
