// ==========================================
// 生产执行控制引擎 - 引擎层错误类型
// ==========================================
// 错误种类: NotFound / InvalidState / Conflict / Validation
// 红线: 每条错误信息都要包含实体ID与违反的具体规则
// 红线: 核心不做自动重试，错误同步抛给调用方并回滚整个事务
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 错误种类（与类型无关的分类）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Conflict,
    Validation,
    Infrastructure,
}

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// 引用的实体不存在
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// 当前状态不允许该操作
    #[error("{0}")]
    InvalidState(String),

    /// 唯一键冲突 (重复的活动保留锁 / 重复分配 / 重复配置名)
    #[error("{0}")]
    Conflict(String),

    /// 输入不合法
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ExecutionError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ExecutionError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// 错误种类
    ///
    /// 仓储层的唯一约束违反与并发修改归为 Conflict，字段/校验错误归为 Validation
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::NotFound { .. } => ErrorKind::NotFound,
            ExecutionError::InvalidState(_) => ErrorKind::InvalidState,
            ExecutionError::Conflict(_) => ErrorKind::Conflict,
            ExecutionError::Validation(_) => ErrorKind::Validation,
            ExecutionError::Repository(err) => match err {
                RepositoryError::NotFound { .. } => ErrorKind::NotFound,
                RepositoryError::UniqueConstraintViolation(_)
                | RepositoryError::StaleWrite { .. } => ErrorKind::Conflict,
                RepositoryError::ValidationError(_) | RepositoryError::FieldValueError { .. } => {
                    ErrorKind::Validation
                }
                _ => ErrorKind::Infrastructure,
            },
        }
    }
}

impl From<rusqlite::Error> for ExecutionError {
    fn from(err: rusqlite::Error) -> Self {
        ExecutionError::Repository(err.into())
    }
}

/// Result 类型别名
pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_entity() {
        let err = ExecutionError::not_found("Batch", 5);
        assert_eq!(err.to_string(), "Batch 5 not found");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_repository_unique_violation_is_conflict() {
        let err: ExecutionError =
            RepositoryError::UniqueConstraintViolation("UNIQUE constraint failed".into()).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_repository_field_error_is_validation() {
        let err: ExecutionError = RepositoryError::FieldValueError {
            field: "k".into(),
            message: "bad".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
