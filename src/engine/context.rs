// ==========================================
// 生产执行控制引擎 - 执行上下文
// ==========================================
// 职责: 聚合引擎服务共享的连接、审计出口、操作人解析
// 红线: 业务变更必须在 run_in_transaction 内完成，任一错误整体回滚
// 红线: 事务闭包内只允许调用仓储的 *_tx 关联函数（连接互斥锁不可重入）
// 红线: 审计在提交之后写入，失败不影响已提交的业务
// ==========================================

use crate::domain::types::{AuditAction, HoldEntityType};
use crate::engine::audit::{record_best_effort, resolve_actor, ActorResolver, AuditSink};
use crate::engine::error::ExecutionResult;
use crate::repository::error::RepositoryError;
use crate::repository::hold_repo::HoldRepository;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// 引擎执行上下文
///
/// 与仓储共享同一个 `Arc<Mutex<Connection>>`，
/// 服务之间通过 `Arc<ExecutionContext>` 共享。
#[derive(Clone)]
pub struct ExecutionContext {
    conn: Arc<Mutex<Connection>>,
    audit_sink: Arc<dyn AuditSink>,
    actor_resolver: Arc<dyn ActorResolver>,
}

impl ExecutionContext {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        audit_sink: Arc<dyn AuditSink>,
        actor_resolver: Arc<dyn ActorResolver>,
    ) -> Self {
        Self {
            conn,
            audit_sink,
            actor_resolver,
        }
    }

    fn get_conn(&self) -> ExecutionResult<MutexGuard<'_, Connection>> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Ok(guard)
    }

    /// 在单个写事务中执行闭包
    ///
    /// 使用 IMMEDIATE 事务，先拿写锁再读，保证 check-then-act 的原子性。
    /// 闭包返回 Err 时事务随 drop 回滚。
    pub fn run_in_transaction<T, F>(&self, f: F) -> ExecutionResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> ExecutionResult<T>,
    {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(value)
    }

    /// 只读访问（不开事务）
    pub fn read<T, F>(&self, f: F) -> ExecutionResult<T>
    where
        F: FnOnce(&Connection) -> ExecutionResult<T>,
    {
        let conn = self.get_conn()?;
        f(&conn)
    }

    /// 当前操作人（无身份时为 SYSTEM）
    pub fn actor(&self) -> String {
        resolve_actor(self.actor_resolver.as_ref())
    }

    /// 尽力写审计
    pub fn audit(
        &self,
        entity_type: &str,
        entity_id: impl ToString,
        action: AuditAction,
        actor: &str,
        detail: &str,
    ) {
        record_best_effort(
            self.audit_sink.as_ref(),
            entity_type,
            &entity_id.to_string(),
            action,
            actor,
            detail,
        );
    }
}

// ==========================================
// HoldLookup - 保留锁查询
// ==========================================

/// 保留锁存在性查询（状态机校验的唯一 I/O）
pub trait HoldLookup {
    fn is_on_hold(&self, entity_type: HoldEntityType, entity_id: i64) -> ExecutionResult<bool>;
}

/// 事务内的保留锁查询
pub struct TxHoldLookup<'a> {
    conn: &'a Connection,
}

impl<'a> TxHoldLookup<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl HoldLookup for TxHoldLookup<'_> {
    fn is_on_hold(&self, entity_type: HoldEntityType, entity_id: i64) -> ExecutionResult<bool> {
        Ok(HoldRepository::exists_active_tx(self.conn, entity_type, entity_id)?)
    }
}

/// 内存中的保留锁集合（纯校验 / 单元测试）
impl HoldLookup for HashSet<(HoldEntityType, i64)> {
    fn is_on_hold(&self, entity_type: HoldEntityType, entity_id: i64) -> ExecutionResult<bool> {
        Ok(self.contains(&(entity_type, entity_id)))
    }
}
