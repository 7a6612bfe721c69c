// ==========================================
// 生产执行控制引擎 - 审计出口与操作人解析
// ==========================================
// 职责: 定义审计 sink / 操作人解析 trait，实现依赖倒置
// 红线: 审计为尽力而为，写入失败只记日志，不回滚业务事务
// ==========================================

use crate::domain::audit::AuditRecord;
use crate::domain::types::AuditAction;
use crate::repository::audit_log_repo::AuditLogRepository;
use crate::repository::error::RepositoryResult;
use std::sync::Arc;

/// 无法解析身份时的固定操作人
pub const SYSTEM_ACTOR: &str = "SYSTEM";

// ==========================================
// 审计 Sink Trait
// ==========================================

/// 审计记录出口（只写）
pub trait AuditSink: Send + Sync {
    fn record(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: AuditAction,
        actor: &str,
        detail: &str,
    ) -> RepositoryResult<()>;
}

/// 落库到 audit_log 表的审计出口
pub struct AuditLogSink {
    repo: Arc<AuditLogRepository>,
}

impl AuditLogSink {
    pub fn new(repo: Arc<AuditLogRepository>) -> Self {
        Self { repo }
    }
}

impl AuditSink for AuditLogSink {
    fn record(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: AuditAction,
        actor: &str,
        detail: &str,
    ) -> RepositoryResult<()> {
        let record = AuditRecord::new(entity_type, entity_id, action, actor, detail);
        self.repo.insert(&record)?;
        Ok(())
    }
}

/// 空实现（不审计）
pub struct NoOpAuditSink;

impl AuditSink for NoOpAuditSink {
    fn record(
        &self,
        _entity_type: &str,
        _entity_id: &str,
        _action: AuditAction,
        _actor: &str,
        _detail: &str,
    ) -> RepositoryResult<()> {
        Ok(())
    }
}

/// 尽力写审计：失败时记 warn 并吞掉错误
pub fn record_best_effort(
    sink: &dyn AuditSink,
    entity_type: &str,
    entity_id: &str,
    action: AuditAction,
    actor: &str,
    detail: &str,
) {
    if let Err(e) = sink.record(entity_type, entity_id, action, actor, detail) {
        tracing::warn!(
            entity_type,
            entity_id,
            action = action.as_str(),
            error = %e,
            "审计写入失败(已忽略)"
        );
    }
}

// ==========================================
// 操作人解析 Trait
// ==========================================

/// 当前操作人解析（身份认证在外部系统）
pub trait ActorResolver: Send + Sync {
    fn current_actor(&self) -> Option<String>;
}

/// 始终无身份，解析结果为 SYSTEM
pub struct SystemActor;

impl ActorResolver for SystemActor {
    fn current_actor(&self) -> Option<String> {
        None
    }
}

/// 固定身份（批处理任务 / 测试）
pub struct FixedActor(pub String);

impl ActorResolver for FixedActor {
    fn current_actor(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// 解析当前操作人，无身份时回退为 SYSTEM
pub fn resolve_actor(resolver: &dyn ActorResolver) -> String {
    resolver
        .current_actor()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| SYSTEM_ACTOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::error::RepositoryError;

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn record(&self, _: &str, _: &str, _: AuditAction, _: &str, _: &str) -> RepositoryResult<()> {
            Err(RepositoryError::InternalError("sink offline".into()))
        }
    }

    #[test]
    fn test_resolve_actor_falls_back_to_system() {
        assert_eq!(resolve_actor(&SystemActor), "SYSTEM");
        assert_eq!(resolve_actor(&FixedActor("   ".into())), "SYSTEM");
        assert_eq!(resolve_actor(&FixedActor("alice".into())), "alice");
    }

    #[test]
    fn test_best_effort_swallows_failure() {
        record_best_effort(&FailingSink, "BATCH", "1", AuditAction::Hold, "alice", "x");
        record_best_effort(&NoOpAuditSink, "BATCH", "1", AuditAction::Hold, "alice", "x");
    }
}
