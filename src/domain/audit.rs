// ==========================================
// 生产执行控制引擎 - 审计日志领域模型
// ==========================================
// 红线: 核心每次成功的状态变更都要写审计
// 说明: 审计为尽力而为，写入失败不回滚业务
// ==========================================

use crate::domain::types::AuditAction;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// AuditRecord - 审计记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: String,     // UUID
    pub entity_type: String,  // 实体类型标签
    pub entity_id: String,
    pub action: AuditAction,
    pub actor: String,
    pub detail: String,
    pub action_ts: NaiveDateTime,
}

impl AuditRecord {
    /// 生成新审计记录（自动生成 UUID 与时间戳）
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: AuditAction,
        actor: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            audit_id: uuid::Uuid::new_v4().to_string(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action,
            actor: actor.into(),
            detail: detail.into(),
            action_ts: chrono::Local::now().naive_local(),
        }
    }
}
