// ==========================================
// 生产执行控制引擎 - 保留锁 (Hold) 领域模型
// ==========================================
// 红线: 同一 (entity_type, entity_id) 同时最多一个 ACTIVE 保留锁
// 红线: 保留锁只释放不删除 (审计记录)
// ==========================================

use crate::domain::types::{HoldEntityType, HoldStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// HoldRecord - 保留锁记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldRecord {
    pub hold_id: i64,
    pub entity_type: HoldEntityType,
    pub entity_id: i64,
    pub reason: String,
    pub applied_by: String,
    pub applied_on: NaiveDateTime,
    pub status: HoldStatus,
    pub released_by: Option<String>,
    pub released_on: Option<NaiveDateTime>,
    pub release_comments: Option<String>,
    /// 施加保留锁前实体自身的状态 (仅 OPERATION / EQUIPMENT)
    pub previous_status: Option<String>,
}

impl HoldRecord {
    pub fn is_active(&self) -> bool {
        self.status == HoldStatus::Active
    }
}
