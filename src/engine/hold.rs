// ==========================================
// 生产执行控制引擎 - 保留锁覆盖层
// ==========================================
// 职责: 对任意实体 (OPERATION / BATCH / INVENTORY / EQUIPMENT) 施加/解除独立锁
// 红线: 同一 (entity_type, entity_id) 最多一个 ACTIVE 保留锁
//       (事务内 check-then-act + 部分唯一索引兜底)
// 红线: 工序/设备施加保留锁时记录原状态并置为 ON_HOLD，解除时恢复
// 红线: 保留锁记录从不删除
// ==========================================

use crate::domain::hold::HoldRecord;
use crate::domain::types::{
    AuditAction, EquipmentStatus, HoldEntityType, HoldStatus, OperationStatus, UnknownVariant,
};
use crate::engine::context::{ExecutionContext, HoldLookup};
use crate::engine::error::{ExecutionError, ExecutionResult};
use crate::repository::batch_repo::BatchRepository;
use crate::repository::error::RepositoryError;
use crate::repository::hold_repo::HoldRepository;
use crate::repository::inventory_repo::InventoryRepository;
use crate::repository::operation_repo::{EquipmentStatusRepository, OperationRepository};
use rusqlite::Connection;
use std::sync::Arc;
use tracing::{info, warn};

// ==========================================
// HoldService
// ==========================================
pub struct HoldService {
    ctx: Arc<ExecutionContext>,
    hold_repo: Arc<HoldRepository>,
}

impl HoldService {
    pub fn new(ctx: Arc<ExecutionContext>, hold_repo: Arc<HoldRepository>) -> Self {
        Self { ctx, hold_repo }
    }

    /// 解析实体类型标签（未知标签为输入错误）
    pub fn parse_entity_type(tag: &str) -> ExecutionResult<HoldEntityType> {
        tag.parse::<HoldEntityType>()
            .map_err(|e| ExecutionError::Validation(e.to_string()))
    }

    /// 施加保留锁
    ///
    /// # 错误
    /// - Conflict: 该实体已有 ACTIVE 保留锁
    /// - NotFound: 实体不存在
    /// - InvalidState: 工序已确认
    pub fn apply_hold(
        &self,
        entity_type: HoldEntityType,
        entity_id: i64,
        reason: &str,
    ) -> ExecutionResult<HoldRecord> {
        if reason.trim().is_empty() {
            return Err(ExecutionError::Validation(format!(
                "{} {}: hold reason must not be empty",
                entity_type, entity_id
            )));
        }

        let actor = self.ctx.actor();
        let hold = self.ctx.run_in_transaction(|tx| {
            if HoldRepository::exists_active_tx(tx, entity_type, entity_id)? {
                return Err(already_held(entity_type, entity_id));
            }

            let previous_status = freeze_entity(tx, entity_type, entity_id)?;

            let record = HoldRecord {
                hold_id: 0,
                entity_type,
                entity_id,
                reason: reason.trim().to_string(),
                applied_by: actor.clone(),
                applied_on: chrono::Local::now().naive_local(),
                status: HoldStatus::Active,
                released_by: None,
                released_on: None,
                release_comments: None,
                previous_status,
            };
            let hold_id = HoldRepository::insert_tx(tx, &record).map_err(|e| match e {
                RepositoryError::UniqueConstraintViolation(_) => already_held(entity_type, entity_id),
                other => other.into(),
            })?;
            load_hold(tx, hold_id)
        })?;

        info!(hold_id = hold.hold_id, entity_type = %entity_type, entity_id, "施加保留锁");
        self.ctx.audit(
            entity_type.as_str(),
            entity_id,
            AuditAction::Hold,
            &actor,
            &format!("hold {} applied: {}", hold.hold_id, hold.reason),
        );
        Ok(hold)
    }

    /// 按标签施加保留锁（边界入口）
    pub fn apply_hold_by_tag(
        &self,
        entity_tag: &str,
        entity_id: i64,
        reason: &str,
    ) -> ExecutionResult<HoldRecord> {
        let entity_type = Self::parse_entity_type(entity_tag)?;
        self.apply_hold(entity_type, entity_id, reason)
    }

    /// 解除保留锁并恢复实体原状态
    pub fn release_hold(&self, hold_id: i64, comments: Option<&str>) -> ExecutionResult<HoldRecord> {
        let actor = self.ctx.actor();
        let hold = self.ctx.run_in_transaction(|tx| {
            let hold = load_hold(tx, hold_id)?;
            if !hold.is_active() {
                return Err(ExecutionError::InvalidState(format!(
                    "Hold {}: status is {}; only ACTIVE holds can be released",
                    hold_id, hold.status
                )));
            }

            HoldRepository::mark_released_tx(
                tx,
                hold_id,
                &actor,
                chrono::Local::now().naive_local(),
                comments,
            )?;
            restore_entity(tx, &hold)?;
            load_hold(tx, hold_id)
        })?;

        info!(hold_id, entity_type = %hold.entity_type, entity_id = hold.entity_id, "解除保留锁");
        let mut detail = format!("hold {} released", hold_id);
        if let Some(c) = comments.filter(|c| !c.trim().is_empty()) {
            detail.push_str(": ");
            detail.push_str(c);
        }
        self.ctx.audit(
            hold.entity_type.as_str(),
            hold.entity_id,
            AuditAction::Release,
            &actor,
            &detail,
        );
        Ok(hold)
    }

    pub fn is_entity_on_hold(
        &self,
        entity_type: HoldEntityType,
        entity_id: i64,
    ) -> ExecutionResult<bool> {
        Ok(self.hold_repo.exists_active(entity_type, entity_id)?)
    }

    pub fn list_active_holds(
        &self,
        entity_type: Option<HoldEntityType>,
    ) -> ExecutionResult<Vec<HoldRecord>> {
        Ok(self.hold_repo.list_active(entity_type)?)
    }

    pub fn get_hold(&self, hold_id: i64) -> ExecutionResult<HoldRecord> {
        self.hold_repo
            .find_by_id(hold_id)?
            .ok_or_else(|| ExecutionError::not_found("Hold", hold_id))
    }

    /// 实体的全部保留锁历史
    pub fn hold_history(
        &self,
        entity_type: HoldEntityType,
        entity_id: i64,
    ) -> ExecutionResult<Vec<HoldRecord>> {
        Ok(self.hold_repo.find_by_entity(entity_type, entity_id)?)
    }
}

impl HoldLookup for HoldService {
    fn is_on_hold(&self, entity_type: HoldEntityType, entity_id: i64) -> ExecutionResult<bool> {
        self.is_entity_on_hold(entity_type, entity_id)
    }
}

fn already_held(entity_type: HoldEntityType, entity_id: i64) -> ExecutionError {
    ExecutionError::Conflict(format!(
        "{} {}: an ACTIVE hold already exists",
        entity_type, entity_id
    ))
}

fn load_hold(conn: &Connection, hold_id: i64) -> ExecutionResult<HoldRecord> {
    HoldRepository::find_by_id_tx(conn, hold_id)?
        .ok_or_else(|| ExecutionError::not_found("Hold", hold_id))
}

/// 校验实体存在并冻结其自身状态，返回原状态（仅工序/设备）
fn freeze_entity(
    conn: &Connection,
    entity_type: HoldEntityType,
    entity_id: i64,
) -> ExecutionResult<Option<String>> {
    match entity_type {
        HoldEntityType::Operation => {
            let op = OperationRepository::find_by_id_tx(conn, entity_id)?
                .ok_or_else(|| ExecutionError::not_found("Operation", entity_id))?;
            if op.status == OperationStatus::Confirmed {
                return Err(ExecutionError::InvalidState(format!(
                    "Operation {}: cannot hold a confirmed operation",
                    entity_id
                )));
            }
            if op.status != OperationStatus::OnHold {
                OperationRepository::update_status_tx(conn, entity_id, op.status, OperationStatus::OnHold)?;
            }
            Ok(Some(op.status.as_str().to_string()))
        }
        HoldEntityType::Equipment => {
            let eq = EquipmentStatusRepository::find_by_id_tx(conn, entity_id)?
                .ok_or_else(|| ExecutionError::not_found("Equipment", entity_id))?;
            if eq.status != EquipmentStatus::OnHold {
                EquipmentStatusRepository::update_status_tx(conn, entity_id, EquipmentStatus::OnHold)?;
            }
            Ok(Some(eq.status.as_str().to_string()))
        }
        HoldEntityType::Batch => {
            BatchRepository::find_by_id_tx(conn, entity_id)?
                .ok_or_else(|| ExecutionError::not_found("Batch", entity_id))?;
            Ok(None)
        }
        HoldEntityType::Inventory => {
            InventoryRepository::find_by_id_tx(conn, entity_id)?
                .ok_or_else(|| ExecutionError::not_found("Inventory", entity_id))?;
            Ok(None)
        }
    }
}

/// 恢复工序/设备的原状态（期间被其它路径改过状态的实体保持现状）
fn restore_entity(conn: &Connection, hold: &HoldRecord) -> ExecutionResult<()> {
    let Some(previous) = hold.previous_status.as_deref() else {
        return Ok(());
    };

    match hold.entity_type {
        HoldEntityType::Operation => {
            let prev: OperationStatus = previous
                .parse()
                .map_err(|e: UnknownVariant| ExecutionError::Validation(e.to_string()))?;
            match OperationRepository::find_by_id_tx(conn, hold.entity_id)? {
                Some(op) if op.status == OperationStatus::OnHold => {
                    OperationRepository::update_status_tx(conn, hold.entity_id, OperationStatus::OnHold, prev)?;
                }
                Some(op) => warn!(
                    operation_id = hold.entity_id,
                    status = %op.status,
                    "工序已不在 ON_HOLD，跳过状态恢复"
                ),
                None => warn!(operation_id = hold.entity_id, "工序不存在，跳过状态恢复"),
            }
        }
        HoldEntityType::Equipment => {
            let prev: EquipmentStatus = previous
                .parse()
                .map_err(|e: UnknownVariant| ExecutionError::Validation(e.to_string()))?;
            match EquipmentStatusRepository::find_by_id_tx(conn, hold.entity_id)? {
                Some(eq) if eq.status == EquipmentStatus::OnHold => {
                    EquipmentStatusRepository::update_status_tx(conn, hold.entity_id, prev)?;
                }
                Some(eq) => warn!(
                    equipment_id = hold.entity_id,
                    status = %eq.status,
                    "设备已不在 ON_HOLD，跳过状态恢复"
                ),
                None => warn!(equipment_id = hold.entity_id, "设备不存在，跳过状态恢复"),
            }
        }
        HoldEntityType::Batch | HoldEntityType::Inventory => {}
    }
    Ok(())
}
