// ==========================================
// 生产执行控制引擎 - 库存移动服务
// ==========================================
// 职责: 校验 (InventoryStateMachine) + 变更 (InventoryRepository) + 审计
// 红线: 校验与变更在同一事务内，不得与同一库存的其它变更交错
// 红线: 离开 RESERVED 时清空 reserved_for_order_id
// ==========================================

use crate::domain::inventory::InventoryLot;
use crate::domain::types::{AuditAction, InventoryState};
use crate::engine::context::{ExecutionContext, HoldLookup, TxHoldLookup};
use crate::engine::error::{ExecutionError, ExecutionResult};
use crate::engine::inventory_state::InventoryStateMachine;
use crate::repository::inventory_repo::InventoryRepository;
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

const ENTITY: &str = "INVENTORY";

// ==========================================
// InventoryService
// ==========================================
pub struct InventoryService {
    ctx: Arc<ExecutionContext>,
}

impl InventoryService {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    pub fn get_lot(&self, inventory_id: i64) -> ExecutionResult<InventoryLot> {
        self.ctx.read(|conn| load_lot(conn, inventory_id))
    }

    /// 入库：新建 AVAILABLE 库存
    pub fn receive(&self, lot: InventoryLot) -> ExecutionResult<InventoryLot> {
        if lot.state != InventoryState::Available {
            return Err(ExecutionError::Validation(format!(
                "Inventory: received lot must be AVAILABLE, got {}",
                lot.state
            )));
        }
        lot.check_invariants().map_err(ExecutionError::Validation)?;

        let actor = self.ctx.actor();
        let lot = self.ctx.run_in_transaction(|tx| {
            let id = InventoryRepository::insert_tx(tx, &lot)?;
            load_lot(tx, id)
        })?;

        info!(inventory_id = lot.inventory_id, material_id = %lot.material_id, qty = %lot.quantity, "库存入库");
        self.ctx.audit(
            ENTITY,
            lot.inventory_id,
            AuditAction::Create,
            &actor,
            &format!("received {} {} of {}", lot.quantity, lot.unit, lot.material_id),
        );
        Ok(lot)
    }

    /// 消耗（支持部分消耗，剩余为 0 时转为 CONSUMED）
    pub fn consume(
        &self,
        inventory_id: i64,
        quantity: Decimal,
        order_id: Option<i64>,
    ) -> ExecutionResult<InventoryLot> {
        if quantity <= Decimal::ZERO {
            return Err(ExecutionError::Validation(format!(
                "Inventory {}: consume quantity {} must be positive",
                inventory_id, quantity
            )));
        }

        let actor = self.ctx.actor();
        let lot = self.ctx.run_in_transaction(|tx| {
            let mut lot = load_lot(tx, inventory_id)?;
            let holds = TxHoldLookup::new(tx);
            if let Err(e) = InventoryStateMachine::validate_consumption(&lot, order_id, &holds) {
                debug!(inventory_id, error = %e, "消耗校验未通过");
                return Err(e);
            }
            if quantity > lot.quantity {
                return Err(ExecutionError::Validation(format!(
                    "Inventory {}: consume quantity {} exceeds available {}",
                    inventory_id, quantity, lot.quantity
                )));
            }

            let expected = lot.state;
            lot.quantity -= quantity;
            if lot.quantity.is_zero() {
                InventoryStateMachine::validate_transition(inventory_id, expected, InventoryState::Consumed)?;
                lot.state = InventoryState::Consumed;
                lot.reserved_for_order_id = None;
            }
            lot.updated_at = chrono::Local::now().naive_local();
            InventoryRepository::update_tx(tx, &lot, expected)?;
            Ok(lot)
        })?;

        info!(inventory_id, qty = %quantity, remaining = %lot.quantity, state = %lot.state, "库存消耗");
        self.ctx.audit(
            ENTITY,
            inventory_id,
            AuditAction::Consume,
            &actor,
            &format!("consumed {} {}, remaining {}", quantity, lot.unit, lot.quantity),
        );
        Ok(lot)
    }

    pub fn reserve(&self, inventory_id: i64, order_id: i64) -> ExecutionResult<InventoryLot> {
        self.apply_transition(
            inventory_id,
            InventoryState::Reserved,
            Some(order_id),
            AuditAction::StatusChange,
            Some(format!("reserved for order {}", order_id)),
            |lot, holds| InventoryStateMachine::validate_reserve(lot, holds),
        )
    }

    pub fn release_reservation(&self, inventory_id: i64) -> ExecutionResult<InventoryLot> {
        self.apply_transition(
            inventory_id,
            InventoryState::Available,
            None,
            AuditAction::StatusChange,
            None,
            |lot, _| InventoryStateMachine::validate_release_reservation(lot),
        )
    }

    pub fn block(&self, inventory_id: i64, reason: &str) -> ExecutionResult<InventoryLot> {
        self.apply_transition(
            inventory_id,
            InventoryState::Blocked,
            None,
            AuditAction::StatusChange,
            Some(reason.to_string()),
            |lot, _| InventoryStateMachine::validate_block(lot),
        )
    }

    pub fn unblock(&self, inventory_id: i64) -> ExecutionResult<InventoryLot> {
        self.apply_transition(
            inventory_id,
            InventoryState::Available,
            None,
            AuditAction::StatusChange,
            None,
            |lot, _| InventoryStateMachine::validate_unblock(lot),
        )
    }

    pub fn scrap(&self, inventory_id: i64, reason: &str) -> ExecutionResult<InventoryLot> {
        self.apply_transition(
            inventory_id,
            InventoryState::Scrapped,
            None,
            AuditAction::StatusChange,
            Some(reason.to_string()),
            |lot, _| InventoryStateMachine::validate_scrap(lot),
        )
    }

    pub fn put_on_hold(&self, inventory_id: i64, reason: &str) -> ExecutionResult<InventoryLot> {
        self.apply_transition(
            inventory_id,
            InventoryState::OnHold,
            None,
            AuditAction::Hold,
            Some(reason.to_string()),
            |lot, _| InventoryStateMachine::validate_put_on_hold(lot),
        )
    }

    pub fn release_from_hold(&self, inventory_id: i64) -> ExecutionResult<InventoryLot> {
        self.apply_transition(
            inventory_id,
            InventoryState::Available,
            None,
            AuditAction::Release,
            None,
            |lot, _| InventoryStateMachine::validate_release_from_hold(lot),
        )
    }

    /// 通用状态迁移：加载 -> 业务校验 -> 迁移表校验 -> 乐观更新 -> 审计
    fn apply_transition<F>(
        &self,
        inventory_id: i64,
        target: InventoryState,
        reserved_for: Option<i64>,
        action: AuditAction,
        note: Option<String>,
        validate: F,
    ) -> ExecutionResult<InventoryLot>
    where
        F: FnOnce(&InventoryLot, &dyn HoldLookup) -> ExecutionResult<()>,
    {
        let actor = self.ctx.actor();
        let (from, lot) = self.ctx.run_in_transaction(|tx| {
            let mut lot = load_lot(tx, inventory_id)?;
            let holds = TxHoldLookup::new(tx);
            if let Err(e) = validate(&lot, &holds) {
                debug!(inventory_id, target = %target, error = %e, "库存迁移校验未通过");
                return Err(e);
            }
            let from = lot.state;
            InventoryStateMachine::validate_transition(inventory_id, from, target)?;

            lot.state = target;
            lot.reserved_for_order_id = if target == InventoryState::Reserved {
                reserved_for
            } else {
                None
            };
            lot.updated_at = chrono::Local::now().naive_local();
            InventoryRepository::update_tx(tx, &lot, from)?;
            Ok((from, lot))
        })?;

        info!(inventory_id, from = %from, to = %target, "库存状态变更");
        let mut detail = format!("{} -> {}", from, target);
        if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
            detail.push_str(": ");
            detail.push_str(&note);
        }
        self.ctx.audit(ENTITY, inventory_id, action, &actor, &detail);
        Ok(lot)
    }
}

fn load_lot(conn: &Connection, inventory_id: i64) -> ExecutionResult<InventoryLot> {
    InventoryRepository::find_by_id_tx(conn, inventory_id)?
        .ok_or_else(|| ExecutionError::not_found("Inventory", inventory_id))
}
