// ==========================================
// 生产执行控制引擎 - 库存状态机
// ==========================================
// 状态: AVAILABLE / RESERVED / BLOCKED / ON_HOLD / CONSUMED(终态) / SCRAPPED(终态)
// 红线: 校验函数是纯函数，只读 (批次状态 + 保留锁查询)，从不修改
// 红线: AVAILABLE -> SCRAPPED 非法，必须先经 BLOCKED
// 红线: 批次上的保留锁向下传递到其所有库存
// ==========================================

use crate::domain::inventory::InventoryLot;
use crate::domain::types::{HoldEntityType, InventoryState};
use crate::engine::context::HoldLookup;
use crate::engine::error::{ExecutionError, ExecutionResult};

use InventoryState::*;

/// 库存状态机（无状态）
pub struct InventoryStateMachine;

impl InventoryStateMachine {
    /// 是否终态
    pub fn is_terminal_state(state: InventoryState) -> bool {
        matches!(state, Consumed | Scrapped)
    }

    /// 允许的目标状态（不含同状态 no-op）
    pub fn allowed_transitions(state: InventoryState) -> &'static [InventoryState] {
        match state {
            Available => &[Reserved, Consumed, Blocked, OnHold],
            Reserved => &[Available, Consumed, Blocked],
            OnHold => &[Available, Blocked],
            Blocked => &[Available, Scrapped],
            Consumed | Scrapped => &[],
        }
    }

    /// 校验状态迁移
    ///
    /// 顺序: 同状态 -> 成功; 终态 -> terminal state; 表外 -> invalid transition
    pub fn validate_transition(
        inventory_id: i64,
        from: InventoryState,
        to: InventoryState,
    ) -> ExecutionResult<()> {
        if from == to {
            return Ok(());
        }
        if Self::is_terminal_state(from) {
            return Err(ExecutionError::InvalidState(format!(
                "Inventory {}: cannot transition {} -> {} (terminal state)",
                inventory_id, from, to
            )));
        }
        if !Self::allowed_transitions(from).contains(&to) {
            return Err(ExecutionError::InvalidState(format!(
                "Inventory {}: cannot transition {} -> {} (invalid transition)",
                inventory_id, from, to
            )));
        }
        Ok(())
    }

    /// 校验消耗
    ///
    /// - 状态必须为 AVAILABLE 或 RESERVED
    /// - RESERVED 时只有预留订单本身可以消耗
    /// - 库存自身或其所属批次存在 ACTIVE 保留锁时拒绝
    pub fn validate_consumption(
        lot: &InventoryLot,
        requesting_order_id: Option<i64>,
        holds: &dyn HoldLookup,
    ) -> ExecutionResult<()> {
        match lot.state {
            Available => {}
            Reserved => {
                if requesting_order_id.is_none() || requesting_order_id != lot.reserved_for_order_id {
                    return Err(ExecutionError::InvalidState(format!(
                        "Inventory {}: reserved for order {}, cannot be consumed by {}",
                        lot.inventory_id,
                        fmt_order(lot.reserved_for_order_id),
                        fmt_order(requesting_order_id)
                    )));
                }
            }
            state if Self::is_terminal_state(state) => {
                return Err(ExecutionError::InvalidState(format!(
                    "Inventory {}: cannot be consumed in state {} (terminal state)",
                    lot.inventory_id, state
                )));
            }
            state => {
                return Err(ExecutionError::InvalidState(format!(
                    "Inventory {}: cannot be consumed in state {}; must be AVAILABLE or RESERVED",
                    lot.inventory_id, state
                )));
            }
        }

        Self::ensure_not_held(lot, holds, "consumed")
    }

    /// 校验预留: 必须 AVAILABLE 且无保留锁
    pub fn validate_reserve(lot: &InventoryLot, holds: &dyn HoldLookup) -> ExecutionResult<()> {
        Self::require_state(lot, &[Available], "reserve")?;
        Self::ensure_not_held(lot, holds, "reserved")
    }

    pub fn validate_release_reservation(lot: &InventoryLot) -> ExecutionResult<()> {
        Self::require_state(lot, &[Reserved], "release reservation")
    }

    pub fn validate_block(lot: &InventoryLot) -> ExecutionResult<()> {
        Self::require_state(lot, &[Available, Reserved], "block")
    }

    pub fn validate_unblock(lot: &InventoryLot) -> ExecutionResult<()> {
        Self::require_state(lot, &[Blocked], "unblock")
    }

    pub fn validate_scrap(lot: &InventoryLot) -> ExecutionResult<()> {
        Self::require_state(lot, &[Blocked], "scrap")
    }

    /// 库存状态层面的 ON_HOLD（区别于保留锁覆盖层）
    pub fn validate_put_on_hold(lot: &InventoryLot) -> ExecutionResult<()> {
        Self::require_state(lot, &[Available], "put on hold")
    }

    pub fn validate_release_from_hold(lot: &InventoryLot) -> ExecutionResult<()> {
        Self::require_state(lot, &[OnHold], "release from hold")
    }

    fn require_state(
        lot: &InventoryLot,
        allowed: &[InventoryState],
        action: &str,
    ) -> ExecutionResult<()> {
        if allowed.contains(&lot.state) {
            return Ok(());
        }

        let required = allowed
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" or ");
        let terminal = if Self::is_terminal_state(lot.state) {
            " (terminal state)"
        } else {
            ""
        };
        Err(ExecutionError::InvalidState(format!(
            "Inventory {}: cannot {} in state {}{}; requires {}",
            lot.inventory_id, action, lot.state, terminal, required
        )))
    }

    fn ensure_not_held(
        lot: &InventoryLot,
        holds: &dyn HoldLookup,
        verb: &str,
    ) -> ExecutionResult<()> {
        if holds.is_on_hold(HoldEntityType::Inventory, lot.inventory_id)? {
            return Err(ExecutionError::InvalidState(format!(
                "Inventory {}: cannot be {} while on hold",
                lot.inventory_id, verb
            )));
        }
        if let Some(batch_id) = lot.batch_id {
            if holds.is_on_hold(HoldEntityType::Batch, batch_id)? {
                return Err(ExecutionError::InvalidState(format!(
                    "Inventory {}: cannot be {} while batch {} is on hold",
                    lot.inventory_id, verb, batch_id
                )));
            }
        }
        Ok(())
    }
}

fn fmt_order(order_id: Option<i64>) -> String {
    order_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "<none>".to_string())
}
