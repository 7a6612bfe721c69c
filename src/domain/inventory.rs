// ==========================================
// 生产执行控制引擎 - 库存批次领域模型
// ==========================================
// 红线: quantity >= 0
// 红线: reserved_for_order_id 当且仅当 state = RESERVED 时存在
// 红线: 不做物理删除，终态 (CONSUMED / SCRAPPED) 永久冻结
// ==========================================

use crate::domain::types::InventoryState;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// InventoryLot - 库存批次
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryLot {
    pub inventory_id: i64,                  // 库存ID
    pub material_id: String,                // 物料ID
    pub quantity: Decimal,                  // 数量
    pub unit: String,                       // 单位
    pub state: InventoryState,              // 状态
    pub batch_id: Option<i64>,              // 所属生产批次 (保留锁向下传递)
    pub reserved_for_order_id: Option<i64>, // 预留订单
    pub location: Option<String>,           // 库位
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl InventoryLot {
    /// 构造一个新到货/新产出的可用库存（尚未分配ID）
    pub fn new_available(
        material_id: impl Into<String>,
        quantity: Decimal,
        unit: impl Into<String>,
        batch_id: Option<i64>,
    ) -> Self {
        let now = chrono::Local::now().naive_local();
        Self {
            inventory_id: 0,
            material_id: material_id.into(),
            quantity,
            unit: unit.into(),
            state: InventoryState::Available,
            batch_id,
            reserved_for_order_id: None,
            location: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 校验实体不变量
    ///
    /// # 返回
    /// - Ok(()): 满足不变量
    /// - Err(reason): 违反的规则
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.quantity < Decimal::ZERO {
            return Err(format!(
                "Inventory {}: quantity {} is negative",
                self.inventory_id, self.quantity
            ));
        }

        let reserved = self.state == InventoryState::Reserved;
        match (reserved, self.reserved_for_order_id) {
            (true, None) => Err(format!(
                "Inventory {}: RESERVED without reserved-for order",
                self.inventory_id
            )),
            (false, Some(order_id)) => Err(format!(
                "Inventory {}: reserved for order {} but state is {}",
                self.inventory_id, order_id, self.state
            )),
            _ => Ok(()),
        }
    }
}
