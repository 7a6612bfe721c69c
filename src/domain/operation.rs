// ==========================================
// 生产执行控制引擎 - 工序与工艺模板领域模型
// ==========================================
// 红线: 只有 ACTIVE 的工艺模板可以实例化出运行期工序
// ==========================================

use crate::domain::types::{EquipmentStatus, OperationStatus, ProcessStatus};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// ProcessTemplate - 工艺模板 (设计期)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessTemplate {
    pub process_id: i64,
    pub process_name: String,
    pub status: ProcessStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// ==========================================
// Operation - 运行期工序
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: i64,
    pub process_id: i64,
    pub order_line_id: Option<i64>,
    pub routing_step_id: Option<i64>, // 无绑定步骤 = 不受路线约束
    pub operation_code: String,
    pub operation_type: String,
    pub sequence_number: i32,
    pub status: OperationStatus,
    pub target_qty: Decimal,
    pub confirmed_qty: Decimal,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// ==========================================
// EquipmentState - 设备状态 (主数据在外部系统)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentState {
    pub equipment_id: i64,
    pub equipment_code: String,
    pub status: EquipmentStatus,
}
