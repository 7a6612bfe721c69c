// ==========================================
// 生产执行控制引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod audit;
pub mod batch;
pub mod hold;
pub mod inventory;
pub mod operation;
pub mod routing;
pub mod types;

// 重导出核心类型
pub use audit::AuditRecord;
pub use batch::{Batch, BatchNumberConfig, BatchSizeConfig, BatchSizeResult};
pub use hold::HoldRecord;
pub use inventory::InventoryLot;
pub use operation::{EquipmentState, Operation, ProcessTemplate};
pub use routing::{Routing, RoutingPlan, RoutingStep};
pub use types::{
    AuditAction, EquipmentStatus, HoldEntityType, HoldStatus, InventoryState, OperationStatus,
    ProcessStatus, ResetPeriod, RoutingStepStatus, RoutingType, UnknownVariant,
};
