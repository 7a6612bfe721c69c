// ==========================================
// 生产执行控制引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 进程内执行控制（状态机 / 保留锁 / 路线放行 / 批次拆分与编号）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 应用层 - 组合根
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AuditAction, EquipmentStatus, HoldEntityType, HoldStatus, InventoryState, OperationStatus,
    ProcessStatus, ResetPeriod, RoutingStepStatus, RoutingType,
};

// 领域实体
pub use domain::{
    AuditRecord, Batch, BatchNumberConfig, BatchSizeConfig, BatchSizeResult, EquipmentState,
    HoldRecord, InventoryLot, Operation, ProcessTemplate, Routing, RoutingPlan, RoutingStep,
};

// 引擎
pub use engine::{
    BatchNumberGenerator, BatchService, BatchSizePartitioner, BatchSizeService, ErrorKind,
    ExecutionContext, ExecutionError, ExecutionResult, HoldService, InventoryService,
    InventoryStateMachine, OperationStatusController, RoutingSequencer, RoutingService,
};

// 应用
pub use app::AppState;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "生产执行控制引擎";
