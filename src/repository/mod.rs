// ==========================================
// 生产执行控制引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约定: `*_tx(conn, ..)` 关联函数在调用方事务内执行
// ==========================================

pub mod audit_log_repo;
pub mod batch_config_repo;
pub mod batch_repo;
pub mod db_utils;
pub mod error;
pub mod hold_repo;
pub mod inventory_repo;
pub mod operation_repo;
pub mod routing_repo;
pub mod sequence_counter_repo;

// 重导出核心仓储
pub use audit_log_repo::AuditLogRepository;
pub use batch_config_repo::{BatchNumberConfigRepository, BatchSizeConfigRepository};
pub use batch_repo::BatchRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use hold_repo::HoldRepository;
pub use inventory_repo::InventoryRepository;
pub use operation_repo::{EquipmentStatusRepository, OperationRepository, ProcessTemplateRepository};
pub use routing_repo::{NewRoutingStep, RoutingRepository};
pub use sequence_counter_repo::SequenceCounterRepository;
