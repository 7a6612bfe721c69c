// ==========================================
// 生产执行控制引擎 - 引擎层
// ==========================================
// 职责: 状态机校验、保留锁覆盖层、路线门控、批次拆分与编号
// 红线: 引擎不拼业务 SQL，数据访问统一走 repository
// 红线: 所有拒绝都返回带实体ID与规则的错误信息
// ==========================================

pub mod audit;
pub mod batch;
pub mod batch_number;
pub mod batch_size;
pub mod context;
pub mod error;
pub mod hold;
pub mod inventory;
pub mod inventory_state;
pub mod operation_status;
pub mod routing;
pub mod sequence;

// 重导出核心引擎
pub use audit::{
    record_best_effort, resolve_actor, ActorResolver, AuditLogSink, AuditSink, FixedActor,
    NoOpAuditSink, SystemActor, SYSTEM_ACTOR,
};
pub use batch::{BatchService, ProducedBatch, ProductionOutput, ProductionResult};
pub use batch_number::{
    BatchNumberFormatter, BatchNumberGenerator, NumberingPlan, NumberingRequest,
};
pub use batch_size::{BatchSizePartitioner, BatchSizeService, MAX_BATCH_COUNT};
pub use context::{ExecutionContext, HoldLookup, TxHoldLookup};
pub use error::{ErrorKind, ExecutionError, ExecutionResult};
pub use hold::HoldService;
pub use inventory::InventoryService;
pub use inventory_state::InventoryStateMachine;
pub use operation_status::{
    validate_process_transition, OperationConfirmation, OperationStatusController,
};
pub use routing::{can_operation_proceed_tx, RoutingSequencer, RoutingService};
pub use sequence::SequenceScope;
