// ==========================================
// 生产执行控制引擎 - 工序/工艺模板状态控制
// ==========================================
// 工序: NOT_STARTED -> READY -> IN_PROGRESS -> CONFIRMED
//       READY/IN_PROGRESS <-> BLOCKED (解除后回到 READY)
//       ON_HOLD 由保留锁覆盖层维护
// 工艺模板: DRAFT -> ACTIVE, INACTIVE -> ACTIVE, ACTIVE -> INACTIVE
// 红线: 任何路径都不允许回到 DRAFT
// 红线: 只有 ACTIVE 模板可以实例化工序
// ==========================================

use crate::domain::operation::{Operation, ProcessTemplate};
use crate::domain::types::{
    AuditAction, HoldEntityType, OperationStatus, ProcessStatus, RoutingStepStatus, RoutingType,
};
use crate::engine::context::ExecutionContext;
use crate::engine::error::{ExecutionError, ExecutionResult};
use crate::engine::routing::{can_proceed_for, RoutingSequencer};
use crate::repository::error::RepositoryError;
use crate::repository::hold_repo::HoldRepository;
use crate::repository::operation_repo::{OperationRepository, ProcessTemplateRepository};
use crate::repository::routing_repo::RoutingRepository;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const OPERATION_ENTITY: &str = "OPERATION";
const PROCESS_ENTITY: &str = "PROCESS";

/// 工序确认结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationConfirmation {
    pub operation: Operation,
    pub promoted_operation_ids: Vec<i64>, // 因本次确认而转为 READY 的后续工序
    pub routing_complete: bool,
}

/// 工艺模板状态迁移校验（纯函数）
pub fn validate_process_transition(
    process_id: i64,
    from: ProcessStatus,
    to: ProcessStatus,
) -> ExecutionResult<()> {
    use ProcessStatus::*;

    let legal = from == to
        || matches!(
            (from, to),
            (Draft, Active) | (Inactive, Active) | (Active, Inactive)
        );
    if legal {
        Ok(())
    } else {
        Err(ExecutionError::InvalidState(format!(
            "Process {}: cannot transition {} -> {}",
            process_id, from, to
        )))
    }
}

// ==========================================
// OperationStatusController
// ==========================================
pub struct OperationStatusController {
    ctx: Arc<ExecutionContext>,
}

impl OperationStatusController {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    pub fn get_operation(&self, operation_id: i64) -> ExecutionResult<Operation> {
        self.ctx.read(|conn| load_operation(conn, operation_id))
    }

    // ==========================================
    // 工序状态
    // ==========================================

    /// 阻塞工序（READY / IN_PROGRESS -> BLOCKED）
    pub fn block_operation(&self, operation_id: i64, reason: &str) -> ExecutionResult<Operation> {
        let actor = self.ctx.actor();
        let (from, op) = self.ctx.run_in_transaction(|tx| {
            let op = load_operation(tx, operation_id)?;
            match op.status {
                OperationStatus::Ready | OperationStatus::InProgress => {}
                OperationStatus::Confirmed => {
                    return Err(ExecutionError::InvalidState(format!(
                        "Operation {}: cannot block a confirmed operation",
                        operation_id
                    )))
                }
                OperationStatus::Blocked => {
                    return Err(ExecutionError::InvalidState(format!(
                        "Operation {}: already blocked",
                        operation_id
                    )))
                }
                other => {
                    return Err(ExecutionError::InvalidState(format!(
                        "Operation {}: cannot block from {}; must be READY or IN_PROGRESS",
                        operation_id, other
                    )))
                }
            }
            OperationRepository::update_status_tx(tx, operation_id, op.status, OperationStatus::Blocked)?;
            Ok((op.status, load_operation(tx, operation_id)?))
        })?;

        info!(operation_id, from = %from, "工序阻塞");
        self.audit_status(operation_id, from, OperationStatus::Blocked, &actor, Some(reason));
        Ok(op)
    }

    /// 解除阻塞（BLOCKED -> READY）
    pub fn unblock_operation(&self, operation_id: i64) -> ExecutionResult<Operation> {
        let actor = self.ctx.actor();
        let op = self.ctx.run_in_transaction(|tx| {
            let op = load_operation(tx, operation_id)?;
            if op.status != OperationStatus::Blocked {
                return Err(ExecutionError::InvalidState(format!(
                    "Operation {}: cannot unblock from {}; must be BLOCKED",
                    operation_id, op.status
                )));
            }
            OperationRepository::update_status_tx(
                tx,
                operation_id,
                OperationStatus::Blocked,
                OperationStatus::Ready,
            )?;
            load_operation(tx, operation_id)
        })?;

        info!(operation_id, "工序解除阻塞");
        self.audit_status(operation_id, OperationStatus::Blocked, OperationStatus::Ready, &actor, None);
        Ok(op)
    }

    /// 开工（READY -> IN_PROGRESS）
    ///
    /// 要求: 无保留锁，且路线门控放行
    pub fn start_operation(&self, operation_id: i64) -> ExecutionResult<Operation> {
        let actor = self.ctx.actor();
        let op = self.ctx.run_in_transaction(|tx| {
            let op = load_operation(tx, operation_id)?;
            if op.status != OperationStatus::Ready {
                return Err(ExecutionError::InvalidState(format!(
                    "Operation {}: cannot start from {}; must be READY",
                    operation_id, op.status
                )));
            }
            ensure_not_held(tx, operation_id)?;
            if !can_proceed_for(tx, &op)? {
                debug!(operation_id, "路线门控未放行");
                return Err(ExecutionError::InvalidState(format!(
                    "Operation {}: routing predecessors are not complete",
                    operation_id
                )));
            }

            OperationRepository::update_status_tx(
                tx,
                operation_id,
                OperationStatus::Ready,
                OperationStatus::InProgress,
            )?;
            if let Some(step_id) = op.routing_step_id {
                RoutingRepository::update_step_status_tx(tx, step_id, RoutingStepStatus::InProgress)?;
            }
            load_operation(tx, operation_id)
        })?;

        info!(operation_id, "工序开工");
        self.audit_status(operation_id, OperationStatus::Ready, OperationStatus::InProgress, &actor, None);
        Ok(op)
    }

    /// 确认（IN_PROGRESS -> CONFIRMED），完成绑定步骤并放行后续工序
    pub fn confirm_operation(
        &self,
        operation_id: i64,
        confirmed_qty: Decimal,
    ) -> ExecutionResult<OperationConfirmation> {
        if confirmed_qty < Decimal::ZERO {
            return Err(ExecutionError::Validation(format!(
                "Operation {}: confirmed quantity {} must not be negative",
                operation_id, confirmed_qty
            )));
        }

        let actor = self.ctx.actor();
        let confirmation = self.ctx.run_in_transaction(|tx| {
            let op = load_operation(tx, operation_id)?;
            if op.status != OperationStatus::InProgress {
                return Err(ExecutionError::InvalidState(format!(
                    "Operation {}: cannot confirm from {}; must be IN_PROGRESS",
                    operation_id, op.status
                )));
            }
            ensure_not_held(tx, operation_id)?;

            OperationRepository::update_status_tx(
                tx,
                operation_id,
                OperationStatus::InProgress,
                OperationStatus::Confirmed,
            )?;
            OperationRepository::update_confirmed_qty_tx(tx, operation_id, confirmed_qty)?;

            let mut routing_complete = false;
            if let Some(step_id) = op.routing_step_id {
                RoutingRepository::update_step_status_tx(tx, step_id, RoutingStepStatus::Completed)?;
                let step = RoutingRepository::find_step_tx(tx, step_id)?
                    .ok_or_else(|| ExecutionError::not_found("RoutingStep", step_id))?;
                if let Some(plan) = RoutingRepository::load_plan_tx(tx, step.routing_id)? {
                    routing_complete = RoutingSequencer::is_complete(&plan);
                }
            }

            let promoted = next_ready_tx(tx, op.process_id, op.order_line_id)?;
            let mut promoted_ids = Vec::with_capacity(promoted.len());
            for next in &promoted {
                OperationRepository::update_status_tx(
                    tx,
                    next.operation_id,
                    OperationStatus::NotStarted,
                    OperationStatus::Ready,
                )?;
                promoted_ids.push(next.operation_id);
            }

            Ok(OperationConfirmation {
                operation: load_operation(tx, operation_id)?,
                promoted_operation_ids: promoted_ids,
                routing_complete,
            })
        })?;

        info!(
            operation_id,
            qty = %confirmed_qty,
            promoted = ?confirmation.promoted_operation_ids,
            routing_complete = confirmation.routing_complete,
            "工序确认"
        );
        self.audit_status(
            operation_id,
            OperationStatus::InProgress,
            OperationStatus::Confirmed,
            &actor,
            Some(&format!("confirmed qty {}", confirmed_qty)),
        );
        for id in &confirmation.promoted_operation_ids {
            self.audit_status(*id, OperationStatus::NotStarted, OperationStatus::Ready, &actor, None);
        }
        Ok(confirmation)
    }

    /// 当前可放行为 READY 的 NOT_STARTED 工序
    ///
    /// 顺序路线只返回最低的可放行序号组
    pub fn get_next_operation_to_ready(
        &self,
        process_id: i64,
        order_line_id: Option<i64>,
    ) -> ExecutionResult<Vec<Operation>> {
        self.ctx
            .read(|conn| next_ready_tx(conn, process_id, order_line_id))
    }

    // ==========================================
    // 工艺模板状态
    // ==========================================

    /// 直接设置模板状态（与 activate/deactivate 共用同一迁移校验）
    pub fn set_process_status(
        &self,
        process_id: i64,
        status: ProcessStatus,
    ) -> ExecutionResult<ProcessTemplate> {
        let actor = self.ctx.actor();
        let (from, process) = self.ctx.run_in_transaction(|tx| {
            let process = load_process(tx, process_id)?;
            let from = process.status;
            validate_process_transition(process_id, from, status)?;
            if from == status {
                return Ok((from, process));
            }
            ProcessTemplateRepository::update_status_tx(tx, process_id, status)?;
            Ok((from, load_process(tx, process_id)?))
        })?;

        if from != status {
            info!(process_id, from = %from, to = %status, "工艺模板状态变更");
            self.ctx.audit(
                PROCESS_ENTITY,
                process_id,
                AuditAction::StatusChange,
                &actor,
                &format!("{} -> {}", from, status),
            );
        }
        Ok(process)
    }

    pub fn activate_process(&self, process_id: i64) -> ExecutionResult<ProcessTemplate> {
        self.set_process_status(process_id, ProcessStatus::Active)
    }

    pub fn deactivate_process(&self, process_id: i64) -> ExecutionResult<ProcessTemplate> {
        self.set_process_status(process_id, ProcessStatus::Inactive)
    }

    /// 由 ACTIVE 工艺模板实例化工序（每个路线步骤一个工序，1:1 绑定）
    ///
    /// 初始状态: 顺序路线首序号组 READY，其余 NOT_STARTED；并行路线全部 READY
    ///
    /// 约束: 步骤绑定是永久的，一条路线只能实例化一次。对同一模板再次调用
    /// （无论订单行是否相同）返回 Conflict。多订单行需各自建立工艺模板与路线；
    /// 同一模板下按订单行区分的只剩未绑定步骤的临时工序（见 next_ready_tx）。
    pub fn instantiate_operations(
        &self,
        process_id: i64,
        order_line_id: Option<i64>,
        target_qty: Decimal,
    ) -> ExecutionResult<Vec<Operation>> {
        if target_qty < Decimal::ZERO {
            return Err(ExecutionError::Validation(format!(
                "Process {}: target quantity {} must not be negative",
                process_id, target_qty
            )));
        }

        let actor = self.ctx.actor();
        let ops = self.ctx.run_in_transaction(|tx| {
            let process = load_process(tx, process_id)?;
            if process.status != ProcessStatus::Active {
                return Err(ExecutionError::InvalidState(format!(
                    "Process {} status is {}; must be {} to instantiate operations",
                    process_id,
                    process.status,
                    ProcessStatus::Active
                )));
            }

            let plan = RoutingRepository::load_plan_by_process_tx(tx, process_id)?
                .ok_or_else(|| ExecutionError::not_found("Routing for process", process_id))?;
            let Some(first_sequence) = plan.steps.first().map(|s| s.sequence_number) else {
                return Err(ExecutionError::Validation(format!(
                    "Process {}: routing {} has no steps",
                    process_id, plan.routing.routing_id
                )));
            };

            let now = chrono::Local::now().naive_local();
            let mut created = Vec::with_capacity(plan.steps.len());
            for step in &plan.steps {
                if let Some(existing) = step.operation_id {
                    return Err(ExecutionError::Conflict(format!(
                        "RoutingStep {}: allocation already exists (operation {})",
                        step.routing_step_id, existing
                    )));
                }

                let status = if plan.routing.routing_type == RoutingType::Parallel
                    || step.sequence_number == first_sequence
                {
                    OperationStatus::Ready
                } else {
                    OperationStatus::NotStarted
                };

                let op = Operation {
                    operation_id: 0,
                    process_id,
                    order_line_id,
                    routing_step_id: Some(step.routing_step_id),
                    operation_code: step.operation_name.clone(),
                    operation_type: step.operation_type.clone(),
                    sequence_number: step.sequence_number,
                    status,
                    target_qty,
                    confirmed_qty: Decimal::ZERO,
                    created_at: now,
                    updated_at: now,
                };
                let operation_id = OperationRepository::insert_tx(tx, &op)?;
                RoutingRepository::bind_operation_tx(tx, step.routing_step_id, operation_id).map_err(
                    |e| match e {
                        RepositoryError::UniqueConstraintViolation(_) => ExecutionError::Conflict(format!(
                            "RoutingStep {}: allocation already exists",
                            step.routing_step_id
                        )),
                        other => other.into(),
                    },
                )?;
                created.push(load_operation(tx, operation_id)?);
            }
            Ok(created)
        })?;

        info!(process_id, order_line_id = ?order_line_id, count = ops.len(), "工序实例化");
        for op in &ops {
            self.ctx.audit(
                OPERATION_ENTITY,
                op.operation_id,
                AuditAction::Create,
                &actor,
                &format!(
                    "instantiated from process {} step {} as {}",
                    process_id,
                    op.routing_step_id.unwrap_or_default(),
                    op.status
                ),
            );
        }
        Ok(ops)
    }

    fn audit_status(
        &self,
        operation_id: i64,
        from: OperationStatus,
        to: OperationStatus,
        actor: &str,
        note: Option<&str>,
    ) {
        let mut detail = format!("{} -> {}", from, to);
        if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
            detail.push_str(": ");
            detail.push_str(note);
        }
        self.ctx
            .audit(OPERATION_ENTITY, operation_id, AuditAction::StatusChange, actor, &detail);
    }
}

fn load_operation(conn: &Connection, operation_id: i64) -> ExecutionResult<Operation> {
    OperationRepository::find_by_id_tx(conn, operation_id)?
        .ok_or_else(|| ExecutionError::not_found("Operation", operation_id))
}

fn load_process(conn: &Connection, process_id: i64) -> ExecutionResult<ProcessTemplate> {
    ProcessTemplateRepository::find_by_id_tx(conn, process_id)?
        .ok_or_else(|| ExecutionError::not_found("Process", process_id))
}

fn ensure_not_held(conn: &Connection, operation_id: i64) -> ExecutionResult<()> {
    if HoldRepository::exists_active_tx(conn, HoldEntityType::Operation, operation_id)? {
        return Err(ExecutionError::InvalidState(format!(
            "Operation {}: on hold",
            operation_id
        )));
    }
    Ok(())
}

/// 同一工艺模板、同一订单行内待放行的 NOT_STARTED 工序
///
/// order_line_id 过滤用于隔开挂在同一模板下、属于其它订单行的临时工序
fn next_ready_tx(
    conn: &Connection,
    process_id: i64,
    order_line_id: Option<i64>,
) -> ExecutionResult<Vec<Operation>> {
    let ops = OperationRepository::find_by_process_tx(conn, process_id, order_line_id)?;

    let mut eligible = Vec::new();
    for op in ops
        .into_iter()
        .filter(|o| o.status == OperationStatus::NotStarted)
    {
        if HoldRepository::exists_active_tx(conn, HoldEntityType::Operation, op.operation_id)? {
            continue;
        }
        if can_proceed_for(conn, &op)? {
            eligible.push(op);
        }
    }

    let sequential = match RoutingRepository::load_plan_by_process_tx(conn, process_id)? {
        Some(plan) => plan.routing.routing_type == RoutingType::Sequential,
        None => true,
    };
    if sequential {
        if let Some(lowest) = eligible.iter().map(|o| o.sequence_number).min() {
            eligible.retain(|o| o.sequence_number == lowest);
        }
    }
    Ok(eligible)
}
