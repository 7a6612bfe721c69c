// ==========================================
// 生产执行控制引擎 - 工艺路线门控
// ==========================================
// SEQUENTIAL: 序号 < N 的所有必做步骤均 COMPLETED 时，步骤 N 可执行
//             (非必做前序忽略；首步无前序，总可执行)
// PARALLEL:   仅看本步骤自身是否 READY
// 未绑定步骤的工序不受路线约束
// ==========================================

use crate::domain::operation::Operation;
use crate::domain::routing::{RoutingPlan, RoutingStep};
use crate::domain::types::{RoutingStepStatus, RoutingType};
use crate::engine::context::ExecutionContext;
use crate::engine::error::{ExecutionError, ExecutionResult};
use crate::repository::operation_repo::OperationRepository;
use crate::repository::routing_repo::RoutingRepository;
use rusqlite::Connection;
use std::sync::Arc;

// ==========================================
// RoutingSequencer - 纯函数
// ==========================================
pub struct RoutingSequencer;

impl RoutingSequencer {
    /// 步骤是否可执行
    pub fn can_step_proceed(plan: &RoutingPlan, routing_step_id: i64) -> ExecutionResult<bool> {
        let step = plan
            .find_step(routing_step_id)
            .ok_or_else(|| ExecutionError::not_found("RoutingStep", routing_step_id))?;

        let allowed = match plan.routing.routing_type {
            RoutingType::Sequential => plan
                .steps
                .iter()
                .filter(|s| s.mandatory && s.sequence_number < step.sequence_number)
                .all(RoutingStep::is_completed),
            RoutingType::Parallel => step.status == RoutingStepStatus::Ready,
        };
        Ok(allowed)
    }

    /// 序号严格大于 after_sequence 的步骤（升序）
    pub fn next_steps(plan: &RoutingPlan, after_sequence: i32) -> Vec<&RoutingStep> {
        plan.steps
            .iter()
            .filter(|s| s.sequence_number > after_sequence)
            .collect()
    }

    /// 与给定序号相同的并行步骤
    pub fn parallel_steps(plan: &RoutingPlan, sequence: i32) -> Vec<&RoutingStep> {
        plan.steps
            .iter()
            .filter(|s| s.sequence_number == sequence)
            .collect()
    }

    /// 所有必做步骤均已完成
    pub fn is_complete(plan: &RoutingPlan) -> bool {
        plan.steps
            .iter()
            .filter(|s| s.mandatory)
            .all(RoutingStep::is_completed)
    }
}

/// 工序是否可执行（事务内）
///
/// 工序不存在 -> NotFound；两侧都未绑定步骤 -> true；绑定的步骤/路线不存在 -> NotFound
pub fn can_operation_proceed_tx(conn: &Connection, operation_id: i64) -> ExecutionResult<bool> {
    let op = OperationRepository::find_by_id_tx(conn, operation_id)?
        .ok_or_else(|| ExecutionError::not_found("Operation", operation_id))?;
    can_proceed_for(conn, &op)
}

pub(crate) fn can_proceed_for(conn: &Connection, op: &Operation) -> ExecutionResult<bool> {
    // 工序行未记录步骤时，按 routing_step.operation_id 反查
    let step = match op.routing_step_id {
        Some(step_id) => Some(
            RoutingRepository::find_step_tx(conn, step_id)?
                .ok_or_else(|| ExecutionError::not_found("RoutingStep", step_id))?,
        ),
        None => RoutingRepository::find_step_by_operation_tx(conn, op.operation_id)?,
    };
    let Some(step) = step else {
        return Ok(true);
    };

    let plan = RoutingRepository::load_plan_tx(conn, step.routing_id)?
        .ok_or_else(|| ExecutionError::not_found("Routing", step.routing_id))?;
    RoutingSequencer::can_step_proceed(&plan, step.routing_step_id)
}

// ==========================================
// RoutingService - 按ID加载后调用 RoutingSequencer
// ==========================================
pub struct RoutingService {
    ctx: Arc<ExecutionContext>,
    routing_repo: Arc<RoutingRepository>,
}

impl RoutingService {
    pub fn new(ctx: Arc<ExecutionContext>, routing_repo: Arc<RoutingRepository>) -> Self {
        Self { ctx, routing_repo }
    }

    fn load_plan(&self, routing_id: i64) -> ExecutionResult<RoutingPlan> {
        self.routing_repo
            .load_plan(routing_id)?
            .ok_or_else(|| ExecutionError::not_found("Routing", routing_id))
    }

    pub fn can_operation_proceed(&self, operation_id: i64) -> ExecutionResult<bool> {
        self.ctx
            .read(|conn| can_operation_proceed_tx(conn, operation_id))
    }

    pub fn get_next_steps(
        &self,
        routing_id: i64,
        after_sequence: i32,
    ) -> ExecutionResult<Vec<RoutingStep>> {
        let plan = self.load_plan(routing_id)?;
        Ok(RoutingSequencer::next_steps(&plan, after_sequence)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn get_parallel_steps(
        &self,
        routing_id: i64,
        sequence: i32,
    ) -> ExecutionResult<Vec<RoutingStep>> {
        let plan = self.load_plan(routing_id)?;
        Ok(RoutingSequencer::parallel_steps(&plan, sequence)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn is_routing_complete(&self, routing_id: i64) -> ExecutionResult<bool> {
        let plan = self.load_plan(routing_id)?;
        Ok(RoutingSequencer::is_complete(&plan))
    }
}
