// ==========================================
// 生产执行控制引擎 - 工艺路线领域模型
// ==========================================
// 红线: sequence_number 在同一路线内构成全序
// 红线: 相同 sequence_number 的步骤为并行兄弟
// ==========================================

use crate::domain::types::{RoutingStepStatus, RoutingType};
use serde::{Deserialize, Serialize};

// ==========================================
// Routing - 工艺路线
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routing {
    pub routing_id: i64,
    pub process_id: i64,
    pub routing_name: String,
    pub routing_type: RoutingType,
}

// ==========================================
// RoutingStep - 工艺路线步骤
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingStep {
    pub routing_step_id: i64,
    pub routing_id: i64,
    pub operation_id: Option<i64>, // 实例化后绑定的工序 (1:1)
    pub sequence_number: i32,
    pub operation_name: String,
    pub operation_type: String,
    pub is_parallel: bool,
    pub mandatory: bool,
    pub status: RoutingStepStatus,
}

impl RoutingStep {
    pub fn is_completed(&self) -> bool {
        self.status == RoutingStepStatus::Completed
    }
}

// ==========================================
// RoutingPlan - 已加载的路线 (路线 + 按序号升序的步骤)
// ==========================================
// Routing Sequencer 的纯函数只作用于该结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub routing: Routing,
    pub steps: Vec<RoutingStep>,
}

impl RoutingPlan {
    /// 构造并保证步骤按 sequence_number 升序 (同序号按ID)
    pub fn new(routing: Routing, mut steps: Vec<RoutingStep>) -> Self {
        steps.sort_by_key(|s| (s.sequence_number, s.routing_step_id));
        Self { routing, steps }
    }

    pub fn find_step(&self, routing_step_id: i64) -> Option<&RoutingStep> {
        self.steps.iter().find(|s| s.routing_step_id == routing_step_id)
    }
}
