// ==========================================
// 生产执行控制引擎 - 生产批次与批次配置领域模型
// ==========================================
// 职责: 批次实体、批量拆分策略、批次编号模板
// 说明: 配置匹配的“最具体优先”排序在配置存储边界完成
// ==========================================

use crate::domain::types::ResetPeriod;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// Batch - 生产批次
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: i64,
    pub batch_number: String,
    pub material_id: String,
    pub quantity: Decimal,
    pub unit: String,
    pub parent_batch_id: Option<i64>,      // 拆分来源
    pub source_operation_id: Option<i64>,  // 产出工序
    pub created_at: NaiveDateTime,
}

// ==========================================
// BatchSizeConfig - 批量拆分策略
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSizeConfig {
    pub config_id: i64,
    pub config_name: String,
    pub operation_type: Option<String>,   // None = 通配
    pub product_sku: Option<String>,      // None = 通配
    pub equipment_type: Option<String>,   // None = 通配
    pub min_batch_size: Decimal,
    pub max_batch_size: Decimal,
    pub preferred_batch_size: Option<Decimal>, // None = 取 max_batch_size
    pub allow_partial_batch: bool,
    pub priority: i32,                    // 数值越小优先级越高
    pub active: bool,
}

impl BatchSizeConfig {
    /// 有效的首选批量
    pub fn effective_preferred(&self) -> Decimal {
        self.preferred_batch_size.unwrap_or(self.max_batch_size)
    }

    /// 配置自身的合法性
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_size <= Decimal::ZERO {
            return Err(format!(
                "BatchSizeConfig '{}': max batch size must be positive",
                self.config_name
            ));
        }
        if self.min_batch_size < Decimal::ZERO || self.min_batch_size > self.max_batch_size {
            return Err(format!(
                "BatchSizeConfig '{}': min batch size {} must be within 0..={}",
                self.config_name, self.min_batch_size, self.max_batch_size
            ));
        }
        if let Some(preferred) = self.preferred_batch_size {
            if preferred <= Decimal::ZERO || preferred > self.max_batch_size {
                return Err(format!(
                    "BatchSizeConfig '{}': preferred batch size {} must be within (0, {}]",
                    self.config_name, preferred, self.max_batch_size
                ));
            }
        }
        Ok(())
    }
}

// ==========================================
// BatchSizeResult - 拆分结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSizeResult {
    pub batch_sizes: Vec<Decimal>,
    pub batch_count: usize,
    pub total_quantity: Decimal,
    pub has_partial_batch: bool,
    pub applied_config_id: Option<i64>,
    pub applied_config_name: Option<String>,
}

// ==========================================
// BatchNumberConfig - 批次编号模板
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNumberConfig {
    pub config_id: i64,
    pub config_name: String,
    pub operation_type: Option<String>,
    pub product_sku: Option<String>,
    pub prefix: String,
    pub include_operation_code: bool,
    pub operation_code_length: usize,
    pub separator: String,
    pub date_format: Option<String>, // chrono strftime 格式，如 "%Y%m%d"
    pub sequence_length: usize,
    pub reset_period: ResetPeriod,
    pub priority: i32,
    pub active: bool,
}
