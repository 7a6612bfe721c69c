// ==========================================
// 生产执行控制引擎 - 批量拆分
// ==========================================
// 输入: 总量 + 匹配到的最具体配置 (配置库已按 具体度 -> 优先级 排序)
// 红线: sum(batch_sizes) == total_quantity，不允许任何舍入损失
// 余量处理顺序:
//   (a) 余量 >= min 且允许部分批 -> 单独成批 (partial)
//   (b) 否则末批 + 余量 <= max   -> 并入末批 (非 partial)
//   (c) 否则仍单独成批 (partial，覆盖"不允许部分批"标志)
// ==========================================

use crate::domain::batch::{BatchSizeConfig, BatchSizeResult};
use crate::engine::context::ExecutionContext;
use crate::engine::error::{ExecutionError, ExecutionResult};
use crate::repository::batch_config_repo::BatchSizeConfigRepository;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

/// 单次拆分的批次数上限（含余量批）
pub const MAX_BATCH_COUNT: usize = 10_000;

/// 批量拆分器（纯函数）
pub struct BatchSizePartitioner;

impl BatchSizePartitioner {
    pub fn partition(
        total: Decimal,
        config: Option<&BatchSizeConfig>,
    ) -> ExecutionResult<BatchSizeResult> {
        if total <= Decimal::ZERO {
            return Err(ExecutionError::Validation(format!(
                "Batch sizing: total quantity {} must be positive",
                total
            )));
        }

        let Some(config) = config else {
            return Ok(single_batch(total, None));
        };
        config.validate().map_err(ExecutionError::Validation)?;

        if total <= config.max_batch_size {
            return Ok(single_batch(total, Some(config)));
        }

        let preferred = config.effective_preferred();
        let mut full_count = total
            .checked_div(preferred)
            .map(|q| q.floor())
            .ok_or_else(|| {
                ExecutionError::Validation(format!(
                    "BatchSizeConfig '{}': cannot divide {} by {}",
                    config.config_name, total, preferred
                ))
            })?;
        // 除法在 28 位精度处可能向上舍入
        if preferred * full_count > total {
            full_count -= Decimal::ONE;
        }
        if full_count >= Decimal::from(MAX_BATCH_COUNT) {
            return Err(ExecutionError::Validation(format!(
                "BatchSizeConfig '{}': total {} at batch size {} reaches the {} batch limit",
                config.config_name, total, preferred, MAX_BATCH_COUNT
            )));
        }
        let count = full_count.to_usize().ok_or_else(|| {
            ExecutionError::Validation(format!(
                "BatchSizeConfig '{}': batch count {} out of range",
                config.config_name, full_count
            ))
        })?;

        let mut sizes = vec![preferred; count];
        let remainder = total - preferred * full_count;
        let mut has_partial = false;

        if !remainder.is_zero() {
            let absorbable = sizes
                .last()
                .map(|last| *last + remainder <= config.max_batch_size)
                .unwrap_or(false);

            if remainder >= config.min_batch_size && config.allow_partial_batch {
                sizes.push(remainder);
                has_partial = true;
            } else if absorbable {
                if let Some(last) = sizes.last_mut() {
                    *last += remainder;
                }
            } else {
                sizes.push(remainder);
                has_partial = true;
            }
        }

        debug!(
            config = %config.config_name,
            total = %total,
            count = sizes.len(),
            partial = has_partial,
            "批量拆分"
        );

        Ok(BatchSizeResult {
            batch_count: sizes.len(),
            total_quantity: sizes.iter().copied().sum(),
            batch_sizes: sizes,
            has_partial_batch: has_partial,
            applied_config_id: Some(config.config_id),
            applied_config_name: Some(config.config_name.clone()),
        })
    }
}

fn single_batch(total: Decimal, config: Option<&BatchSizeConfig>) -> BatchSizeResult {
    BatchSizeResult {
        batch_sizes: vec![total],
        batch_count: 1,
        total_quantity: total,
        has_partial_batch: false,
        applied_config_id: config.map(|c| c.config_id),
        applied_config_name: config.map(|c| c.config_name.clone()),
    }
}

// ==========================================
// BatchSizeService - 配置解析 + 拆分
// ==========================================
pub struct BatchSizeService {
    ctx: Arc<ExecutionContext>,
}

impl BatchSizeService {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    /// 最具体的匹配配置
    pub fn resolve_config(
        &self,
        operation_type: &str,
        product_sku: Option<&str>,
        equipment_type: Option<&str>,
    ) -> ExecutionResult<Option<BatchSizeConfig>> {
        self.ctx.read(|conn| {
            let configs = BatchSizeConfigRepository::find_matching_tx(
                conn,
                operation_type,
                product_sku,
                equipment_type,
            )?;
            Ok(configs.into_iter().next())
        })
    }

    pub fn calculate_batch_sizes(
        &self,
        total: Decimal,
        operation_type: &str,
        product_sku: Option<&str>,
        equipment_type: Option<&str>,
    ) -> ExecutionResult<BatchSizeResult> {
        let config = self.resolve_config(operation_type, product_sku, equipment_type)?;
        BatchSizePartitioner::partition(total, config.as_ref())
    }
}
