// ==========================================
// 生产执行控制引擎 - 批次编号
// ==========================================
// 模板格式: prefix [+ sep + 工序代码前N位] [+ sep + 日期] + sep + 补零序号
// 无模板:   PREFIX-<工序类型前2位>-<yyyyMMdd>-<序号>  (工序类型为空时省略该段)
// 拆分:     <父批次号>-S<NN>
// 合并:     MRG-<yyyyMMdd>-<NNNN>
// 原料:     RM-<物料>-<yyyyMMdd>[-<供应商批号>]-<NNN>
// 红线: 序号取自 sequence_counter，同一 scope_key 并发不重复
// ==========================================

use crate::config::ConfigManager;
use crate::domain::batch::BatchNumberConfig;
use crate::domain::types::ResetPeriod;
use crate::engine::context::ExecutionContext;
use crate::engine::error::{ExecutionError, ExecutionResult};
use crate::engine::sequence::SequenceScope;
use crate::repository::batch_config_repo::BatchNumberConfigRepository;
use crate::repository::batch_repo::BatchRepository;
use crate::repository::sequence_counter_repo::SequenceCounterRepository;
use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDate;
use rusqlite::Connection;
use std::fmt::Write;
use std::sync::Arc;
use tracing::info;

/// 供应商批号最大长度
pub const SUPPLIER_LOT_MAX_LEN: usize = 15;
/// 合并批次序号宽度
pub const MERGE_SEQUENCE_LENGTH: usize = 4;

const DEFAULT_OPERATION_PREFIX_LEN: usize = 2;

/// 编号请求上下文
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberingRequest<'a> {
    pub operation_type: Option<&'a str>,
    pub operation_code: Option<&'a str>,
    pub product_sku: Option<&'a str>,
}

/// 已解析的编号方案（在事务外解析，事务内只取号）
#[derive(Debug, Clone, PartialEq)]
pub enum NumberingPlan {
    Template(BatchNumberConfig),
    Default { prefix: String, sequence_length: usize },
}

// ==========================================
// BatchNumberFormatter - 纯格式化
// ==========================================
pub struct BatchNumberFormatter;

impl BatchNumberFormatter {
    pub fn pad_sequence(value: i64, width: usize) -> String {
        format!("{:0width$}", value, width = width)
    }

    /// 按 strftime 模式格式化日期
    ///
    /// 非法模式或含时间字段的模式为配置错误，不 panic
    pub fn format_date(date: NaiveDate, pattern: &str) -> ExecutionResult<String> {
        let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(ExecutionError::Validation(format!(
                "date format '{}' is not a valid pattern",
                pattern
            )));
        }

        let mut out = String::new();
        write!(out, "{}", date.format_with_items(items.iter())).map_err(|_| {
            ExecutionError::Validation(format!(
                "date format '{}' cannot be applied to a date",
                pattern
            ))
        })?;
        Ok(out)
    }

    fn leading_chars(value: &str, n: usize) -> String {
        if n == 0 {
            value.to_string()
        } else {
            value.chars().take(n).collect()
        }
    }

    pub fn format_template(
        config: &BatchNumberConfig,
        operation_code: Option<&str>,
        date: NaiveDate,
        sequence: i64,
    ) -> ExecutionResult<String> {
        let sep = config.separator.as_str();
        let mut number = config.prefix.clone();

        if config.include_operation_code {
            if let Some(code) = operation_code.map(str::trim).filter(|c| !c.is_empty()) {
                number.push_str(sep);
                number.push_str(&Self::leading_chars(code, config.operation_code_length));
            }
        }

        if let Some(pattern) = config.date_format.as_deref().filter(|p| !p.is_empty()) {
            number.push_str(sep);
            number.push_str(&Self::format_date(date, pattern)?);
        }

        number.push_str(sep);
        number.push_str(&Self::pad_sequence(sequence, config.sequence_length));
        Ok(number)
    }

    /// 工序类型前2位（大写）
    pub fn operation_prefix(operation_type: &str) -> String {
        Self::leading_chars(operation_type.trim(), DEFAULT_OPERATION_PREFIX_LEN).to_uppercase()
    }

    pub fn format_default(
        prefix: &str,
        operation_type: Option<&str>,
        date: NaiveDate,
        sequence: i64,
        width: usize,
    ) -> String {
        let mut number = prefix.to_string();
        if let Some(op) = operation_type.map(str::trim).filter(|t| !t.is_empty()) {
            number.push('-');
            number.push_str(&Self::operation_prefix(op));
        }
        format!(
            "{}-{}-{}",
            number,
            date.format("%Y%m%d"),
            Self::pad_sequence(sequence, width)
        )
    }

    pub fn split_number(parent_number: &str, index: i64, width: usize) -> String {
        format!("{}-S{}", parent_number, Self::pad_sequence(index, width))
    }

    pub fn merge_number(prefix: &str, date: NaiveDate, sequence: i64) -> String {
        format!(
            "{}-{}-{}",
            prefix,
            date.format("%Y%m%d"),
            Self::pad_sequence(sequence, MERGE_SEQUENCE_LENGTH)
        )
    }

    /// 供应商批号清洗: 仅保留字母数字，截断至 15 位，清洗后为空返回 None
    pub fn sanitize_supplier_lot(raw: &str) -> Option<String> {
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(SUPPLIER_LOT_MAX_LEN)
            .collect();
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    }

    pub fn rm_number(
        prefix: &str,
        material_code: &str,
        date: NaiveDate,
        supplier_lot: Option<&str>,
        sequence: i64,
        width: usize,
    ) -> String {
        let mut number = format!("{}-{}-{}", prefix, material_code, date.format("%Y%m%d"));
        if let Some(lot) = supplier_lot {
            number.push('-');
            number.push_str(lot);
        }
        number.push('-');
        number.push_str(&Self::pad_sequence(sequence, width));
        number
    }
}

// ==========================================
// BatchNumberGenerator - 方案解析 + 取号
// ==========================================
pub struct BatchNumberGenerator {
    ctx: Arc<ExecutionContext>,
    config_manager: Arc<ConfigManager>,
    number_config_repo: Arc<BatchNumberConfigRepository>,
}

impl BatchNumberGenerator {
    pub fn new(
        ctx: Arc<ExecutionContext>,
        config_manager: Arc<ConfigManager>,
        number_config_repo: Arc<BatchNumberConfigRepository>,
    ) -> Self {
        Self {
            ctx,
            config_manager,
            number_config_repo,
        }
    }

    /// 解析编号方案: 最具体的有效模板，否则默认方案
    pub fn resolve_plan(&self, request: &NumberingRequest<'_>) -> ExecutionResult<NumberingPlan> {
        let configs = self
            .number_config_repo
            .find_matching(request.operation_type, request.product_sku)?;
        if let Some(config) = configs.into_iter().next() {
            return Ok(NumberingPlan::Template(config));
        }

        Ok(NumberingPlan::Default {
            prefix: self.config_manager.get_default_batch_prefix()?,
            sequence_length: self.config_manager.get_default_sequence_length()?,
        })
    }

    /// 在调用方事务中取号并格式化
    pub fn next_number_tx(
        conn: &Connection,
        plan: &NumberingPlan,
        request: &NumberingRequest<'_>,
        date: NaiveDate,
    ) -> ExecutionResult<String> {
        match plan {
            NumberingPlan::Template(config) => {
                let scope = SequenceScope::key(&config.config_id.to_string(), config.reset_period, date);
                let sequence = SequenceCounterRepository::next_value_tx(conn, &scope)?;
                let code = request.operation_code.or(request.operation_type);
                BatchNumberFormatter::format_template(config, code, date, sequence)
            }
            NumberingPlan::Default {
                prefix,
                sequence_length,
            } => {
                let scope = match request.operation_type.map(str::trim).filter(|t| !t.is_empty()) {
                    Some(op) => format!("DEFAULT-{}", BatchNumberFormatter::operation_prefix(op)),
                    None => "DEFAULT".to_string(),
                };
                let scope = SequenceScope::key(&scope, ResetPeriod::Daily, date);
                let sequence = SequenceCounterRepository::next_value_tx(conn, &scope)?;
                Ok(BatchNumberFormatter::format_default(
                    prefix,
                    request.operation_type,
                    date,
                    sequence,
                    *sequence_length,
                ))
            }
        }
    }

    pub fn generate_batch_number(&self, request: &NumberingRequest<'_>) -> ExecutionResult<String> {
        let plan = self.resolve_plan(request)?;
        let today = today();
        let number = self
            .ctx
            .run_in_transaction(|tx| Self::next_number_tx(tx, &plan, request, today))?;
        info!(batch_number = %number, "生成批次号");
        Ok(number)
    }

    /// 下一个拆分子批次号（预览，不占号）
    pub fn generate_split_batch_number(&self, parent_batch_id: i64) -> ExecutionResult<String> {
        let width = self.split_suffix_length()?;
        self.ctx.read(|conn| {
            let parent = BatchRepository::find_by_id_tx(conn, parent_batch_id)?
                .ok_or_else(|| ExecutionError::not_found("Batch", parent_batch_id))?;
            let index = BatchRepository::count_children_tx(conn, parent_batch_id)? + 1;
            Ok(BatchNumberFormatter::split_number(&parent.batch_number, index, width))
        })
    }

    pub fn generate_merge_batch_number(&self) -> ExecutionResult<String> {
        let prefix = self.merge_prefix()?;
        let today = today();
        self.ctx
            .run_in_transaction(|tx| Self::merge_number_tx(tx, &prefix, today))
    }

    pub fn merge_number_tx(conn: &Connection, prefix: &str, date: NaiveDate) -> ExecutionResult<String> {
        let scope = SequenceScope::key(prefix, ResetPeriod::Daily, date);
        let sequence = SequenceCounterRepository::next_value_tx(conn, &scope)?;
        Ok(BatchNumberFormatter::merge_number(prefix, date, sequence))
    }

    /// 原料批次号
    pub fn generate_rm_batch_number(
        &self,
        material_code: &str,
        supplier_lot: Option<&str>,
    ) -> ExecutionResult<String> {
        let material = material_code.trim();
        if material.is_empty() {
            return Err(ExecutionError::Validation(
                "RM batch number: material code must not be empty".to_string(),
            ));
        }

        let prefix = self.config_manager.get_rm_prefix()?;
        let width = self.config_manager.get_default_sequence_length()?;
        let lot = supplier_lot.and_then(BatchNumberFormatter::sanitize_supplier_lot);
        let today = today();

        let number = self.ctx.run_in_transaction(|tx| {
            let scope = SequenceScope::key(
                &format!("{}-{}", prefix, material),
                ResetPeriod::Daily,
                today,
            );
            let sequence = SequenceCounterRepository::next_value_tx(tx, &scope)?;
            Ok(BatchNumberFormatter::rm_number(
                &prefix,
                material,
                today,
                lot.as_deref(),
                sequence,
                width,
            ))
        })?;
        info!(batch_number = %number, material = material, "生成原料批次号");
        Ok(number)
    }

    pub fn split_suffix_length(&self) -> ExecutionResult<usize> {
        Ok(self.config_manager.get_split_suffix_length()?)
    }

    pub fn merge_prefix(&self) -> ExecutionResult<String> {
        Ok(self.config_manager.get_merge_prefix()?)
    }
}

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
