// ==========================================
// 生产执行控制引擎 - 产出与批次谱系
// ==========================================
// 职责: 产出拆批 + 编号 + 入库 / 批次拆分 / 批次合并
// 红线: 每个操作在单个事务内完成，编号、批次、库存要么全部落库要么全部回滚
// 红线: 拆分/合并同步迁移批次下的库存，物料不得在新旧库存中重复计数
// 红线: 批次下存在非 AVAILABLE 或被保留锁的库存时拒绝拆分/合并
// 红线: 配置读取在事务之前完成（连接互斥锁不可重入）
// 红线: 处于保留锁下的工序/批次不得产出、拆分、合并
// ==========================================

use crate::domain::batch::{Batch, BatchSizeResult};
use crate::domain::inventory::InventoryLot;
use crate::domain::types::{AuditAction, HoldEntityType, InventoryState, OperationStatus};
use crate::engine::batch_number::{today, BatchNumberFormatter, BatchNumberGenerator, NumberingRequest};
use crate::engine::batch_size::BatchSizeService;
use crate::engine::context::ExecutionContext;
use crate::engine::error::{ExecutionError, ExecutionResult};
use crate::engine::inventory_state::InventoryStateMachine;
use crate::repository::batch_repo::BatchRepository;
use crate::repository::error::RepositoryError;
use crate::repository::hold_repo::HoldRepository;
use crate::repository::inventory_repo::InventoryRepository;
use crate::repository::operation_repo::OperationRepository;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

const BATCH_ENTITY: &str = "BATCH";
const INVENTORY_ENTITY: &str = "INVENTORY";

/// 事务内产生的库存变动，提交后写审计
struct LotAudit {
    inventory_id: i64,
    action: AuditAction,
    detail: String,
}

/// 产出请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionOutput {
    pub operation_id: i64,
    pub material_id: String,
    pub total_quantity: Decimal,
    pub unit: String,
    pub product_sku: Option<String>,
    pub equipment_type: Option<String>,
}

/// 产出的一个批次及其库存
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducedBatch {
    pub batch: Batch,
    pub lot: InventoryLot,
}

/// 产出结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionResult {
    pub sizing: BatchSizeResult,
    pub batches: Vec<ProducedBatch>,
}

// ==========================================
// BatchService
// ==========================================
pub struct BatchService {
    ctx: Arc<ExecutionContext>,
    batch_sizes: Arc<BatchSizeService>,
    batch_numbers: Arc<BatchNumberGenerator>,
}

impl BatchService {
    pub fn new(
        ctx: Arc<ExecutionContext>,
        batch_sizes: Arc<BatchSizeService>,
        batch_numbers: Arc<BatchNumberGenerator>,
    ) -> Self {
        Self {
            ctx,
            batch_sizes,
            batch_numbers,
        }
    }

    pub fn get_batch(&self, batch_id: i64) -> ExecutionResult<Batch> {
        self.ctx.read(|conn| load_batch(conn, batch_id))
    }

    /// 工序产出: 拆批 -> 逐批取号 -> 建批次 -> 建 AVAILABLE 库存
    ///
    /// 工序必须处于 IN_PROGRESS 或 CONFIRMED，且无保留锁
    pub fn produce_output(&self, output: &ProductionOutput) -> ExecutionResult<ProductionResult> {
        if output.material_id.trim().is_empty() {
            return Err(ExecutionError::Validation(format!(
                "Operation {}: material id must not be empty",
                output.operation_id
            )));
        }

        let operation = self.ctx.read(|conn| {
            OperationRepository::find_by_id_tx(conn, output.operation_id)?
                .ok_or_else(|| ExecutionError::not_found("Operation", output.operation_id))
        })?;

        let sizing = self.batch_sizes.calculate_batch_sizes(
            output.total_quantity,
            &operation.operation_type,
            output.product_sku.as_deref(),
            output.equipment_type.as_deref(),
        )?;
        let request = NumberingRequest {
            operation_type: Some(operation.operation_type.as_str()),
            operation_code: Some(operation.operation_code.as_str()),
            product_sku: output.product_sku.as_deref(),
        };
        let plan = self.batch_numbers.resolve_plan(&request)?;
        let date = today();

        let actor = self.ctx.actor();
        let batches = self.ctx.run_in_transaction(|tx| {
            let op = OperationRepository::find_by_id_tx(tx, output.operation_id)?
                .ok_or_else(|| ExecutionError::not_found("Operation", output.operation_id))?;
            if !matches!(op.status, OperationStatus::InProgress | OperationStatus::Confirmed) {
                return Err(ExecutionError::InvalidState(format!(
                    "Operation {}: cannot produce output in status {}; must be IN_PROGRESS or CONFIRMED",
                    op.operation_id, op.status
                )));
            }
            if HoldRepository::exists_active_tx(tx, HoldEntityType::Operation, op.operation_id)? {
                return Err(ExecutionError::InvalidState(format!(
                    "Operation {}: cannot produce output while on hold",
                    op.operation_id
                )));
            }

            let now = chrono::Local::now().naive_local();
            let mut produced = Vec::with_capacity(sizing.batch_sizes.len());
            for size in &sizing.batch_sizes {
                let number = BatchNumberGenerator::next_number_tx(tx, &plan, &request, date)?;
                let batch = Batch {
                    batch_id: 0,
                    batch_number: number,
                    material_id: output.material_id.clone(),
                    quantity: *size,
                    unit: output.unit.clone(),
                    parent_batch_id: None,
                    source_operation_id: Some(op.operation_id),
                    created_at: now,
                };
                let batch_id = insert_batch(tx, &batch)?;

                let lot = InventoryLot::new_available(
                    output.material_id.clone(),
                    *size,
                    output.unit.clone(),
                    Some(batch_id),
                );
                let inventory_id = InventoryRepository::insert_tx(tx, &lot)?;

                produced.push(ProducedBatch {
                    batch: load_batch(tx, batch_id)?,
                    lot: InventoryRepository::find_by_id_tx(tx, inventory_id)?
                        .ok_or_else(|| ExecutionError::not_found("Inventory", inventory_id))?,
                });
            }
            Ok(produced)
        })?;

        info!(
            operation_id = output.operation_id,
            total = %output.total_quantity,
            batches = batches.len(),
            partial = sizing.has_partial_batch,
            "工序产出"
        );
        for produced in &batches {
            self.ctx.audit(
                BATCH_ENTITY,
                produced.batch.batch_id,
                AuditAction::Produce,
                &actor,
                &format!(
                    "{} produced {} {} by operation {}",
                    produced.batch.batch_number,
                    produced.batch.quantity,
                    produced.batch.unit,
                    output.operation_id
                ),
            );
        }

        Ok(ProductionResult { sizing, batches })
    }

    /// 拆分批次: 子批次编号 <父>-S01, -S02 ...，父批次数量相应减少
    ///
    /// 父批次有库存时，按 inventory_id 顺序从父库存扣减，并为每个子批次建 AVAILABLE 库存；
    /// 无库存的批次只拆分批次记录
    pub fn split_batch(&self, batch_id: i64, quantities: &[Decimal]) -> ExecutionResult<Vec<Batch>> {
        if quantities.is_empty() {
            return Err(ExecutionError::Validation(format!(
                "Batch {}: split requires at least one quantity",
                batch_id
            )));
        }
        if let Some(bad) = quantities.iter().find(|q| **q <= Decimal::ZERO) {
            return Err(ExecutionError::Validation(format!(
                "Batch {}: split quantity {} must be positive",
                batch_id, bad
            )));
        }

        let width = self.batch_numbers.split_suffix_length()?;
        let actor = self.ctx.actor();
        let (parent, children, lot_audits) = self.ctx.run_in_transaction(|tx| {
            let parent = load_batch(tx, batch_id)?;
            ensure_batch_not_held(tx, batch_id, "split")?;
            let lots = movable_lots(tx, batch_id, "split")?;

            let requested: Decimal = quantities.iter().copied().sum();
            if requested > parent.quantity {
                return Err(ExecutionError::Validation(format!(
                    "Batch {}: split total {} exceeds batch quantity {}",
                    batch_id, requested, parent.quantity
                )));
            }
            let stocked = !lots.is_empty();
            let on_hand: Decimal = lots.iter().map(|l| l.quantity).sum();
            if stocked && requested > on_hand {
                return Err(ExecutionError::Validation(format!(
                    "Batch {}: split total {} exceeds stocked quantity {}",
                    batch_id, requested, on_hand
                )));
            }

            let now = chrono::Local::now().naive_local();
            let location = lots.first().and_then(|l| l.location.clone());
            let reason = format!("split of {}", parent.batch_number);
            let mut lot_audits = drain_lots(tx, lots, requested, &reason, now)?;

            let existing = BatchRepository::count_children_tx(tx, batch_id)?;
            let mut children = Vec::with_capacity(quantities.len());
            for (i, qty) in quantities.iter().enumerate() {
                let child = Batch {
                    batch_id: 0,
                    batch_number: BatchNumberFormatter::split_number(
                        &parent.batch_number,
                        existing + i as i64 + 1,
                        width,
                    ),
                    material_id: parent.material_id.clone(),
                    quantity: *qty,
                    unit: parent.unit.clone(),
                    parent_batch_id: Some(batch_id),
                    source_operation_id: parent.source_operation_id,
                    created_at: now,
                };
                let child_id = insert_batch(tx, &child)?;
                if stocked {
                    let mut lot = InventoryLot::new_available(
                        parent.material_id.clone(),
                        *qty,
                        parent.unit.clone(),
                        Some(child_id),
                    );
                    lot.location = location.clone();
                    let inventory_id = InventoryRepository::insert_tx(tx, &lot)?;
                    lot_audits.push(LotAudit {
                        inventory_id,
                        action: AuditAction::Create,
                        detail: format!("{} {} split from {}", qty, parent.unit, parent.batch_number),
                    });
                }
                children.push(load_batch(tx, child_id)?);
            }

            BatchRepository::update_quantity_tx(tx, batch_id, parent.quantity - requested)?;
            Ok((load_batch(tx, batch_id)?, children, lot_audits))
        })?;

        info!(batch_id, children = children.len(), remaining = %parent.quantity, "批次拆分");
        for child in &children {
            self.ctx.audit(
                BATCH_ENTITY,
                child.batch_id,
                AuditAction::Create,
                &actor,
                &format!("split from {} ({} {})", parent.batch_number, child.quantity, child.unit),
            );
        }
        self.ctx.audit(
            BATCH_ENTITY,
            batch_id,
            AuditAction::Update,
            &actor,
            &format!("split into {} batches, remaining {}", children.len(), parent.quantity),
        );
        self.audit_lots(&lot_audits, &actor);
        Ok(children)
    }

    /// 合并批次: 至少两个同物料同单位批次，源批次数量清零
    ///
    /// 源批次的库存全部转为 CONSUMED（数量清零），合并批次获得一条等量的 AVAILABLE 库存
    pub fn merge_batches(&self, batch_ids: &[i64]) -> ExecutionResult<Batch> {
        if batch_ids.len() < 2 {
            return Err(ExecutionError::Validation(format!(
                "Merge requires at least 2 batches, got {}",
                batch_ids.len()
            )));
        }
        let unique: HashSet<i64> = batch_ids.iter().copied().collect();
        if unique.len() != batch_ids.len() {
            return Err(ExecutionError::Validation(format!(
                "Merge batch list {:?} contains duplicates",
                batch_ids
            )));
        }

        let prefix = self.batch_numbers.merge_prefix()?;
        let date = today();
        let actor = self.ctx.actor();
        let (merged, lot_audits) = self.ctx.run_in_transaction(|tx| {
            let mut sources = Vec::with_capacity(batch_ids.len());
            let mut source_lots = Vec::new();
            for id in batch_ids {
                let batch = load_batch(tx, *id)?;
                ensure_batch_not_held(tx, *id, "merged")?;
                source_lots.extend(movable_lots(tx, *id, "merged")?);
                sources.push(batch);
            }

            let first = &sources[0];
            if let Some(other) = sources
                .iter()
                .find(|b| b.material_id != first.material_id || b.unit != first.unit)
            {
                return Err(ExecutionError::Validation(format!(
                    "Batch {}: material {} ({}) differs from batch {} material {} ({})",
                    other.batch_id, other.material_id, other.unit, first.batch_id, first.material_id, first.unit
                )));
            }

            let total: Decimal = sources.iter().map(|b| b.quantity).sum();
            let merged = Batch {
                batch_id: 0,
                batch_number: BatchNumberGenerator::merge_number_tx(tx, &prefix, date)?,
                material_id: first.material_id.clone(),
                quantity: total,
                unit: first.unit.clone(),
                parent_batch_id: None,
                source_operation_id: None,
                created_at: chrono::Local::now().naive_local(),
            };
            let merged_id = insert_batch(tx, &merged)?;
            for source in &sources {
                BatchRepository::update_quantity_tx(tx, source.batch_id, Decimal::ZERO)?;
            }

            let mut lot_audits = Vec::new();
            if !source_lots.is_empty() {
                let now = chrono::Local::now().naive_local();
                let on_hand: Decimal = source_lots.iter().map(|l| l.quantity).sum();
                let location = source_lots.first().and_then(|l| l.location.clone());
                let reason = format!("merge into {}", merged.batch_number);
                lot_audits = retire_lots(tx, source_lots, &reason, now)?;

                let mut lot = InventoryLot::new_available(
                    merged.material_id.clone(),
                    on_hand,
                    merged.unit.clone(),
                    Some(merged_id),
                );
                lot.location = location;
                let inventory_id = InventoryRepository::insert_tx(tx, &lot)?;
                lot_audits.push(LotAudit {
                    inventory_id,
                    action: AuditAction::Create,
                    detail: format!("{} {} merged into {}", on_hand, merged.unit, merged.batch_number),
                });
            }
            Ok((load_batch(tx, merged_id)?, lot_audits))
        })?;

        info!(batch_id = merged.batch_id, sources = ?batch_ids, qty = %merged.quantity, "批次合并");
        self.ctx.audit(
            BATCH_ENTITY,
            merged.batch_id,
            AuditAction::Create,
            &actor,
            &format!("{} merged from batches {:?}", merged.batch_number, batch_ids),
        );
        for id in batch_ids {
            self.ctx.audit(
                BATCH_ENTITY,
                *id,
                AuditAction::Update,
                &actor,
                &format!("merged into {}", merged.batch_number),
            );
        }
        self.audit_lots(&lot_audits, &actor);
        Ok(merged)
    }

    fn audit_lots(&self, audits: &[LotAudit], actor: &str) {
        for entry in audits {
            self.ctx
                .audit(INVENTORY_ENTITY, entry.inventory_id, entry.action, actor, &entry.detail);
        }
    }
}

fn load_batch(conn: &Connection, batch_id: i64) -> ExecutionResult<Batch> {
    BatchRepository::find_by_id_tx(conn, batch_id)?
        .ok_or_else(|| ExecutionError::not_found("Batch", batch_id))
}

fn insert_batch(conn: &Connection, batch: &Batch) -> ExecutionResult<i64> {
    BatchRepository::insert_tx(conn, batch).map_err(|e| match e {
        RepositoryError::UniqueConstraintViolation(_) => {
            ExecutionError::Conflict(format!("Batch number {} already exists", batch.batch_number))
        }
        other => other.into(),
    })
}

/// 批次下的库存必须全部 AVAILABLE 且没有库存级保留锁
fn movable_lots(conn: &Connection, batch_id: i64, verb: &str) -> ExecutionResult<Vec<InventoryLot>> {
    let lots = InventoryRepository::find_by_batch_tx(conn, batch_id)?;
    for lot in &lots {
        if lot.state != InventoryState::Available {
            return Err(ExecutionError::InvalidState(format!(
                "Batch {}: cannot be {} while inventory {} is {}",
                batch_id, verb, lot.inventory_id, lot.state
            )));
        }
        if HoldRepository::exists_active_tx(conn, HoldEntityType::Inventory, lot.inventory_id)? {
            return Err(ExecutionError::InvalidState(format!(
                "Batch {}: cannot be {} while inventory {} is on hold",
                batch_id, verb, lot.inventory_id
            )));
        }
    }
    Ok(lots)
}

/// 按 inventory_id 顺序扣减 amount，扣空的库存转为 CONSUMED
fn drain_lots(
    conn: &Connection,
    lots: Vec<InventoryLot>,
    amount: Decimal,
    reason: &str,
    now: chrono::NaiveDateTime,
) -> ExecutionResult<Vec<LotAudit>> {
    let mut remaining = amount;
    let mut audits = Vec::new();
    for mut lot in lots {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = lot.quantity.min(remaining);
        if take.is_zero() {
            continue;
        }
        remaining -= take;
        lot.quantity -= take;
        if lot.quantity.is_zero() {
            InventoryStateMachine::validate_transition(
                lot.inventory_id,
                lot.state,
                InventoryState::Consumed,
            )?;
            lot.state = InventoryState::Consumed;
        }
        lot.updated_at = now;
        InventoryRepository::update_tx(conn, &lot, InventoryState::Available)?;
        audits.push(LotAudit {
            inventory_id: lot.inventory_id,
            action: AuditAction::Consume,
            detail: format!("{} {} moved out by {}, {} left", take, lot.unit, reason, lot.quantity),
        });
    }
    Ok(audits)
}

/// 库存整体转出: 数量清零并转为 CONSUMED
fn retire_lots(
    conn: &Connection,
    lots: Vec<InventoryLot>,
    reason: &str,
    now: chrono::NaiveDateTime,
) -> ExecutionResult<Vec<LotAudit>> {
    let mut audits = Vec::with_capacity(lots.len());
    for mut lot in lots {
        InventoryStateMachine::validate_transition(
            lot.inventory_id,
            lot.state,
            InventoryState::Consumed,
        )?;
        let moved = lot.quantity;
        lot.quantity = Decimal::ZERO;
        lot.state = InventoryState::Consumed;
        lot.updated_at = now;
        InventoryRepository::update_tx(conn, &lot, InventoryState::Available)?;
        audits.push(LotAudit {
            inventory_id: lot.inventory_id,
            action: AuditAction::Consume,
            detail: format!("{} {} moved out by {}", moved, lot.unit, reason),
        });
    }
    Ok(audits)
}

fn ensure_batch_not_held(conn: &Connection, batch_id: i64, verb: &str) -> ExecutionResult<()> {
    if HoldRepository::exists_active_tx(conn, HoldEntityType::Batch, batch_id)? {
        return Err(ExecutionError::InvalidState(format!(
            "Batch {}: cannot be {} while on hold",
            batch_id, verb
        )));
    }
    Ok(())
}
