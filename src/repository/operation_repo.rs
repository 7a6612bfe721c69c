// ==========================================
// 生产执行控制引擎 - 工艺模板 / 工序 / 设备状态数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑 (状态转换合法性由引擎判定)
// ==========================================

use crate::domain::operation::{EquipmentState, Operation, ProcessTemplate};
use crate::domain::types::{EquipmentStatus, OperationStatus, ProcessStatus};
use crate::repository::db_utils::{decimal_to_db, get_decimal};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

const OPERATION_COLUMNS: &str = r#"
    SELECT operation_id, process_id, order_line_id, routing_step_id, operation_code,
           operation_type, sequence_number, status, target_qty, confirmed_qty,
           created_at, updated_at
    FROM operation
"#;

fn now() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}

// ==========================================
// ProcessTemplateRepository - 工艺模板仓储
// ==========================================
pub struct ProcessTemplateRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProcessTemplateRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新建工艺模板（DRAFT）
    pub fn create(&self, process_name: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let ts = now();
        conn.execute(
            r#"
            INSERT INTO process_template (process_name, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![process_name, ProcessStatus::Draft, ts, ts],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn find_by_id(&self, process_id: i64) -> RepositoryResult<Option<ProcessTemplate>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, process_id)
    }

    pub fn find_by_id_tx(conn: &Connection, process_id: i64) -> RepositoryResult<Option<ProcessTemplate>> {
        let process = conn
            .query_row(
                r#"
                SELECT process_id, process_name, status, created_at, updated_at
                FROM process_template WHERE process_id = ?1
                "#,
                params![process_id],
                |row| {
                    Ok(ProcessTemplate {
                        process_id: row.get(0)?,
                        process_name: row.get(1)?,
                        status: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(process)
    }

    pub fn update_status_tx(
        conn: &Connection,
        process_id: i64,
        status: ProcessStatus,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE process_template SET status = ?1, updated_at = ?2 WHERE process_id = ?3",
            params![status, now(), process_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Process".to_string(),
                id: process_id.to_string(),
            });
        }
        Ok(())
    }
}

// ==========================================
// OperationRepository - 工序仓储
// ==========================================
pub struct OperationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl OperationRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_by_id(&self, operation_id: i64) -> RepositoryResult<Option<Operation>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, operation_id)
    }

    /// 插入工序（锁内），返回新ID
    pub fn insert(&self, operation: &Operation) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, operation)
    }

    /// 某工艺模板 (+订单行) 下的全部工序，按序号升序
    pub fn find_by_process(
        &self,
        process_id: i64,
        order_line_id: Option<i64>,
    ) -> RepositoryResult<Vec<Operation>> {
        let conn = self.get_conn()?;
        Self::find_by_process_tx(&conn, process_id, order_line_id)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn find_by_id_tx(conn: &Connection, operation_id: i64) -> RepositoryResult<Option<Operation>> {
        let sql = format!("{} WHERE operation_id = ?1", OPERATION_COLUMNS);
        let op = conn
            .query_row(&sql, params![operation_id], Self::map_row)
            .optional()?;
        Ok(op)
    }

    pub fn find_by_process_tx(
        conn: &Connection,
        process_id: i64,
        order_line_id: Option<i64>,
    ) -> RepositoryResult<Vec<Operation>> {
        let sql = format!(
            "{} WHERE process_id = ?1 AND (?2 IS NULL OR order_line_id = ?2) ORDER BY sequence_number, operation_id",
            OPERATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let ops = stmt
            .query_map(params![process_id, order_line_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(ops)
    }

    pub fn insert_tx(conn: &Connection, operation: &Operation) -> RepositoryResult<i64> {
        conn.execute(
            r#"
            INSERT INTO operation (
                process_id, order_line_id, routing_step_id, operation_code, operation_type,
                sequence_number, status, target_qty, confirmed_qty, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                operation.process_id,
                operation.order_line_id,
                operation.routing_step_id,
                operation.operation_code,
                operation.operation_type,
                operation.sequence_number,
                operation.status,
                decimal_to_db(&operation.target_qty),
                decimal_to_db(&operation.confirmed_qty),
                operation.created_at,
                operation.updated_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 更新工序状态（仅当当前状态仍为 expected 时生效）
    pub fn update_status_tx(
        conn: &Connection,
        operation_id: i64,
        expected: OperationStatus,
        status: OperationStatus,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE operation SET status = ?1, updated_at = ?2 WHERE operation_id = ?3 AND status = ?4",
            params![status, now(), operation_id, expected],
        )?;
        if rows == 0 {
            return Err(RepositoryError::stale("Operation", operation_id, expected));
        }
        Ok(())
    }

    pub fn update_confirmed_qty_tx(
        conn: &Connection,
        operation_id: i64,
        confirmed_qty: Decimal,
    ) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE operation SET confirmed_qty = ?1, updated_at = ?2 WHERE operation_id = ?3",
            params![decimal_to_db(&confirmed_qty), now(), operation_id],
        )?;
        Ok(())
    }

    pub fn bind_routing_step_tx(
        conn: &Connection,
        operation_id: i64,
        routing_step_id: i64,
    ) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE operation SET routing_step_id = ?1 WHERE operation_id = ?2",
            params![routing_step_id, operation_id],
        )?;
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<Operation> {
        Ok(Operation {
            operation_id: row.get(0)?,
            process_id: row.get(1)?,
            order_line_id: row.get(2)?,
            routing_step_id: row.get(3)?,
            operation_code: row.get(4)?,
            operation_type: row.get(5)?,
            sequence_number: row.get(6)?,
            status: row.get(7)?,
            target_qty: get_decimal(row, 8)?,
            confirmed_qty: get_decimal(row, 9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

// ==========================================
// EquipmentStatusRepository - 设备状态仓储
// ==========================================
// 说明: 设备主数据在外部系统，这里只维护状态列
pub struct EquipmentStatusRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EquipmentStatusRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 登记或覆盖设备状态
    pub fn upsert(&self, equipment: &EquipmentState) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO equipment_status (equipment_id, equipment_code, status)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(equipment_id) DO UPDATE SET
                equipment_code = excluded.equipment_code,
                status = excluded.status
            "#,
            params![equipment.equipment_id, equipment.equipment_code, equipment.status],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, equipment_id: i64) -> RepositoryResult<Option<EquipmentState>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, equipment_id)
    }

    pub fn find_by_id_tx(conn: &Connection, equipment_id: i64) -> RepositoryResult<Option<EquipmentState>> {
        let eq = conn
            .query_row(
                "SELECT equipment_id, equipment_code, status FROM equipment_status WHERE equipment_id = ?1",
                params![equipment_id],
                |row| {
                    Ok(EquipmentState {
                        equipment_id: row.get(0)?,
                        equipment_code: row.get(1)?,
                        status: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(eq)
    }

    pub fn update_status_tx(
        conn: &Connection,
        equipment_id: i64,
        status: EquipmentStatus,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE equipment_status SET status = ?1 WHERE equipment_id = ?2",
            params![status, equipment_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Equipment".to_string(),
                id: equipment_id.to_string(),
            });
        }
        Ok(())
    }
}
