// ==========================================
// 生产执行控制引擎 - 库存批次数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑 (状态合法性由 InventoryStateMachine 判定)
// 红线: 不提供物理删除
// ==========================================

use crate::domain::inventory::InventoryLot;
use crate::domain::types::InventoryState;
use crate::repository::db_utils::{decimal_to_db, get_decimal};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT inventory_id, material_id, quantity, unit, state, batch_id,
           reserved_for_order_id, location, created_at, updated_at
    FROM inventory_lot
"#;

// ==========================================
// InventoryRepository - 库存仓储
// ==========================================
pub struct InventoryRepository {
    conn: Arc<Mutex<Connection>>,
}

impl InventoryRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按ID查询
    pub fn find_by_id(&self, inventory_id: i64) -> RepositoryResult<Option<InventoryLot>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, inventory_id)
    }

    /// 查询某生产批次下的全部库存
    pub fn find_by_batch(&self, batch_id: i64) -> RepositoryResult<Vec<InventoryLot>> {
        let conn = self.get_conn()?;
        Self::find_by_batch_tx(&conn, batch_id)
    }

    /// 按物料与状态查询
    pub fn find_by_material_and_state(
        &self,
        material_id: &str,
        state: InventoryState,
    ) -> RepositoryResult<Vec<InventoryLot>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE material_id = ?1 AND state = ?2 ORDER BY inventory_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let lots = stmt
            .query_map(params![material_id, state], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(lots)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn find_by_id_tx(conn: &Connection, inventory_id: i64) -> RepositoryResult<Option<InventoryLot>> {
        let sql = format!("{} WHERE inventory_id = ?1", SELECT_COLUMNS);
        let lot = conn
            .query_row(&sql, params![inventory_id], Self::map_row)
            .optional()?;
        Ok(lot)
    }

    pub fn find_by_batch_tx(conn: &Connection, batch_id: i64) -> RepositoryResult<Vec<InventoryLot>> {
        let sql = format!("{} WHERE batch_id = ?1 ORDER BY inventory_id", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let lots = stmt
            .query_map(params![batch_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(lots)
    }

    /// 插入库存，返回新ID
    pub fn insert_tx(conn: &Connection, lot: &InventoryLot) -> RepositoryResult<i64> {
        conn.execute(
            r#"
            INSERT INTO inventory_lot (
                material_id, quantity, unit, state, batch_id,
                reserved_for_order_id, location, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                lot.material_id,
                decimal_to_db(&lot.quantity),
                lot.unit,
                lot.state,
                lot.batch_id,
                lot.reserved_for_order_id,
                lot.location,
                lot.created_at,
                lot.updated_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 更新状态/数量/预留 (乐观检查: 旧状态必须未被并发修改)
    pub fn update_tx(
        conn: &Connection,
        lot: &InventoryLot,
        expected_state: InventoryState,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE inventory_lot
            SET quantity = ?1, state = ?2, reserved_for_order_id = ?3, updated_at = ?4
            WHERE inventory_id = ?5 AND state = ?6
            "#,
            params![
                decimal_to_db(&lot.quantity),
                lot.state,
                lot.reserved_for_order_id,
                lot.updated_at,
                lot.inventory_id,
                expected_state,
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::stale("Inventory", lot.inventory_id, expected_state));
        }
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<InventoryLot> {
        Ok(InventoryLot {
            inventory_id: row.get(0)?,
            material_id: row.get(1)?,
            quantity: get_decimal(row, 2)?,
            unit: row.get(3)?,
            state: row.get(4)?,
            batch_id: row.get(5)?,
            reserved_for_order_id: row.get(6)?,
            location: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}
