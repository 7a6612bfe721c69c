// ==========================================
// 生产执行控制引擎 - 工艺路线数据仓储
// ==========================================
// 职责: routing / routing_step 的加载与保存
// 说明: 步骤始终按 sequence_number 升序返回
// ==========================================

use crate::domain::routing::{Routing, RoutingPlan, RoutingStep};
use crate::domain::types::{RoutingStepStatus, RoutingType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const STEP_COLUMNS: &str = r#"
    SELECT routing_step_id, routing_id, operation_id, sequence_number, operation_name,
           operation_type, is_parallel, mandatory, status
    FROM routing_step
"#;

/// 新增步骤的输入
#[derive(Debug, Clone)]
pub struct NewRoutingStep {
    pub sequence_number: i32,
    pub operation_name: String,
    pub operation_type: String,
    pub is_parallel: bool,
    pub mandatory: bool,
}

// ==========================================
// RoutingRepository - 工艺路线仓储
// ==========================================
pub struct RoutingRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RoutingRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新建工艺路线
    pub fn create_routing(
        &self,
        process_id: i64,
        routing_name: &str,
        routing_type: RoutingType,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO routing (process_id, routing_name, routing_type) VALUES (?1, ?2, ?3)",
            params![process_id, routing_name, routing_type],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 新增步骤（初始状态 READY）
    pub fn add_step(&self, routing_id: i64, step: &NewRoutingStep) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO routing_step (
                routing_id, sequence_number, operation_name, operation_type,
                is_parallel, mandatory, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                routing_id,
                step.sequence_number,
                step.operation_name,
                step.operation_type,
                step.is_parallel,
                step.mandatory,
                RoutingStepStatus::Ready,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 加载路线及全部步骤
    pub fn load_plan(&self, routing_id: i64) -> RepositoryResult<Option<RoutingPlan>> {
        let conn = self.get_conn()?;
        Self::load_plan_tx(&conn, routing_id)
    }

    /// 按工艺模板加载路线
    pub fn load_plan_by_process(&self, process_id: i64) -> RepositoryResult<Option<RoutingPlan>> {
        let conn = self.get_conn()?;
        Self::load_plan_by_process_tx(&conn, process_id)
    }

    pub fn find_step(&self, routing_step_id: i64) -> RepositoryResult<Option<RoutingStep>> {
        let conn = self.get_conn()?;
        Self::find_step_tx(&conn, routing_step_id)
    }

    /// 按绑定的工序反查步骤
    pub fn find_step_by_operation(&self, operation_id: i64) -> RepositoryResult<Option<RoutingStep>> {
        let conn = self.get_conn()?;
        Self::find_step_by_operation_tx(&conn, operation_id)
    }

    pub fn bind_operation(&self, routing_step_id: i64, operation_id: i64) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::bind_operation_tx(&conn, routing_step_id, operation_id)
    }

    pub fn update_step_status(
        &self,
        routing_step_id: i64,
        status: RoutingStepStatus,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::update_step_status_tx(&conn, routing_step_id, status)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn load_plan_tx(conn: &Connection, routing_id: i64) -> RepositoryResult<Option<RoutingPlan>> {
        let routing = conn
            .query_row(
                "SELECT routing_id, process_id, routing_name, routing_type FROM routing WHERE routing_id = ?1",
                params![routing_id],
                Self::map_routing,
            )
            .optional()?;

        match routing {
            Some(routing) => {
                let steps = Self::find_steps_tx(conn, routing.routing_id)?;
                Ok(Some(RoutingPlan::new(routing, steps)))
            }
            None => Ok(None),
        }
    }

    pub fn load_plan_by_process_tx(
        conn: &Connection,
        process_id: i64,
    ) -> RepositoryResult<Option<RoutingPlan>> {
        let routing_id: Option<i64> = conn
            .query_row(
                "SELECT routing_id FROM routing WHERE process_id = ?1 ORDER BY routing_id LIMIT 1",
                params![process_id],
                |row| row.get(0),
            )
            .optional()?;

        match routing_id {
            Some(id) => Self::load_plan_tx(conn, id),
            None => Ok(None),
        }
    }

    pub fn find_steps_tx(conn: &Connection, routing_id: i64) -> RepositoryResult<Vec<RoutingStep>> {
        let sql = format!(
            "{} WHERE routing_id = ?1 ORDER BY sequence_number, routing_step_id",
            STEP_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let steps = stmt
            .query_map(params![routing_id], Self::map_step)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(steps)
    }

    pub fn find_step_tx(conn: &Connection, routing_step_id: i64) -> RepositoryResult<Option<RoutingStep>> {
        let sql = format!("{} WHERE routing_step_id = ?1", STEP_COLUMNS);
        let step = conn
            .query_row(&sql, params![routing_step_id], Self::map_step)
            .optional()?;
        Ok(step)
    }

    pub fn find_step_by_operation_tx(
        conn: &Connection,
        operation_id: i64,
    ) -> RepositoryResult<Option<RoutingStep>> {
        let sql = format!("{} WHERE operation_id = ?1", STEP_COLUMNS);
        let step = conn
            .query_row(&sql, params![operation_id], Self::map_step)
            .optional()?;
        Ok(step)
    }

    pub fn update_step_status_tx(
        conn: &Connection,
        routing_step_id: i64,
        status: RoutingStepStatus,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE routing_step SET status = ?1 WHERE routing_step_id = ?2",
            params![status, routing_step_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "RoutingStep".to_string(),
                id: routing_step_id.to_string(),
            });
        }
        Ok(())
    }

    /// 绑定步骤与工序 (1:1, 已绑定则违反唯一约束)
    pub fn bind_operation_tx(
        conn: &Connection,
        routing_step_id: i64,
        operation_id: i64,
    ) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE routing_step SET operation_id = ?1 WHERE routing_step_id = ?2",
            params![operation_id, routing_step_id],
        )?;
        Ok(())
    }

    fn map_routing(row: &Row<'_>) -> SqliteResult<Routing> {
        Ok(Routing {
            routing_id: row.get(0)?,
            process_id: row.get(1)?,
            routing_name: row.get(2)?,
            routing_type: row.get(3)?,
        })
    }

    fn map_step(row: &Row<'_>) -> SqliteResult<RoutingStep> {
        Ok(RoutingStep {
            routing_step_id: row.get(0)?,
            routing_id: row.get(1)?,
            operation_id: row.get(2)?,
            sequence_number: row.get(3)?,
            operation_name: row.get(4)?,
            operation_type: row.get(5)?,
            is_parallel: row.get(6)?,
            mandatory: row.get(7)?,
            status: row.get(8)?,
        })
    }
}
