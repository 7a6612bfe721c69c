// ==========================================
// 生产执行控制引擎 - 批量拆分 / 批次编号配置仓储
// ==========================================
// 职责: batch_size_config / batch_number_config 的 CRUD 与匹配查询
// 说明: “最具体优先”的排序在此完成，引擎只消费第一条
//   具体度 = product_sku(4) + operation_type(2) + equipment_type(1)
//   同具体度按 priority 升序 (数值越小越优先)
// ==========================================

use crate::domain::batch::{BatchNumberConfig, BatchSizeConfig};
use crate::repository::db_utils::{decimal_to_db, get_decimal, get_opt_decimal};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// BatchSizeConfigRepository
// ==========================================
pub struct BatchSizeConfigRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BatchSizeConfigRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新建配置（名称唯一），返回新ID
    pub fn insert(&self, config: &BatchSizeConfig) -> RepositoryResult<i64> {
        config.validate().map_err(RepositoryError::ValidationError)?;

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO batch_size_config (
                config_name, operation_type, product_sku, equipment_type,
                min_batch_size, max_batch_size, preferred_batch_size,
                allow_partial_batch, priority, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                config.config_name,
                config.operation_type,
                config.product_sku,
                config.equipment_type,
                decimal_to_db(&config.min_batch_size),
                decimal_to_db(&config.max_batch_size),
                config.preferred_batch_size.as_ref().map(decimal_to_db),
                config.allow_partial_batch,
                config.priority,
                config.active,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 查询匹配的有效配置（最具体优先）
    pub fn find_matching(
        &self,
        operation_type: &str,
        product_sku: Option<&str>,
        equipment_type: Option<&str>,
    ) -> RepositoryResult<Vec<BatchSizeConfig>> {
        let conn = self.get_conn()?;
        Self::find_matching_tx(&conn, operation_type, product_sku, equipment_type)
    }

    pub fn find_matching_tx(
        conn: &Connection,
        operation_type: &str,
        product_sku: Option<&str>,
        equipment_type: Option<&str>,
    ) -> RepositoryResult<Vec<BatchSizeConfig>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT config_id, config_name, operation_type, product_sku, equipment_type,
                   min_batch_size, max_batch_size, preferred_batch_size,
                   allow_partial_batch, priority, active
            FROM batch_size_config
            WHERE active = 1
              AND (operation_type IS NULL OR operation_type = ?1)
              AND (product_sku IS NULL OR product_sku = ?2)
              AND (equipment_type IS NULL OR equipment_type = ?3)
            ORDER BY
              (CASE WHEN product_sku IS NOT NULL THEN 4 ELSE 0 END)
              + (CASE WHEN operation_type IS NOT NULL THEN 2 ELSE 0 END)
              + (CASE WHEN equipment_type IS NOT NULL THEN 1 ELSE 0 END) DESC,
              priority ASC,
              config_id ASC
            "#,
        )?;

        let configs = stmt
            .query_map(params![operation_type, product_sku, equipment_type], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(configs)
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<BatchSizeConfig> {
        Ok(BatchSizeConfig {
            config_id: row.get(0)?,
            config_name: row.get(1)?,
            operation_type: row.get(2)?,
            product_sku: row.get(3)?,
            equipment_type: row.get(4)?,
            min_batch_size: get_decimal(row, 5)?,
            max_batch_size: get_decimal(row, 6)?,
            preferred_batch_size: get_opt_decimal(row, 7)?,
            allow_partial_batch: row.get(8)?,
            priority: row.get(9)?,
            active: row.get(10)?,
        })
    }
}

// ==========================================
// BatchNumberConfigRepository
// ==========================================
pub struct BatchNumberConfigRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BatchNumberConfigRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新建编号模板（名称唯一），返回新ID
    pub fn insert(&self, config: &BatchNumberConfig) -> RepositoryResult<i64> {
        if config.sequence_length == 0 {
            return Err(RepositoryError::FieldValueError {
                field: "sequence_length".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO batch_number_config (
                config_name, operation_type, product_sku, prefix, include_operation_code,
                operation_code_length, separator, date_format, sequence_length,
                reset_period, priority, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                config.config_name,
                config.operation_type,
                config.product_sku,
                config.prefix,
                config.include_operation_code,
                config.operation_code_length as i64,
                config.separator,
                config.date_format,
                config.sequence_length as i64,
                config.reset_period,
                config.priority,
                config.active,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 查询匹配的有效编号模板（最具体优先）
    pub fn find_matching(
        &self,
        operation_type: Option<&str>,
        product_sku: Option<&str>,
    ) -> RepositoryResult<Vec<BatchNumberConfig>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT config_id, config_name, operation_type, product_sku, prefix,
                   include_operation_code, operation_code_length, separator, date_format,
                   sequence_length, reset_period, priority, active
            FROM batch_number_config
            WHERE active = 1
              AND (operation_type IS NULL OR operation_type = ?1)
              AND (product_sku IS NULL OR product_sku = ?2)
            ORDER BY
              (CASE WHEN product_sku IS NOT NULL THEN 4 ELSE 0 END)
              + (CASE WHEN operation_type IS NOT NULL THEN 2 ELSE 0 END) DESC,
              priority ASC,
              config_id ASC
            "#,
        )?;

        let configs = stmt
            .query_map(params![operation_type, product_sku], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(configs)
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<BatchNumberConfig> {
        let code_len: i64 = row.get(6)?;
        let seq_len: i64 = row.get(9)?;
        Ok(BatchNumberConfig {
            config_id: row.get(0)?,
            config_name: row.get(1)?,
            operation_type: row.get(2)?,
            product_sku: row.get(3)?,
            prefix: row.get(4)?,
            include_operation_code: row.get(5)?,
            operation_code_length: code_len.max(0) as usize,
            separator: row.get(7)?,
            date_format: row.get(8)?,
            sequence_length: seq_len.max(1) as usize,
            reset_period: row.get(10)?,
            priority: row.get(11)?,
            active: row.get(12)?,
        })
    }
}
