// ==========================================
// 生产执行控制引擎 - 配置管理器
// ==========================================
// 职责: 全局配置加载、查询、覆写
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// 全局作用域ID
pub const GLOBAL_SCOPE: &str = "global";

// ==========================================
// 配置键
// ==========================================
pub mod config_keys {
    /// 无编号模板时的默认前缀
    pub const DEFAULT_BATCH_PREFIX: &str = "batch_number.default_prefix";
    /// 无编号模板时的默认序号宽度
    pub const DEFAULT_SEQUENCE_LENGTH: &str = "batch_number.default_sequence_length";
    /// 原料批次前缀
    pub const RM_PREFIX: &str = "batch_number.rm_prefix";
    /// 拆分后缀序号宽度
    pub const SPLIT_SUFFIX_LENGTH: &str = "batch_number.split_suffix_length";
    /// 合并批次前缀
    pub const MERGE_PREFIX: &str = "batch_number.merge_prefix";
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
                params![GLOBAL_SCOPE, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（存在则覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![GLOBAL_SCOPE, key, value],
        )?;
        Ok(())
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> RepositoryResult<String> {
        Ok(self
            .get_global_config_value(key)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string()))
    }

    fn get_usize_or_default(&self, key: &str, default: usize) -> RepositoryResult<usize> {
        match self.get_global_config_value(key)? {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| RepositoryError::FieldValueError {
                field: key.to_string(),
                message: format!("'{}' is not a non-negative integer", raw),
            }),
            None => Ok(default),
        }
    }

    // ==========================================
    // 批次编号相关配置
    // ==========================================

    pub fn get_default_batch_prefix(&self) -> RepositoryResult<String> {
        self.get_config_or_default(config_keys::DEFAULT_BATCH_PREFIX, "BATCH")
    }

    pub fn get_default_sequence_length(&self) -> RepositoryResult<usize> {
        self.get_usize_or_default(config_keys::DEFAULT_SEQUENCE_LENGTH, 3)
    }

    pub fn get_rm_prefix(&self) -> RepositoryResult<String> {
        self.get_config_or_default(config_keys::RM_PREFIX, "RM")
    }

    pub fn get_split_suffix_length(&self) -> RepositoryResult<usize> {
        self.get_usize_or_default(config_keys::SPLIT_SUFFIX_LENGTH, 2)
    }

    pub fn get_merge_prefix(&self) -> RepositoryResult<String> {
        self.get_config_or_default(config_keys::MERGE_PREFIX, "MRG")
    }

    /// 获取所有 global 配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        let rows = stmt.query_map(params![GLOBAL_SCOPE], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        serde_json::to_string(&json!(config_map))
            .map_err(|e| RepositoryError::InternalError(e.to_string()))
    }
}
