// ==========================================
// 生产执行控制引擎 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 核心自有表统一在此建表 (幂等)
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 创建核心自有的全部表（幂等）
///
/// 说明：
/// - 数量字段以 TEXT 存储十进制字符串，避免 REAL 舍入
/// - hold_record 上的部分唯一索引保证同一实体最多一个 ACTIVE 保留锁
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS process_template (
            process_id INTEGER PRIMARY KEY AUTOINCREMENT,
            process_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'DRAFT',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS routing (
            routing_id INTEGER PRIMARY KEY AUTOINCREMENT,
            process_id INTEGER NOT NULL REFERENCES process_template(process_id),
            routing_name TEXT NOT NULL,
            routing_type TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS operation (
            operation_id INTEGER PRIMARY KEY AUTOINCREMENT,
            process_id INTEGER NOT NULL REFERENCES process_template(process_id),
            order_line_id INTEGER,
            routing_step_id INTEGER,
            operation_code TEXT NOT NULL,
            operation_type TEXT NOT NULL,
            sequence_number INTEGER NOT NULL,
            status TEXT NOT NULL,
            target_qty TEXT NOT NULL DEFAULT '0',
            confirmed_qty TEXT NOT NULL DEFAULT '0',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS routing_step (
            routing_step_id INTEGER PRIMARY KEY AUTOINCREMENT,
            routing_id INTEGER NOT NULL REFERENCES routing(routing_id),
            operation_id INTEGER UNIQUE REFERENCES operation(operation_id),
            sequence_number INTEGER NOT NULL,
            operation_name TEXT NOT NULL,
            operation_type TEXT NOT NULL,
            is_parallel INTEGER NOT NULL DEFAULT 0,
            mandatory INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'READY'
        );

        CREATE TABLE IF NOT EXISTS batch (
            batch_id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_number TEXT NOT NULL UNIQUE,
            material_id TEXT NOT NULL,
            quantity TEXT NOT NULL,
            unit TEXT NOT NULL,
            parent_batch_id INTEGER REFERENCES batch(batch_id),
            source_operation_id INTEGER,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS inventory_lot (
            inventory_id INTEGER PRIMARY KEY AUTOINCREMENT,
            material_id TEXT NOT NULL,
            quantity TEXT NOT NULL,
            unit TEXT NOT NULL,
            state TEXT NOT NULL,
            batch_id INTEGER REFERENCES batch(batch_id),
            reserved_for_order_id INTEGER,
            location TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hold_record (
            hold_id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            reason TEXT NOT NULL,
            applied_by TEXT NOT NULL,
            applied_on TEXT NOT NULL,
            status TEXT NOT NULL,
            released_by TEXT,
            released_on TEXT,
            release_comments TEXT,
            previous_status TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_hold_active_entity
            ON hold_record(entity_type, entity_id) WHERE status = 'ACTIVE';

        CREATE TABLE IF NOT EXISTS equipment_status (
            equipment_id INTEGER PRIMARY KEY,
            equipment_code TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS batch_size_config (
            config_id INTEGER PRIMARY KEY AUTOINCREMENT,
            config_name TEXT NOT NULL UNIQUE,
            operation_type TEXT,
            product_sku TEXT,
            equipment_type TEXT,
            min_batch_size TEXT NOT NULL,
            max_batch_size TEXT NOT NULL,
            preferred_batch_size TEXT,
            allow_partial_batch INTEGER NOT NULL DEFAULT 1,
            priority INTEGER NOT NULL DEFAULT 100,
            active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS batch_number_config (
            config_id INTEGER PRIMARY KEY AUTOINCREMENT,
            config_name TEXT NOT NULL UNIQUE,
            operation_type TEXT,
            product_sku TEXT,
            prefix TEXT NOT NULL,
            include_operation_code INTEGER NOT NULL DEFAULT 1,
            operation_code_length INTEGER NOT NULL DEFAULT 2,
            separator TEXT NOT NULL DEFAULT '-',
            date_format TEXT,
            sequence_length INTEGER NOT NULL DEFAULT 3,
            reset_period TEXT NOT NULL DEFAULT 'DAILY',
            priority INTEGER NOT NULL DEFAULT 100,
            active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS sequence_counter (
            scope_key TEXT PRIMARY KEY,
            current_value INTEGER NOT NULL,
            last_reset_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            audit_id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            action TEXT NOT NULL,
            actor TEXT NOT NULL,
            detail TEXT NOT NULL,
            action_ts TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_inventory_batch ON inventory_lot(batch_id);
        CREATE INDEX IF NOT EXISTS idx_operation_process ON operation(process_id, order_line_id);
        CREATE INDEX IF NOT EXISTS idx_routing_step_routing ON routing_step(routing_id, sequence_number);
        CREATE INDEX IF NOT EXISTS idx_audit_entity_ts ON audit_log(entity_type, entity_id, action_ts);
        CREATE INDEX IF NOT EXISTS idx_audit_actor_ts ON audit_log(actor, action_ts);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}
