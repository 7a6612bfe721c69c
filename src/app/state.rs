// ==========================================
// 生产执行控制引擎 - 应用状态
// ==========================================
// 职责: 组装共享连接、仓储、引擎服务（组合根）
// ==========================================

use std::sync::{Arc, Mutex};

use crate::config::config_manager::ConfigManager;
use crate::db::{ensure_schema, open_sqlite_connection, read_schema_version};
use crate::engine::{
    ActorResolver, AuditLogSink, AuditSink, BatchNumberGenerator, BatchService, BatchSizeService,
    ExecutionContext, HoldService, InventoryService, OperationStatusController, RoutingService,
    SystemActor,
};
use crate::repository::{
    AuditLogRepository, BatchNumberConfigRepository, BatchRepository, BatchSizeConfigRepository,
    EquipmentStatusRepository, HoldRepository, InventoryRepository, OperationRepository,
    ProcessTemplateRepository, RoutingRepository, SequenceCounterRepository,
};

/// 应用状态
///
/// 所有仓储与服务共享同一个 `Arc<Mutex<Connection>>`
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 数据库 schema 版本
    pub schema_version: Option<i64>,

    // ===== 仓储 =====
    pub process_repo: Arc<ProcessTemplateRepository>,
    pub operation_repo: Arc<OperationRepository>,
    pub routing_repo: Arc<RoutingRepository>,
    pub batch_repo: Arc<BatchRepository>,
    pub inventory_repo: Arc<InventoryRepository>,
    pub hold_repo: Arc<HoldRepository>,
    pub equipment_repo: Arc<EquipmentStatusRepository>,
    pub batch_size_config_repo: Arc<BatchSizeConfigRepository>,
    pub batch_number_config_repo: Arc<BatchNumberConfigRepository>,
    pub sequence_counter_repo: Arc<SequenceCounterRepository>,
    pub audit_log_repo: Arc<AuditLogRepository>,
    pub config_manager: Arc<ConfigManager>,

    // ===== 引擎服务 =====
    pub context: Arc<ExecutionContext>,
    pub inventory_service: Arc<InventoryService>,
    pub hold_service: Arc<HoldService>,
    pub routing_service: Arc<RoutingService>,
    pub operation_controller: Arc<OperationStatusController>,
    pub batch_size_service: Arc<BatchSizeService>,
    pub batch_number_generator: Arc<BatchNumberGenerator>,
    pub batch_service: Arc<BatchService>,
}

impl AppState {
    /// 创建新的AppState实例（审计落库，操作人为 SYSTEM）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径（":memory:" 为内存库）
    pub fn new(db_path: String) -> Result<Self, String> {
        Self::with_actor(db_path, Arc::new(SystemActor))
    }

    /// 指定操作人解析器
    pub fn with_actor(db_path: String, actor: Arc<dyn ActorResolver>) -> Result<Self, String> {
        let (conn, schema_version) = open_database(&db_path)?;
        let audit_log_repo = Arc::new(AuditLogRepository::new(conn.clone()));
        let sink: Arc<dyn AuditSink> = Arc::new(AuditLogSink::new(audit_log_repo.clone()));

        Ok(Self::assemble(db_path, schema_version, conn, audit_log_repo, sink, actor))
    }

    /// 使用外部审计出口（如 NoOpAuditSink 或宿主系统的审计服务）
    pub fn with_sinks(
        db_path: String,
        sink: Arc<dyn AuditSink>,
        actor: Arc<dyn ActorResolver>,
    ) -> Result<Self, String> {
        let (conn, schema_version) = open_database(&db_path)?;
        let audit_log_repo = Arc::new(AuditLogRepository::new(conn.clone()));

        Ok(Self::assemble(db_path, schema_version, conn, audit_log_repo, sink, actor))
    }

    fn assemble(
        db_path: String,
        schema_version: Option<i64>,
        conn: Arc<Mutex<rusqlite::Connection>>,
        audit_log_repo: Arc<AuditLogRepository>,
        sink: Arc<dyn AuditSink>,
        actor: Arc<dyn ActorResolver>,
    ) -> Self {
        // ==========================================
        // 初始化Repository层
        // ==========================================
        let process_repo = Arc::new(ProcessTemplateRepository::new(conn.clone()));
        let operation_repo = Arc::new(OperationRepository::new(conn.clone()));
        let routing_repo = Arc::new(RoutingRepository::new(conn.clone()));
        let batch_repo = Arc::new(BatchRepository::new(conn.clone()));
        let inventory_repo = Arc::new(InventoryRepository::new(conn.clone()));
        let hold_repo = Arc::new(HoldRepository::new(conn.clone()));
        let equipment_repo = Arc::new(EquipmentStatusRepository::new(conn.clone()));
        let batch_size_config_repo = Arc::new(BatchSizeConfigRepository::new(conn.clone()));
        let batch_number_config_repo = Arc::new(BatchNumberConfigRepository::new(conn.clone()));
        let sequence_counter_repo = Arc::new(SequenceCounterRepository::new(conn.clone()));
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone()));

        // ==========================================
        // 初始化Engine层
        // ==========================================
        let context = Arc::new(ExecutionContext::new(conn, sink, actor));
        let inventory_service = Arc::new(InventoryService::new(context.clone()));
        let hold_service = Arc::new(HoldService::new(context.clone(), hold_repo.clone()));
        let routing_service = Arc::new(RoutingService::new(context.clone(), routing_repo.clone()));
        let operation_controller = Arc::new(OperationStatusController::new(context.clone()));
        let batch_size_service = Arc::new(BatchSizeService::new(context.clone()));
        let batch_number_generator = Arc::new(BatchNumberGenerator::new(
            context.clone(),
            config_manager.clone(),
            batch_number_config_repo.clone(),
        ));
        let batch_service = Arc::new(BatchService::new(
            context.clone(),
            batch_size_service.clone(),
            batch_number_generator.clone(),
        ));

        tracing::info!("AppState初始化完成");

        Self {
            db_path,
            schema_version,
            process_repo,
            operation_repo,
            routing_repo,
            batch_repo,
            inventory_repo,
            hold_repo,
            equipment_repo,
            batch_size_config_repo,
            batch_number_config_repo,
            sequence_counter_repo,
            audit_log_repo,
            config_manager,
            context,
            inventory_service,
            hold_service,
            routing_service,
            operation_controller,
            batch_size_service,
            batch_number_generator,
            batch_service,
        }
    }
}

/// 打开数据库并确保 schema 就绪
fn open_database(db_path: &str) -> Result<(Arc<Mutex<rusqlite::Connection>>, Option<i64>), String> {
    tracing::info!("初始化AppState，数据库路径: {}", db_path);

    let conn = open_sqlite_connection(db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
    ensure_schema(&conn).map_err(|e| format!("数据库建表失败: {}", e))?;
    let schema_version =
        read_schema_version(&conn).map_err(|e| format!("读取 schema 版本失败: {}", e))?;
    Ok((Arc::new(Mutex::new(conn)), schema_version))
}

/// 获取默认数据库路径
///
/// 优先级: 环境变量 MES_EXECUTION_DB_PATH > 用户数据目录 > 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("MES_EXECUTION_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./mes_execution.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("mes-execution");
        // best-effort: 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("mes_execution.db");
        }
    }

    path.to_string_lossy().to_string()
}
