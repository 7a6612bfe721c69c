// ==========================================
// 生产执行控制引擎 - 主入口
// ==========================================
// 职责: 初始化日志与数据库，输出 schema 版本
// ==========================================

use mes_execution::app::{get_default_db_path, AppState};
use mes_execution::logging;

fn main() {
    // 初始化日志系统
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", mes_execution::APP_NAME);
    tracing::info!("系统版本: {}", mes_execution::VERSION);
    tracing::info!("==================================================");

    // 获取数据库路径
    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let app_state = match AppState::new(db_path) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("无法初始化AppState: {}", e);
            std::process::exit(1);
        }
    };

    match app_state.schema_version {
        Some(version) => tracing::info!("schema_version = {}", version),
        None => tracing::warn!("数据库未记录 schema_version"),
    }

    match app_state.config_manager.get_config_snapshot() {
        Ok(snapshot) => tracing::debug!("全局配置: {}", snapshot),
        Err(e) => tracing::warn!("读取全局配置失败: {}", e),
    }

    tracing::info!("引擎就绪: {}", app_state.db_path);
}
