// ==========================================
// 生产执行控制引擎 - 应用层
// ==========================================
// 职责: 组合根，供宿主服务进程内调用
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
