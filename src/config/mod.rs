// ==========================================
// 生产执行控制引擎 - 配置层
// ==========================================
// 职责: 系统全局配置管理
// 存储: config_kv 表
// 说明: 批量拆分 / 编号模板等结构化配置见 repository::batch_config_repo
// ==========================================

pub mod config_manager;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager, GLOBAL_SCOPE};
