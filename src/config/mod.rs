// ==========================================
// 食品生产批次追溯系统 - 配置层
// ==========================================

pub mod config_manager;

pub use config_manager::ConfigManager;
