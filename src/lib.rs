// ==========================================
// 食品生产批次追溯系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 批次生命周期与溯源引擎 (召回/监管审计支撑)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{BatchStatus, DispatchState, TraceEventKind};

// 领域实体
pub use domain::{
    AuxiliaryReceipt, ConsumptionSource, CorrectiveActionRequest, CuringBatch,
    MaterialConsumptionEntry, OriginMaterial, ProductMaster, ProductionBatch, ProvenanceReport,
    ReceptionRecord, TraceEvent,
};

// 引擎
pub use engine::{
    ComplianceEngine, ConsumptionLedger, CorrectiveActionDispatcher, ProvenanceReconstructor,
};

// API
pub use api::BatchApi;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "食品生产批次追溯系统";

// 数据库版本
pub const DB_VERSION: &str = "v0.1";

// 产品未配置关键温度时的兜底值（摄氏度）
pub const DEFAULT_CRITICAL_TEMPERATURE_C: f64 = 72.0;

// 纠偏任务固定原因码（热加工温度不达标）
pub const REASON_THERMAL_NON_COMPLIANCE: &str = "THERMAL_PROCESS_NON_COMPLIANCE";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_critical_temperature() {
        assert_eq!(DEFAULT_CRITICAL_TEMPERATURE_C, 72.0);
    }
}
