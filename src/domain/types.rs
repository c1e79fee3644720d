// ==========================================
// 食品生产批次追溯系统 - 领域类型定义
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 批次状态 (Batch Status)
// ==========================================
// 生命周期: 创建即 IN_PRODUCTION; 完工写入 COMPLETED;
// 管理性编辑可自由改派状态（回到 IN_PRODUCTION 时必须清除完工三元组）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    InProduction, // 生产中
    Completed,    // 已完工
    Released,     // 已放行
    Blocked,      // 已冻结
    Quarantine,   // 隔离中
}

impl BatchStatus {
    /// 从数据库文本解析状态
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PRODUCTION" => Some(BatchStatus::InProduction),
            "COMPLETED" => Some(BatchStatus::Completed),
            "RELEASED" => Some(BatchStatus::Released),
            "BLOCKED" => Some(BatchStatus::Blocked),
            "QUARANTINE" => Some(BatchStatus::Quarantine),
            _ => None,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::InProduction => write!(f, "IN_PRODUCTION"),
            BatchStatus::Completed => write!(f, "COMPLETED"),
            BatchStatus::Released => write!(f, "RELEASED"),
            BatchStatus::Blocked => write!(f, "BLOCKED"),
            BatchStatus::Quarantine => write!(f, "QUARANTINE"),
        }
    }
}

// ==========================================
// 溯源事件类型 (Trace Event Kind)
// ==========================================
// 时间线排序的并列破平顺序: 收货 < 腌制 < 辅料 < 生产
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceEventKind {
    Reception,  // 原料收货
    Curing,     // 中间腌制批次
    Material,   // 辅料入库
    Production, // 生产批次
}

impl TraceEventKind {
    /// 同一时间戳下的固定优先顺序（保证时间线确定性）
    pub fn precedence(&self) -> u8 {
        match self {
            TraceEventKind::Reception => 0,
            TraceEventKind::Curing => 1,
            TraceEventKind::Material => 2,
            TraceEventKind::Production => 3,
        }
    }
}

impl fmt::Display for TraceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEventKind::Reception => write!(f, "RECEPTION"),
            TraceEventKind::Curing => write!(f, "CURING"),
            TraceEventKind::Material => write!(f, "MATERIAL"),
            TraceEventKind::Production => write!(f, "PRODUCTION"),
        }
    }
}

// ==========================================
// 纠偏任务派发状态 (Dispatch State)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    Pending,    // 待派发
    Dispatched, // 已派发
    Failed,     // 超过重试上限
}

impl DispatchState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DispatchState::Pending),
            "DISPATCHED" => Some(DispatchState::Dispatched),
            "FAILED" => Some(DispatchState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchState::Pending => write!(f, "PENDING"),
            DispatchState::Dispatched => write!(f, "DISPATCHED"),
            DispatchState::Failed => write!(f, "FAILED"),
        }
    }
}
