// ==========================================
// 食品生产批次追溯系统 - 纠偏任务领域模型
// ==========================================
// 用途: 温度不合规完工触发的纠偏请求（事务性发件箱队列行）
// 红线: 批次被标记完工而纠偏请求静默丢失是不可接受的
// ==========================================

use crate::domain::types::DispatchState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// CorrectiveActionRequest - 纠偏任务请求
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectiveActionRequest {
    pub request_id: String, // 请求 ID（UUID）
    pub batch_id: String,   // 触发批次
    pub expected_value: f64, // 要求的关键温度
    pub actual_value: f64,   // 实测温度
    pub reason_code: String, // 固定原因码 THERMAL_PROCESS_NON_COMPLIANCE
    pub dispatch_state: DispatchState, // 派发状态
    pub attempts: i32,       // 已尝试派发次数
    pub last_error: Option<String>, // 最近一次派发失败原因
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}
