// ==========================================
// 食品生产批次追溯系统 - 溯源报告领域模型
// ==========================================
// 用途: Provenance Reconstructor 的只读输出
// 红线: 历史追溯记录必须可查看——上游目录行被删后降级为
//       unresolved 标记事件，绝不让整个报告失败
// ==========================================

use crate::domain::batch::ProductionBatch;
use crate::domain::types::TraceEventKind;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 来源未登记/不可解析时的供应商占位标记
pub const UNREGISTERED_SUPPLIER: &str = "UNREGISTERED";

// ==========================================
// TraceEvent - 溯源时间线事件
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub kind: TraceEventKind,          // 事件类型
    pub occurred_at: DateTime<Utc>,    // 事件时间（排序主键）
    pub ended_on: Option<NaiveDate>,   // 腌制事件的结束日期（区间事件）
    pub batch_number: Option<String>,  // 批号/交付批号
    pub supplier_name: Option<String>, // 供应商（可解析时）
    pub quantity: Option<f64>,         // 涉及数量
    pub compliant: Option<bool>,       // 完工生产事件携带的合规结论
    pub description: String,           // 人读描述
    pub unresolved: bool,              // 上游不可解析标记（悬挂引用/手工来源）
}

// ==========================================
// OriginMaterial - 源头物料报表行
// ==========================================
// 用途: 召回通知的扁平清单，一条消耗条目对应一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginMaterial {
    pub material_name: String,  // 物料名称（解析后）
    pub quantity: f64,          // 消耗数量
    pub unit: String,           // 计量单位
    pub lot_number: String,     // 批号/货号
    pub supplier_name: String,  // 供应商（未登记时为 UNREGISTERED）
    pub unresolved: bool,       // 来源不可解析标记
}

// ==========================================
// ProvenanceReport - 溯源报告
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceReport {
    pub batch: ProductionBatch,            // 目标批次
    pub timeline: Vec<TraceEvent>,         // 升序时间线
    pub origin_materials: Vec<OriginMaterial>, // 源头物料清单
}
