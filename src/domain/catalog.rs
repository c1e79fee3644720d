// ==========================================
// 食品生产批次追溯系统 - 外部目录读模型
// ==========================================
// 红线: 目录主数据归外部协作方维护，本引擎只读引用、不拥有
// 例外: curing_batch.quantity_available 由消耗台账在事务内增减（数量簿记）
// ==========================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// ProductMaster - 产品主数据
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMaster {
    pub product_id: String,
    pub product_name: String,
    pub critical_temperature_c: Option<f64>, // 关键温度（缺省时引擎回退 72.0）
    pub shelf_life_days: Option<i32>,        // 保质期天数
}

// ==========================================
// ReceptionRecord - 原料收货记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceptionRecord {
    pub reception_id: String,
    pub supplier_id: String,
    pub supplier_name: String,
    pub batch_number: String, // 供方批号/交付批号
    pub quantity_received: f64,
    pub unit: String,
    pub compliant: bool, // 收货合规标记
    pub received_at: DateTime<Utc>,
}

// ==========================================
// CuringBatch - 中间腌制批次
// ==========================================
// 多跳溯源的唯一中转节点: 生产批次 → 腌制批次 → 原始收货
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuringBatch {
    pub curing_batch_id: String,
    pub batch_number: String,
    pub started_on: NaiveDate,
    pub ended_on: Option<NaiveDate>,
    pub quantity_available: f64,      // 剩余可用数量（台账维护）
    pub reception_id: Option<String>, // 原始收货（可空: 历史数据缺链）
    pub completed: bool,              // 腌制完成、可供消耗
}

// ==========================================
// AuxiliaryReceipt - 辅料入库记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxiliaryReceipt {
    pub receipt_id: String,
    pub supplier_id: String,
    pub supplier_name: String,
    pub batch_number: String,
    pub quantity: f64,
    pub unit: String,
    pub received_at: DateTime<Utc>,
}
