// ==========================================
// 食品生产批次追溯系统 - 批次领域模型
// ==========================================
// 红线: 完工三元组 (completed_at / final_temperature / temperature_compliant)
//       要么全部缺席，要么全部在场，禁止部分写入
// 红线: 消耗条目的来源判别式有且只有一种形态（和类型建模）
// ==========================================

use crate::domain::types::BatchStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// ProductionBatch - 生产批次
// ==========================================
// 批号规则: L + 生产日期(YYYYMMDD) + '-' + 周期内序号(两位)
// 批号一经分配永不变更、永不复用（序列表不随批次删除回退）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionBatch {
    // ===== 主键与标识 =====
    pub batch_id: String,     // 代理主键（UUID）
    pub batch_number: String, // 人读批号（全局唯一）

    // ===== 基础信息 =====
    pub product_id: String, // 关联 product_master（FK）
    pub quantity: f64,      // 产出数量（> 0）
    pub unit: String,       // 计量单位

    // ===== 生命周期 =====
    pub status: BatchStatus,                 // 批次状态
    pub production_date: NaiveDate,          // 生产日期（批号派生依据）
    pub production_start: DateTime<Utc>,     // 生产开始时间
    pub completed_at: Option<DateTime<Utc>>, // 完工时间（完工前为空）
    pub expiry_date: Option<NaiveDate>,      // 到期日

    // ===== 完工测量 =====
    pub final_temperature: Option<f64>,     // 最终工艺温度（完工前为空）
    pub temperature_compliant: Option<bool>, // 温度合规判定（完工前为空）

    // ===== 其他 =====
    pub notes: Option<String>,       // 备注
    pub operator_id: Option<String>, // 责任操作员

    // ===== 并发控制与审计 =====
    pub revision: i32,               // 乐观锁修订号
    pub created_at: DateTime<Utc>,   // 记录创建时间
    pub updated_at: DateTime<Utc>,   // 记录更新时间
}

impl ProductionBatch {
    /// 完工三元组一致性检查
    ///
    /// # 返回
    /// - true: 三个完工字段全部缺席或全部在场
    /// - false: 出现部分写入（数据损坏）
    pub fn completion_is_consistent(&self) -> bool {
        let present = [
            self.completed_at.is_some(),
            self.final_temperature.is_some(),
            self.temperature_compliant.is_some(),
        ];
        present.iter().all(|p| *p) || present.iter().all(|p| !*p)
    }

    /// 是否已写入完工数据
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// 清除完工三元组（状态改回 IN_PRODUCTION 时调用）
    pub fn clear_completion(&mut self) {
        self.completed_at = None;
        self.final_temperature = None;
        self.temperature_compliant = None;
    }
}

// ==========================================
// ConsumptionSource - 消耗来源判别式
// ==========================================
// 四种形态的和类型: 避免四个可空字段的散落判空
// Manual: 上游交付从未录入系统目录时的自由文本兜底（不可再向上追溯）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumptionSource {
    Reception { reception_id: String },
    Curing { curing_batch_id: String },
    Auxiliary { receipt_id: String },
    Manual { material_name: String, lot_number: String },
}

impl ConsumptionSource {
    /// 数据库 source_type 列取值
    pub fn type_code(&self) -> &'static str {
        match self {
            ConsumptionSource::Reception { .. } => "RECEPTION",
            ConsumptionSource::Curing { .. } => "CURING",
            ConsumptionSource::Auxiliary { .. } => "AUXILIARY",
            ConsumptionSource::Manual { .. } => "MANUAL",
        }
    }
}

// ==========================================
// MaterialConsumptionEntry - 物料消耗条目
// ==========================================
// 归属: 专属于一个 ProductionBatch，随批次级联删除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialConsumptionEntry {
    pub entry_id: String, // 条目 ID（UUID）
    pub batch_id: String, // 归属批次（FK）
    pub quantity: f64,    // 消耗数量（> 0）
    pub unit: String,     // 计量单位
    #[serde(flatten)]
    pub source: ConsumptionSource, // 来源判别式
}
