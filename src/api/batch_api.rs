// ==========================================
// 食品生产批次追溯系统 - 批次 API
// ==========================================
// 职责: 批次生命周期操作编排（创建/编辑/完工/删除/查询/溯源）
// 边界: 鉴权与权限策略由外部协作方执行（删除要求提权调用方）
// 红线: 任何持久化之前完成全部输入校验
// ==========================================

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::config::ConfigManager;
use crate::domain::batch::{MaterialConsumptionEntry, ProductionBatch};
use crate::domain::provenance::ProvenanceReport;
use crate::domain::types::BatchStatus;
use crate::engine::compliance::{ComplianceEngine, CompletionOutcome};
use crate::engine::ledger::{ConsumptionEntryInput, ConsumptionLedger};
use crate::engine::provenance::ProvenanceReconstructor;
use crate::repository::batch_repo::{BatchFilter, BatchRepository};
use crate::repository::catalog_repo::CatalogRepository;

// ==========================================
// 边界 DTO
// ==========================================

/// 创建批次输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatchInput {
    pub product_id: String,
    pub quantity: f64,
    pub unit: String,
    pub production_date: NaiveDate,
    pub production_start: DateTime<Utc>,
    pub expiry_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub operator_id: Option<String>,
    pub entries: Vec<ConsumptionEntryInput>,
}

/// 更新批次输入（条目集合整组替换）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBatchInput {
    pub batch_id: String,
    pub revision: i32, // 乐观锁: 调用方读到的修订号
    pub product_id: String,
    pub quantity: f64,
    pub unit: String,
    pub production_start: DateTime<Utc>,
    pub expiry_date: Option<NaiveDate>,
    pub status: Option<BatchStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub final_temperature: Option<f64>,
    pub temperature_compliant: Option<bool>,
    pub notes: Option<String>,
    pub operator_id: Option<String>,
    pub entries: Vec<ConsumptionEntryInput>,
}

/// 完工批次输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteBatchInput {
    pub batch_id: String,
    pub final_temperature: f64,
    pub completed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// 批次列表过滤条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchListFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub status: Option<BatchStatus>,
    pub text: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// 批次详情（批次 + 消耗条目）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDetail {
    pub batch: ProductionBatch,
    pub entries: Vec<MaterialConsumptionEntry>,
}

/// 批次列表分页结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPage {
    pub batches: Vec<ProductionBatch>,
    pub limit: i64,
    pub offset: i64,
}

// ==========================================
// BatchApi - 批次 API
// ==========================================

/// 批次API
///
/// 职责：
/// 1. 批次生命周期操作（创建/编辑/完工/删除）
/// 2. 批次查询与溯源报告
/// 3. 输入校验（持久化之前）
pub struct BatchApi {
    batch_repo: Arc<BatchRepository>,
    catalog_repo: Arc<CatalogRepository>,
    ledger: Arc<ConsumptionLedger>,
    compliance_engine: Arc<ComplianceEngine>,
    provenance: Arc<ProvenanceReconstructor>,
    config: Arc<ConfigManager>,
}

impl BatchApi {
    /// 创建新的 BatchApi 实例
    pub fn new(
        batch_repo: Arc<BatchRepository>,
        catalog_repo: Arc<CatalogRepository>,
        ledger: Arc<ConsumptionLedger>,
        compliance_engine: Arc<ComplianceEngine>,
        provenance: Arc<ProvenanceReconstructor>,
        config: Arc<ConfigManager>,
    ) -> Self {
        Self {
            batch_repo,
            catalog_repo,
            ledger,
            compliance_engine,
            provenance,
            config,
        }
    }

    // ==========================================
    // 写入接口
    // ==========================================

    /// 创建批次（含消耗条目，单事务持久化）
    ///
    /// # 返回
    /// - Ok(BatchDetail): 已分配批号、状态 IN_PRODUCTION 的批次
    ///
    /// # 错误
    /// - ValidationError: 产品不存在、数量非正、条目违反来源判别式约束
    #[instrument(skip(self, input))]
    pub fn create_batch(&self, input: &CreateBatchInput) -> ApiResult<BatchDetail> {
        self.validate_basics(&input.product_id, input.quantity, &input.unit)?;

        let batch_id = Uuid::new_v4().to_string();
        let entries = self.ledger.resolve_entries(&batch_id, &input.entries)?;

        let now = Utc::now();
        let mut batch = ProductionBatch {
            batch_id: batch_id.clone(),
            batch_number: String::new(), // 仓储在事务内分配
            product_id: input.product_id.clone(),
            quantity: input.quantity,
            unit: input.unit.clone(),
            status: BatchStatus::InProduction,
            production_date: input.production_date,
            production_start: input.production_start,
            completed_at: None,
            expiry_date: input.expiry_date,
            final_temperature: None,
            temperature_compliant: None,
            notes: input.notes.clone(),
            operator_id: input.operator_id.clone(),
            revision: 0,
            created_at: now,
            updated_at: now,
        };

        let batch_number = self.batch_repo.create_with_entries(&mut batch, &entries)?;
        info!(batch_id = %batch_id, batch_number = %batch_number, "批次已创建");

        Ok(BatchDetail { batch, entries })
    }

    /// 更新批次（字段覆写 + 条目集合整组替换，单事务）
    ///
    /// 状态可自由改派；状态回到 IN_PRODUCTION 时完工三元组强制清空。
    /// 其余状态下完工三元组必须整体给出或整体缺席。
    #[instrument(skip(self, input), fields(batch_id = %input.batch_id))]
    pub fn update_batch(&self, input: &UpdateBatchInput) -> ApiResult<BatchDetail> {
        self.validate_basics(&input.product_id, input.quantity, &input.unit)?;

        let existing = self
            .batch_repo
            .find_by_id(&input.batch_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("ProductionBatch(id={})不存在", input.batch_id))
            })?;

        let status = input.status.unwrap_or(existing.status);

        let mut batch = ProductionBatch {
            batch_id: existing.batch_id.clone(),
            batch_number: existing.batch_number.clone(), // 批号不可变更
            product_id: input.product_id.clone(),
            quantity: input.quantity,
            unit: input.unit.clone(),
            status,
            production_date: existing.production_date, // 批号派生依据不可变更
            production_start: input.production_start,
            completed_at: input.completed_at,
            expiry_date: input.expiry_date,
            final_temperature: input.final_temperature,
            temperature_compliant: input.temperature_compliant,
            notes: input.notes.clone(),
            operator_id: input.operator_id.clone(),
            revision: input.revision,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };

        if status == BatchStatus::InProduction {
            // 回到生产中: 完工数据一并清除
            batch.clear_completion();
        }
        if !batch.completion_is_consistent() {
            return Err(ApiError::ValidationError(
                "完工字段必须整体给出或整体缺席（完工时间/最终温度/合规标记）".to_string(),
            ));
        }

        let entries = self.ledger.resolve_entries(&input.batch_id, &input.entries)?;
        self.batch_repo.update_with_entries(&batch, &entries)?;

        // 读回持久化后的 revision
        let batch = self
            .batch_repo
            .find_by_id(&input.batch_id)?
            .ok_or_else(|| ApiError::InternalError("批次更新后读回失败".to_string()))?;

        Ok(BatchDetail { batch, entries })
    }

    /// 完工批次（合规判定 + 不合规时触发纠偏任务）
    ///
    /// 返回的 CompletionOutcome.side_effect_delivered = false 表示部分失败:
    /// 完工与合规判定已持久化，纠偏请求入队待重试。
    #[instrument(skip(self, input), fields(batch_id = %input.batch_id))]
    pub async fn complete_batch(&self, input: &CompleteBatchInput) -> ApiResult<CompletionOutcome> {
        let outcome = self
            .compliance_engine
            .complete_batch(
                &input.batch_id,
                input.final_temperature,
                input.completed_at,
                input.notes.as_deref(),
            )
            .await?;
        Ok(outcome)
    }

    /// 删除批次（级联删除消耗条目；不可逆）
    ///
    /// 删除权限由外部鉴权协作方把关，此处只执行级联删除本身。
    #[instrument(skip(self))]
    pub fn delete_batch(&self, batch_id: &str) -> ApiResult<()> {
        self.batch_repo.delete(batch_id)?;
        info!(batch_id = %batch_id, "批次及其消耗条目已删除");
        Ok(())
    }

    // ==========================================
    // 查询接口
    // ==========================================

    /// 查询批次详情（批次 + 消耗条目）
    pub fn get_batch(&self, batch_id: &str) -> ApiResult<Option<BatchDetail>> {
        if batch_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("批次ID不能为空".to_string()));
        }

        let batch = match self.batch_repo.find_by_id(batch_id)? {
            Some(batch) => batch,
            None => return Ok(None),
        };
        let entries = self.batch_repo.find_entries(batch_id)?;

        Ok(Some(BatchDetail { batch, entries }))
    }

    /// 条件查询批次列表（分页，limit 受配置上限约束）
    pub fn list_batches(&self, filter: &BatchListFilter) -> ApiResult<BatchPage> {
        let max_limit = self
            .config
            .get_list_page_limit()
            .map_err(|e| ApiError::InternalError(e.to_string()))?;

        let limit = filter.limit.unwrap_or(max_limit).clamp(1, max_limit);
        let offset = filter.offset.unwrap_or(0).max(0);

        let batches = self.batch_repo.list(&BatchFilter {
            date_from: filter.date_from,
            date_to: filter.date_to,
            status: filter.status,
            text: filter.text.clone(),
            limit,
            offset,
        })?;

        Ok(BatchPage {
            batches,
            limit,
            offset,
        })
    }

    /// 溯源报告（只读: 时间线 + 源头物料清单）
    pub fn get_provenance(&self, batch_id: &str) -> ApiResult<ProvenanceReport> {
        Ok(self.provenance.reconstruct(batch_id)?)
    }

    // ==========================================
    // 校验辅助
    // ==========================================

    /// 基础字段校验: 产品存在、数量为正、单位非空
    fn validate_basics(&self, product_id: &str, quantity: f64, unit: &str) -> ApiResult<()> {
        if product_id.trim().is_empty() {
            return Err(ApiError::ValidationError("产品ID不能为空".to_string()));
        }
        if self.catalog_repo.find_product(product_id)?.is_none() {
            return Err(ApiError::ValidationError(format!(
                "产品不存在: {}",
                product_id
            )));
        }
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(ApiError::ValidationError(format!(
                "批次数量必须为正数: {}",
                quantity
            )));
        }
        if unit.trim().is_empty() {
            return Err(ApiError::ValidationError("计量单位不能为空".to_string()));
        }
        Ok(())
    }
}
