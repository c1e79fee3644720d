// ==========================================
// 食品生产批次追溯系统 - 温度合规引擎
// ==========================================
// 职责: 完工时对照产品关键温度做合规判定，不合规触发纠偏任务
// 红线: 合规判定不得被静默跳过或重复
// 红线: 完工写入与纠偏入队同事务提交（事务性发件箱），
//       外部投递失败保持 PENDING 持久重试，完工决定绝不回滚
// ==========================================

use crate::config::ConfigManager;
use crate::domain::batch::ProductionBatch;
use crate::domain::corrective_action::CorrectiveActionRequest;
use crate::domain::types::DispatchState;
use crate::repository::batch_repo::BatchRepository;
use crate::repository::catalog_repo::CatalogRepository;
use crate::repository::corrective_action_repo::CorrectiveActionRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::REASON_THERMAL_NON_COMPLIANCE;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

// ==========================================
// Trait: CorrectiveActionDispatcher
// ==========================================
// 外部纠偏受理方的接入点（本引擎不关心其传输形态）
#[async_trait]
pub trait CorrectiveActionDispatcher: Send + Sync {
    /// 投递一条纠偏请求到外部受理方
    async fn dispatch(&self, request: &CorrectiveActionRequest) -> anyhow::Result<()>;
}

// ==========================================
// CompletionOutcome - 完工结果
// ==========================================
// side_effect_delivered = false 表示「部分失败」: 完工与合规判定已持久化，
// 纠偏请求已入队但尚未送达外部受理方（将持久重试）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub batch: ProductionBatch,
    pub compliant: bool,
    pub corrective_action: Option<CorrectiveActionRequest>,
    pub side_effect_delivered: bool,
}

// ==========================================
// ComplianceEngine - 温度合规引擎
// ==========================================
pub struct ComplianceEngine {
    batch_repo: Arc<BatchRepository>,
    catalog_repo: Arc<CatalogRepository>,
    corrective_repo: Arc<CorrectiveActionRepository>,
    config: Arc<ConfigManager>,
    dispatcher: Arc<dyn CorrectiveActionDispatcher>,
}

impl ComplianceEngine {
    /// 创建新的 ComplianceEngine 实例
    pub fn new(
        batch_repo: Arc<BatchRepository>,
        catalog_repo: Arc<CatalogRepository>,
        corrective_repo: Arc<CorrectiveActionRepository>,
        config: Arc<ConfigManager>,
        dispatcher: Arc<dyn CorrectiveActionDispatcher>,
    ) -> Self {
        Self {
            batch_repo,
            catalog_repo,
            corrective_repo,
            config,
            dispatcher,
        }
    }

    /// 纯判定: 实测温度达到要求温度即合规（边界含等号）
    pub fn is_compliant(final_temperature: f64, required_temperature: f64) -> bool {
        final_temperature >= required_temperature
    }

    /// 完工批次
    ///
    /// 流程:
    /// 1. 校验温度为有限数值
    /// 2. 加载批次与产品关键温度（产品未配置时回退配置兜底值 72.0）
    /// 3. 合规判定（含边界）
    /// 4. 单事务: 完工三元组 + 状态 COMPLETED + （不合规时）纠偏队列行
    /// 5. 事务提交后尝试立即派发；失败保持 PENDING，结果报告部分失败
    ///
    /// # 错误
    /// - `ValidationError`: 温度非有限数值
    /// - `NotFound`: 批次不存在
    /// - `OptimisticLockFailure`: 并发完工/编辑冲突
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn complete_batch(
        &self,
        batch_id: &str,
        final_temperature: f64,
        completed_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> RepositoryResult<CompletionOutcome> {
        if !final_temperature.is_finite() {
            return Err(RepositoryError::ValidationError(format!(
                "最终温度必须是有限数值: {}",
                final_temperature
            )));
        }

        let batch = self
            .batch_repo
            .find_by_id(batch_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "ProductionBatch".to_string(),
                id: batch_id.to_string(),
            })?;

        if batch.is_completed() {
            // 重复完工会产生第二份合规判定（可能再触发一次纠偏）——拒绝;
            // 需要重新完工时先经管理性编辑将状态改回 IN_PRODUCTION
            return Err(RepositoryError::ValidationError(format!(
                "批次已完工，不可重复完工: {}",
                batch.batch_number
            )));
        }

        let required_temperature = self.required_temperature(&batch.product_id)?;
        let compliant = Self::is_compliant(final_temperature, required_temperature);

        let corrective = if compliant {
            None
        } else {
            Some(CorrectiveActionRequest {
                request_id: Uuid::new_v4().to_string(),
                batch_id: batch_id.to_string(),
                expected_value: required_temperature,
                actual_value: final_temperature,
                reason_code: REASON_THERMAL_NON_COMPLIANCE.to_string(),
                dispatch_state: DispatchState::Pending,
                attempts: 0,
                last_error: None,
                created_at: Utc::now(),
                dispatched_at: None,
            })
        };

        // 完工写入 + 纠偏入队在同一事务内（乐观锁防并发完工）
        self.batch_repo.complete(
            batch_id,
            batch.revision,
            final_temperature,
            completed_at,
            compliant,
            notes,
            corrective.as_ref(),
        )?;

        info!(
            batch_number = %batch.batch_number,
            final_temperature,
            required_temperature,
            compliant,
            "批次完工，合规判定已持久化"
        );

        // 事务已提交: 此后任何派发失败都只影响投递时点，不影响合规决定
        let mut side_effect_delivered = true;
        if let Some(ref request) = corrective {
            side_effect_delivered = self.try_dispatch(request).await?;
        }

        let batch = self
            .batch_repo
            .find_by_id(batch_id)?
            .ok_or_else(|| RepositoryError::InternalError("完工批次读回失败".to_string()))?;

        Ok(CompletionOutcome {
            batch,
            compliant,
            corrective_action: corrective,
            side_effect_delivered,
        })
    }

    /// 重派所有 PENDING 的纠偏请求（持久重试通道）
    ///
    /// # 返回
    /// - `Ok(count)`: 本轮成功派发的请求数
    #[instrument(skip(self))]
    pub async fn redispatch_pending(&self) -> RepositoryResult<usize> {
        let pending = self.corrective_repo.list_pending()?;
        let mut dispatched = 0;

        for request in &pending {
            if self.try_dispatch(request).await? {
                dispatched += 1;
            }
        }

        info!(total = pending.len(), dispatched, "纠偏队列重派完成");
        Ok(dispatched)
    }

    /// 尝试派发单条请求; 失败记录原因并保持队列行待重试
    async fn try_dispatch(&self, request: &CorrectiveActionRequest) -> RepositoryResult<bool> {
        match self.dispatcher.dispatch(request).await {
            Ok(()) => {
                self.corrective_repo.mark_dispatched(&request.request_id)?;
                info!(request_id = %request.request_id, batch_id = %request.batch_id, "纠偏请求已派发");
                Ok(true)
            }
            Err(e) => {
                let max_attempts = self
                    .config
                    .get_corrective_max_attempts()
                    .map_err(|e| RepositoryError::InternalError(e.to_string()))?;
                self.corrective_repo
                    .record_failure(&request.request_id, &e.to_string(), max_attempts)?;
                warn!(
                    request_id = %request.request_id,
                    batch_id = %request.batch_id,
                    error = %e,
                    "纠偏请求派发失败，保留待重试"
                );
                Ok(false)
            }
        }
    }

    /// 产品要求的关键温度（产品未配置时回退配置兜底值）
    fn required_temperature(&self, product_id: &str) -> RepositoryResult<f64> {
        let product = self.catalog_repo.find_product(product_id)?;
        match product.and_then(|p| p.critical_temperature_c) {
            Some(t) => Ok(t),
            None => self
                .config
                .get_default_critical_temperature()
                .map_err(|e| RepositoryError::InternalError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compliance_boundary_inclusive() {
        // 边界含等号: 72.0 对 72.0 合规
        assert!(ComplianceEngine::is_compliant(72.0, 72.0));
        assert!(ComplianceEngine::is_compliant(75.5, 72.0));
        assert!(!ComplianceEngine::is_compliant(71.999, 72.0));
    }
}
