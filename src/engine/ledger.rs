// ==========================================
// 食品生产批次追溯系统 - 消耗台账校验引擎
// ==========================================
// 职责: 边界输入 (四个可空来源字段) → ConsumptionSource 和类型
// 红线: 来源判别式有且只有一种形态——零个或多个一律拒绝
// 红线: quantity <= 0 一律拒绝
// ==========================================

use crate::domain::batch::{ConsumptionSource, MaterialConsumptionEntry};
use crate::repository::catalog_repo::CatalogRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

// ==========================================
// ConsumptionEntryInput - 消耗条目边界输入
// ==========================================
// 来源以四组可空字段表达（外部接口形态）；本引擎负责收敛为和类型
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumptionEntryInput {
    pub quantity: f64,
    pub unit: String,
    pub reception_id: Option<String>,
    pub curing_batch_id: Option<String>,
    pub receipt_id: Option<String>,
    pub manual_name: Option<String>,
    pub manual_lot: Option<String>,
}

// ==========================================
// ConsumptionLedger - 消耗台账校验
// ==========================================
pub struct ConsumptionLedger {
    catalog_repo: Arc<CatalogRepository>,
}

impl ConsumptionLedger {
    /// 创建新的 ConsumptionLedger 实例
    pub fn new(catalog_repo: Arc<CatalogRepository>) -> Self {
        Self { catalog_repo }
    }

    /// 校验并收敛一组边界输入为可持久化的消耗条目
    ///
    /// 校验项:
    /// 1. quantity > 0 且有限，unit 非空
    /// 2. 恰好一种来源形态（手工来源要求名称与批号同时给出）
    /// 3. 登记型来源的目录引用必须存在；腌制来源必须已完成腌制
    ///
    /// 可用量扣减不在此处——由仓储在写入事务内原子完成。
    pub fn resolve_entries(
        &self,
        batch_id: &str,
        inputs: &[ConsumptionEntryInput],
    ) -> RepositoryResult<Vec<MaterialConsumptionEntry>> {
        let mut entries = Vec::with_capacity(inputs.len());

        for (idx, input) in inputs.iter().enumerate() {
            let source = Self::resolve_source(idx, input)?;
            self.verify_reference(idx, &source)?;

            if !(input.quantity.is_finite() && input.quantity > 0.0) {
                return Err(RepositoryError::ValidationError(format!(
                    "消耗条目[{}]数量必须为正数: {}",
                    idx, input.quantity
                )));
            }
            if input.unit.trim().is_empty() {
                return Err(RepositoryError::ValidationError(format!(
                    "消耗条目[{}]缺少计量单位",
                    idx
                )));
            }

            entries.push(MaterialConsumptionEntry {
                entry_id: Uuid::new_v4().to_string(),
                batch_id: batch_id.to_string(),
                quantity: input.quantity,
                unit: input.unit.clone(),
                source,
            });
        }

        Ok(entries)
    }

    /// 四组可空字段 → 和类型（恰好一种形态）
    fn resolve_source(
        idx: usize,
        input: &ConsumptionEntryInput,
    ) -> RepositoryResult<ConsumptionSource> {
        let has_reception = input.reception_id.as_deref().is_some_and(|s| !s.trim().is_empty());
        let has_curing = input
            .curing_batch_id
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        let has_receipt = input.receipt_id.as_deref().is_some_and(|s| !s.trim().is_empty());
        let has_manual = input.manual_name.as_deref().is_some_and(|s| !s.trim().is_empty())
            || input.manual_lot.as_deref().is_some_and(|s| !s.trim().is_empty());

        let populated = [has_reception, has_curing, has_receipt, has_manual]
            .iter()
            .filter(|p| **p)
            .count();

        if populated == 0 {
            return Err(RepositoryError::ValidationError(format!(
                "消耗条目[{}]未指定任何来源",
                idx
            )));
        }
        if populated > 1 {
            return Err(RepositoryError::ValidationError(format!(
                "消耗条目[{}]指定了多个来源形态",
                idx
            )));
        }

        if has_reception {
            return Ok(ConsumptionSource::Reception {
                reception_id: input.reception_id.clone().unwrap_or_default(),
            });
        }
        if has_curing {
            return Ok(ConsumptionSource::Curing {
                curing_batch_id: input.curing_batch_id.clone().unwrap_or_default(),
            });
        }
        if has_receipt {
            return Ok(ConsumptionSource::Auxiliary {
                receipt_id: input.receipt_id.clone().unwrap_or_default(),
            });
        }

        // 手工来源: 名称与批号缺一不可
        let material_name = input.manual_name.as_deref().unwrap_or("").trim().to_string();
        let lot_number = input.manual_lot.as_deref().unwrap_or("").trim().to_string();
        if material_name.is_empty() || lot_number.is_empty() {
            return Err(RepositoryError::ValidationError(format!(
                "消耗条目[{}]手工来源必须同时给出物料名称与批号",
                idx
            )));
        }

        Ok(ConsumptionSource::Manual {
            material_name,
            lot_number,
        })
    }

    /// 登记型来源的目录引用校验（写入时点；事后删除由溯源层降级处理）
    fn verify_reference(&self, idx: usize, source: &ConsumptionSource) -> RepositoryResult<()> {
        match source {
            ConsumptionSource::Reception { reception_id } => {
                if self.catalog_repo.find_reception(reception_id)?.is_none() {
                    return Err(RepositoryError::NotFound {
                        entity: "ReceptionRecord".to_string(),
                        id: reception_id.clone(),
                    });
                }
            }
            ConsumptionSource::Curing { curing_batch_id } => {
                match self.catalog_repo.find_curing_batch(curing_batch_id)? {
                    None => {
                        return Err(RepositoryError::NotFound {
                            entity: "CuringBatch".to_string(),
                            id: curing_batch_id.clone(),
                        })
                    }
                    Some(curing) if !curing.completed => {
                        return Err(RepositoryError::ValidationError(format!(
                            "消耗条目[{}]引用的腌制批次尚未完成腌制: {}",
                            idx, curing_batch_id
                        )))
                    }
                    Some(_) => {}
                }
            }
            ConsumptionSource::Auxiliary { receipt_id } => {
                if self.catalog_repo.find_auxiliary_receipt(receipt_id)?.is_none() {
                    return Err(RepositoryError::NotFound {
                        entity: "AuxiliaryReceipt".to_string(),
                        id: receipt_id.clone(),
                    });
                }
            }
            ConsumptionSource::Manual { .. } => {}
        }
        Ok(())
    }
}
