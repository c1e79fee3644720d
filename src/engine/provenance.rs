// ==========================================
// 食品生产批次追溯系统 - 溯源重建引擎
// ==========================================
// 职责: 从成品批次出发重建到原料源头的全链路时间线 + 源头物料清单
// 红线: 只读，不做任何变更
// 红线: 悬挂引用（来源目录行事后被删）降级为 unresolved 标记事件，
//       绝不让历史追溯请求整体失败
// 多跳: 生产批次 → 腌制批次 → 原始收货，递归深度受 MAX_TRACE_DEPTH 保护
// ==========================================

use crate::domain::batch::{ConsumptionSource, MaterialConsumptionEntry};
use crate::domain::provenance::{
    OriginMaterial, ProvenanceReport, TraceEvent, UNREGISTERED_SUPPLIER,
};
use crate::domain::types::TraceEventKind;
use crate::repository::batch_repo::BatchRepository;
use crate::repository::catalog_repo::CatalogRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use tracing::{instrument, warn};

/// 递归解析的深度上限（领域内工序链固定且浅；防御数据损坏造成的环）
pub const MAX_TRACE_DEPTH: usize = 4;

// ==========================================
// ProvenanceReconstructor - 溯源重建引擎
// ==========================================
pub struct ProvenanceReconstructor {
    batch_repo: Arc<BatchRepository>,
    catalog_repo: Arc<CatalogRepository>,
}

impl ProvenanceReconstructor {
    /// 创建新的 ProvenanceReconstructor 实例
    pub fn new(batch_repo: Arc<BatchRepository>, catalog_repo: Arc<CatalogRepository>) -> Self {
        Self {
            batch_repo,
            catalog_repo,
        }
    }

    /// 重建批次的溯源报告
    ///
    /// # 错误
    /// - `NotFound`: 仅当目标批次本身不存在
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub fn reconstruct(&self, batch_id: &str) -> RepositoryResult<ProvenanceReport> {
        let batch = self
            .batch_repo
            .find_by_id(batch_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "ProductionBatch".to_string(),
                id: batch_id.to_string(),
            })?;

        let entries = self.batch_repo.find_entries(batch_id)?;

        let mut timeline = Vec::new();
        let mut origin_materials = Vec::with_capacity(entries.len());

        // 种子事件: 生产开始; 已完工时追加携带合规结论的完工事件
        timeline.push(TraceEvent {
            kind: TraceEventKind::Production,
            occurred_at: batch.production_start,
            ended_on: None,
            batch_number: Some(batch.batch_number.clone()),
            supplier_name: None,
            quantity: Some(batch.quantity),
            compliant: None,
            description: format!("生产开始: {}", batch.batch_number),
            unresolved: false,
        });
        if let Some(completed_at) = batch.completed_at {
            timeline.push(TraceEvent {
                kind: TraceEventKind::Production,
                occurred_at: completed_at,
                ended_on: None,
                batch_number: Some(batch.batch_number.clone()),
                supplier_name: None,
                quantity: Some(batch.quantity),
                compliant: batch.temperature_compliant,
                description: format!("生产完工: {}", batch.batch_number),
                unresolved: false,
            });
        }

        for entry in &entries {
            let origin = self.resolve_entry(entry, batch.production_start, &mut timeline)?;
            origin_materials.push(origin);
        }

        sort_timeline(&mut timeline);

        Ok(ProvenanceReport {
            batch,
            timeline,
            origin_materials,
        })
    }

    /// 解析单条消耗条目: 向时间线追加事件，并返回源头物料报表行
    fn resolve_entry(
        &self,
        entry: &MaterialConsumptionEntry,
        fallback_ts: DateTime<Utc>,
        timeline: &mut Vec<TraceEvent>,
    ) -> RepositoryResult<OriginMaterial> {
        match &entry.source {
            ConsumptionSource::Reception { reception_id } => {
                match self.catalog_repo.find_reception(reception_id)? {
                    Some(reception) => {
                        timeline.push(TraceEvent {
                            kind: TraceEventKind::Reception,
                            occurred_at: reception.received_at,
                            ended_on: None,
                            batch_number: Some(reception.batch_number.clone()),
                            supplier_name: Some(reception.supplier_name.clone()),
                            quantity: Some(entry.quantity),
                            compliant: Some(reception.compliant),
                            description: format!(
                                "原料收货: {} ({})",
                                reception.batch_number, reception.supplier_name
                            ),
                            unresolved: false,
                        });
                        Ok(OriginMaterial {
                            material_name: "原料收货".to_string(),
                            quantity: entry.quantity,
                            unit: entry.unit.clone(),
                            lot_number: reception.batch_number,
                            supplier_name: reception.supplier_name,
                            unresolved: false,
                        })
                    }
                    None => {
                        timeline.push(Self::dangling_event(
                            TraceEventKind::Reception,
                            fallback_ts,
                            entry.quantity,
                            format!("来源不可解析: 收货记录已删除 (reception_id={})", reception_id),
                        ));
                        Ok(Self::dangling_origin(entry))
                    }
                }
            }
            ConsumptionSource::Curing { curing_batch_id } => {
                self.resolve_curing(curing_batch_id, entry, fallback_ts, timeline, 0)
            }
            ConsumptionSource::Auxiliary { receipt_id } => {
                match self.catalog_repo.find_auxiliary_receipt(receipt_id)? {
                    Some(receipt) => {
                        timeline.push(TraceEvent {
                            kind: TraceEventKind::Material,
                            occurred_at: receipt.received_at,
                            ended_on: None,
                            batch_number: Some(receipt.batch_number.clone()),
                            supplier_name: Some(receipt.supplier_name.clone()),
                            quantity: Some(entry.quantity),
                            compliant: None,
                            description: format!(
                                "辅料入库: {} ({})",
                                receipt.batch_number, receipt.supplier_name
                            ),
                            unresolved: false,
                        });
                        Ok(OriginMaterial {
                            material_name: "辅料".to_string(),
                            quantity: entry.quantity,
                            unit: entry.unit.clone(),
                            lot_number: receipt.batch_number,
                            supplier_name: receipt.supplier_name,
                            unresolved: false,
                        })
                    }
                    None => {
                        timeline.push(Self::dangling_event(
                            TraceEventKind::Material,
                            fallback_ts,
                            entry.quantity,
                            format!("来源不可解析: 辅料记录已删除 (receipt_id={})", receipt_id),
                        ));
                        Ok(Self::dangling_origin(entry))
                    }
                }
            }
            ConsumptionSource::Manual {
                material_name,
                lot_number,
            } => {
                // 未登记来源: 合成事件，明确标记不可向上追溯
                timeline.push(TraceEvent {
                    kind: TraceEventKind::Material,
                    occurred_at: fallback_ts,
                    ended_on: None,
                    batch_number: Some(lot_number.clone()),
                    supplier_name: None,
                    quantity: Some(entry.quantity),
                    compliant: None,
                    description: format!("未登记来源: {} (批号 {})", material_name, lot_number),
                    unresolved: true,
                });
                Ok(OriginMaterial {
                    material_name: material_name.clone(),
                    quantity: entry.quantity,
                    unit: entry.unit.clone(),
                    lot_number: lot_number.clone(),
                    supplier_name: UNREGISTERED_SUPPLIER.to_string(),
                    unresolved: true,
                })
            }
        }
    }

    /// 解析腌制来源: 腌制区间事件 + 递归解析原始收货（多跳）
    fn resolve_curing(
        &self,
        curing_batch_id: &str,
        entry: &MaterialConsumptionEntry,
        fallback_ts: DateTime<Utc>,
        timeline: &mut Vec<TraceEvent>,
        depth: usize,
    ) -> RepositoryResult<OriginMaterial> {
        if depth >= MAX_TRACE_DEPTH {
            // 工序链深度固定且浅，走到这里说明数据已损坏（成环）
            warn!(curing_batch_id = %curing_batch_id, depth, "溯源递归达到深度上限，中止解析");
            timeline.push(Self::dangling_event(
                TraceEventKind::Curing,
                fallback_ts,
                entry.quantity,
                format!("来源不可解析: 溯源深度超限 (curing_batch_id={})", curing_batch_id),
            ));
            return Ok(Self::dangling_origin(entry));
        }

        let curing = match self.catalog_repo.find_curing_batch(curing_batch_id)? {
            Some(curing) => curing,
            None => {
                timeline.push(Self::dangling_event(
                    TraceEventKind::Curing,
                    fallback_ts,
                    entry.quantity,
                    format!(
                        "来源不可解析: 腌制批次已删除 (curing_batch_id={})",
                        curing_batch_id
                    ),
                ));
                return Ok(Self::dangling_origin(entry));
            }
        };

        timeline.push(TraceEvent {
            kind: TraceEventKind::Curing,
            occurred_at: date_start(curing.started_on),
            ended_on: curing.ended_on,
            batch_number: Some(curing.batch_number.clone()),
            supplier_name: None,
            quantity: Some(entry.quantity),
            compliant: None,
            description: format!("腌制批次: {}", curing.batch_number),
            unresolved: false,
        });

        // 多跳: 腌制批次的原始收货
        let mut supplier_name = UNREGISTERED_SUPPLIER.to_string();
        let mut unresolved = false;
        if let Some(ref reception_id) = curing.reception_id {
            match self.catalog_repo.find_reception(reception_id)? {
                Some(reception) => {
                    timeline.push(TraceEvent {
                        kind: TraceEventKind::Reception,
                        occurred_at: reception.received_at,
                        ended_on: None,
                        batch_number: Some(reception.batch_number.clone()),
                        supplier_name: Some(reception.supplier_name.clone()),
                        quantity: None,
                        compliant: Some(reception.compliant),
                        description: format!(
                            "原料收货: {} ({}) → 腌制批次 {}",
                            reception.batch_number, reception.supplier_name, curing.batch_number
                        ),
                        unresolved: false,
                    });
                    supplier_name = reception.supplier_name;
                }
                None => {
                    timeline.push(Self::dangling_event(
                        TraceEventKind::Reception,
                        date_start(curing.started_on),
                        entry.quantity,
                        format!("来源不可解析: 收货记录已删除 (reception_id={})", reception_id),
                    ));
                    unresolved = true;
                }
            }
        }

        Ok(OriginMaterial {
            material_name: "腌制半成品".to_string(),
            quantity: entry.quantity,
            unit: entry.unit.clone(),
            lot_number: curing.batch_number,
            supplier_name,
            unresolved,
        })
    }

    /// 悬挂引用的降级标记事件
    fn dangling_event(
        kind: TraceEventKind,
        occurred_at: DateTime<Utc>,
        quantity: f64,
        description: String,
    ) -> TraceEvent {
        TraceEvent {
            kind,
            occurred_at,
            ended_on: None,
            batch_number: None,
            supplier_name: None,
            quantity: Some(quantity),
            compliant: None,
            description,
            unresolved: true,
        }
    }

    /// 悬挂引用的源头物料报表行
    fn dangling_origin(entry: &MaterialConsumptionEntry) -> OriginMaterial {
        OriginMaterial {
            material_name: "来源不可解析".to_string(),
            quantity: entry.quantity,
            unit: entry.unit.clone(),
            lot_number: "-".to_string(),
            supplier_name: UNREGISTERED_SUPPLIER.to_string(),
            unresolved: true,
        }
    }
}

/// 时间线排序: 时间升序，同一时间戳按固定类型优先序破平
/// （收货 < 腌制 < 辅料 < 生产，保证重建结果确定性）
pub fn sort_timeline(timeline: &mut [TraceEvent]) {
    timeline.sort_by(|a, b| {
        a.occurred_at
            .cmp(&b.occurred_at)
            .then_with(|| a.kind.precedence().cmp(&b.kind.precedence()))
    });
}

/// NaiveDate → 当日零点的 UTC 时间戳
fn date_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
