// ==========================================
// 食品生产批次追溯系统 - 批次与消耗台账仓储
// ==========================================
// 红线: Repository 不含业务判定逻辑（合规判定在引擎层）
// 红线: 批次与消耗条目集合的写入必须在同一事务内完成
// 红线: 批次更新走乐观锁（revision 列），禁止 last-write-wins
// ==========================================

use crate::domain::batch::{ConsumptionSource, MaterialConsumptionEntry, ProductionBatch};
use crate::domain::corrective_action::CorrectiveActionRequest;
use crate::domain::types::BatchStatus;
use crate::repository::corrective_action_repo::CorrectiveActionRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Transaction};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// 批次查询过滤条件
#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    pub date_from: Option<NaiveDate>,   // 生产日期下界（含）
    pub date_to: Option<NaiveDate>,     // 生产日期上界（含）
    pub status: Option<BatchStatus>,    // 状态过滤
    pub text: Option<String>,           // 自由文本（批号/备注模糊匹配）
    pub limit: i64,                     // 返回上限
    pub offset: i64,                    // 偏移量（分页）
}

const BATCH_COLUMNS: &str = r#"batch_id, batch_number, product_id, quantity, unit, status,
           production_date, production_start, completed_at, expiry_date,
           final_temperature, temperature_compliant, notes, operator_id,
           revision, created_at, updated_at"#;

// ==========================================
// BatchRepository - 生产批次仓储
// ==========================================
pub struct BatchRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BatchRepository {
    /// 创建新的 BatchRepository 实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入接口
    // ==========================================

    /// 创建批次及其消耗条目（单事务）
    ///
    /// 事务内完成:
    /// 1. 按生产日期从 batch_number_seq 取下一个批号（周期序列只增不回退，批号永不复用）
    /// 2. 插入批次（revision = 0）
    /// 3. 插入全部消耗条目，腌制来源同时扣减 curing_batch.quantity_available
    ///
    /// # 返回
    /// - `Ok(batch_number)`: 分配到的批号
    pub fn create_with_entries(
        &self,
        batch: &mut ProductionBatch,
        entries: &[MaterialConsumptionEntry],
    ) -> RepositoryResult<String> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let batch_number = Self::next_batch_number(&tx, batch.production_date)?;
        batch.batch_number = batch_number.clone();
        batch.revision = 0;

        tx.execute(
            &format!(
                r#"INSERT INTO production_batch ({BATCH_COLUMNS})
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
            ),
            params![
                &batch.batch_id,
                &batch.batch_number,
                &batch.product_id,
                &batch.quantity,
                &batch.unit,
                &batch.status.to_string(),
                &batch.production_date.format("%Y-%m-%d").to_string(),
                &fmt_dt(&batch.production_start),
                &batch.completed_at.as_ref().map(fmt_dt),
                &batch.expiry_date.map(|d| d.format("%Y-%m-%d").to_string()),
                &batch.final_temperature,
                &batch.temperature_compliant.map(|b| if b { 1 } else { 0 }),
                &batch.notes,
                &batch.operator_id,
                &batch.revision,
                &fmt_dt(&batch.created_at),
                &fmt_dt(&batch.updated_at),
            ],
        )?;

        Self::insert_entries_tx(&tx, &batch.batch_id, entries)?;

        tx.commit()?;
        Ok(batch_number)
    }

    /// 更新批次并整组替换消耗条目（单事务，乐观锁）
    ///
    /// 语义:
    /// - 批号与生产日期不可变更（批号一经分配保持稳定）
    /// - 条目集合全量替换: 旧条目删除（回补腌制可用量），新条目插入（扣减）
    /// - 状态可自由改派，完工三元组按传入值整体写入/清空
    ///
    /// # 错误
    /// - `OptimisticLockFailure`: revision 不匹配（其他调用方已修改）
    /// - `NotFound`: batch_id 不存在
    pub fn update_with_entries(
        &self,
        batch: &ProductionBatch,
        entries: &[MaterialConsumptionEntry],
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let rows_affected = tx.execute(
            r#"UPDATE production_batch
               SET product_id = ?, quantity = ?, unit = ?, status = ?,
                   production_start = ?, completed_at = ?, expiry_date = ?,
                   final_temperature = ?, temperature_compliant = ?,
                   notes = ?, operator_id = ?, updated_at = ?,
                   revision = revision + 1
               WHERE batch_id = ? AND revision = ?"#,
            params![
                &batch.product_id,
                &batch.quantity,
                &batch.unit,
                &batch.status.to_string(),
                &fmt_dt(&batch.production_start),
                &batch.completed_at.as_ref().map(fmt_dt),
                &batch.expiry_date.map(|d| d.format("%Y-%m-%d").to_string()),
                &batch.final_temperature,
                &batch.temperature_compliant.map(|b| if b { 1 } else { 0 }),
                &batch.notes,
                &batch.operator_id,
                &fmt_dt(&Utc::now()),
                &batch.batch_id,
                &batch.revision,
            ],
        )?;

        if rows_affected == 0 {
            return Err(Self::diagnose_write_conflict(&tx, &batch.batch_id, batch.revision));
        }

        Self::release_entries_tx(&tx, &batch.batch_id)?;
        Self::insert_entries_tx(&tx, &batch.batch_id, entries)?;

        tx.commit()?;
        Ok(())
    }

    /// 完工写入 + 纠偏任务入队（单事务，事务性发件箱）
    ///
    /// 完工三元组与状态在一条 UPDATE 内整体写入；不合规时纠偏队列行
    /// 在同一事务内插入——批次绝不会在纠偏请求丢失的情况下被标记完工。
    pub fn complete(
        &self,
        batch_id: &str,
        expected_revision: i32,
        final_temperature: f64,
        completed_at: DateTime<Utc>,
        compliant: bool,
        notes: Option<&str>,
        corrective: Option<&CorrectiveActionRequest>,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let rows_affected = tx.execute(
            r#"UPDATE production_batch
               SET status = ?, completed_at = ?, final_temperature = ?,
                   temperature_compliant = ?, notes = COALESCE(?, notes),
                   updated_at = ?, revision = revision + 1
               WHERE batch_id = ? AND revision = ?"#,
            params![
                &BatchStatus::Completed.to_string(),
                &fmt_dt(&completed_at),
                &final_temperature,
                if compliant { 1 } else { 0 },
                &notes,
                &fmt_dt(&Utc::now()),
                batch_id,
                expected_revision,
            ],
        )?;

        if rows_affected == 0 {
            return Err(Self::diagnose_write_conflict(&tx, batch_id, expected_revision));
        }

        if let Some(request) = corrective {
            CorrectiveActionRepository::enqueue_tx(&tx, request)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// 删除批次（单事务，级联删除消耗条目与纠偏队列行）
    ///
    /// 删除顺序: 回补腌制可用量 → 删条目 → 删纠偏队列行 → 删批次。
    /// 批号序列不回退，删除后的批号不会被重新分配。
    pub fn delete(&self, batch_id: &str) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        Self::release_entries_tx(&tx, batch_id)?;
        tx.execute(
            "DELETE FROM corrective_action_queue WHERE batch_id = ?",
            params![batch_id],
        )?;
        let rows_affected = tx.execute(
            "DELETE FROM production_batch WHERE batch_id = ?",
            params![batch_id],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ProductionBatch".to_string(),
                id: batch_id.to_string(),
            });
        }

        tx.commit()?;
        Ok(())
    }

    // ==========================================
    // 查询接口
    // ==========================================

    /// 按 batch_id 查询批次
    pub fn find_by_id(&self, batch_id: &str) -> RepositoryResult<Option<ProductionBatch>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            &format!("SELECT {BATCH_COLUMNS} FROM production_batch WHERE batch_id = ?"),
            params![batch_id],
            map_batch_row,
        ) {
            Ok(batch) => Ok(Some(batch)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 按批号查询批次
    pub fn find_by_batch_number(
        &self,
        batch_number: &str,
    ) -> RepositoryResult<Option<ProductionBatch>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            &format!("SELECT {BATCH_COLUMNS} FROM production_batch WHERE batch_number = ?"),
            params![batch_number],
            map_batch_row,
        ) {
            Ok(batch) => Ok(Some(batch)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询批次的全部消耗条目
    pub fn find_entries(&self, batch_id: &str) -> RepositoryResult<Vec<MaterialConsumptionEntry>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT entry_id, batch_id, quantity, unit, source_type,
                      reception_id, curing_batch_id, receipt_id, manual_name, manual_lot
               FROM consumption_entry
               WHERE batch_id = ?
               ORDER BY created_at, entry_id"#,
        )?;

        let entries = stmt
            .query_map(params![batch_id], map_entry_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// 条件查询批次列表（生产日期降序，分页）
    pub fn list(&self, filter: &BatchFilter) -> RepositoryResult<Vec<ProductionBatch>> {
        let conn = self.get_conn()?;

        let mut sql = format!("SELECT {BATCH_COLUMNS} FROM production_batch WHERE 1=1");
        let mut binds: Vec<Value> = Vec::new();

        if let Some(from) = filter.date_from {
            sql.push_str(" AND production_date >= ?");
            binds.push(Value::Text(from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = filter.date_to {
            sql.push_str(" AND production_date <= ?");
            binds.push(Value::Text(to.format("%Y-%m-%d").to_string()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            binds.push(Value::Text(status.to_string()));
        }
        if let Some(ref text) = filter.text {
            sql.push_str(" AND (batch_number LIKE ? OR COALESCE(notes, '') LIKE ?)");
            let pattern = format!("%{}%", text);
            binds.push(Value::Text(pattern.clone()));
            binds.push(Value::Text(pattern));
        }

        sql.push_str(" ORDER BY production_date DESC, batch_number DESC LIMIT ? OFFSET ?");
        binds.push(Value::Integer(filter.limit));
        binds.push(Value::Integer(filter.offset));

        let mut stmt = conn.prepare(&sql)?;
        let batches = stmt
            .query_map(params_from_iter(binds), map_batch_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(batches)
    }

    // ==========================================
    // 事务内辅助
    // ==========================================

    /// 取下一个批号: L + 生产日期(YYYYMMDD) + '-' + 周期内序号(两位)
    ///
    /// 序列行按周期持久化，删除批次不回收序号，保证批号全局唯一且永不复用。
    fn next_batch_number(tx: &Transaction<'_>, production_date: NaiveDate) -> RepositoryResult<String> {
        let period = format!("L{}", production_date.format("%Y%m%d"));

        tx.execute(
            r#"INSERT INTO batch_number_seq (period, last_seq) VALUES (?, 1)
               ON CONFLICT(period) DO UPDATE SET last_seq = last_seq + 1"#,
            params![&period],
        )?;

        let seq: i64 = tx.query_row(
            "SELECT last_seq FROM batch_number_seq WHERE period = ?",
            params![&period],
            |row| row.get(0),
        )?;

        Ok(format!("{}-{:02}", period, seq))
    }

    /// 插入消耗条目集合，腌制来源同时扣减可用量
    fn insert_entries_tx(
        tx: &Transaction<'_>,
        batch_id: &str,
        entries: &[MaterialConsumptionEntry],
    ) -> RepositoryResult<()> {
        for entry in entries {
            let (reception_id, curing_batch_id, receipt_id, manual_name, manual_lot) =
                match &entry.source {
                    ConsumptionSource::Reception { reception_id } => {
                        (Some(reception_id.as_str()), None, None, None, None)
                    }
                    ConsumptionSource::Curing { curing_batch_id } => {
                        (None, Some(curing_batch_id.as_str()), None, None, None)
                    }
                    ConsumptionSource::Auxiliary { receipt_id } => {
                        (None, None, Some(receipt_id.as_str()), None, None)
                    }
                    ConsumptionSource::Manual {
                        material_name,
                        lot_number,
                    } => (
                        None,
                        None,
                        None,
                        Some(material_name.as_str()),
                        Some(lot_number.as_str()),
                    ),
                };

            if let ConsumptionSource::Curing { curing_batch_id } = &entry.source {
                Self::allocate_curing_tx(tx, curing_batch_id, entry.quantity)?;
            }

            tx.execute(
                r#"INSERT INTO consumption_entry (
                    entry_id, batch_id, quantity, unit, source_type,
                    reception_id, curing_batch_id, receipt_id, manual_name, manual_lot,
                    created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                params![
                    &entry.entry_id,
                    batch_id,
                    &entry.quantity,
                    &entry.unit,
                    entry.source.type_code(),
                    &reception_id,
                    &curing_batch_id,
                    &receipt_id,
                    &manual_name,
                    &manual_lot,
                    &fmt_dt(&Utc::now()),
                ],
            )?;
        }

        Ok(())
    }

    /// 删除批次的旧条目并回补腌制来源的可用量
    fn release_entries_tx(tx: &Transaction<'_>, batch_id: &str) -> RepositoryResult<()> {
        let mut stmt = tx.prepare(
            r#"SELECT curing_batch_id, quantity FROM consumption_entry
               WHERE batch_id = ? AND source_type = 'CURING'"#,
        )?;
        let allocations = stmt
            .query_map(params![batch_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        for (curing_batch_id, quantity) in allocations {
            let restored = tx.execute(
                r#"UPDATE curing_batch SET quantity_available = quantity_available + ?
                   WHERE curing_batch_id = ?"#,
                params![quantity, &curing_batch_id],
            )?;
            if restored == 0 {
                // 目录行事后被删: 可用量无处回补，仅记录告警
                warn!(curing_batch_id = %curing_batch_id, quantity, "腌制批次已不存在，可用量未回补");
            }
        }

        tx.execute(
            "DELETE FROM consumption_entry WHERE batch_id = ?",
            params![batch_id],
        )?;

        Ok(())
    }

    /// 原子扣减腌制批次可用量（累计分配不得超过记录的可用量）
    fn allocate_curing_tx(
        tx: &Transaction<'_>,
        curing_batch_id: &str,
        quantity: f64,
    ) -> RepositoryResult<()> {
        let rows_affected = tx.execute(
            r#"UPDATE curing_batch
               SET quantity_available = quantity_available - ?1
               WHERE curing_batch_id = ?2 AND quantity_available >= ?1"#,
            params![quantity, curing_batch_id],
        )?;

        if rows_affected == 0 {
            let available: Option<f64> = match tx.query_row(
                "SELECT quantity_available FROM curing_batch WHERE curing_batch_id = ?",
                params![curing_batch_id],
                |row| row.get(0),
            ) {
                Ok(v) => Some(v),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            };

            return match available {
                Some(available) => Err(RepositoryError::InsufficientQuantity {
                    curing_batch_id: curing_batch_id.to_string(),
                    requested: quantity,
                    available,
                }),
                None => Err(RepositoryError::NotFound {
                    entity: "CuringBatch".to_string(),
                    id: curing_batch_id.to_string(),
                }),
            };
        }

        Ok(())
    }

    /// 区分「记录不存在」与「revision 冲突」
    fn diagnose_write_conflict(
        tx: &Transaction<'_>,
        batch_id: &str,
        expected_revision: i32,
    ) -> RepositoryError {
        match tx.query_row(
            "SELECT revision FROM production_batch WHERE batch_id = ?",
            params![batch_id],
            |row| row.get::<_, i32>(0),
        ) {
            Ok(actual) => RepositoryError::OptimisticLockFailure {
                batch_id: batch_id.to_string(),
                expected: expected_revision,
                actual,
            },
            Err(_) => RepositoryError::NotFound {
                entity: "ProductionBatch".to_string(),
                id: batch_id.to_string(),
            },
        }
    }
}

// ==========================================
// 行映射
// ==========================================

/// 映射数据库行到 ProductionBatch 对象
fn map_batch_row(row: &rusqlite::Row) -> rusqlite::Result<ProductionBatch> {
    let status_text: String = row.get(5)?;
    let status = BatchStatus::parse(&status_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("未知批次状态: {}", status_text).into(),
        )
    })?;

    Ok(ProductionBatch {
        batch_id: row.get(0)?,
        batch_number: row.get(1)?,
        product_id: row.get(2)?,
        quantity: row.get(3)?,
        unit: row.get(4)?,
        status,
        production_date: parse_date(&row.get::<_, String>(6)?, 6)?,
        production_start: parse_dt(&row.get::<_, String>(7)?, 7)?,
        completed_at: row
            .get::<_, Option<String>>(8)?
            .map(|s| parse_dt(&s, 8))
            .transpose()?,
        expiry_date: row
            .get::<_, Option<String>>(9)?
            .map(|s| parse_date(&s, 9))
            .transpose()?,
        final_temperature: row.get(10)?,
        temperature_compliant: row.get::<_, Option<i32>>(11)?.map(|v| v == 1),
        notes: row.get(12)?,
        operator_id: row.get(13)?,
        revision: row.get(14)?,
        created_at: parse_dt(&row.get::<_, String>(15)?, 15)?,
        updated_at: parse_dt(&row.get::<_, String>(16)?, 16)?,
    })
}

/// 映射数据库行到 MaterialConsumptionEntry 对象
fn map_entry_row(row: &rusqlite::Row) -> rusqlite::Result<MaterialConsumptionEntry> {
    let source_type: String = row.get(4)?;
    let reception_id: Option<String> = row.get(5)?;
    let curing_batch_id: Option<String> = row.get(6)?;
    let receipt_id: Option<String> = row.get(7)?;
    let manual_name: Option<String> = row.get(8)?;
    let manual_lot: Option<String> = row.get(9)?;

    let source = match (source_type.as_str(), reception_id, curing_batch_id, receipt_id, manual_name, manual_lot) {
        ("RECEPTION", Some(reception_id), _, _, _, _) => {
            ConsumptionSource::Reception { reception_id }
        }
        ("CURING", _, Some(curing_batch_id), _, _, _) => {
            ConsumptionSource::Curing { curing_batch_id }
        }
        ("AUXILIARY", _, _, Some(receipt_id), _, _) => {
            ConsumptionSource::Auxiliary { receipt_id }
        }
        ("MANUAL", _, _, _, Some(material_name), Some(lot_number)) => {
            ConsumptionSource::Manual {
                material_name,
                lot_number,
            }
        }
        _ => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("消耗条目来源列不一致: source_type={}", source_type).into(),
            ))
        }
    };

    Ok(MaterialConsumptionEntry {
        entry_id: row.get(0)?,
        batch_id: row.get(1)?,
        quantity: row.get(2)?,
        unit: row.get(3)?,
        source,
    })
}

// ==========================================
// 时间格式辅助（与 schema 的 datetime('now') 对齐）
// ==========================================

pub(crate) fn fmt_dt(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub(crate) fn parse_dt(s: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_date(s: &str, idx: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
