// ==========================================
// 食品生产批次追溯系统 - 外部目录仓储（只读）
// ==========================================
// 红线: 目录主数据的增删改归外部协作方，本引擎只做解析查询
// 用途: 台账写入前的引用校验 + 溯源重建时的来源解析
// ==========================================

use crate::domain::catalog::{AuxiliaryReceipt, CuringBatch, ProductMaster, ReceptionRecord};
use crate::repository::batch_repo::{parse_date, parse_dt};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// CatalogRepository - 目录仓储
// ==========================================
pub struct CatalogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogRepository {
    /// 创建新的 CatalogRepository 实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按 product_id 查询产品主数据
    pub fn find_product(&self, product_id: &str) -> RepositoryResult<Option<ProductMaster>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            r#"SELECT product_id, product_name, critical_temperature_c, shelf_life_days
               FROM product_master WHERE product_id = ?"#,
            params![product_id],
            |row| {
                Ok(ProductMaster {
                    product_id: row.get(0)?,
                    product_name: row.get(1)?,
                    critical_temperature_c: row.get(2)?,
                    shelf_life_days: row.get(3)?,
                })
            },
        ) {
            Ok(product) => Ok(Some(product)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 按 reception_id 查询收货记录
    pub fn find_reception(&self, reception_id: &str) -> RepositoryResult<Option<ReceptionRecord>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            r#"SELECT reception_id, supplier_id, supplier_name, batch_number,
                      quantity_received, unit, compliant, received_at
               FROM reception_record WHERE reception_id = ?"#,
            params![reception_id],
            map_reception_row,
        ) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 按 curing_batch_id 查询腌制批次
    pub fn find_curing_batch(
        &self,
        curing_batch_id: &str,
    ) -> RepositoryResult<Option<CuringBatch>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            r#"SELECT curing_batch_id, batch_number, started_on, ended_on,
                      quantity_available, reception_id, completed
               FROM curing_batch WHERE curing_batch_id = ?"#,
            params![curing_batch_id],
            map_curing_row,
        ) {
            Ok(batch) => Ok(Some(batch)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 按 receipt_id 查询辅料入库记录
    pub fn find_auxiliary_receipt(
        &self,
        receipt_id: &str,
    ) -> RepositoryResult<Option<AuxiliaryReceipt>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            r#"SELECT receipt_id, supplier_id, supplier_name, batch_number,
                      quantity, unit, received_at
               FROM auxiliary_receipt WHERE receipt_id = ?"#,
            params![receipt_id],
            |row| {
                Ok(AuxiliaryReceipt {
                    receipt_id: row.get(0)?,
                    supplier_id: row.get(1)?,
                    supplier_name: row.get(2)?,
                    batch_number: row.get(3)?,
                    quantity: row.get(4)?,
                    unit: row.get(5)?,
                    received_at: parse_dt(&row.get::<_, String>(6)?, 6)?,
                })
            },
        ) {
            Ok(receipt) => Ok(Some(receipt)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询可供消耗的腌制批次（已完成且剩余可用量 > 0）
    pub fn list_available_curing_batches(&self) -> RepositoryResult<Vec<CuringBatch>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT curing_batch_id, batch_number, started_on, ended_on,
                      quantity_available, reception_id, completed
               FROM curing_batch
               WHERE completed = 1 AND quantity_available > 0
               ORDER BY started_on"#,
        )?;

        let batches = stmt
            .query_map([], map_curing_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(batches)
    }
}

// ==========================================
// 行映射
// ==========================================

fn map_reception_row(row: &rusqlite::Row) -> rusqlite::Result<ReceptionRecord> {
    Ok(ReceptionRecord {
        reception_id: row.get(0)?,
        supplier_id: row.get(1)?,
        supplier_name: row.get(2)?,
        batch_number: row.get(3)?,
        quantity_received: row.get(4)?,
        unit: row.get(5)?,
        compliant: row.get::<_, i32>(6)? == 1,
        received_at: parse_dt(&row.get::<_, String>(7)?, 7)?,
    })
}

fn map_curing_row(row: &rusqlite::Row) -> rusqlite::Result<CuringBatch> {
    Ok(CuringBatch {
        curing_batch_id: row.get(0)?,
        batch_number: row.get(1)?,
        started_on: parse_date(&row.get::<_, String>(2)?, 2)?,
        ended_on: row
            .get::<_, Option<String>>(3)?
            .map(|s| parse_date(&s, 3))
            .transpose()?,
        quantity_available: row.get(4)?,
        reception_id: row.get(5)?,
        completed: row.get::<_, i32>(6)? == 1,
    })
}
