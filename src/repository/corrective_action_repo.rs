// ==========================================
// 食品生产批次追溯系统 - 纠偏任务队列仓储
// ==========================================
// 用途: 事务性发件箱（完工事务内入队，派发器异步投递 + 持久重试）
// ==========================================

use crate::domain::corrective_action::CorrectiveActionRequest;
use crate::domain::types::DispatchState;
use crate::repository::batch_repo::{fmt_dt, parse_dt};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, Transaction};
use std::sync::{Arc, Mutex};

const QUEUE_COLUMNS: &str = r#"request_id, batch_id, expected_value, actual_value, reason_code,
           dispatch_state, attempts, last_error, created_at, dispatched_at"#;

// ==========================================
// CorrectiveActionRepository - 纠偏队列仓储
// ==========================================
pub struct CorrectiveActionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CorrectiveActionRepository {
    /// 创建新的 CorrectiveActionRepository 实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 在调用方事务内入队（发件箱写入与完工写入同事务提交）
    pub fn enqueue_tx(
        tx: &Transaction<'_>,
        request: &CorrectiveActionRequest,
    ) -> RepositoryResult<()> {
        tx.execute(
            &format!(
                r#"INSERT INTO corrective_action_queue ({QUEUE_COLUMNS})
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
            ),
            params![
                &request.request_id,
                &request.batch_id,
                &request.expected_value,
                &request.actual_value,
                &request.reason_code,
                &request.dispatch_state.to_string(),
                &request.attempts,
                &request.last_error,
                &fmt_dt(&request.created_at),
                &request.dispatched_at.as_ref().map(fmt_dt),
            ],
        )?;
        Ok(())
    }

    /// 查询待派发的队列行（按创建时间升序）
    pub fn list_pending(&self) -> RepositoryResult<Vec<CorrectiveActionRequest>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            r#"SELECT {QUEUE_COLUMNS} FROM corrective_action_queue
               WHERE dispatch_state = 'PENDING'
               ORDER BY created_at"#
        ))?;

        let requests = stmt
            .query_map([], map_request_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(requests)
    }

    /// 查询批次关联的纠偏请求
    pub fn find_by_batch(&self, batch_id: &str) -> RepositoryResult<Vec<CorrectiveActionRequest>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            r#"SELECT {QUEUE_COLUMNS} FROM corrective_action_queue
               WHERE batch_id = ?
               ORDER BY created_at"#
        ))?;

        let requests = stmt
            .query_map(params![batch_id], map_request_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(requests)
    }

    /// 标记派发成功
    pub fn mark_dispatched(&self, request_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            r#"UPDATE corrective_action_queue
               SET dispatch_state = 'DISPATCHED', dispatched_at = ?,
                   attempts = attempts + 1, last_error = NULL
               WHERE request_id = ?"#,
            params![&fmt_dt(&Utc::now()), request_id],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "CorrectiveActionRequest".to_string(),
                id: request_id.to_string(),
            });
        }
        Ok(())
    }

    /// 记录一次派发失败
    ///
    /// attempts 自增并记录原因；达到重试上限后置为 FAILED（需要人工介入），
    /// 未达上限则保持 PENDING 等待下一轮重派。
    pub fn record_failure(
        &self,
        request_id: &str,
        error: &str,
        max_attempts: i32,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            r#"UPDATE corrective_action_queue
               SET attempts = attempts + 1,
                   last_error = ?,
                   dispatch_state = CASE WHEN attempts + 1 >= ? THEN 'FAILED' ELSE 'PENDING' END
               WHERE request_id = ?"#,
            params![error, max_attempts, request_id],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "CorrectiveActionRequest".to_string(),
                id: request_id.to_string(),
            });
        }
        Ok(())
    }
}

// ==========================================
// 行映射
// ==========================================

fn map_request_row(row: &rusqlite::Row) -> rusqlite::Result<CorrectiveActionRequest> {
    let state_text: String = row.get(5)?;
    let dispatch_state = DispatchState::parse(&state_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("未知派发状态: {}", state_text).into(),
        )
    })?;

    Ok(CorrectiveActionRequest {
        request_id: row.get(0)?,
        batch_id: row.get(1)?,
        expected_value: row.get(2)?,
        actual_value: row.get(3)?,
        reason_code: row.get(4)?,
        dispatch_state,
        attempts: row.get(6)?,
        last_error: row.get(7)?,
        created_at: parse_dt(&row.get::<_, String>(8)?, 8)?,
        dispatched_at: row
            .get::<_, Option<String>>(9)?
            .map(|s| parse_dt(&s, 9))
            .transpose()?,
    })
}
