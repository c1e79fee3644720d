// ==========================================
// 食品生产批次追溯系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value, scope_id='global')
// ==========================================

use crate::db::configure_sqlite_connection;
use crate::DEFAULT_CRITICAL_TEMPERATURE_C;
use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::{Arc, Mutex};

/// 批次列表单页上限的默认值
pub const DEFAULT_LIST_PAGE_LIMIT: i64 = 100;

/// 纠偏任务派发重试上限的默认值
pub const DEFAULT_CORRECTIVE_MAX_ATTEMPTS: i32 = 3;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入（覆写）global scope 的配置值
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        conn.execute(
            r#"INSERT INTO config_kv (scope_id, key, value, updated_at)
               VALUES ('global', ?1, ?2, datetime('now'))
               ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')"#,
            params![key, value],
        )?;
        Ok(())
    }

    // ==========================================
    // 类型化配置读取
    // ==========================================

    /// 产品未配置关键温度时的兜底值（摄氏度）
    pub fn get_default_critical_temperature(&self) -> Result<f64, Box<dyn Error>> {
        match self.get_config_value("default_critical_temperature_c")? {
            Some(v) => Ok(v.parse::<f64>()?),
            None => Ok(DEFAULT_CRITICAL_TEMPERATURE_C),
        }
    }

    /// 批次列表单页上限
    pub fn get_list_page_limit(&self) -> Result<i64, Box<dyn Error>> {
        match self.get_config_value("list_page_limit")? {
            Some(v) => Ok(v.parse::<i64>()?),
            None => Ok(DEFAULT_LIST_PAGE_LIMIT),
        }
    }

    /// 纠偏任务派发重试上限
    pub fn get_corrective_max_attempts(&self) -> Result<i32, Box<dyn Error>> {
        match self.get_config_value("corrective_max_attempts")? {
            Some(v) => Ok(v.parse::<i32>()?),
            None => Ok(DEFAULT_CORRECTIVE_MAX_ATTEMPTS),
        }
    }
}
