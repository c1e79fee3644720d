// ==========================================
// 食品生产批次追溯系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免“部分模块外键开启/部分不开启”
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 统一建表入口（init_schema），保证测试库与运行库结构一致
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化数据库 schema（幂等）
///
/// 表分两类：
/// - 核心表：production_batch / consumption_entry / batch_number_seq / corrective_action_queue
/// - 外部目录表（本引擎只读，主数据维护在别处）：product_master / reception_record /
///   curing_batch / auxiliary_receipt
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        -- ===== 外部目录表 =====

        CREATE TABLE IF NOT EXISTS product_master (
            product_id TEXT PRIMARY KEY,
            product_name TEXT NOT NULL,
            critical_temperature_c REAL,
            shelf_life_days INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS reception_record (
            reception_id TEXT PRIMARY KEY,
            supplier_id TEXT NOT NULL,
            supplier_name TEXT NOT NULL,
            batch_number TEXT NOT NULL,
            quantity_received REAL NOT NULL,
            unit TEXT NOT NULL,
            compliant INTEGER NOT NULL DEFAULT 1,
            received_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS curing_batch (
            curing_batch_id TEXT PRIMARY KEY,
            batch_number TEXT NOT NULL,
            started_on TEXT NOT NULL,
            ended_on TEXT,
            quantity_available REAL NOT NULL DEFAULT 0,
            reception_id TEXT REFERENCES reception_record(reception_id),
            completed INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS auxiliary_receipt (
            receipt_id TEXT PRIMARY KEY,
            supplier_id TEXT NOT NULL,
            supplier_name TEXT NOT NULL,
            batch_number TEXT NOT NULL,
            quantity REAL NOT NULL,
            unit TEXT NOT NULL,
            received_at TEXT NOT NULL
        );

        -- ===== 核心表 =====

        -- 批号序列表: 每个生产日期周期一行，last_seq 单调递增，删除批次不回收批号
        CREATE TABLE IF NOT EXISTS batch_number_seq (
            period TEXT PRIMARY KEY,
            last_seq INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS production_batch (
            batch_id TEXT PRIMARY KEY,
            batch_number TEXT NOT NULL UNIQUE,
            product_id TEXT NOT NULL REFERENCES product_master(product_id),
            quantity REAL NOT NULL,
            unit TEXT NOT NULL,
            status TEXT NOT NULL,
            production_date TEXT NOT NULL,
            production_start TEXT NOT NULL,
            completed_at TEXT,
            expiry_date TEXT,
            final_temperature REAL,
            temperature_compliant INTEGER,
            notes TEXT,
            operator_id TEXT,
            revision INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS consumption_entry (
            entry_id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES production_batch(batch_id),
            quantity REAL NOT NULL,
            unit TEXT NOT NULL,
            source_type TEXT NOT NULL,
            reception_id TEXT,
            curing_batch_id TEXT,
            receipt_id TEXT,
            manual_name TEXT,
            manual_lot TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_consumption_entry_batch
            ON consumption_entry(batch_id);

        -- 纠偏任务队列（事务性发件箱: 完工事务内写入，派发器异步投递）
        CREATE TABLE IF NOT EXISTS corrective_action_queue (
            request_id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES production_batch(batch_id),
            expected_value REAL NOT NULL,
            actual_value REAL NOT NULL,
            reason_code TEXT NOT NULL,
            dispatch_state TEXT NOT NULL DEFAULT 'PENDING',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL,
            dispatched_at TEXT
        );

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(
            read_schema_version(&conn).unwrap(),
            Some(CURRENT_SCHEMA_VERSION)
        );
    }
}
