// ==========================================
// 批次仓储集成测试
// ==========================================
// 覆盖: 批号分配/不复用、级联删除、乐观锁、腌制可用量扣减与回补
// ==========================================


use chrono::{NaiveDate, TimeZone, Utc};
use food_trace::domain::batch::{ConsumptionSource, MaterialConsumptionEntry, ProductionBatch};
use food_trace::repository::RepositoryError;
use food_trace::BatchStatus;
use test_helpers::{build_context, create_test_db};
use uuid::Uuid;

fn sample_batch(product_id: &str, production_date: NaiveDate) -> ProductionBatch {
    let now = Utc.with_ymd_and_hms(2026, 8, 25, 6, 0, 0).unwrap();
    ProductionBatch {
        batch_id: Uuid::new_v4().to_string(),
        batch_number: String::new(),
        product_id: product_id.to_string(),
        quantity: 100.0,
        unit: "kg".to_string(),
        status: BatchStatus::InProduction,
        production_date,
        production_start: now,
        completed_at: None,
        expiry_date: None,
        final_temperature: None,
        temperature_compliant: None,
        notes: None,
        operator_id: Some("OP-01".to_string()),
        revision: 0,
        created_at: now,
        updated_at: now,
    }
}

fn curing_entry(batch_id: &str, curing_batch_id: &str, quantity: f64) -> MaterialConsumptionEntry {
    MaterialConsumptionEntry {
        entry_id: Uuid::new_v4().to_string(),
        batch_id: batch_id.to_string(),
        quantity,
        unit: "kg".to_string(),
        source: ConsumptionSource::Curing {
            curing_batch_id: curing_batch_id.to_string(),
        },
    }
}

#[test]
fn test_batch_numbers_sequential_within_period() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();
    let date = NaiveDate::from_ymd_opt(2026, 8, 25).unwrap();

    let mut b1 = sample_batch("P001", date);
    let n1 = ctx.batch_repo.create_with_entries(&mut b1, &[]).unwrap();
    let mut b2 = sample_batch("P001", date);
    let n2 = ctx.batch_repo.create_with_entries(&mut b2, &[]).unwrap();

    assert_eq!(n1, "L20260825-01");
    assert_eq!(n2, "L20260825-02");

    // 不同生产日期独立计数
    let mut b3 = sample_batch("P001", NaiveDate::from_ymd_opt(2026, 8, 26).unwrap());
    let n3 = ctx.batch_repo.create_with_entries(&mut b3, &[]).unwrap();
    assert_eq!(n3, "L20260826-01");

    // 批号反查
    let found = ctx
        .batch_repo
        .find_by_batch_number("L20260825-02")
        .unwrap()
        .unwrap();
    assert_eq!(found.batch_id, b2.batch_id);
    assert!(ctx
        .batch_repo
        .find_by_batch_number("L20991231-99")
        .unwrap()
        .is_none());
}

#[test]
fn test_batch_number_not_reused_after_delete() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();
    let date = NaiveDate::from_ymd_opt(2026, 8, 25).unwrap();

    let mut b1 = sample_batch("P001", date);
    let n1 = ctx.batch_repo.create_with_entries(&mut b1, &[]).unwrap();
    assert_eq!(n1, "L20260825-01");

    ctx.batch_repo.delete(&b1.batch_id).unwrap();

    // 序列不回退: 删除后的批号不会重新分配
    let mut b2 = sample_batch("P001", date);
    let n2 = ctx.batch_repo.create_with_entries(&mut b2, &[]).unwrap();
    assert_eq!(n2, "L20260825-02");
}

#[test]
fn test_delete_cascades_to_entries() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();

    let mut batch = sample_batch("P001", NaiveDate::from_ymd_opt(2026, 8, 25).unwrap());
    let entries = vec![
        curing_entry(&batch.batch_id, "C001", 30.0),
        MaterialConsumptionEntry {
            entry_id: Uuid::new_v4().to_string(),
            batch_id: batch.batch_id.clone(),
            quantity: 2.0,
            unit: "kg".to_string(),
            source: ConsumptionSource::Manual {
                material_name: "海盐".to_string(),
                lot_number: "S-77".to_string(),
            },
        },
    ];
    ctx.batch_repo
        .create_with_entries(&mut batch, &entries)
        .unwrap();
    assert_eq!(ctx.batch_repo.find_entries(&batch.batch_id).unwrap().len(), 2);

    ctx.batch_repo.delete(&batch.batch_id).unwrap();

    assert!(ctx.batch_repo.find_by_id(&batch.batch_id).unwrap().is_none());
    assert!(ctx.batch_repo.find_entries(&batch.batch_id).unwrap().is_empty());

    // 删除不存在的批次
    let result = ctx.batch_repo.delete(&batch.batch_id);
    assert!(matches!(result, Err(RepositoryError::NotFound { .. })));
}

#[test]
fn test_optimistic_lock_rejects_stale_revision() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();

    let mut batch = sample_batch("P001", NaiveDate::from_ymd_opt(2026, 8, 25).unwrap());
    ctx.batch_repo.create_with_entries(&mut batch, &[]).unwrap();

    // 第一次更新: revision 0 → 1
    let mut update = ctx.batch_repo.find_by_id(&batch.batch_id).unwrap().unwrap();
    update.notes = Some("第一次编辑".to_string());
    ctx.batch_repo.update_with_entries(&update, &[]).unwrap();

    let persisted = ctx.batch_repo.find_by_id(&batch.batch_id).unwrap().unwrap();
    assert_eq!(persisted.revision, 1);

    // 基于过期 revision 的第二次更新被拒绝
    update.notes = Some("基于过期快照的编辑".to_string());
    let result = ctx.batch_repo.update_with_entries(&update, &[]);
    match result {
        Err(RepositoryError::OptimisticLockFailure {
            expected, actual, ..
        }) => {
            assert_eq!(expected, 0);
            assert_eq!(actual, 1);
        }
        other => panic!("预期乐观锁冲突, 实际: {:?}", other.map(|_| ())),
    }

    // 被拒绝的更新不落库
    let persisted = ctx.batch_repo.find_by_id(&batch.batch_id).unwrap().unwrap();
    assert_eq!(persisted.notes.as_deref(), Some("第一次编辑"));
}

#[test]
fn test_curing_quantity_allocated_and_released() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();

    // C001 种子可用量 200.0
    let mut batch = sample_batch("P001", NaiveDate::from_ymd_opt(2026, 8, 25).unwrap());
    let entries = vec![curing_entry(&batch.batch_id, "C001", 60.0)];
    ctx.batch_repo
        .create_with_entries(&mut batch, &entries)
        .unwrap();

    let curing = ctx.catalog_repo.find_curing_batch("C001").unwrap().unwrap();
    assert_eq!(curing.quantity_available, 140.0);

    // 整组替换为更小的消耗: 旧量回补后再扣减
    let persisted = ctx.batch_repo.find_by_id(&batch.batch_id).unwrap().unwrap();
    let entries = vec![curing_entry(&batch.batch_id, "C001", 10.0)];
    ctx.batch_repo
        .update_with_entries(&persisted, &entries)
        .unwrap();

    let curing = ctx.catalog_repo.find_curing_batch("C001").unwrap().unwrap();
    assert_eq!(curing.quantity_available, 190.0);

    // 删除批次回补全部占用
    ctx.batch_repo.delete(&batch.batch_id).unwrap();
    let curing = ctx.catalog_repo.find_curing_batch("C001").unwrap().unwrap();
    assert_eq!(curing.quantity_available, 200.0);
}

#[test]
fn test_curing_over_allocation_rejected() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();

    let mut batch = sample_batch("P001", NaiveDate::from_ymd_opt(2026, 8, 25).unwrap());
    let entries = vec![curing_entry(&batch.batch_id, "C001", 500.0)];
    let result = ctx.batch_repo.create_with_entries(&mut batch, &entries);

    match result {
        Err(RepositoryError::InsufficientQuantity {
            requested,
            available,
            ..
        }) => {
            assert_eq!(requested, 500.0);
            assert_eq!(available, 200.0);
        }
        other => panic!("预期可用量不足, 实际: {:?}", other.map(|_| ())),
    }

    // 事务回滚: 批次与条目都不落库，可用量不变
    assert!(ctx.batch_repo.find_by_id(&batch.batch_id).unwrap().is_none());
    let curing = ctx.catalog_repo.find_curing_batch("C001").unwrap().unwrap();
    assert_eq!(curing.quantity_available, 200.0);
}

#[test]
fn test_available_curing_batches_reflect_allocations() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();

    // 种子数据: C001 已完成可用 200，C002 未完成（不可供消耗）
    let available = ctx.catalog_repo.list_available_curing_batches().unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].curing_batch_id, "C001");

    // 全量占用后从可用清单消失
    let mut batch = sample_batch("P001", NaiveDate::from_ymd_opt(2026, 8, 25).unwrap());
    let entries = vec![curing_entry(&batch.batch_id, "C001", 200.0)];
    ctx.batch_repo
        .create_with_entries(&mut batch, &entries)
        .unwrap();
    assert!(ctx.catalog_repo.list_available_curing_batches().unwrap().is_empty());
}

#[test]
fn test_list_filters_and_pagination() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();

    let d1 = NaiveDate::from_ymd_opt(2026, 8, 24).unwrap();
    let d2 = NaiveDate::from_ymd_opt(2026, 8, 25).unwrap();
    for date in [d1, d2, d2] {
        let mut batch = sample_batch("P001", date);
        ctx.batch_repo.create_with_entries(&mut batch, &[]).unwrap();
    }

    use food_trace::repository::BatchFilter;

    // 日期范围过滤（含边界）
    let batches = ctx
        .batch_repo
        .list(&BatchFilter {
            date_from: Some(d2),
            date_to: Some(d2),
            limit: 10,
            offset: 0,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(batches.len(), 2);

    // 分页: 生产日期降序 + 批号降序
    let page = ctx
        .batch_repo
        .list(&BatchFilter {
            limit: 2,
            offset: 0,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].batch_number, "L20260825-02");
    assert_eq!(page[1].batch_number, "L20260825-01");

    let page = ctx
        .batch_repo
        .list(&BatchFilter {
            limit: 2,
            offset: 2,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].batch_number, "L20260824-01");

    // 批号模糊匹配
    let hits = ctx
        .batch_repo
        .list(&BatchFilter {
            text: Some("20260824".to_string()),
            limit: 10,
            offset: 0,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(hits.len(), 1);
}
