// ==========================================
// 批次 API 集成测试
// ==========================================
// 覆盖: 输入校验、创建/编辑/完工/删除编排、状态改派、并发冲突、分页查询
// ==========================================


use chrono::{NaiveDate, TimeZone, Utc};
use food_trace::api::{
    ApiError, BatchListFilter, CompleteBatchInput, CreateBatchInput, UpdateBatchInput,
};
use food_trace::engine::ConsumptionEntryInput;
use food_trace::BatchStatus;
use test_helpers::{build_context, create_test_db, TestContext};

fn create_input(entries: Vec<ConsumptionEntryInput>) -> CreateBatchInput {
    CreateBatchInput {
        product_id: "P001".to_string(),
        quantity: 100.0,
        unit: "kg".to_string(),
        production_date: NaiveDate::from_ymd_opt(2026, 8, 25).unwrap(),
        production_start: Utc.with_ymd_and_hms(2026, 8, 25, 6, 0, 0).unwrap(),
        expiry_date: Some(NaiveDate::from_ymd_opt(2027, 2, 21).unwrap()),
        notes: Some("早班".to_string()),
        operator_id: Some("OP-01".to_string()),
        entries,
    }
}

fn update_input_from(ctx: &TestContext, batch_id: &str) -> UpdateBatchInput {
    let batch = ctx.batch_repo.find_by_id(batch_id).unwrap().unwrap();
    UpdateBatchInput {
        batch_id: batch.batch_id,
        revision: batch.revision,
        product_id: batch.product_id,
        quantity: batch.quantity,
        unit: batch.unit,
        production_start: batch.production_start,
        expiry_date: batch.expiry_date,
        status: None,
        completed_at: batch.completed_at,
        final_temperature: batch.final_temperature,
        temperature_compliant: batch.temperature_compliant,
        notes: batch.notes,
        operator_id: batch.operator_id,
        entries: Vec::new(),
    }
}

#[test]
fn test_create_batch_assigns_number_and_persists_entries() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();

    let detail = ctx
        .api
        .create_batch(&create_input(vec![
            ConsumptionEntryInput {
                quantity: 30.0,
                unit: "kg".to_string(),
                curing_batch_id: Some("C001".to_string()),
                ..Default::default()
            },
            ConsumptionEntryInput {
                quantity: 2.0,
                unit: "kg".to_string(),
                manual_name: Some("海盐".to_string()),
                manual_lot: Some("S-77".to_string()),
                ..Default::default()
            },
        ]))
        .unwrap();

    assert_eq!(detail.batch.status, BatchStatus::InProduction);
    assert_eq!(detail.batch.batch_number, "L20260825-01");
    assert_eq!(detail.batch.revision, 0);
    assert!(detail.batch.completed_at.is_none());

    // 详情读回: 条目已持久化
    let loaded = ctx.api.get_batch(&detail.batch.batch_id).unwrap().unwrap();
    assert_eq!(loaded.entries.len(), 2);
}

#[test]
fn test_create_rejects_invalid_input() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();

    // 未知产品
    let mut input = create_input(Vec::new());
    input.product_id = "P999".to_string();
    assert!(matches!(
        ctx.api.create_batch(&input),
        Err(ApiError::ValidationError(_))
    ));

    // 数量非正
    let mut input = create_input(Vec::new());
    input.quantity = 0.0;
    assert!(matches!(
        ctx.api.create_batch(&input),
        Err(ApiError::ValidationError(_))
    ));

    // 条目给出多个来源形态
    let input = create_input(vec![ConsumptionEntryInput {
        quantity: 5.0,
        unit: "kg".to_string(),
        reception_id: Some("R001".to_string()),
        curing_batch_id: Some("C001".to_string()),
        ..Default::default()
    }]);
    assert!(matches!(
        ctx.api.create_batch(&input),
        Err(ApiError::ValidationError(_))
    ));

    // 条目引用未完成腌制的批次
    let input = create_input(vec![ConsumptionEntryInput {
        quantity: 5.0,
        unit: "kg".to_string(),
        curing_batch_id: Some("C002".to_string()),
        ..Default::default()
    }]);
    assert!(matches!(
        ctx.api.create_batch(&input),
        Err(ApiError::ValidationError(_))
    ));

    // 条目引用不存在的收货记录
    let input = create_input(vec![ConsumptionEntryInput {
        quantity: 5.0,
        unit: "kg".to_string(),
        reception_id: Some("R999".to_string()),
        ..Default::default()
    }]);
    assert!(matches!(
        ctx.api.create_batch(&input),
        Err(ApiError::NotFound(_))
    ));

    // 校验失败不落库
    let page = ctx.api.list_batches(&BatchListFilter::default()).unwrap();
    assert!(page.batches.is_empty());
}

#[test]
fn test_update_replaces_entries_and_bumps_revision() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();

    let detail = ctx
        .api
        .create_batch(&create_input(vec![ConsumptionEntryInput {
            quantity: 30.0,
            unit: "kg".to_string(),
            curing_batch_id: Some("C001".to_string()),
            ..Default::default()
        }]))
        .unwrap();

    let mut input = update_input_from(&ctx, &detail.batch.batch_id);
    input.quantity = 120.0;
    input.entries = vec![ConsumptionEntryInput {
        quantity: 5.0,
        unit: "kg".to_string(),
        receipt_id: Some("A001".to_string()),
        ..Default::default()
    }];
    let updated = ctx.api.update_batch(&input).unwrap();

    assert_eq!(updated.batch.quantity, 120.0);
    assert_eq!(updated.batch.revision, 1);
    assert_eq!(updated.batch.batch_number, detail.batch.batch_number);
    assert_eq!(updated.entries.len(), 1);

    // 整组替换: 旧腌制占用回补
    let curing = ctx.catalog_repo.find_curing_batch("C001").unwrap().unwrap();
    assert_eq!(curing.quantity_available, 200.0);
}

#[test]
fn test_update_back_to_in_production_clears_completion() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();
    let detail = ctx.api.create_batch(&create_input(Vec::new())).unwrap();

    // 管理性编辑: 直接改派为 COMPLETED 并给出完工三元组
    let mut input = update_input_from(&ctx, &detail.batch.batch_id);
    input.status = Some(BatchStatus::Completed);
    input.completed_at = Some(Utc.with_ymd_and_hms(2026, 8, 25, 14, 0, 0).unwrap());
    input.final_temperature = Some(74.0);
    input.temperature_compliant = Some(true);
    let updated = ctx.api.update_batch(&input).unwrap();
    assert_eq!(updated.batch.status, BatchStatus::Completed);
    assert_eq!(updated.batch.final_temperature, Some(74.0));

    // 改回 IN_PRODUCTION: 完工三元组强制清空（即使传入仍携带旧值）
    let mut input = update_input_from(&ctx, &detail.batch.batch_id);
    input.status = Some(BatchStatus::InProduction);
    let reverted = ctx.api.update_batch(&input).unwrap();
    assert_eq!(reverted.batch.status, BatchStatus::InProduction);
    assert!(reverted.batch.completed_at.is_none());
    assert!(reverted.batch.final_temperature.is_none());
    assert!(reverted.batch.temperature_compliant.is_none());
}

#[test]
fn test_update_rejects_partial_completion_fields() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();
    let detail = ctx.api.create_batch(&create_input(Vec::new())).unwrap();

    let mut input = update_input_from(&ctx, &detail.batch.batch_id);
    input.status = Some(BatchStatus::Completed);
    input.final_temperature = Some(74.0); // 缺 completed_at 与 temperature_compliant
    assert!(matches!(
        ctx.api.update_batch(&input),
        Err(ApiError::ValidationError(_))
    ));
}

#[test]
fn test_update_with_stale_revision_conflicts() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();
    let detail = ctx.api.create_batch(&create_input(Vec::new())).unwrap();

    let stale = update_input_from(&ctx, &detail.batch.batch_id);

    // 另一调用方先行提交
    let mut first = stale.clone();
    first.notes = Some("先提交".to_string());
    ctx.api.update_batch(&first).unwrap();

    let result = ctx.api.update_batch(&stale);
    match result {
        Err(ApiError::Conflict(msg)) => assert!(msg.contains("已被其他调用方修改")),
        other => panic!("预期并发冲突, 实际: {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_complete_batch_via_api() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();
    let detail = ctx.api.create_batch(&create_input(Vec::new())).unwrap();

    let outcome = ctx
        .api
        .complete_batch(&CompleteBatchInput {
            batch_id: detail.batch.batch_id.clone(),
            final_temperature: 68.0,
            completed_at: Utc.with_ymd_and_hms(2026, 8, 25, 14, 30, 0).unwrap(),
            notes: Some("温度未达标".to_string()),
        })
        .await
        .unwrap();

    assert!(!outcome.compliant);
    assert_eq!(outcome.batch.status, BatchStatus::Completed);
    assert!(outcome.corrective_action.is_some());
    assert!(outcome.side_effect_delivered);
}

#[test]
fn test_delete_batch_via_api() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();
    let detail = ctx.api.create_batch(&create_input(Vec::new())).unwrap();

    ctx.api.delete_batch(&detail.batch.batch_id).unwrap();
    assert!(ctx.api.get_batch(&detail.batch.batch_id).unwrap().is_none());

    // 再次删除 → NotFound
    assert!(matches!(
        ctx.api.delete_batch(&detail.batch.batch_id),
        Err(ApiError::NotFound(_))
    ));
}

#[test]
fn test_list_batches_filters_and_clamps_limit() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();

    for day in [24, 25, 25] {
        let mut input = create_input(Vec::new());
        input.production_date = NaiveDate::from_ymd_opt(2026, 8, day).unwrap();
        ctx.api.create_batch(&input).unwrap();
    }

    // 状态过滤
    let page = ctx
        .api
        .list_batches(&BatchListFilter {
            status: Some(BatchStatus::InProduction),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.batches.len(), 3);

    // 日期范围过滤
    let page = ctx
        .api
        .list_batches(&BatchListFilter {
            date_from: Some(NaiveDate::from_ymd_opt(2026, 8, 25).unwrap()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.batches.len(), 2);

    // limit 受配置上限收敛（默认 100）
    let page = ctx
        .api
        .list_batches(&BatchListFilter {
            limit: Some(100_000),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.limit, 100);

    // 分页
    let page = ctx
        .api
        .list_batches(&BatchListFilter {
            limit: Some(2),
            offset: Some(2),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.batches.len(), 1);
    assert_eq!(page.offset, 2);
}

#[test]
fn test_provenance_via_api() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let ctx = build_context(&db_path).unwrap();

    let detail = ctx
        .api
        .create_batch(&create_input(vec![ConsumptionEntryInput {
            quantity: 30.0,
            unit: "kg".to_string(),
            curing_batch_id: Some("C001".to_string()),
            ..Default::default()
        }]))
        .unwrap();

    let report = ctx.api.get_provenance(&detail.batch.batch_id).unwrap();
    assert_eq!(report.batch.batch_id, detail.batch.batch_id);
    assert_eq!(report.timeline.len(), 3);
    assert_eq!(report.origin_materials.len(), 1);

    assert!(matches!(
        ctx.api.get_provenance("no-such-batch"),
        Err(ApiError::NotFound(_))
    ));
}
