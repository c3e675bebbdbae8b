// ==========================================
// 订单导入管道集成测试
// ==========================================
// 覆盖: 预览计数 / 映射失败 / 分批失败隔离 / 取消 / 超时 / 解析超时
// 订单库: MockOrderStore
// ==========================================

mod helpers;

use helpers::MockOrderStore;
use order_import::config::ImportConfig;
use order_import::domain::{CanonicalField, ErrorKind, Termination};
use order_import::importer::{
    DecodedTable, ExecuteOptions, FieldMapper, FilePayload, ImportError, ImportResult,
    OrderImportPipeline, OrderImporter, RowTransformer, RunContext, TabularDecoder,
    UniversalDecoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_helpers::{csv_payload, orders_csv, test_config, ORDER_HEADERS};
use tokio_util::sync::CancellationToken;

fn importer(store: Arc<MockOrderStore>, config: ImportConfig) -> OrderImporter {
    OrderImporter::new(store, config)
}

// ==========================================
// 预览
// ==========================================

#[tokio::test]
async fn test_preview_single_valid_row() {
    test_helpers_init();
    let store = Arc::new(MockOrderStore::new());
    let importer = importer(store.clone(), ImportConfig::default());

    let preview = importer
        .preview(
            csv_payload(&[ORDER_HEADERS, "Jane Doe,+60123456789,2024-03-01,150.00"]),
            None,
            &RunContext::new(),
        )
        .await
        .unwrap();

    for field in [
        CanonicalField::CustomerName,
        CanonicalField::PhoneNumber,
        CanonicalField::OrderDate,
        CanonicalField::TotalAmount,
    ] {
        assert!(preview.mapping.is_mapped(field), "{} should be mapped", field);
    }
    assert_eq!(preview.report.total_rows, 1);
    assert_eq!(preview.report.valid_rows, 1);

    let row = match &preview.outcomes[0] {
        order_import::RowOutcome::Valid(row) => row,
        other => panic!("expected valid row, got {:?}", other),
    };
    assert_eq!(row.row_number, 2);
    assert_eq!(row.total_amount, 150.0);
    assert_eq!(row.currency, "MYR");
    assert_eq!(row.customer.phone.as_deref(), Some("+60123456789"));
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_preview_negative_amount_invalid() {
    let importer = importer(Arc::new(MockOrderStore::new()), ImportConfig::default());

    let preview = importer
        .preview(
            csv_payload(&[ORDER_HEADERS, "Jane Doe,+60123456789,2024-03-01,-10"]),
            None,
            &RunContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(preview.report.total_rows, 1);
    assert_eq!(preview.report.invalid_rows, 1);
    assert!(preview.report.errors.items[0]
        .message
        .contains("amount must be non-negative"));
}

#[tokio::test]
async fn test_preview_counts_balance() {
    let importer = importer(Arc::new(MockOrderStore::new()), ImportConfig::default());

    let preview = importer
        .preview(
            csv_payload(&[
                ORDER_HEADERS,
                "Jane Doe,+60123456789,2024-03-01,150.00",
                "Jane Doe,+60123456789,2024-03-01,150.00",
                "Ahmad,0129876543,,20",
                "Siti,0131234567,2024-03-02,abc",
                "Lee,0141234567,02/03/2024,RM 35.50",
            ]),
            None,
            &RunContext::new(),
        )
        .await
        .unwrap();

    let report = &preview.report;
    assert_eq!(report.total_rows, 5);
    assert_eq!(report.valid_rows, 2);
    assert_eq!(report.invalid_rows, 2);
    assert_eq!(report.duplicate_rows, 1);
    assert!(report.preview_counts_balance());

    // 空日期永远无效
    let blank_date = report.errors.items.iter().find(|e| e.row_number == 4).unwrap();
    assert_eq!(blank_date.kind, ErrorKind::Validation);
    assert!(blank_date.message.contains("order date is empty"));

    assert_eq!(report.duplicates.items[0].row_number, 3);
    assert_eq!(
        report.duplicates.items[0].message,
        "duplicate of row 2 in this file"
    );
}

#[tokio::test]
async fn test_missing_required_mapping_is_fatal() {
    let importer = importer(Arc::new(MockOrderStore::new()), ImportConfig::default());

    let result = importer
        .preview(
            csv_payload(&["Foo,Bar,Baz", "1,2,3"]),
            None,
            &RunContext::new(),
        )
        .await;

    match result {
        Err(ImportError::MappingError {
            missing,
            detected_headers,
            ..
        }) => {
            assert!(missing.contains(&CanonicalField::OrderDate));
            assert_eq!(detected_headers, vec!["Foo", "Bar", "Baz"]);
        }
        other => panic!("expected mapping error, got {:?}", other.map(|p| p.report)),
    }
}

#[tokio::test]
async fn test_generic_order_header_is_not_a_date_column() {
    let importer = importer(Arc::new(MockOrderStore::new()), ImportConfig::default());

    let result = importer
        .preview(
            csv_payload(&["Order,Name,Amount", "1001,Jane,10"]),
            None,
            &RunContext::new(),
        )
        .await;

    match result {
        Err(ImportError::MappingError { missing, .. }) => {
            assert_eq!(missing, vec![CanonicalField::OrderDate]);
        }
        other => panic!("expected mapping error, got {:?}", other.map(|p| p.report)),
    }
}

#[tokio::test]
async fn test_short_year_and_bare_number_dates() {
    let importer = importer(Arc::new(MockOrderStore::new()), ImportConfig::default());

    let preview = importer
        .preview(
            csv_payload(&["Name,Order Date,Amount", "A,2024,10", "B,01/03/24,10"]),
            None,
            &RunContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(preview.report.invalid_rows, 1);
    assert_eq!(preview.report.valid_rows, 1);
    assert_eq!(preview.report.errors.items[0].row_number, 2);
    assert!(preview.report.errors.items[0]
        .message
        .contains("cannot parse order date '2024'"));

    let row = match &preview.outcomes[1] {
        order_import::RowOutcome::Valid(row) => row,
        other => panic!("expected valid row, got {:?}", other),
    };
    assert_eq!(row.order_date.to_string(), "2024-03-01");
}

#[tokio::test]
async fn test_manual_mapping_resolves_unknown_headers() {
    let importer = importer(Arc::new(MockOrderStore::new()), ImportConfig::default());
    let manual = [
        ("customer_name".to_string(), "Pelanggan".to_string()),
        ("order_date".to_string(), "Bila".to_string()),
    ]
    .into_iter()
    .collect();

    let preview = importer
        .preview(
            csv_payload(&["Pelanggan,Bila", "Aisyah,2024-03-05"]),
            Some(manual),
            &RunContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(preview.mapping.header_for(CanonicalField::OrderDate), Some("Bila"));
    assert_eq!(preview.report.valid_rows, 1);
}

#[tokio::test]
async fn test_store_lookup_failure_is_fatal() {
    let store = Arc::new(MockOrderStore::new().failing_lookups());
    let importer = importer(store.clone(), ImportConfig::default());

    let result = importer
        .execute(orders_csv(3), ExecuteOptions::default(), &RunContext::new())
        .await;

    assert!(matches!(result, Err(ImportError::StoreError(_))));
    assert_eq!(store.call_count(), 0);
}

// ==========================================
// 执行
// ==========================================

#[tokio::test]
async fn test_failing_batch_does_not_stop_others() {
    // 批大小 2，5 行 → 3 批；第 2 批整批失败
    let store = Arc::new(MockOrderStore::new().failing_calls(&[2]));
    let importer = importer(store.clone(), test_config(2, 1));

    let report = importer
        .execute(orders_csv(5), ExecuteOptions::default(), &RunContext::new())
        .await
        .unwrap();

    assert_eq!(report.batches, 3);
    assert_eq!(report.inserted_rows, 3);
    assert_eq!(report.failed_insert_rows, 2);
    assert_eq!(report.termination, Termination::Completed);
    assert!(report.execute_counts_balance());

    let store_errors: Vec<usize> = report
        .errors
        .items
        .iter()
        .filter(|e| e.kind == ErrorKind::Store)
        .map(|e| e.row_number)
        .collect();
    assert_eq!(store_errors, vec![4, 5]);
    assert_eq!(store.inserted_rows(), vec![2, 3, 6]);
}

#[tokio::test]
async fn test_failing_batches_with_concurrent_dispatch() {
    // 9 行，批大小 2 → 5 批，最多 4 批在途；第 1、4 次调用整批失败
    let store = Arc::new(MockOrderStore::new().failing_calls(&[1, 4]));
    let importer = importer(store.clone(), test_config(2, 4));

    let report = importer
        .execute(orders_csv(9), ExecuteOptions::default(), &RunContext::new())
        .await
        .unwrap();

    assert_eq!(report.batches, 5);
    assert_eq!(report.inserted_rows, 5);
    assert_eq!(report.failed_insert_rows, 4);
    assert_eq!(report.termination, Termination::Completed);
    assert!(report.execute_counts_balance());

    let mut store_errors: Vec<usize> = report
        .errors
        .items
        .iter()
        .filter(|e| e.kind == ErrorKind::Store)
        .map(|e| e.row_number)
        .collect();
    store_errors.sort_unstable();
    assert_eq!(store_errors, vec![2, 3, 8, 9]);

    // 每行恰好落在 inserted / failed 之一
    let mut handled = store.inserted_rows();
    handled.extend(&store_errors);
    handled.sort_unstable();
    assert_eq!(handled, (2..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_second_execute_inserts_nothing() {
    let store = Arc::new(MockOrderStore::new());
    let importer = importer(store.clone(), ImportConfig::default());

    let first = importer
        .execute(orders_csv(4), ExecuteOptions::default(), &RunContext::new())
        .await
        .unwrap();
    assert_eq!(first.inserted_rows, 4);

    let second = importer
        .execute(orders_csv(4), ExecuteOptions::default(), &RunContext::new())
        .await
        .unwrap();
    assert_eq!(second.inserted_rows, 0);
    assert_eq!(second.duplicates_skipped, 4);
    assert!(second.execute_counts_balance());
    assert_eq!(store.inserted_rows().len(), 4);
}

#[tokio::test]
async fn test_cancel_after_two_batches() {
    // 10 行，批大小 2 → 5 批；第 2 批完成前触发取消
    let ctx = RunContext::new();
    let store = Arc::new(MockOrderStore::new().cancel_after(2, ctx.cancel_token().clone()));
    let importer = importer(store.clone(), test_config(2, 1));

    let report = importer
        .execute(orders_csv(10), ExecuteOptions::default(), &ctx)
        .await
        .unwrap();

    assert_eq!(report.termination, Termination::Cancelled);
    assert_eq!(report.batches, 2);
    assert_eq!(report.inserted_rows, 4);
    assert_eq!(report.not_attempted_rows, 6);
    assert!(report.execute_counts_balance());
    assert_eq!(store.call_count(), 2);
}

#[tokio::test]
async fn test_cancel_after_last_batch_is_completed() {
    // 10 行，批大小 2 → 5 批；取消在最后一批完成前才触发
    let ctx = RunContext::new();
    let store = Arc::new(MockOrderStore::new().cancel_after(5, ctx.cancel_token().clone()));
    let importer = importer(store.clone(), test_config(2, 1));

    let report = importer
        .execute(orders_csv(10), ExecuteOptions::default(), &ctx)
        .await
        .unwrap();

    assert!(ctx.is_cancelled());
    assert_eq!(report.not_attempted_rows, 0);
    assert_eq!(report.inserted_rows, 10);
    assert_eq!(report.termination, Termination::Completed);
}

#[tokio::test]
async fn test_run_deadline_stops_dispatch() {
    let store = Arc::new(MockOrderStore::new().with_delay(Duration::from_millis(40)));
    let config = ImportConfig {
        run_timeout: Duration::from_millis(60),
        ..test_config(2, 1)
    };
    let importer = importer(store.clone(), config);
    let ctx = RunContext::new();

    let report = importer
        .execute(orders_csv(10), ExecuteOptions::default(), &ctx)
        .await
        .unwrap();

    assert!(ctx.is_timed_out());
    assert_eq!(report.termination, Termination::TimedOut);
    assert!(report.not_attempted_rows > 0);
    assert!(report.batches < 5);
    assert!(report.execute_counts_balance());
}

#[tokio::test]
async fn test_store_call_timeout_fails_batch() {
    let store = Arc::new(MockOrderStore::new().with_delay(Duration::from_millis(200)));
    let config = ImportConfig {
        store_call_timeout: Duration::from_millis(20),
        ..test_config(10, 1)
    };
    let importer = importer(store, config);

    let report = importer
        .execute(orders_csv(3), ExecuteOptions::default(), &RunContext::new())
        .await
        .unwrap();

    assert_eq!(report.inserted_rows, 0);
    assert_eq!(report.failed_insert_rows, 3);
    assert!(report.errors.items[0].message.contains("timed out"));
    assert!(report.execute_counts_balance());
}

// ==========================================
// 校验阶段的整体时限
// ==========================================

#[tokio::test]
async fn test_run_deadline_bounds_preview_lookup() {
    let store = Arc::new(MockOrderStore::new().with_lookup_delay(Duration::from_millis(800)));
    let importer = importer(store, ImportConfig::default());
    let ctx = RunContext::new().with_run_timeout(Duration::from_millis(50));

    let started = Instant::now();
    let result = importer.preview(orders_csv(3), None, &ctx).await;

    assert!(matches!(result, Err(ImportError::Timeout { stage: "validate" })));
    assert!(ctx.is_timed_out());
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_execute_timeout_option_bounds_validation() {
    let store = Arc::new(MockOrderStore::new().with_lookup_delay(Duration::from_millis(800)));
    let importer = importer(store.clone(), ImportConfig::default());
    let options = ExecuteOptions {
        run_timeout: Some(Duration::from_millis(50)),
        ..ExecuteOptions::default()
    };

    let started = Instant::now();
    let result = importer
        .execute(orders_csv(3), options, &RunContext::new())
        .await;

    assert!(matches!(result, Err(ImportError::Timeout { .. })));
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_cancel_during_validation() {
    let store = Arc::new(MockOrderStore::new().with_lookup_delay(Duration::from_millis(800)));
    let importer = importer(store, ImportConfig::default());
    let ctx = RunContext::new();
    let token = ctx.cancel_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
    });

    let result = importer.preview(orders_csv(2), None, &ctx).await;
    assert!(matches!(result, Err(ImportError::Cancelled { stage: "validate" })));
}

// ==========================================
// 解析超时
// ==========================================

struct SlowDecoder;

impl TabularDecoder for SlowDecoder {
    fn decode(&self, payload: &FilePayload) -> ImportResult<DecodedTable> {
        std::thread::sleep(Duration::from_millis(300));
        UniversalDecoder.decode(payload)
    }
}

#[tokio::test]
async fn test_decode_timeout() {
    let config = ImportConfig {
        decode_timeout: Duration::from_millis(20),
        ..ImportConfig::default()
    };
    let importer = OrderImporter::with_components(
        Arc::new(MockOrderStore::new()),
        config.clone(),
        Arc::new(SlowDecoder),
        Box::new(FieldMapper::from_config(&config)),
        Box::new(RowTransformer::from_config(&config)),
    );

    let result = importer
        .preview(orders_csv(1), None, &RunContext::new())
        .await;
    assert!(matches!(result, Err(ImportError::Timeout { stage: "decode" })));
}

#[tokio::test]
async fn test_caller_token_cancels_before_start() {
    let token = CancellationToken::new();
    token.cancel();
    let store = Arc::new(MockOrderStore::new());
    let importer = importer(store.clone(), ImportConfig::default());

    let result = importer
        .execute(
            orders_csv(2),
            ExecuteOptions::default(),
            &RunContext::with_cancel_token(token),
        )
        .await;
    assert!(matches!(result, Err(ImportError::Cancelled { .. })));
    assert_eq!(store.call_count(), 0);
}

fn test_helpers_init() {
    order_import::logging::init_test();
}
