// ==========================================
// 订单导入管道 - 订单导入器实现
// ==========================================
// 职责: 串联各阶段，从字节载荷到导入报告
// 流程: 解析 → 表头映射 → 行转换 → 去重 → (预览 | 分批落库) → 报告
// 状态: Idle → Validating → (DryRun: Previewing → Done) | (Execute: Inserting → Done)
// ==========================================

use crate::config::ImportConfig;
use crate::domain::{
    FieldMapping, ImportMode, ImportReport, OrderInsert, RowOutcome, RunState, Termination,
};
use crate::importer::batch_executor::BatchExecutor;
use crate::importer::duplicate_detector::DuplicateDetector;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::FieldMapper;
use crate::importer::file_parser::{DecodedTable, FilePayload, UniversalDecoder};
use crate::importer::order_importer_trait::{
    ExecuteOptions, HeaderMapper, ManualMapping, OrderImportPipeline, PreviewOutcome,
    RowTransform, TabularDecoder,
};
use crate::importer::report_builder::{ReportBuilder, RunFacts};
use crate::importer::row_transformer::RowTransformer;
use crate::importer::run_context::RunContext;
use crate::repository::OrderStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// 校验阶段产物
struct Validated {
    detected_headers: Vec<String>,
    mapping: FieldMapping,
    outcomes: Vec<RowOutcome>,
}

/// 单次运行的状态机
struct RunTracker<'a> {
    run_id: &'a str,
    mode: ImportMode,
    state: RunState,
}

impl<'a> RunTracker<'a> {
    fn new(run_id: &'a str, mode: ImportMode) -> Self {
        Self {
            run_id,
            mode,
            state: RunState::Idle,
        }
    }

    fn advance(&mut self, next: RunState) -> ImportResult<()> {
        if !self.state.can_transition_to(next, self.mode) {
            return Err(ImportError::InternalError(format!(
                "illegal run state transition {} -> {}",
                self.state, next
            )));
        }
        debug!(run_id = %self.run_id, from = %self.state, to = %next, "运行状态切换");
        self.state = next;
        Ok(())
    }
}

// ==========================================
// OrderImporter - 订单导入器
// ==========================================
pub struct OrderImporter {
    // 订单库
    store: Arc<dyn OrderStore>,

    // 导入参数
    config: ImportConfig,

    // 导入组件
    decoder: Arc<dyn TabularDecoder>,
    mapper: Box<dyn HeaderMapper>,
    transformer: Box<dyn RowTransform>,
    report_builder: ReportBuilder,
}

impl OrderImporter {
    /// 使用默认组件创建导入器
    pub fn new(store: Arc<dyn OrderStore>, config: ImportConfig) -> Self {
        let mapper = Box::new(FieldMapper::from_config(&config));
        let transformer = Box::new(RowTransformer::from_config(&config));
        Self::with_components(store, config, Arc::new(UniversalDecoder), mapper, transformer)
    }

    /// 自定义组件
    pub fn with_components(
        store: Arc<dyn OrderStore>,
        config: ImportConfig,
        decoder: Arc<dyn TabularDecoder>,
        mapper: Box<dyn HeaderMapper>,
        transformer: Box<dyn RowTransform>,
    ) -> Self {
        let report_builder = ReportBuilder::from_config(&config);
        Self {
            store,
            config,
            decoder,
            mapper,
            transformer,
            report_builder,
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// 校验阶段受取消令牌约束（整体时限到期同样触发令牌）
    async fn validate_bounded(
        &self,
        payload: FilePayload,
        manual_mapping: Option<&ManualMapping>,
        ctx: &RunContext,
        tracker: &mut RunTracker<'_>,
    ) -> ImportResult<Validated> {
        tokio::select! {
            biased;
            result = self.validate(payload, manual_mapping, ctx, tracker) => result,
            _ = ctx.cancel_token().cancelled() => {
                warn!(timed_out = ctx.is_timed_out(), "校验阶段被中断");
                Err(interrupted(ctx, "validate"))
            }
        }
    }

    /// 在阻塞线程上解析文件（受解析时限约束）
    async fn decode(&self, payload: FilePayload) -> ImportResult<DecodedTable> {
        let decoder = Arc::clone(&self.decoder);
        let task = tokio::task::spawn_blocking(move || decoder.decode(&payload));

        match tokio::time::timeout(self.config.decode_timeout, task).await {
            Err(_) => Err(ImportError::Timeout { stage: "decode" }),
            Ok(Err(e)) => Err(ImportError::InternalError(format!(
                "decoder task failed: {}",
                e
            ))),
            Ok(Ok(result)) => result,
        }
    }

    /// 校验阶段（预览与执行共用）
    async fn validate(
        &self,
        payload: FilePayload,
        manual_mapping: Option<&ManualMapping>,
        ctx: &RunContext,
        tracker: &mut RunTracker<'_>,
    ) -> ImportResult<Validated> {
        tracker.advance(RunState::Validating)?;
        if ctx.is_cancelled() {
            return Err(interrupted(ctx, "decode"));
        }

        // === 步骤 1: 解析文件 ===
        debug!("步骤 1: 解析文件");
        let file_name = payload.file_name.clone();
        let table = self.decode(payload).await?;
        let detected_headers = table.headers().to_vec();
        info!(file = %file_name, headers = detected_headers.len(), "文件解析完成");

        // === 步骤 2: 表头映射（任何行被读取之前）===
        debug!("步骤 2: 表头映射");
        let mapping = self.mapper.map_headers(&detected_headers, manual_mapping)?;
        info!(
            mapped = mapping.columns().len(),
            unmapped = mapping.unmapped().len(),
            "表头映射完成"
        );

        // === 步骤 3: 行转换 ===
        debug!("步骤 3: 行转换");
        let mut outcomes = Vec::new();
        for row in table.rows() {
            let row = row?;
            outcomes.push(self.transformer.transform(&row, &mapping));
        }

        // === 步骤 4: 重复检测 ===
        debug!("步骤 4: 重复检测");
        let detector =
            DuplicateDetector::new(self.config.fingerprint_mode, self.config.store_call_timeout);
        let outcomes = detector.detect(outcomes, self.store.as_ref()).await?;

        info!(
            total_rows = outcomes.len(),
            valid = outcomes.iter().filter(|o| o.is_valid()).count(),
            invalid = outcomes.iter().filter(|o| o.is_invalid()).count(),
            duplicate = outcomes.iter().filter(|o| o.is_duplicate()).count(),
            "行校验完成"
        );

        Ok(Validated {
            detected_headers,
            mapping,
            outcomes,
        })
    }

    /// 组装待写入订单（Valid 行；不跳过重复时也包含 Duplicate 行）
    fn collect_inserts(
        &self,
        outcomes: &[RowOutcome],
        skip_duplicates: bool,
        ctx: &RunContext,
    ) -> (Vec<OrderInsert>, HashMap<usize, String>) {
        let detector =
            DuplicateDetector::new(self.config.fingerprint_mode, self.config.store_call_timeout);
        let mut inserts = Vec::new();
        let mut customers = HashMap::new();

        for outcome in outcomes {
            let (row, fingerprint) = match outcome {
                RowOutcome::Valid(row) => (row, detector.fingerprint(row)),
                RowOutcome::Duplicate {
                    row, fingerprint, ..
                } if !skip_duplicates => (&**row, fingerprint.clone()),
                _ => continue,
            };
            customers.insert(row.row_number, row.customer.label());
            inserts.push(OrderInsert {
                run_id: ctx.run_id().to_string(),
                row_number: row.row_number,
                fingerprint,
                order: row.clone(),
            });
        }

        (inserts, customers)
    }
}

/// 取消令牌触发的原因 → 错误
fn interrupted(ctx: &RunContext, stage: &'static str) -> ImportError {
    if ctx.is_timed_out() {
        ImportError::Timeout { stage }
    } else {
        ImportError::Cancelled { stage }
    }
}

#[async_trait]
impl OrderImportPipeline for OrderImporter {
    #[instrument(skip(self, payload, manual_mapping, ctx), fields(run_id = %ctx.run_id(), file = %payload.file_name))]
    async fn preview(
        &self,
        payload: FilePayload,
        manual_mapping: Option<ManualMapping>,
        ctx: &RunContext,
    ) -> ImportResult<PreviewOutcome> {
        let start_time = Instant::now();
        let run_timeout = ctx.run_timeout().unwrap_or(self.config.run_timeout);
        let _deadline = ctx.arm_deadline(run_timeout);
        let mut tracker = RunTracker::new(ctx.run_id(), ImportMode::DryRun);
        info!(run_timeout_ms = run_timeout.as_millis() as u64, "开始导入预览");

        let validated = self
            .validate_bounded(payload, manual_mapping.as_ref(), ctx, &mut tracker)
            .await?;
        tracker.advance(RunState::Previewing)?;

        let report = self.report_builder.build_preview(
            RunFacts {
                run_id: ctx.run_id().to_string(),
                mode: ImportMode::DryRun,
                termination: Termination::Completed,
                elapsed_ms: start_time.elapsed().as_millis() as u64,
            },
            &validated.outcomes,
        );
        tracker.advance(RunState::Done)?;

        info!(
            total_rows = report.total_rows,
            valid_rows = report.valid_rows,
            invalid_rows = report.invalid_rows,
            duplicate_rows = report.duplicate_rows,
            elapsed_ms = report.elapsed_ms,
            "导入预览完成"
        );

        Ok(PreviewOutcome {
            detected_headers: validated.detected_headers,
            mapping: validated.mapping,
            outcomes: validated.outcomes,
            report,
        })
    }

    #[instrument(skip(self, payload, options, ctx), fields(run_id = %ctx.run_id(), file = %payload.file_name))]
    async fn execute(
        &self,
        payload: FilePayload,
        options: ExecuteOptions,
        ctx: &RunContext,
    ) -> ImportResult<ImportReport> {
        let start_time = Instant::now();
        let run_timeout = options
            .run_timeout
            .or_else(|| ctx.run_timeout())
            .unwrap_or(self.config.run_timeout);
        let _deadline = ctx.arm_deadline(run_timeout);
        let mut tracker = RunTracker::new(ctx.run_id(), ImportMode::Execute);
        info!(
            skip_duplicates = options.skip_duplicates,
            run_timeout_ms = run_timeout.as_millis() as u64,
            "开始执行导入"
        );

        let validated = self
            .validate_bounded(payload, options.manual_mapping.as_ref(), ctx, &mut tracker)
            .await?;
        tracker.advance(RunState::Inserting)?;

        // === 步骤 5: 分批落库 ===
        debug!("步骤 5: 分批落库");
        let (inserts, customers) =
            self.collect_inserts(&validated.outcomes, options.skip_duplicates, ctx);
        let executor =
            BatchExecutor::from_config(&self.config.clone().with_batch_size(options.batch_size));
        let summary = executor
            .execute(inserts, &customers, self.store.as_ref(), ctx)
            .await;

        // 所有行都已派发时，之后才触发的取消/超时不影响结局
        let termination = if summary.not_attempted_rows == 0 {
            Termination::Completed
        } else if ctx.is_timed_out() {
            Termination::TimedOut
        } else if ctx.is_cancelled() {
            Termination::Cancelled
        } else {
            Termination::Completed
        };
        if termination != Termination::Completed {
            warn!(
                termination = ?termination,
                not_attempted = summary.not_attempted_rows,
                "导入提前结束"
            );
        }

        // === 步骤 6: 生成报告 ===
        debug!("步骤 6: 生成报告");
        let report = self.report_builder.build_execute(
            RunFacts {
                run_id: ctx.run_id().to_string(),
                mode: ImportMode::Execute,
                termination,
                elapsed_ms: start_time.elapsed().as_millis() as u64,
            },
            &validated.outcomes,
            &summary,
            options.skip_duplicates,
        );
        tracker.advance(RunState::Done)?;

        info!(
            total_rows = report.total_rows,
            inserted_rows = report.inserted_rows,
            failed_insert_rows = report.failed_insert_rows,
            invalid_rows = report.invalid_rows,
            duplicates_skipped = report.duplicates_skipped,
            not_attempted_rows = report.not_attempted_rows,
            elapsed_ms = report.elapsed_ms,
            "导入执行完成"
        );

        Ok(report)
    }
}
