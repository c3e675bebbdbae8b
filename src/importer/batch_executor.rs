// ==========================================
// 订单导入管道 - 分批写入执行器
// ==========================================
// 阶段 4: 待写入订单按固定大小切批，限并发调用订单库
// 约束:
// - 单批失败/超时只影响本批，后续批次照常执行
// - 取消后在途批次跑完，不再派发新批次（未派发的行记为未尝试）
// - 完成顺序不确定，行号始终保留
// ==========================================

use crate::config::ImportConfig;
use crate::domain::{BatchResult, InsertStatus, OrderInsert, RowFailure};
use crate::importer::run_context::RunContext;
use crate::repository::OrderStore;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 单批次派发结果
#[derive(Debug)]
enum BatchDispatch {
    Attempted(BatchResult),
    NotAttempted { batch_index: usize, rows: usize },
}

/// 执行汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// 已派发批次的结果（按批次序号排序）
    pub batches: Vec<BatchResult>,
    pub not_attempted_rows: usize,
    pub not_attempted_batches: usize,
}

impl ExecutionSummary {
    pub fn inserted(&self) -> usize {
        self.batches.iter().map(|b| b.inserted).sum()
    }

    pub fn failed(&self) -> usize {
        self.batches.iter().map(|b| b.failed).sum()
    }
}

pub struct BatchExecutor {
    batch_size: usize,
    max_in_flight: usize,
    store_call_timeout: Duration,
}

impl BatchExecutor {
    /// 参数下限为 1；批大小区间约束在配置层完成
    pub fn new(batch_size: usize, max_in_flight: usize, store_call_timeout: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_in_flight: max_in_flight.max(1),
            store_call_timeout,
        }
    }

    pub fn from_config(config: &ImportConfig) -> Self {
        Self::new(
            config.batch_size,
            config.max_in_flight,
            config.store_call_timeout,
        )
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 分批写入
    pub async fn execute(
        &self,
        rows: Vec<OrderInsert>,
        customers: &HashMap<usize, String>,
        store: &dyn OrderStore,
        ctx: &RunContext,
    ) -> ExecutionSummary {
        let mut batches: Vec<Vec<OrderInsert>> = Vec::new();
        let mut iter = rows.into_iter().peekable();
        while iter.peek().is_some() {
            batches.push(iter.by_ref().take(self.batch_size).collect());
        }

        info!(
            run_id = %ctx.run_id(),
            batches = batches.len(),
            batch_size = self.batch_size,
            max_in_flight = self.max_in_flight,
            "开始分批写入"
        );

        let dispatches: Vec<BatchDispatch> = stream::iter(batches.into_iter().enumerate())
            .map(|(batch_index, batch)| self.run_batch(batch_index, batch, customers, store, ctx))
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        let mut summary = ExecutionSummary::default();
        for dispatch in dispatches {
            match dispatch {
                BatchDispatch::Attempted(result) => summary.batches.push(result),
                BatchDispatch::NotAttempted { rows, .. } => {
                    summary.not_attempted_rows += rows;
                    summary.not_attempted_batches += 1;
                }
            }
        }
        summary.batches.sort_by_key(|b| b.batch_index);

        info!(
            run_id = %ctx.run_id(),
            inserted = summary.inserted(),
            failed = summary.failed(),
            not_attempted = summary.not_attempted_rows,
            "分批写入结束"
        );
        summary
    }

    async fn run_batch(
        &self,
        batch_index: usize,
        batch: Vec<OrderInsert>,
        customers: &HashMap<usize, String>,
        store: &dyn OrderStore,
        ctx: &RunContext,
    ) -> BatchDispatch {
        // 派发时检查取消（buffer_unordered 在有空位时才首次 poll）
        if ctx.is_cancelled() {
            debug!(batch_index, rows = batch.len(), "已取消，批次未派发");
            return BatchDispatch::NotAttempted {
                batch_index,
                rows: batch.len(),
            };
        }

        let row_numbers: Vec<usize> = batch.iter().map(|r| r.row_number).collect();
        let customer_of = |row_number: usize| {
            customers
                .get(&row_number)
                .cloned()
                .unwrap_or_else(|| "-".to_string())
        };
        let fail_all = |message: String| -> Vec<RowFailure> {
            row_numbers
                .iter()
                .map(|&row_number| RowFailure {
                    row_number,
                    customer: customer_of(row_number),
                    message: message.clone(),
                })
                .collect()
        };

        let attempted = batch.len();
        let call = tokio::time::timeout(self.store_call_timeout, store.insert_batch(batch)).await;

        let result = match call {
            Ok(Ok(outcomes)) => {
                let mut by_row: HashMap<usize, InsertStatus> = outcomes
                    .into_iter()
                    .map(|o| (o.row_number, o.status))
                    .collect();

                let mut inserted = 0;
                let mut failures = Vec::new();
                for &row_number in &row_numbers {
                    match by_row.remove(&row_number) {
                        Some(InsertStatus::Inserted { .. }) => inserted += 1,
                        Some(InsertStatus::Failed { message }) => failures.push(RowFailure {
                            row_number,
                            customer: customer_of(row_number),
                            message,
                        }),
                        None => failures.push(RowFailure {
                            row_number,
                            customer: customer_of(row_number),
                            message: "order store returned no outcome for this row".to_string(),
                        }),
                    }
                }

                BatchResult {
                    batch_index,
                    attempted,
                    inserted,
                    failed: failures.len(),
                    failures,
                }
            }
            Ok(Err(e)) => {
                warn!(batch_index, error = %e, "批次写入失败，整批记为失败");
                BatchResult {
                    batch_index,
                    attempted,
                    inserted: 0,
                    failed: attempted,
                    failures: fail_all(e.to_string()),
                }
            }
            Err(_) => {
                let message = format!(
                    "order store call timed out after {} ms",
                    self.store_call_timeout.as_millis()
                );
                warn!(batch_index, "批次写入超时，整批记为失败");
                BatchResult {
                    batch_index,
                    attempted,
                    inserted: 0,
                    failed: attempted,
                    failures: fail_all(message),
                }
            }
        };

        debug!(
            batch_index,
            attempted = result.attempted,
            inserted = result.inserted,
            failed = result.failed,
            "批次完成"
        );
        BatchDispatch::Attempted(result)
    }
}
