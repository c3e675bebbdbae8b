// ==========================================
// 订单导入管道 - 导入报告生成
// ==========================================
// 阶段 5: 行结局 + 批次结果 → ImportReport（纯聚合）
// 约束: 计数从不截断，只截断明细；明细按行号排序，相同输入生成相同报告
// ==========================================

use crate::config::ImportConfig;
use crate::domain::{
    CappedList, DuplicateMatch, ErrorKind, ImportErrorRecord, ImportMode, ImportReport,
    RowIssue, RowOutcome, Termination,
};
use crate::importer::batch_executor::ExecutionSummary;

/// 报告输入中与运行相关的部分
#[derive(Debug, Clone)]
pub struct RunFacts {
    pub run_id: String,
    pub mode: ImportMode,
    pub termination: Termination,
    pub elapsed_ms: u64,
}

pub struct ReportBuilder {
    error_detail_limit: usize,
}

impl ReportBuilder {
    pub fn new(error_detail_limit: usize) -> Self {
        Self { error_detail_limit }
    }

    pub fn from_config(config: &ImportConfig) -> Self {
        Self::new(config.error_detail_limit)
    }

    /// 预览报告（不含写入计数）
    pub fn build_preview(&self, facts: RunFacts, outcomes: &[RowOutcome]) -> ImportReport {
        self.build(facts, outcomes, None, true)
    }

    /// 执行报告
    pub fn build_execute(
        &self,
        facts: RunFacts,
        outcomes: &[RowOutcome],
        summary: &ExecutionSummary,
        skip_duplicates: bool,
    ) -> ImportReport {
        self.build(facts, outcomes, Some(summary), skip_duplicates)
    }

    fn build(
        &self,
        facts: RunFacts,
        outcomes: &[RowOutcome],
        summary: Option<&ExecutionSummary>,
        skip_duplicates: bool,
    ) -> ImportReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut duplicates = Vec::new();
        let (mut valid, mut invalid, mut duplicate) = (0usize, 0usize, 0usize);

        for outcome in outcomes {
            match outcome {
                RowOutcome::Valid(row) => {
                    valid += 1;
                    push_warnings(&mut warnings, row.row_number, &row.customer.label(), &row.warnings);
                }
                RowOutcome::Invalid {
                    row_number,
                    customer,
                    reasons,
                    warnings: row_warnings,
                } => {
                    invalid += 1;
                    let label = customer.clone().unwrap_or_else(|| "-".to_string());
                    errors.push(ImportErrorRecord {
                        row_number: *row_number,
                        customer_identity: label.clone(),
                        kind: ErrorKind::Validation,
                        message: reasons
                            .iter()
                            .map(RowIssue::to_string)
                            .collect::<Vec<_>>()
                            .join("; "),
                    });
                    push_warnings(&mut warnings, *row_number, &label, row_warnings);
                }
                RowOutcome::Duplicate {
                    row_number,
                    matched,
                    row,
                    ..
                } => {
                    duplicate += 1;
                    let label = row.customer.label();
                    let message = match matched {
                        DuplicateMatch::InRun { first_row } => {
                            format!("duplicate of row {} in this file", first_row)
                        }
                        DuplicateMatch::Store => "order already exists".to_string(),
                    };
                    duplicates.push(ImportErrorRecord {
                        row_number: *row_number,
                        customer_identity: label.clone(),
                        kind: ErrorKind::DuplicateSkip,
                        message,
                    });
                    push_warnings(&mut warnings, *row_number, &label, &row.warnings);
                }
            }
        }

        let (inserted, failed_insert, not_attempted, batches) = match summary {
            Some(summary) => {
                for failure in summary.batches.iter().flat_map(|b| b.failures.iter()) {
                    errors.push(ImportErrorRecord {
                        row_number: failure.row_number,
                        customer_identity: failure.customer.clone(),
                        kind: ErrorKind::Store,
                        message: failure.message.clone(),
                    });
                }
                (
                    summary.inserted(),
                    summary.failed(),
                    summary.not_attempted_rows,
                    summary.batches.len(),
                )
            }
            None => (0, 0, 0, 0),
        };

        let duplicates_skipped = match facts.mode {
            ImportMode::Execute if skip_duplicates => duplicate,
            _ => 0,
        };

        for list in [&mut errors, &mut warnings, &mut duplicates] {
            list.sort_by_key(|r| r.row_number);
        }

        ImportReport {
            run_id: facts.run_id,
            mode: facts.mode,
            termination: facts.termination,
            total_rows: outcomes.len(),
            valid_rows: valid,
            invalid_rows: invalid,
            duplicate_rows: duplicate,
            duplicates_skipped,
            inserted_rows: inserted,
            failed_insert_rows: failed_insert,
            not_attempted_rows: not_attempted,
            batches,
            errors: CappedList::from_vec(errors, self.error_detail_limit),
            warnings: CappedList::from_vec(warnings, self.error_detail_limit),
            duplicates: CappedList::from_vec(duplicates, self.error_detail_limit),
            elapsed_ms: facts.elapsed_ms,
        }
    }
}

fn push_warnings(
    records: &mut Vec<ImportErrorRecord>,
    row_number: usize,
    customer: &str,
    issues: &[RowIssue],
) {
    records.extend(issues.iter().map(|issue| ImportErrorRecord {
        row_number,
        customer_identity: customer.to_string(),
        kind: ErrorKind::Warning,
        message: issue.to_string(),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BatchResult, CanonicalField, CustomerIdentity, Fingerprint, ImportRow, PaymentStatus,
        RowFailure,
    };
    use chrono::NaiveDate;

    fn valid(row_number: usize) -> RowOutcome {
        RowOutcome::Valid(ImportRow {
            row_number,
            customer: CustomerIdentity {
                name: Some(format!("Customer {}", row_number)),
                ..Default::default()
            },
            order_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            currency: "MYR".to_string(),
            total_amount: 10.0,
            status: PaymentStatus::Unpaid,
            notes: None,
            items: vec![],
            warnings: vec![],
        })
    }

    fn invalid(row_number: usize) -> RowOutcome {
        RowOutcome::Invalid {
            row_number,
            customer: None,
            reasons: vec![RowIssue::error(
                Some(CanonicalField::OrderDate),
                "order date is empty",
            )],
            warnings: vec![],
        }
    }

    fn duplicate(row_number: usize, first_row: usize) -> RowOutcome {
        let RowOutcome::Valid(row) = valid(row_number) else {
            unreachable!()
        };
        RowOutcome::Duplicate {
            row_number,
            fingerprint: Fingerprint::from_hex("fp"),
            matched: DuplicateMatch::InRun { first_row },
            row: Box::new(row),
        }
    }

    fn facts(mode: ImportMode) -> RunFacts {
        RunFacts {
            run_id: "run-1".to_string(),
            mode,
            termination: Termination::Completed,
            elapsed_ms: 5,
        }
    }

    #[test]
    fn test_preview_counts_balance() {
        let outcomes = vec![valid(2), invalid(3), duplicate(4, 2), valid(5)];
        let report = ReportBuilder::new(100).build_preview(facts(ImportMode::DryRun), &outcomes);

        assert_eq!(report.total_rows, 4);
        assert_eq!(report.valid_rows, 2);
        assert_eq!(report.invalid_rows, 1);
        assert_eq!(report.duplicate_rows, 1);
        assert!(report.preview_counts_balance());
        assert_eq!(report.errors.items[0].to_string(), "Row 3: order_date: order date is empty");
        assert_eq!(report.duplicates.items[0].message, "duplicate of row 2 in this file");
    }

    #[test]
    fn test_execute_counts_balance_and_sorted_errors() {
        let outcomes = vec![valid(2), invalid(3), duplicate(4, 2), valid(5), valid(6)];
        let summary = ExecutionSummary {
            batches: vec![BatchResult {
                batch_index: 0,
                attempted: 2,
                inserted: 1,
                failed: 1,
                failures: vec![RowFailure {
                    row_number: 2,
                    customer: "Customer 2".to_string(),
                    message: "constraint failed".to_string(),
                }],
            }],
            not_attempted_rows: 1,
            not_attempted_batches: 1,
        };

        let report = ReportBuilder::new(100).build_execute(
            facts(ImportMode::Execute),
            &outcomes,
            &summary,
            true,
        );
        assert_eq!(report.inserted_rows, 1);
        assert_eq!(report.failed_insert_rows, 1);
        assert_eq!(report.duplicates_skipped, 1);
        assert_eq!(report.not_attempted_rows, 1);
        assert!(report.execute_counts_balance());

        let rows: Vec<usize> = report.errors.items.iter().map(|e| e.row_number).collect();
        assert_eq!(rows, vec![2, 3]);
        assert_eq!(report.errors.items[0].kind, ErrorKind::Store);
    }

    #[test]
    fn test_error_list_capped_but_counts_kept() {
        let outcomes: Vec<RowOutcome> = (2..12).map(invalid).collect();
        let report = ReportBuilder::new(3).build_preview(facts(ImportMode::DryRun), &outcomes);

        assert_eq!(report.invalid_rows, 10);
        assert_eq!(report.errors.items.len(), 3);
        assert_eq!(report.errors.omitted, 7);
    }

    #[test]
    fn test_rebuild_is_identical() {
        let outcomes = vec![invalid(9), valid(2), invalid(4)];
        let builder = ReportBuilder::new(100);
        assert_eq!(
            builder.build_preview(facts(ImportMode::DryRun), &outcomes),
            builder.build_preview(facts(ImportMode::DryRun), &outcomes)
        );
    }
}
