// ==========================================
// 订单导入API
// ==========================================
// 职责: 封装订单导入对外调用（校验预览 / 执行导入 / 模板下载）
// 输出: camelCase JSON 结构
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, ImportConfig};
use crate::domain::{ImportReport, ImportRow, RowOutcome, Termination};
use crate::importer::template::{render_template, TEMPLATE_FILE_NAME, TEMPLATE_MIME_TYPE};
use crate::importer::{
    ExecuteOptions, FilePayload, ImportError, ManualMapping, OrderImportPipeline, OrderImporter,
    RunContext,
};
use crate::repository::{OrderStore, SqliteOrderStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

// ==========================================
// 响应结构
// ==========================================

/// 校验汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub duplicate_rows: usize,
}

/// 校验预览响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateImportResponse {
    pub detected_headers: Vec<String>,
    /// 标准字段名 → 源表头
    pub field_mapping: BTreeMap<String, String>,
    pub validation: ValidationSummary,
    /// 前 N 个可导入订单
    pub preview: Vec<ImportRow>,
}

/// 执行请求参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteImportRequest {
    pub skip_duplicates: bool,
    pub batch_size: Option<usize>,
    pub field_mapping: Option<ManualMapping>,
    /// 本次调用的整体时限（毫秒），缺省取配置值
    pub timeout_ms: Option<u64>,
}

impl Default for ExecuteImportRequest {
    fn default() -> Self {
        Self {
            skip_duplicates: true,
            batch_size: None,
            field_mapping: None,
            timeout_ms: None,
        }
    }
}

/// 行级错误明细
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row_number: usize,
    pub customer_identity: String,
    pub error: String,
}

/// 执行导入响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteImportResponse {
    pub run_id: String,
    pub success: bool,
    pub total_processed: usize,
    pub successful_inserts: usize,
    /// 校验失败 + 写入失败
    pub failed_inserts: usize,
    pub duplicates_skipped: usize,
    pub errors: Vec<RowError>,
    /// 超出明细上限而省略的错误条数
    pub errors_omitted: usize,
    pub not_attempted: usize,
    pub cancelled: bool,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl From<ImportReport> for ExecuteImportResponse {
    fn from(report: ImportReport) -> Self {
        let failed_inserts = report.invalid_rows + report.failed_insert_rows;
        Self {
            success: report.termination == Termination::Completed
                && report.failed_insert_rows == 0,
            total_processed: report.total_rows - report.not_attempted_rows,
            successful_inserts: report.inserted_rows,
            failed_inserts,
            duplicates_skipped: report.duplicates_skipped,
            errors: report
                .errors
                .items
                .iter()
                .map(|e| RowError {
                    row_number: e.row_number,
                    customer_identity: e.customer_identity.clone(),
                    error: e.message.clone(),
                })
                .collect(),
            errors_omitted: report.errors.omitted,
            not_attempted: report.not_attempted_rows,
            cancelled: report.termination == Termination::Cancelled,
            timed_out: report.termination == Termination::TimedOut,
            elapsed_ms: report.elapsed_ms,
            run_id: report.run_id,
        }
    }
}

/// 模板文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

// ==========================================
// ImportApi
// ==========================================
pub struct ImportApi {
    importer: OrderImporter,
}

impl ImportApi {
    /// 创建新的ImportApi实例
    pub fn new(store: Arc<dyn OrderStore>, config: ImportConfig) -> Self {
        Self {
            importer: OrderImporter::new(store, config),
        }
    }

    /// 基于数据库文件创建（配置从 config_kv 加载）
    pub async fn open(db_path: &str) -> ApiResult<Self> {
        let config_manager = ConfigManager::new(db_path)?;
        let config = ImportConfig::load(&config_manager).await?;
        let store = SqliteOrderStore::new(db_path)?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn config(&self) -> &ImportConfig {
        self.importer.config()
    }

    /// 校验并预览
    ///
    /// # 说明
    /// - 映射失败不返回 Err，而是 isValid=false 并在 errors 中说明
    /// - 文件不可解析 / 订单库查询失败返回 Err
    pub async fn validate_import(
        &self,
        payload: FilePayload,
        manual_mapping: Option<ManualMapping>,
        ctx: &RunContext,
    ) -> ApiResult<ValidateImportResponse> {
        let preview = match self.importer.preview(payload, manual_mapping, ctx).await {
            Ok(preview) => preview,
            Err(e) if e.is_mapping_error() => {
                warn!(run_id = %ctx.run_id(), error = %e, "列映射失败");
                return Ok(mapping_failure(e));
            }
            Err(e) => return Err(ApiError::from(e)),
        };

        let report = &preview.report;
        let rows: Vec<ImportRow> = preview
            .outcomes
            .iter()
            .filter_map(|o| match o {
                RowOutcome::Valid(row) => Some(row.clone()),
                _ => None,
            })
            .take(self.config().preview_row_limit)
            .collect();

        let mut warnings: Vec<String> = report.warnings.items.iter().map(|w| w.to_string()).collect();
        warnings.extend(report.duplicates.items.iter().map(|d| d.to_string()));
        warnings.sort_by_key(|w| row_of(w));

        info!(
            run_id = %ctx.run_id(),
            total_rows = report.total_rows,
            valid_rows = report.valid_rows,
            "导入校验完成"
        );

        Ok(ValidateImportResponse {
            detected_headers: preview.detected_headers.clone(),
            field_mapping: preview.mapping.to_header_map(),
            validation: ValidationSummary {
                is_valid: report.valid_rows > 0,
                errors: report.errors.items.iter().map(|e| e.to_string()).collect(),
                warnings,
                total_rows: report.total_rows,
                valid_rows: report.valid_rows,
                invalid_rows: report.invalid_rows,
                duplicate_rows: report.duplicate_rows,
            },
            preview: rows,
        })
    }

    /// 执行导入
    ///
    /// # 说明
    /// - batchSize 夹在 [10, 200]
    /// - 取消/超时返回已累计结果（cancelled / timedOut 置位）
    pub async fn execute_import(
        &self,
        payload: FilePayload,
        request: ExecuteImportRequest,
        ctx: &RunContext,
    ) -> ApiResult<ExecuteImportResponse> {
        let options = ExecuteOptions {
            skip_duplicates: request.skip_duplicates,
            batch_size: request.batch_size,
            manual_mapping: request.field_mapping,
            run_timeout: request.timeout_ms.map(Duration::from_millis),
        };
        let report = self.importer.execute(payload, options, ctx).await?;
        Ok(ExecuteImportResponse::from(report))
    }

    /// 下载导入模板
    pub fn download_template(&self) -> ApiResult<TemplateFile> {
        Ok(TemplateFile {
            file_name: TEMPLATE_FILE_NAME.to_string(),
            mime_type: TEMPLATE_MIME_TYPE.to_string(),
            bytes: render_template()?,
        })
    }
}

/// 映射失败 → isValid=false 的校验响应
fn mapping_failure(err: ImportError) -> ValidateImportResponse {
    let message = err.to_string();
    let (detected_headers, field_mapping) = match err {
        ImportError::MappingError {
            detected_headers,
            partial,
            ..
        } => (detected_headers, partial.to_header_map()),
        _ => (Vec::new(), BTreeMap::new()),
    };

    ValidateImportResponse {
        detected_headers,
        field_mapping,
        validation: ValidationSummary {
            is_valid: false,
            errors: vec![message],
            warnings: Vec::new(),
            total_rows: 0,
            valid_rows: 0,
            invalid_rows: 0,
            duplicate_rows: 0,
        },
        preview: Vec::new(),
    }
}

/// "Row N: ..." → N
fn row_of(line: &str) -> usize {
    line.strip_prefix("Row ")
        .and_then(|rest| rest.split(':').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CappedList, ErrorKind, ImportErrorRecord, ImportMode};

    fn report(termination: Termination) -> ImportReport {
        ImportReport {
            run_id: "run-1".to_string(),
            mode: ImportMode::Execute,
            termination,
            total_rows: 10,
            valid_rows: 6,
            invalid_rows: 2,
            duplicate_rows: 2,
            duplicates_skipped: 2,
            inserted_rows: 3,
            failed_insert_rows: 1,
            not_attempted_rows: 2,
            batches: 2,
            errors: CappedList::from_vec(
                vec![ImportErrorRecord {
                    row_number: 4,
                    customer_identity: "Jane".to_string(),
                    kind: ErrorKind::Validation,
                    message: "order_date: order date is empty".to_string(),
                }],
                100,
            ),
            warnings: CappedList::default(),
            duplicates: CappedList::default(),
            elapsed_ms: 12,
        }
    }

    #[test]
    fn test_execute_response_counts() {
        let response = ExecuteImportResponse::from(report(Termination::Cancelled));
        assert_eq!(response.total_processed, 8);
        assert_eq!(response.failed_inserts, 3);
        assert_eq!(
            response.successful_inserts + response.failed_inserts + response.duplicates_skipped,
            response.total_processed
        );
        assert!(response.cancelled);
        assert!(!response.timed_out);
        assert!(!response.success);
        assert_eq!(response.errors[0].error, "order_date: order date is empty");
    }

    #[test]
    fn test_execute_request_defaults() {
        let request: ExecuteImportRequest = serde_json::from_str("{}").unwrap();
        assert!(request.skip_duplicates);
        assert_eq!(request.batch_size, None);

        let request: ExecuteImportRequest =
            serde_json::from_str(r#"{"skipDuplicates":false,"batchSize":25}"#).unwrap();
        assert!(!request.skip_duplicates);
        assert_eq!(request.batch_size, Some(25));
        assert_eq!(request.timeout_ms, None);

        let request: ExecuteImportRequest = serde_json::from_str(r#"{"timeoutMs":1500}"#).unwrap();
        assert_eq!(request.timeout_ms, Some(1500));
    }

    #[test]
    fn test_row_of() {
        assert_eq!(row_of("Row 12: amount is empty"), 12);
        assert_eq!(row_of("garbage"), usize::MAX);
    }
}
