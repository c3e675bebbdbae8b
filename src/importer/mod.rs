// ==========================================
// 订单导入管道 - 导入层
// ==========================================
// 职责: 外部订单表格 → 标准化订单 → 分批写入订单库
// 支持: CSV / TSV / 分号分隔, XLSX / XLS / ODS
// 流程: 解析 → 表头映射 → 行转换 → 去重 → 分批落库 → 报告
// ==========================================

// 模块声明
pub mod batch_executor;
pub mod data_cleaner;
pub mod duplicate_detector;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod order_importer;
pub mod order_importer_trait;
pub mod report_builder;
pub mod row_transformer;
pub mod run_context;
pub mod template;

// 重导出核心类型
pub use batch_executor::{BatchExecutor, ExecutionSummary};
pub use data_cleaner::DataCleaner;
pub use duplicate_detector::DuplicateDetector;
pub use error::{ImportError, ImportResult};
pub use field_mapper::FieldMapper;
pub use file_parser::{
    CsvDecoder, DecodedTable, FilePayload, SpreadsheetDecoder, TabularFormat, UniversalDecoder,
};
pub use order_importer::OrderImporter;
pub use report_builder::{ReportBuilder, RunFacts};
pub use row_transformer::RowTransformer;
pub use run_context::RunContext;
pub use template::{render_template, TEMPLATE_FILE_NAME, TEMPLATE_MIME_TYPE};

// 重导出 Trait 接口
pub use order_importer_trait::{
    ExecuteOptions, HeaderMapper, ManualMapping, OrderImportPipeline, PreviewOutcome,
    RowTransform, TabularDecoder,
};
