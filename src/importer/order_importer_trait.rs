// ==========================================
// 订单导入管道 - 导入阶段 Trait
// ==========================================
// 职责: 定义订单导入各阶段接口（不包含实现）
// 流程: 解析 → 表头映射 → 行转换 → 去重 → 分批落库 → 报告
// ==========================================

use crate::domain::{FieldMapping, ImportReport, RawRow, RowOutcome};
use crate::importer::error::ImportResult;
use crate::importer::file_parser::{DecodedTable, FilePayload};
use crate::importer::run_context::RunContext;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// 调用方提供的手工映射（标准字段名 → 源表头）
pub type ManualMapping = BTreeMap<String, String>;

// ==========================================
// OrderImporter Trait
// ==========================================
// 用途: 订单导入主接口
// 实现者: OrderImporter
#[async_trait]
pub trait OrderImportPipeline: Send + Sync {
    /// 预览（只校验不写库）
    ///
    /// # 说明
    /// - 整体时限取 ctx.run_timeout()，未指定时取配置值
    ///
    /// # 返回
    /// - Ok(PreviewOutcome): 映射结果 + 全部行结局 + 报告
    /// - Err: 文件不可解析 / 必填映射缺失 / 订单库查询失败 / 校验阶段超时或取消
    async fn preview(
        &self,
        payload: FilePayload,
        manual_mapping: Option<ManualMapping>,
        ctx: &RunContext,
    ) -> ImportResult<PreviewOutcome>;

    /// 执行（分批写库）
    ///
    /// # 说明
    /// - skip_duplicates=false 时重复行同样写入
    /// - 整体时限优先级: options.run_timeout > ctx.run_timeout() > 配置值
    /// - 写入阶段取消/超时后返回已累计的报告，不返回 Err
    /// - 校验阶段取消/超时返回 Err（尚无任何写入）
    async fn execute(
        &self,
        payload: FilePayload,
        options: ExecuteOptions,
        ctx: &RunContext,
    ) -> ImportResult<ImportReport>;
}

/// 执行参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub skip_duplicates: bool,
    pub batch_size: Option<usize>,
    pub manual_mapping: Option<ManualMapping>,
    pub run_timeout: Option<Duration>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            skip_duplicates: true,
            batch_size: None,
            manual_mapping: None,
            run_timeout: None,
        }
    }
}

/// 预览结果
#[derive(Debug, Clone)]
pub struct PreviewOutcome {
    pub detected_headers: Vec<String>,
    pub mapping: FieldMapping,
    pub outcomes: Vec<RowOutcome>,
    pub report: ImportReport,
}

// ==========================================
// TabularDecoder Trait
// ==========================================
// 用途: 文件解析接口（阶段 0）
// 实现者: CsvDecoder, SpreadsheetDecoder, UniversalDecoder
pub trait TabularDecoder: Send + Sync {
    /// 解析字节载荷为表格（表头 + 可重复遍历的行序列）
    ///
    /// # 返回
    /// - Err(FormatError): 无法解码 / 找不到表头行
    fn decode(&self, payload: &FilePayload) -> ImportResult<DecodedTable>;
}

// ==========================================
// HeaderMapper Trait
// ==========================================
// 用途: 表头映射接口（阶段 1）
// 实现者: FieldMapper
pub trait HeaderMapper: Send + Sync {
    /// 推断标准字段 → 源表头映射
    ///
    /// # 返回
    /// - Err(MappingError): 必填字段缺失
    /// - Err(UnknownOverrideHeader): 手工映射指向不存在的表头
    fn map_headers(
        &self,
        headers: &[String],
        manual: Option<&ManualMapping>,
    ) -> ImportResult<FieldMapping>;
}

// ==========================================
// RowTransformer Trait
// ==========================================
// 用途: 行转换接口（阶段 2）
// 实现者: RowTransformer
pub trait RowTransform: Send + Sync {
    /// 原始行 → Valid / Invalid（不抛错，问题全部收集到结局中）
    fn transform(&self, row: &RawRow, mapping: &FieldMapping) -> RowOutcome;
}
