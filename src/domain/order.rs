// ==========================================
// 订单导入管道 - 订单领域模型
// ==========================================
// 职责: 导入管道各阶段之间传递的不可变值类型
// 生命周期: 单次导入调用内创建、消费，调用结束即丢弃
// ==========================================

use crate::domain::types::{CanonicalField, ImportMode, MatchMethod, PaymentStatus, Termination};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ==========================================
// RawRow - 原始行
// ==========================================
// 用途: 文件解析产物（表头 → 单元格文本，保持列顺序）
// row_number: 文件中的物理行号（1 起，表头行计入）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    pub row_number: usize,
    pub cells: Vec<(String, String)>,
}

impl RawRow {
    pub fn new(row_number: usize, cells: Vec<(String, String)>) -> Self {
        Self { row_number, cells }
    }

    /// 按表头取单元格（表头名精确匹配）
    pub fn get(&self, header: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    /// 是否整行空白
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, v)| v.trim().is_empty())
    }
}

// ==========================================
// FieldMapping - 字段映射结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedColumn {
    pub header: String,
    pub header_index: usize,
    pub method: MatchMethod,
}

/// 标准字段 → 源表头；每次导入只计算一次，之后只读
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldMapping {
    columns: BTreeMap<CanonicalField, MappedColumn>,
    unmapped: BTreeSet<CanonicalField>,
}

impl FieldMapping {
    pub fn new(
        columns: BTreeMap<CanonicalField, MappedColumn>,
        unmapped: BTreeSet<CanonicalField>,
    ) -> Self {
        Self { columns, unmapped }
    }

    pub fn header_for(&self, field: CanonicalField) -> Option<&str> {
        self.columns.get(&field).map(|c| c.header.as_str())
    }

    pub fn column(&self, field: CanonicalField) -> Option<&MappedColumn> {
        self.columns.get(&field)
    }

    pub fn is_mapped(&self, field: CanonicalField) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn columns(&self) -> &BTreeMap<CanonicalField, MappedColumn> {
        &self.columns
    }

    pub fn unmapped(&self) -> &BTreeSet<CanonicalField> {
        &self.unmapped
    }

    /// 缺失的必填映射
    ///
    /// # 规则
    /// - 客户身份: customer_name / phone_number 至少其一
    /// - order_date 必须映射
    pub fn missing_required(&self) -> Vec<CanonicalField> {
        let mut missing = Vec::new();
        if !self.is_mapped(CanonicalField::CustomerName)
            && !self.is_mapped(CanonicalField::PhoneNumber)
        {
            missing.push(CanonicalField::CustomerName);
            missing.push(CanonicalField::PhoneNumber);
        }
        if !self.is_mapped(CanonicalField::OrderDate) {
            missing.push(CanonicalField::OrderDate);
        }
        missing
    }

    /// 扁平视图（字段名 → 表头），用于对外接口
    pub fn to_header_map(&self) -> BTreeMap<String, String> {
        self.columns
            .iter()
            .map(|(f, c)| (f.as_str().to_string(), c.header.clone()))
            .collect()
    }
}

// ==========================================
// RowIssue - 行内问题
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueLevel {
    Error,   // 错误（行无效）
    Warning, // 警告（行仍可导入）
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIssue {
    pub field: Option<CanonicalField>,
    pub level: IssueLevel,
    pub message: String,
}

impl RowIssue {
    pub fn error(field: Option<CanonicalField>, message: impl Into<String>) -> Self {
        Self {
            field,
            level: IssueLevel::Error,
            message: message.into(),
        }
    }

    pub fn warning(field: Option<CanonicalField>, message: impl Into<String>) -> Self {
        Self {
            field,
            level: IssueLevel::Warning,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == IssueLevel::Error
    }
}

impl fmt::Display for RowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field {
            Some(field) => write!(f, "{}: {}", field, self.message),
            None => f.write_str(&self.message),
        }
    }
}

// ==========================================
// ImportRow - 标准化订单行
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerIdentity {
    pub name: Option<String>,
    pub phone: Option<String>, // +<国家码><号码>
    pub email: Option<String>,
    pub facebook_handle: Option<String>,
}

impl CustomerIdentity {
    /// 报告中展示用的客户标识
    pub fn label(&self) -> String {
        match (&self.name, &self.phone) {
            (Some(name), Some(phone)) => format!("{} ({})", name, phone),
            (Some(name), None) => name.clone(),
            (None, Some(phone)) => phone.clone(),
            (None, None) => "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub name: String,
    pub quantity: u32,
    pub unit_price: Option<f64>,
}

impl LineItem {
    pub fn subtotal(&self) -> Option<f64> {
        self.unit_price.map(|p| p * self.quantity as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRow {
    pub row_number: usize,
    pub customer: CustomerIdentity,
    pub order_date: NaiveDate,
    pub currency: String,
    pub total_amount: f64, // >= 0
    pub status: PaymentStatus,
    pub notes: Option<String>,
    pub items: Vec<LineItem>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<RowIssue>,
}

impl ImportRow {
    /// 金额（最小货币单位，四舍五入）
    pub fn amount_minor(&self) -> i64 {
        (self.total_amount * 100.0).round() as i64
    }
}

// ==========================================
// Fingerprint - 去重指纹
// ==========================================
// 只用于重复检测，不作为订单身份
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 重复命中来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum DuplicateMatch {
    InRun { first_row: usize }, // 同一文件内已出现
    Store,                      // 订单库中已存在
}

// ==========================================
// RowOutcome - 单行结局
// ==========================================
// 每个输入行恰好一个，顺序与输入一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Valid(ImportRow),
    Invalid {
        row_number: usize,
        customer: Option<String>,
        reasons: Vec<RowIssue>,
        warnings: Vec<RowIssue>,
    },
    Duplicate {
        row_number: usize,
        fingerprint: Fingerprint,
        matched: DuplicateMatch,
        row: Box<ImportRow>,
    },
}

impl RowOutcome {
    pub fn row_number(&self) -> usize {
        match self {
            RowOutcome::Valid(row) => row.row_number,
            RowOutcome::Invalid { row_number, .. } => *row_number,
            RowOutcome::Duplicate { row_number, .. } => *row_number,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, RowOutcome::Valid(_))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, RowOutcome::Invalid { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, RowOutcome::Duplicate { .. })
    }
}

// ==========================================
// 写库相关
// ==========================================

/// 待写入订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderInsert {
    pub run_id: String,
    pub row_number: usize,
    pub fingerprint: Fingerprint,
    pub order: ImportRow,
}

/// 订单库返回的单行写入结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InsertStatus {
    Inserted { order_id: String },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub row_number: usize,
    pub status: InsertStatus,
}

impl InsertOutcome {
    pub fn inserted(row_number: usize, order_id: impl Into<String>) -> Self {
        Self {
            row_number,
            status: InsertStatus::Inserted {
                order_id: order_id.into(),
            },
        }
    }

    pub fn failed(row_number: usize, message: impl Into<String>) -> Self {
        Self {
            row_number,
            status: InsertStatus::Failed {
                message: message.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row_number: usize,
    pub customer: String,
    pub message: String,
}

/// 单批次写入结果
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_index: usize,
    pub attempted: usize,
    pub inserted: usize,
    pub failed: usize,
    pub failures: Vec<RowFailure>,
}

// ==========================================
// ImportReport - 导入报告
// ==========================================

/// 错误明细类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Warning,
    DuplicateSkip,
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportErrorRecord {
    pub row_number: usize,
    pub customer_identity: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ImportErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row {}: {}", self.row_number, self.message)
    }
}

/// 限长明细列表（只截断明细，不截断计数）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CappedList<T> {
    pub items: Vec<T>,
    pub omitted: usize,
}

impl<T> Default for CappedList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            omitted: 0,
        }
    }
}

impl<T> CappedList<T> {
    pub fn from_vec(mut all: Vec<T>, limit: usize) -> Self {
        let omitted = all.len().saturating_sub(limit);
        all.truncate(limit);
        Self {
            items: all,
            omitted,
        }
    }

    pub fn total(&self) -> usize {
        self.items.len() + self.omitted
    }
}

/// 一次导入调用的最终报告；返回后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub run_id: String,
    pub mode: ImportMode,
    pub termination: Termination,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub duplicate_rows: usize,
    pub duplicates_skipped: usize,
    pub inserted_rows: usize,
    pub failed_insert_rows: usize,
    pub not_attempted_rows: usize,
    pub batches: usize,
    pub errors: CappedList<ImportErrorRecord>,
    pub warnings: CappedList<ImportErrorRecord>,
    pub duplicates: CappedList<ImportErrorRecord>,
    pub elapsed_ms: u64,
}

impl ImportReport {
    /// 预览口径: valid + invalid + duplicate == total
    pub fn preview_counts_balance(&self) -> bool {
        self.valid_rows + self.invalid_rows + self.duplicate_rows == self.total_rows
    }

    /// 执行口径: 每一行恰好落入一种结局
    pub fn execute_counts_balance(&self) -> bool {
        self.inserted_rows
            + self.failed_insert_rows
            + self.invalid_rows
            + self.duplicates_skipped
            + self.not_attempted_rows
            == self.total_rows
    }
}
