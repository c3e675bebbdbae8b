// ==========================================
// 订单导入管道 - 领域模型层
// ==========================================
// 职责: 定义导入管道的值类型与枚举
// 红线: 不含数据访问逻辑,不含解析逻辑
// ==========================================

pub mod order;
pub mod types;

// 重导出核心类型
pub use order::{
    BatchResult, CappedList, CustomerIdentity, DuplicateMatch, ErrorKind, FieldMapping,
    Fingerprint, ImportErrorRecord, ImportReport, ImportRow, InsertOutcome, InsertStatus,
    IssueLevel, LineItem, MappedColumn, OrderInsert, RawRow, RowFailure, RowIssue, RowOutcome,
};
pub use types::{
    CanonicalField, FingerprintMode, ImportMode, MatchMethod, PaymentStatus, RunState,
    Termination,
};
